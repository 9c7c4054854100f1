//! CAN Link Simulator
//!
//! Runs the link driver on the host: a bus thread plays the controller's
//! interrupt context (synthetic traffic, loopback of transmitted frames,
//! injected bus-off faults) while a blocking main loop consumes frames,
//! echoes some of them back and polls bus-off recovery.

use can_link::mock::{MockController, MockFifo};
use can_link::{
    CanController, CanFrame, CanLink, Clock, ErrorFlags, Frame, LinkConfig, LinkShared,
    RecoveryOutcome, SendError, StatusSnapshot,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Identifier bit marking frames the simulator echoed itself
const ECHO_FLAG: u32 = 0x400;

/// Hardware receive FIFO depth of the simulated controller
const FIFO_DEPTH: usize = 3;

/// Simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Link settings handed to the driver
    pub link: LinkConfig,
    /// Probe the bit rate instead of using `link.baud_rate`
    pub auto_baud: bool,
    /// Synthetic frames per second from the bus thread
    pub traffic_hz: u32,
    /// Inject a bus-off notification every N bus frames (0 = never)
    pub bus_off_every: u32,
    /// Echo every Nth received standard frame (0 = never)
    pub echo_every: u32,
    /// Main-loop period (ms)
    pub poll_interval_ms: u64,
    /// Status report period (ms)
    pub report_interval_ms: u64,
    /// Stop after this long (ms); 0 runs until Ctrl-C
    pub run_ms: u64,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            auto_baud: false,
            traffic_hz: 200,
            bus_off_every: 1000,
            echo_every: 10,
            poll_interval_ms: 5,
            report_interval_ms: 1000,
            run_ms: 0,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// Load configuration from an optional file plus `CANSIM_*` environment
/// variables (`CANSIM_LINK__BAUD_RATE=500000`).
///
/// Without an explicit path `can-sim.toml` in the working directory is used
/// if it exists.
pub fn load_config(path: Option<&str>) -> Result<SimConfig, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::with_name(path.unwrap_or("can-sim")).required(path.is_some()))
        .add_source(
            config::Environment::with_prefix("CANSIM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

/// Initialize logging
///
/// An unrecognised level falls back to INFO and is reported once the
/// subscriber is installed.
pub fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let parsed = parse_level(level);
    let builder = FmtSubscriber::builder()
        .with_max_level(parsed.unwrap_or(Level::INFO))
        .with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    if parsed.is_none() {
        warn!("Unknown log level {:?}, using info", level);
    }
    Ok(())
}

fn parse_level(level: &str) -> Option<Level> {
    level.trim().parse::<Level>().ok()
}

/// Wall-clock tick source relative to simulator start
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // Wraps after ~49 days like a 32-bit hardware tick
        self.origin.elapsed().as_millis() as u32
    }

    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// Deterministic stream of bus frames: mostly standard ids, every fifth
/// frame extended, payload length cycling through 0..=8.
#[derive(Debug, Default)]
pub struct SyntheticBus {
    seq: u32,
}

impl SyntheticBus {
    pub fn next_frame(&mut self) -> Option<CanFrame> {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);

        let (raw, extended) = if seq % 5 == 4 {
            (0x18FF_0000 | (seq & 0xFF), true)
        } else {
            (0x100 + (seq & 0x0F), false)
        };
        let len = (seq % 9) as usize;
        let payload = [seq as u8; 8];

        CanFrame::make_id(raw, extended).and_then(|id| CanFrame::new(id, &payload[..len]))
    }

    pub fn produced(&self) -> u32 {
        self.seq
    }
}

/// Counters kept by the bus thread
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BusStats {
    pub generated: u32,
    pub looped_back: u32,
    pub fifo_overruns: u32,
    pub bus_off_injected: u32,
}

/// Final numbers of a simulation run
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SimReport {
    pub status: StatusSnapshot,
    pub bus: BusStats,
    pub consumed: u32,
    pub echoed: u32,
    pub send_retries: u32,
}

/// Start the thread that plays interrupt context.
pub fn spawn_bus<const N: usize>(
    shared: Arc<LinkShared<N>>,
    clock: SystemClock,
    config: &SimConfig,
    loopback: Receiver<CanFrame>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<BusStats> {
    let period = Duration::from_secs_f64(1.0 / config.traffic_hz.max(1) as f64);
    let bus_off_every = config.bus_off_every;

    std::thread::spawn(move || {
        let mut bus = SyntheticBus::default();
        let mut fifo = MockFifo::with_depth(FIFO_DEPTH).with_source(loopback);
        let mut stats = BusStats::default();

        while !shutdown.load(Ordering::Acquire) {
            std::thread::sleep(period);

            if let Some(frame) = bus.next_frame() {
                fifo.inject(frame);
            }
            stats.looped_back += fifo.pump() as u32;
            shared.on_rx_pending(&mut fifo, &clock);

            if bus_off_every > 0 && bus.produced() % bus_off_every == 0 {
                debug!("Injecting bus-off after {} frames", bus.produced());
                shared.on_error((ErrorFlags::BUS_OFF | ErrorFlags::ERROR_PASSIVE).bits());
                stats.bus_off_injected += 1;
            }
        }

        stats.generated = bus.produced();
        stats.fifo_overruns = fifo.overruns();
        stats
    })
}

/// Main-loop counters
#[derive(Debug, Default)]
struct LoopStats {
    consumed: u32,
    echoed: u32,
    send_retries: u32,
}

/// Poll loop: drain frames, echo, recover, report. Runs until `shutdown`.
fn main_loop<C, K, const N: usize>(
    link: &mut CanLink<'_, C, K, N>,
    config: &SimConfig,
    shutdown: &AtomicBool,
) -> LoopStats
where
    C: CanController,
    K: Clock,
{
    let mut stats = LoopStats::default();
    let poll = Duration::from_millis(config.poll_interval_ms);
    let report = Duration::from_millis(config.report_interval_ms.max(1));
    let mut last_report = Instant::now();

    while !shutdown.load(Ordering::Acquire) {
        while let Some(rx) = link.pop() {
            stats.consumed += 1;
            debug!(frame = ?rx.summary(), "Received");

            let id = rx.frame.raw_id();
            let echo = config.echo_every > 0
                && !rx.is_extended()
                && id & ECHO_FLAG == 0
                && stats.consumed % config.echo_every == 0;
            if !echo {
                continue;
            }

            match link.send(id | ECHO_FLAG, rx.data(), false) {
                Ok(()) => stats.echoed += 1,
                Err(SendError::NoMailboxAvailable) => stats.send_retries += 1,
                Err(e) => warn!("Echo of {:#X} failed: {}", id, e),
            }
        }

        match link.check_and_recover() {
            Ok(RecoveryOutcome::Recovered) => info!("Link recovered from bus-off"),
            Ok(RecoveryOutcome::Idle) => {}
            Err(e) => warn!("Recovery attempt failed: {}", e),
        }

        if last_report.elapsed() >= report {
            last_report = Instant::now();
            let status = link.status();
            match serde_json::to_string(&status) {
                Ok(json) => info!("status {}", json),
                Err(e) => warn!("Status serialization failed: {}", e),
            }
        }

        std::thread::sleep(poll);
    }

    stats
}

/// Run a full simulation until Ctrl-C or `run_ms` elapses
pub async fn run_simulation(config: SimConfig) -> anyhow::Result<SimReport> {
    let shared: Arc<LinkShared> = Arc::new(LinkShared::new());
    let shutdown = Arc::new(AtomicBool::new(false));
    let clock = SystemClock::new();

    let (loopback_tx, loopback_rx) = mpsc::channel();
    let controller = MockController::new().with_loopback(loopback_tx);

    let bus = spawn_bus(
        Arc::clone(&shared),
        clock,
        &config,
        loopback_rx,
        Arc::clone(&shutdown),
    );

    let poll = {
        let shared = Arc::clone(&shared);
        let shutdown = Arc::clone(&shutdown);
        let config = config.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<LoopStats> {
            let mut link = CanLink::new(controller, clock, &*shared, config.link.clone());
            link.initialize()?;
            if config.auto_baud {
                let rate = link.auto_baud(200)?;
                info!("Using detected bit rate {}", rate);
            }
            Ok(main_loop(&mut link, &config, &shutdown))
        })
    };

    if config.run_ms > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(config.run_ms)) => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }
    } else {
        tokio::signal::ctrl_c().await?;
        info!("Interrupted");
    }

    info!("Shutting down simulator");
    shutdown.store(true, Ordering::Release);

    let loop_stats = poll.await??;
    let bus = bus
        .join()
        .map_err(|_| anyhow::anyhow!("bus thread panicked"))?;

    Ok(SimReport {
        status: shared.snapshot(),
        bus,
        consumed: loop_stats.consumed,
        echoed: loop_stats.echoed,
        send_retries: loop_stats.send_retries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();
        assert_eq!(config.link.baud_rate, 125_000);
        assert_eq!(config.link.recovery_delay_ms, 100);
        assert!(!config.auto_baud);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level(" WARN "), Some(Level::WARN));
        assert_eq!(parse_level("verbose"), None);
        assert_eq!(parse_level(""), None);
    }

    #[test]
    fn test_load_config_from_file() {
        let path = std::env::temp_dir().join(format!("can-sim-test-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "traffic_hz = 50\nrun_ms = 10\n\n[link]\nbaud_rate = 500000\n",
        )
        .unwrap();

        let config = load_config(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.traffic_hz, 50);
        assert_eq!(config.run_ms, 10);
        assert_eq!(config.link.baud_rate, 500_000);
        // Untouched fields keep their defaults
        assert_eq!(config.link.bus_load_window_ms, 1000);
        assert_eq!(config.echo_every, 10);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(load_config(Some("/nonexistent/can-sim-config.toml")).is_err());
    }

    #[test]
    fn test_synthetic_bus_pattern() {
        let mut bus = SyntheticBus::default();
        let frames: Vec<CanFrame> = (0..10).map(|_| bus.next_frame().unwrap()).collect();

        assert_eq!(frames[0].raw_id(), 0x100);
        assert_eq!(frames[0].dlc(), 0);
        assert!(frames[4].is_extended());
        assert_eq!(frames[4].raw_id(), 0x18FF_0004);
        assert_eq!(frames[8].dlc(), 8);
        assert_eq!(bus.produced(), 10);
    }

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock::new();
        let before = clock.now_ms();
        clock.delay_ms(5);
        assert!(clock.now_ms() >= before + 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_short_simulation() {
        let config = SimConfig {
            traffic_hz: 500,
            bus_off_every: 0,
            run_ms: 200,
            ..Default::default()
        };

        let report = run_simulation(config).await.unwrap();

        assert!(report.status.initialized);
        assert!(report.bus.generated > 0);
        assert!(report.status.rx_frames > 0);
        assert!(report.consumed <= report.status.rx_frames);
        assert_eq!(report.status.tx_frames, report.echoed);
        assert_eq!(report.status.bus_off_events, 0);
    }
}
