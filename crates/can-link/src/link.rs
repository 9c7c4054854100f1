//! CAN link: configuration and transmission from the main loop

use crate::config::LinkConfig;
use crate::controller::{CanController, Clock, FilterConfig, Interrupts};
use crate::error::{ConfigError, SendError};
use crate::frame::{CanFrame, ReceivedFrame, MAX_DLC};
use crate::recovery::RecoveryState;
use crate::shared::{LinkShared, DEFAULT_RX_SLOTS};
use crate::status::StatusSnapshot;
use crate::timing::{BitTimingProfile, SUPPORTED_BAUD_RATES};
use embedded_can::Frame;
use tracing::{debug, error, info, warn};

/// Poll-context handle to the single CAN controller.
///
/// Owns the controller and the clock; borrows the state it shares with the
/// interrupt handlers.
pub struct CanLink<'a, C, K, const N: usize = DEFAULT_RX_SLOTS> {
    pub(crate) controller: C,
    pub(crate) clock: K,
    pub(crate) shared: &'a LinkShared<N>,
    pub(crate) config: LinkConfig,
    pub(crate) recovery: RecoveryState,
}

impl<'a, C, K, const N: usize> CanLink<'a, C, K, N>
where
    C: CanController,
    K: Clock,
{
    pub fn new(controller: C, clock: K, shared: &'a LinkShared<N>, config: LinkConfig) -> Self {
        shared.bus_load().set_window(config.bus_load_window_ms);
        shared.set_bits_per_frame(config.bits_per_frame);

        Self {
            controller,
            clock,
            shared,
            config,
            recovery: RecoveryState::Normal,
        }
    }

    /// Bring the controller into operation: bit timing, accept-all filter,
    /// start, notifications.
    pub fn initialize(&mut self) -> Result<(), ConfigError> {
        info!("Initializing CAN link at {} bit/s", self.config.baud_rate);

        self.configure(self.config.baud_rate)?;
        self.bring_up()?;
        self.shared.bus_load().restart(self.clock.now_ms());

        info!("CAN link initialized");
        Ok(())
    }

    /// Stop, reset and re-initialise the controller with the profile for
    /// `baud_rate`.
    ///
    /// An unsupported rate is rejected before the controller is touched. If
    /// the controller refuses the new timing it is left stopped; there is no
    /// rollback to the previous rate.
    ///
    /// The reset drops the filter bank and notification enables, so the link
    /// reads as not initialized until `initialize` brings it back up.
    pub fn configure(&mut self, baud_rate: u32) -> Result<(), ConfigError> {
        let Some(profile) = BitTimingProfile::lookup(baud_rate) else {
            warn!("Rejecting unsupported baud rate {}", baud_rate);
            return Err(ConfigError::UnsupportedBaudRate(baud_rate));
        };

        if let Err(e) = self.controller.stop() {
            debug!("Stop before reconfiguration failed: {:?}", e);
        }
        self.controller.reset();
        self.shared.status().set_initialized(false);

        if let Err(e) = self.controller.init(profile, self.config.auto_retransmission) {
            error!(
                "Controller rejected timing for {} bit/s, link left stopped: {:?}",
                baud_rate, e
            );
            return Err(Self::init_failed(e));
        }

        self.shared.status().set_baud_rate(baud_rate);
        self.shared.bus_load().restart(self.clock.now_ms());

        debug!(
            "Applied timing: prescaler={} tseg1={} tseg2={} sjw={}",
            profile.prescaler, profile.tseg1, profile.tseg2, profile.sjw
        );
        Ok(())
    }

    /// Route every frame into receive FIFO 0. No per-identifier filtering.
    pub fn configure_filter_accept_all(&mut self) -> Result<(), ConfigError> {
        self.controller
            .configure_filter(&FilterConfig::accept_all())
            .map_err(Self::init_failed)
    }

    /// Probe each supported rate, slowest first, and keep the first one that
    /// receives traffic without raising an error notification.
    ///
    /// Blocks for `listen_ms` per candidate. Main loop only.
    pub fn auto_baud(&mut self, listen_ms: u32) -> Result<u32, ConfigError> {
        info!("Starting auto-baud detection ({} ms per rate)", listen_ms);

        for rate in SUPPORTED_BAUD_RATES {
            if let Err(e) = self.configure(rate).and_then(|()| self.bring_up()) {
                warn!("Auto-baud: skipping {} bit/s: {}", rate, e);
                continue;
            }

            let status = self.shared.status();
            let (rx_before, errors_before) = (status.rx_frames(), status.error_events());
            self.clock.delay_ms(listen_ms);
            let (rx_after, errors_after) = (status.rx_frames(), status.error_events());

            if rx_after > rx_before && errors_after == errors_before {
                info!("Auto-baud detected {} bit/s", rate);
                self.config.baud_rate = rate;
                return Ok(rate);
            }
            debug!(
                "Auto-baud: {} bit/s saw {} frames and {} errors",
                rate,
                rx_after - rx_before,
                errors_after - errors_before
            );
        }

        warn!("Auto-baud detection failed");
        Err(ConfigError::AutoBaudFailed)
    }

    /// Submit one data frame. Never queues: a busy controller is reported
    /// straight back to the caller.
    pub fn send(&mut self, id: u32, payload: &[u8], extended: bool) -> Result<(), SendError> {
        if payload.len() > MAX_DLC {
            return Err(SendError::PayloadTooLong(payload.len()));
        }

        let frame = CanFrame::make_id(id, extended)
            .and_then(|id| CanFrame::new(id, payload))
            .ok_or(SendError::InvalidIdentifier(id))?;

        if self.controller.free_tx_mailboxes() == 0 {
            return Err(SendError::NoMailboxAvailable);
        }

        self.controller.transmit(&frame).map_err(|e| {
            warn!("Controller rejected frame {:#X}: {:?}", id, e);
            SendError::HardwareRejected(format!("{:?}", e))
        })?;

        self.shared.status().record_tx();
        self.feed_bus_load(self.shared.bits_per_frame());
        Ok(())
    }

    /// True if a received frame is waiting
    pub fn available(&self) -> bool {
        self.shared.available()
    }

    /// Take the oldest received frame
    pub fn pop(&mut self) -> Option<ReceivedFrame> {
        self.shared.pop()
    }

    /// Add a bit contribution to the bus-load window, stamped now
    pub fn feed_bus_load(&self, bits: u32) {
        self.shared.feed_bus_load(bits, self.clock.now_ms());
    }

    pub fn status(&self) -> StatusSnapshot {
        self.shared.snapshot()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn shared(&self) -> &'a LinkShared<N> {
        self.shared
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    /// Accept-all filter, start, notifications. Expects freshly applied timing.
    fn bring_up(&mut self) -> Result<(), ConfigError> {
        self.configure_filter_accept_all()?;
        self.controller.start().map_err(Self::init_failed)?;
        self.controller
            .enable_interrupts(Interrupts::LINK)
            .map_err(Self::init_failed)?;

        self.shared.status().set_initialized(true);
        Ok(())
    }

    fn init_failed(e: C::Error) -> ConfigError {
        ConfigError::HardwareInitFailed(format!("{:?}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{CallCounts, ManualClock, MockController, MockFifo};

    fn setup(shared: &LinkShared<8>) -> (CanLink<'_, MockController, ManualClock, 8>, MockController) {
        let controller = MockController::new();
        let handle = controller.clone();
        (
            CanLink::new(controller, ManualClock::new(0), shared, LinkConfig::default()),
            handle,
        )
    }

    #[test]
    fn test_initialize_brings_link_up() {
        let shared = LinkShared::new();
        let (mut link, ctrl) = setup(&shared);

        link.initialize().unwrap();

        assert!(ctrl.is_running());
        assert_eq!(ctrl.current_rate(), Some(125_000));
        assert_eq!(ctrl.filter(), Some(FilterConfig::accept_all()));
        assert_eq!(ctrl.interrupts(), Interrupts::LINK);

        let status = link.status();
        assert!(status.initialized);
        assert_eq!(status.baud_rate, 125_000);
    }

    #[test]
    fn test_configure_supported_rates() {
        let shared = LinkShared::new();
        let (mut link, ctrl) = setup(&shared);

        for rate in SUPPORTED_BAUD_RATES {
            link.configure(rate).unwrap();
            assert_eq!(link.status().baud_rate, rate);
            assert_eq!(ctrl.current_rate(), Some(rate));
        }
        assert_eq!(ctrl.calls().stop, 4);
        assert_eq!(ctrl.calls().reset, 4);
    }

    #[test]
    fn test_unsupported_rate_keeps_previous() {
        let shared = LinkShared::new();
        let (mut link, ctrl) = setup(&shared);
        link.initialize().unwrap();
        let before = ctrl.calls();

        let err = link.configure(100_000).unwrap_err();

        assert_eq!(err, ConfigError::UnsupportedBaudRate(100_000));
        assert_eq!(link.status().baud_rate, 125_000);
        assert_eq!(ctrl.calls(), before);
        assert!(ctrl.is_running());
    }

    #[test]
    fn test_rejected_init_leaves_link_stopped() {
        let shared = LinkShared::new();
        let (mut link, ctrl) = setup(&shared);
        link.initialize().unwrap();
        ctrl.reject_rate(500_000);

        let err = link.configure(500_000).unwrap_err();

        assert!(matches!(err, ConfigError::HardwareInitFailed(_)));
        assert_eq!(link.status().baud_rate, 125_000);
        assert!(!ctrl.is_running());
        assert!(!link.status().initialized);
        assert_eq!(ctrl.filter(), None);
    }

    #[test]
    fn test_reconfigure_needs_initialize() {
        let shared = LinkShared::new();
        let (mut link, ctrl) = setup(&shared);
        link.initialize().unwrap();

        link.configure(250_000).unwrap();
        assert!(!link.status().initialized);
        assert!(!ctrl.is_running());

        link.config.baud_rate = 250_000;
        link.initialize().unwrap();
        assert!(link.status().initialized);
        assert_eq!(ctrl.current_rate(), Some(250_000));
        assert_eq!(ctrl.interrupts(), Interrupts::LINK);
    }

    #[test]
    fn test_configure_restarts_bus_load_window() {
        let shared = LinkShared::new();
        let (mut link, _ctrl) = setup(&shared);
        link.initialize().unwrap();
        link.feed_bus_load(1000);
        link.clock().set(400);

        link.configure(250_000).unwrap();

        assert_eq!(shared.bus_load().accumulated_bits(), 0);
        link.clock().set(1300);
        link.feed_bus_load(128);
        // Window now starts at 400, so 1300 has not closed it
        assert_eq!(shared.bus_load().accumulated_bits(), 128);
    }

    #[test]
    fn test_send_counts_and_transmits() {
        let shared = LinkShared::new();
        let (mut link, ctrl) = setup(&shared);
        link.initialize().unwrap();

        link.send(0x123, &[1, 2, 3], false).unwrap();
        link.send(0x18DA_F110, &[0; 8], true).unwrap();

        let sent = ctrl.transmitted();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].raw_id(), 0x123);
        assert_eq!(sent[0].data(), &[1, 2, 3]);
        assert!(sent[1].is_extended());
        assert_eq!(link.status().tx_frames, 2);
        assert_eq!(shared.bus_load().accumulated_bits(), 256);
    }

    #[test]
    fn test_send_oversize_payload_never_reaches_controller() {
        let shared = LinkShared::new();
        let (mut link, ctrl) = setup(&shared);

        let err = link.send(0x100, &[0; 9], false).unwrap_err();

        assert_eq!(err, SendError::PayloadTooLong(9));
        assert_eq!(ctrl.calls(), CallCounts::default());
    }

    #[test]
    fn test_send_invalid_identifier() {
        let shared = LinkShared::new();
        let (mut link, ctrl) = setup(&shared);

        assert_eq!(
            link.send(0x800, &[], false),
            Err(SendError::InvalidIdentifier(0x800))
        );
        assert_eq!(ctrl.calls().transmit, 0);
    }

    #[test]
    fn test_send_without_mailbox() {
        let shared = LinkShared::new();
        let (mut link, ctrl) = setup(&shared);
        link.initialize().unwrap();
        ctrl.set_free_mailboxes(0);

        assert_eq!(link.send(0x100, &[1], false), Err(SendError::NoMailboxAvailable));
        assert_eq!(ctrl.calls().transmit, 0);
        assert_eq!(link.status().tx_frames, 0);

        ctrl.set_free_mailboxes(1);
        assert!(link.send(0x100, &[1], false).is_ok());
    }

    #[test]
    fn test_send_rejected_by_hardware() {
        let shared = LinkShared::new();
        let (mut link, ctrl) = setup(&shared);
        link.initialize().unwrap();
        ctrl.set_reject_transmit(true);

        let err = link.send(0x100, &[1], false).unwrap_err();

        assert!(matches!(err, SendError::HardwareRejected(_)));
        assert_eq!(link.status().tx_frames, 0);
        assert_eq!(shared.bus_load().accumulated_bits(), 0);
    }

    #[test]
    fn test_receive_through_link() {
        let shared = LinkShared::new();
        let (mut link, _ctrl) = setup(&shared);
        link.initialize().unwrap();
        let mut fifo = MockFifo::new();
        fifo.inject(CanFrame::new(CanFrame::make_id(0x7E8, false).unwrap(), &[0x41]).unwrap());

        assert!(!link.available());
        shared.on_rx_pending(&mut fifo, link.clock());
        assert!(link.available());
        assert_eq!(link.pop().unwrap().frame.raw_id(), 0x7E8);
        assert!(link.pop().is_none());
    }

    fn bus_frame() -> CanFrame {
        CanFrame::new(CanFrame::make_id(0x0C1, false).unwrap(), &[0xAA]).unwrap()
    }

    #[test]
    fn test_auto_baud_picks_clean_rate() {
        use crate::controller::ErrorFlags;
        use std::sync::Arc;

        let shared: Arc<LinkShared<8>> = Arc::new(LinkShared::new());
        let controller = MockController::new();
        let handle = controller.clone();
        let bus = Arc::clone(&shared);

        // 250k sees frames but also errors, 500k is the real bus rate.
        // Frames only reach the ring while the controller listens with a
        // filter and the pending notification enabled.
        let clock = ManualClock::new(0).with_delay_hook(move |_| {
            if !handle.is_running()
                || handle.filter().is_none()
                || !handle.interrupts().contains(Interrupts::RX_FIFO0_PENDING)
            {
                return;
            }
            let mut fifo = MockFifo::new();
            match handle.current_rate() {
                Some(250_000) => {
                    fifo.inject(bus_frame());
                    bus.on_error(ErrorFlags::STUFF.bits());
                }
                Some(500_000) => {
                    fifo.inject(bus_frame());
                }
                _ => {}
            }
            bus.on_rx_pending(&mut fifo, &ManualClock::new(0));
        });

        let mut link = CanLink::new(controller.clone(), clock, &*shared, LinkConfig::default());

        assert_eq!(link.auto_baud(50), Ok(500_000));
        assert_eq!(link.status().baud_rate, 500_000);
        assert_eq!(link.config().baud_rate, 500_000);
        assert_eq!(link.clock().delays(), 3);
        assert!(controller.is_running());
        assert_eq!(controller.filter(), Some(FilterConfig::accept_all()));
        assert_eq!(controller.interrupts(), Interrupts::LINK);
        assert!(link.status().initialized);
    }

    #[test]
    fn test_auto_baud_after_initialize_listens() {
        use std::sync::Arc;

        let shared: Arc<LinkShared<8>> = Arc::new(LinkShared::new());
        let controller = MockController::new();
        let handle = controller.clone();
        let bus = Arc::clone(&shared);

        let clock = ManualClock::new(0).with_delay_hook(move |_| {
            let listening = handle.is_running()
                && handle.filter().is_some()
                && handle.interrupts().contains(Interrupts::RX_FIFO0_PENDING);
            if listening && handle.current_rate() == Some(125_000) {
                let mut fifo = MockFifo::new();
                fifo.inject(bus_frame());
                bus.on_rx_pending(&mut fifo, &ManualClock::new(0));
            }
        });

        let mut link = CanLink::new(controller.clone(), clock, &*shared, LinkConfig::default());
        link.initialize().unwrap();

        assert_eq!(link.auto_baud(10), Ok(125_000));
        assert_eq!(link.clock().delays(), 1);
        assert!(link.status().initialized);
    }

    #[test]
    fn test_auto_baud_silent_bus_fails() {
        let shared = LinkShared::new();
        let (mut link, _ctrl) = setup(&shared);

        assert_eq!(link.auto_baud(20), Err(ConfigError::AutoBaudFailed));
        assert_eq!(link.clock().delays(), 4);
    }
}
