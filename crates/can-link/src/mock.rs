//! In-memory collaborators for tests and host-side simulation
//!
//! `MockController` counts every call and can be told to refuse specific
//! operations. It is cheaply cloneable; clones share state so a test can keep
//! a handle after moving the controller into a link.

use crate::controller::{CanController, Clock, FilterConfig, Interrupts, RxFifo};
use crate::frame::CanFrame;
use crate::timing::BitTimingProfile;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

/// Error reported by the mock controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockError {
    Rejected(&'static str),
}

/// Number of times each controller operation ran
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub start: u32,
    pub stop: u32,
    pub reset: u32,
    pub init: u32,
    pub filter: u32,
    pub interrupts: u32,
    pub transmit: u32,
    pub free_mailboxes: u32,
}

#[derive(Debug)]
struct MockState {
    calls: CallCounts,
    running: bool,
    timing: Option<BitTimingProfile>,
    filter: Option<FilterConfig>,
    interrupts: Interrupts,
    free_mailboxes: u8,
    rejected_rates: Vec<u32>,
    reject_transmit: bool,
    fail_start: bool,
    transmitted: Vec<CanFrame>,
    loopback: Option<Sender<CanFrame>>,
}

#[derive(Debug, Clone)]
pub struct MockController {
    state: Arc<Mutex<MockState>>,
}

impl MockController {
    /// Stopped controller with three free mailboxes, like bxCAN
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                calls: CallCounts::default(),
                running: false,
                timing: None,
                filter: None,
                interrupts: Interrupts::empty(),
                free_mailboxes: 3,
                rejected_rates: Vec::new(),
                reject_transmit: false,
                fail_start: false,
                transmitted: Vec::new(),
                loopback: None,
            })),
        }
    }

    /// Echo every transmitted frame into `tx`
    pub fn with_loopback(self, tx: Sender<CanFrame>) -> Self {
        self.lock().loopback = Some(tx);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the counters from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Bit rate of the timing currently applied
    pub fn current_rate(&self) -> Option<u32> {
        self.lock().timing.map(|t| t.baud_rate)
    }

    pub fn filter(&self) -> Option<FilterConfig> {
        self.lock().filter
    }

    pub fn interrupts(&self) -> Interrupts {
        self.lock().interrupts
    }

    pub fn transmitted(&self) -> Vec<CanFrame> {
        self.lock().transmitted.clone()
    }

    pub fn set_free_mailboxes(&self, free: u8) {
        self.lock().free_mailboxes = free;
    }

    /// Make `init` fail for this bit rate
    pub fn reject_rate(&self, baud_rate: u32) {
        self.lock().rejected_rates.push(baud_rate);
    }

    pub fn set_reject_transmit(&self, reject: bool) {
        self.lock().reject_transmit = reject;
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.lock().fail_start = fail;
    }
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

impl CanController for MockController {
    type Error = MockError;

    fn start(&mut self) -> Result<(), MockError> {
        let mut state = self.lock();
        state.calls.start += 1;
        if state.fail_start {
            return Err(MockError::Rejected("start"));
        }
        state.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MockError> {
        let mut state = self.lock();
        state.calls.stop += 1;
        state.running = false;
        Ok(())
    }

    fn reset(&mut self) {
        let mut state = self.lock();
        state.calls.reset += 1;
        state.running = false;
        state.timing = None;
        state.filter = None;
        state.interrupts = Interrupts::empty();
    }

    fn init(&mut self, timing: &BitTimingProfile, _auto_retransmission: bool) -> Result<(), MockError> {
        let mut state = self.lock();
        state.calls.init += 1;
        if state.rejected_rates.contains(&timing.baud_rate) {
            return Err(MockError::Rejected("init"));
        }
        state.timing = Some(*timing);
        Ok(())
    }

    fn configure_filter(&mut self, filter: &FilterConfig) -> Result<(), MockError> {
        let mut state = self.lock();
        state.calls.filter += 1;
        state.filter = Some(*filter);
        Ok(())
    }

    fn enable_interrupts(&mut self, interrupts: Interrupts) -> Result<(), MockError> {
        let mut state = self.lock();
        state.calls.interrupts += 1;
        state.interrupts |= interrupts;
        Ok(())
    }

    fn free_tx_mailboxes(&self) -> u8 {
        let mut state = self.lock();
        state.calls.free_mailboxes += 1;
        state.free_mailboxes
    }

    fn transmit(&mut self, frame: &CanFrame) -> Result<(), MockError> {
        let mut state = self.lock();
        state.calls.transmit += 1;
        if state.reject_transmit {
            return Err(MockError::Rejected("transmit"));
        }
        state.transmitted.push(*frame);
        if let Some(tx) = &state.loopback {
            // Receiver gone means nobody listens; the frame still went out
            let _ = tx.send(*frame);
        }
        Ok(())
    }
}

/// Receive FIFO fed by the test, optionally bounded like a hardware FIFO
#[derive(Debug, Default)]
pub struct MockFifo {
    queue: VecDeque<CanFrame>,
    depth: Option<usize>,
    overruns: u32,
    source: Option<Receiver<CanFrame>>,
}

impl MockFifo {
    pub fn new() -> Self {
        Self::default()
    }

    /// FIFO that holds at most `depth` frames and drops the rest
    pub fn with_depth(depth: usize) -> Self {
        Self {
            depth: Some(depth),
            ..Self::default()
        }
    }

    /// Pull frames from a channel, e.g. a loopback controller
    pub fn with_source(mut self, source: Receiver<CanFrame>) -> Self {
        self.source = Some(source);
        self
    }

    /// Queue a frame as if it arrived from the bus. Returns false on overrun.
    pub fn inject(&mut self, frame: CanFrame) -> bool {
        if self.depth.is_some_and(|depth| self.queue.len() >= depth) {
            self.overruns += 1;
            return false;
        }
        self.queue.push_back(frame);
        true
    }

    /// Move everything waiting on the source channel into the FIFO
    pub fn pump(&mut self) -> usize {
        let incoming: Vec<CanFrame> = match &self.source {
            Some(source) => source.try_iter().collect(),
            None => return 0,
        };
        incoming.into_iter().filter(|frame| self.inject(*frame)).count()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn overruns(&self) -> u32 {
        self.overruns
    }
}

impl RxFifo for MockFifo {
    fn receive(&mut self) -> Option<CanFrame> {
        self.queue.pop_front()
    }
}

type DelayHook = Box<dyn Fn(u32) + Send + Sync>;

/// Clock that only moves when told to. `delay_ms` advances it.
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU32,
    delays: AtomicU32,
    delayed_ms: AtomicU32,
    on_delay: Option<DelayHook>,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: AtomicU32::new(start_ms),
            ..Self::default()
        }
    }

    /// Run `hook` at the start of every delay, e.g. to deliver traffic
    pub fn with_delay_hook(mut self, hook: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_delay = Some(Box::new(hook));
        self
    }

    pub fn advance(&self, ms: u32) {
        self.now.fetch_add(ms, Ordering::AcqRel);
    }

    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::Release);
    }

    /// Number of `delay_ms` calls
    pub fn delays(&self) -> u32 {
        self.delays.load(Ordering::Acquire)
    }

    /// Sum of all requested delays
    pub fn delayed_ms(&self) -> u32 {
        self.delayed_ms.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &self.now)
            .field("delays", &self.delays)
            .finish()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::Acquire)
    }

    fn delay_ms(&self, ms: u32) {
        self.delays.fetch_add(1, Ordering::AcqRel);
        self.delayed_ms.fetch_add(ms, Ordering::AcqRel);
        if let Some(hook) = &self.on_delay {
            hook(ms);
        }
        self.advance(ms);
    }
}
