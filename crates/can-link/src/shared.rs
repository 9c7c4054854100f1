//! State shared between interrupt context and the main loop
//!
//! Interrupt handlers only ever see `&LinkShared`: the receive ring, the
//! status record and the bus-load estimator, all lock-free. Firmware keeps
//! one instance in a `static`.

use crate::busload::{BusLoadEstimator, DEFAULT_BITS_PER_FRAME};
use crate::controller::{Clock, RxFifo};
use crate::frame::ReceivedFrame;
use crate::status::{LinkStatus, StatusSnapshot};
use ring_buffer::RingBuffer;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default receive ring size; holds `DEFAULT_RX_SLOTS - 1` frames
pub const DEFAULT_RX_SLOTS: usize = 32;

pub struct LinkShared<const N: usize = DEFAULT_RX_SLOTS> {
    rx: RingBuffer<ReceivedFrame, N>,
    status: LinkStatus,
    bus_load: BusLoadEstimator,
    bits_per_frame: AtomicU32,
}

impl<const N: usize> LinkShared<N> {
    pub const fn new() -> Self {
        Self {
            rx: RingBuffer::new(),
            status: LinkStatus::new(),
            bus_load: BusLoadEstimator::new(),
            bits_per_frame: AtomicU32::new(DEFAULT_BITS_PER_FRAME),
        }
    }

    /// Message-pending notification: drain the hardware FIFO into the ring.
    ///
    /// Frames that find the ring full are counted as received and as an
    /// overflow, then dropped; nothing already queued is touched. Returns the
    /// number of frames read from the FIFO.
    pub fn on_rx_pending<F, K>(&self, fifo: &mut F, clock: &K) -> usize
    where
        F: RxFifo + ?Sized,
        K: Clock + ?Sized,
    {
        let mut drained = 0;
        while let Some(frame) = fifo.receive() {
            let now = clock.now_ms();
            self.status.record_rx();
            self.feed_bus_load(self.bits_per_frame(), now);

            if self.rx.push(ReceivedFrame::new(frame, now)).is_err() {
                self.status.record_overflow();
            }
            drained += 1;
        }
        drained
    }

    /// Error notification with the controller's raw error mask
    pub fn on_error(&self, raw: u32) {
        self.status.record_error(raw);
    }

    /// Add a bit contribution to the bus-load window
    pub fn feed_bus_load(&self, bits: u32, now_ms: u32) {
        if let Some(percent) = self.bus_load.record(bits, now_ms, self.status.baud_rate()) {
            self.status.set_bus_load(percent);
        }
    }

    /// True if at least one frame is waiting
    pub fn available(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Take the oldest waiting frame
    pub fn pop(&self) -> Option<ReceivedFrame> {
        self.rx.pop()
    }

    /// Frames currently waiting
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Frames the ring can hold
    pub const fn rx_capacity(&self) -> usize {
        N - 1
    }

    pub fn status(&self) -> &LinkStatus {
        &self.status
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn bus_load(&self) -> &BusLoadEstimator {
        &self.bus_load
    }

    pub(crate) fn set_bits_per_frame(&self, bits: u32) {
        self.bits_per_frame.store(bits, Ordering::Release);
    }

    pub(crate) fn bits_per_frame(&self) -> u32 {
        self.bits_per_frame.load(Ordering::Acquire)
    }
}

impl<const N: usize> Default for LinkShared<N> {
    fn default() -> Self {
        Self::new()
    }
}
