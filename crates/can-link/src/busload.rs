//! Windowed bus-load estimator
//!
//! Sums estimated bits per frame and, once a monitoring window has elapsed,
//! turns the sum into a percentage of the nominal bit rate. The result is a
//! coarse duty-cycle figure refreshed once per window.

use std::sync::atomic::{AtomicU32, Ordering};

/// Default monitoring window
pub const DEFAULT_WINDOW_MS: u32 = 1000;

/// Representative size of one frame on the wire (arbitration, data, framing)
pub const DEFAULT_BITS_PER_FRAME: u32 = 128;

#[derive(Debug)]
pub struct BusLoadEstimator {
    bits: AtomicU32,
    window_start: AtomicU32,
    window_ms: AtomicU32,
}

impl BusLoadEstimator {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
            window_start: AtomicU32::new(0),
            window_ms: AtomicU32::new(DEFAULT_WINDOW_MS),
        }
    }

    pub fn set_window(&self, window_ms: u32) {
        self.window_ms.store(window_ms.max(1), Ordering::Release);
    }

    pub fn window_ms(&self) -> u32 {
        self.window_ms.load(Ordering::Acquire)
    }

    /// Drop the accumulated bits and start a new window at `now_ms`
    pub fn restart(&self, now_ms: u32) {
        self.bits.store(0, Ordering::Release);
        self.window_start.store(now_ms, Ordering::Release);
    }

    /// Bits counted in the current window so far
    pub fn accumulated_bits(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    /// Add a contribution. Returns the new percentage when this call closed
    /// the window; only one of several racing contributors gets it.
    ///
    /// The window start and the bit sum are separate words. A contribution
    /// racing with the closing call may land in the window that is being
    /// closed rather than the next one, so a window can be off by the frames
    /// in flight at rollover. No bits are lost either way.
    pub fn record(&self, bits: u32, now_ms: u32, baud_rate: u32) -> Option<f32> {
        self.bits.fetch_add(bits, Ordering::AcqRel);

        let start = self.window_start.load(Ordering::Acquire);
        if now_ms.wrapping_sub(start) < self.window_ms() {
            return None;
        }

        self.window_start
            .compare_exchange(start, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        let total = self.bits.swap(0, Ordering::AcqRel);
        Some(Self::percent(total, baud_rate))
    }

    fn percent(bits: u32, baud_rate: u32) -> f32 {
        if baud_rate == 0 {
            return 0.0;
        }
        (bits as f32 / baud_rate as f32) * 100.0
    }
}

impl Default for BusLoadEstimator {
    fn default() -> Self {
        Self::new()
    }
}
