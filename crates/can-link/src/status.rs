//! Link status aggregator
//!
//! One record shared between the error/receive notifications and the main
//! loop. Every field is an atomic so readers never hold up an interrupt.

use crate::controller::ErrorFlags;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Live link status. Counters only grow; fault flags stay set until the
/// recovery controller clears them.
#[derive(Debug)]
pub struct LinkStatus {
    initialized: AtomicBool,
    bus_off: AtomicBool,
    error_passive: AtomicBool,
    error_warning: AtomicBool,
    baud_rate: AtomicU32,
    bus_off_events: AtomicU32,
    error_passive_events: AtomicU32,
    error_warning_events: AtomicU32,
    error_events: AtomicU32,
    last_error_code: AtomicU32,
    tx_frames: AtomicU32,
    rx_frames: AtomicU32,
    rx_overflows: AtomicU32,
    recoveries: AtomicU32,
    /// f32 bit pattern
    bus_load: AtomicU32,
}

/// Point-in-time copy of [`LinkStatus`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub initialized: bool,
    pub bus_off: bool,
    pub error_passive: bool,
    pub error_warning: bool,
    pub baud_rate: u32,
    pub bus_off_events: u32,
    pub error_passive_events: u32,
    pub error_warning_events: u32,
    pub error_events: u32,
    pub last_error_code: u32,
    pub tx_frames: u32,
    pub rx_frames: u32,
    pub rx_overflows: u32,
    pub recoveries: u32,
    pub bus_load_percent: f32,
}

impl StatusSnapshot {
    /// Compact encoding for export over a debug link
    pub fn encode<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], postcard::Error> {
        postcard::to_slice(self, buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }

    /// Last error code as flags
    pub fn last_error(&self) -> ErrorFlags {
        ErrorFlags::from_bits_retain(self.last_error_code)
    }
}

impl LinkStatus {
    pub const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            bus_off: AtomicBool::new(false),
            error_passive: AtomicBool::new(false),
            error_warning: AtomicBool::new(false),
            baud_rate: AtomicU32::new(0),
            bus_off_events: AtomicU32::new(0),
            error_passive_events: AtomicU32::new(0),
            error_warning_events: AtomicU32::new(0),
            error_events: AtomicU32::new(0),
            last_error_code: AtomicU32::new(0),
            tx_frames: AtomicU32::new(0),
            rx_frames: AtomicU32::new(0),
            rx_overflows: AtomicU32::new(0),
            recoveries: AtomicU32::new(0),
            bus_load: AtomicU32::new(0),
        }
    }

    /// Error notification entry: record the raw mask and classify it
    pub fn record_error(&self, raw: u32) {
        let flags = ErrorFlags::from_bits_retain(raw);

        self.last_error_code.store(raw, Ordering::Release);
        self.error_events.fetch_add(1, Ordering::AcqRel);

        if flags.contains(ErrorFlags::BUS_OFF) {
            self.bus_off_events.fetch_add(1, Ordering::AcqRel);
            self.bus_off.store(true, Ordering::Release);
        }
        if flags.contains(ErrorFlags::ERROR_PASSIVE) {
            self.error_passive_events.fetch_add(1, Ordering::AcqRel);
            self.error_passive.store(true, Ordering::Release);
        }
        if flags.contains(ErrorFlags::ERROR_WARNING) {
            self.error_warning_events.fetch_add(1, Ordering::AcqRel);
            self.error_warning.store(true, Ordering::Release);
        }
    }

    pub fn record_rx(&self) {
        self.rx_frames.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_tx(&self) {
        self.tx_frames.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_overflow(&self) {
        self.rx_overflows.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::AcqRel);
    }

    pub fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::Release);
    }

    pub fn set_baud_rate(&self, baud_rate: u32) {
        self.baud_rate.store(baud_rate, Ordering::Release);
    }

    pub fn set_bus_load(&self, percent: f32) {
        self.bus_load.store(percent.to_bits(), Ordering::Release);
    }

    /// Only the recovery controller calls this
    pub(crate) fn clear_bus_off(&self) {
        self.bus_off.store(false, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_bus_off(&self) -> bool {
        self.bus_off.load(Ordering::Acquire)
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.load(Ordering::Acquire)
    }

    pub fn bus_load_percent(&self) -> f32 {
        f32::from_bits(self.bus_load.load(Ordering::Acquire))
    }

    pub fn rx_frames(&self) -> u32 {
        self.rx_frames.load(Ordering::Acquire)
    }

    pub fn error_events(&self) -> u32 {
        self.error_events.load(Ordering::Acquire)
    }

    /// Copy every field. Fields are read one by one, so a snapshot taken
    /// while an interrupt fires may mix values from before and after it.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            initialized: self.initialized.load(Ordering::Acquire),
            bus_off: self.bus_off.load(Ordering::Acquire),
            error_passive: self.error_passive.load(Ordering::Acquire),
            error_warning: self.error_warning.load(Ordering::Acquire),
            baud_rate: self.baud_rate.load(Ordering::Acquire),
            bus_off_events: self.bus_off_events.load(Ordering::Acquire),
            error_passive_events: self.error_passive_events.load(Ordering::Acquire),
            error_warning_events: self.error_warning_events.load(Ordering::Acquire),
            error_events: self.error_events.load(Ordering::Acquire),
            last_error_code: self.last_error_code.load(Ordering::Acquire),
            tx_frames: self.tx_frames.load(Ordering::Acquire),
            rx_frames: self.rx_frames.load(Ordering::Acquire),
            rx_overflows: self.rx_overflows.load(Ordering::Acquire),
            recoveries: self.recoveries.load(Ordering::Acquire),
            bus_load_percent: self.bus_load_percent(),
        }
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}
