//! Boundary with the CAN controller, its receive FIFO and the tick source

use crate::frame::CanFrame;
use crate::timing::BitTimingProfile;
use std::fmt::Debug;

bitflags::bitflags! {
    /// Raw error bitmask as reported by the controller's error notification.
    ///
    /// Bit layout follows the bxCAN HAL error codes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ErrorFlags: u32 {
        const ERROR_WARNING = 1 << 0;
        const ERROR_PASSIVE = 1 << 1;
        const BUS_OFF = 1 << 2;
        const STUFF = 1 << 3;
        const FORM = 1 << 4;
        const ACK = 1 << 5;
        const BIT_RECESSIVE = 1 << 6;
        const BIT_DOMINANT = 1 << 7;
        const CRC = 1 << 8;
        const RX_FIFO0_OVERRUN = 1 << 9;
        const RX_FIFO1_OVERRUN = 1 << 10;
        const TX_ARB_LOST0 = 1 << 11;
        const TX_ERR0 = 1 << 12;
    }
}

bitflags::bitflags! {
    /// Controller notifications the link depends on
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interrupts: u32 {
        const RX_FIFO0_PENDING = 1 << 1;
        const ERROR_WARNING = 1 << 8;
        const ERROR_PASSIVE = 1 << 9;
        const BUS_OFF = 1 << 10;
        const LAST_ERROR_CODE = 1 << 11;
    }
}

impl Interrupts {
    /// Reception plus every fault notification
    pub const LINK: Self = Self::RX_FIFO0_PENDING
        .union(Self::ERROR_WARNING)
        .union(Self::ERROR_PASSIVE)
        .union(Self::BUS_OFF)
        .union(Self::LAST_ERROR_CODE);
}

/// Acceptance filter matching mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    IdMask,
}

/// Acceptance filter bank setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterConfig {
    pub bank: u8,
    pub mode: FilterMode,
    /// 32-bit scale when true, dual 16-bit otherwise
    pub scale_32bit: bool,
    pub id: u32,
    pub mask: u32,
    /// Receive FIFO the bank feeds
    pub fifo: u8,
    pub active: bool,
}

impl FilterConfig {
    /// Bank 0, mask 0: every frame lands in FIFO 0
    pub const fn accept_all() -> Self {
        Self {
            bank: 0,
            mode: FilterMode::IdMask,
            scale_32bit: true,
            id: 0,
            mask: 0,
            fifo: 0,
            active: true,
        }
    }

    pub fn accepts(&self, raw_id: u32) -> bool {
        match self.mode {
            FilterMode::IdMask => raw_id & self.mask == self.id & self.mask,
        }
    }
}

/// Register-level controller driver
pub trait CanController {
    type Error: Debug;

    /// Leave initialization mode and join the bus
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Leave the bus and enter initialization mode
    fn stop(&mut self) -> Result<(), Self::Error>;

    /// Return the peripheral to its reset state
    fn reset(&mut self);

    /// Apply bit timing; fails if the controller rejects the combination
    fn init(&mut self, timing: &BitTimingProfile, auto_retransmission: bool)
        -> Result<(), Self::Error>;

    fn configure_filter(&mut self, filter: &FilterConfig) -> Result<(), Self::Error>;

    fn enable_interrupts(&mut self, interrupts: Interrupts) -> Result<(), Self::Error>;

    /// Number of idle transmit mailboxes
    fn free_tx_mailboxes(&self) -> u8;

    /// Place a frame in a free mailbox
    fn transmit(&mut self, frame: &CanFrame) -> Result<(), Self::Error>;
}

/// Hardware receive FIFO, drained from the message-pending notification
pub trait RxFifo {
    /// Next pending frame, `None` once the FIFO is empty
    fn receive(&mut self) -> Option<CanFrame>;
}

/// Monotonic millisecond tick and blocking delay
pub trait Clock {
    fn now_ms(&self) -> u32;

    /// Busy or sleeping wait. Never called from interrupt context.
    fn delay_ms(&self, ms: u32);
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }

    fn delay_ms(&self, ms: u32) {
        (**self).delay_ms(ms)
    }
}
