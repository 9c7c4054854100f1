//! CAN Link Error Types

use thiserror::Error;

/// Errors raised while bringing the link up or changing its bit rate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No bit-timing profile for the requested rate
    #[error("Unsupported baud rate: {0} bit/s")]
    UnsupportedBaudRate(u32),

    /// Controller refused the parameter set
    #[error("Controller initialization failed: {0}")]
    HardwareInitFailed(String),

    /// No supported rate produced clean traffic
    #[error("Auto-baud detection found no matching bit rate")]
    AutoBaudFailed,
}

/// Errors raised by a frame submission. All of them are retriable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Classic CAN carries at most 8 data bytes
    #[error("Payload of {0} bytes exceeds the 8 byte CAN limit")]
    PayloadTooLong(usize),

    /// Identifier does not fit an 11 or 29 bit id
    #[error("Identifier {0:#X} out of range")]
    InvalidIdentifier(u32),

    /// Every transmit mailbox is busy
    #[error("No free transmit mailbox")]
    NoMailboxAvailable,

    /// Controller declined the frame
    #[error("Controller rejected frame: {0}")]
    HardwareRejected(String),
}

/// Errors raised by a bus-off recovery cycle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    #[error("Failed to stop controller: {0}")]
    Stop(String),

    #[error("Failed to restart controller: {0}")]
    Start(String),
}
