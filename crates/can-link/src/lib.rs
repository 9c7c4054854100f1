//! Interrupt-driven CAN Link Driver
//!
//! Brings a CAN controller up at one of four standard bit rates, moves
//! received frames from the controller's notification context into a
//! lock-free ring for the main loop, transmits without internal queuing,
//! aggregates fault notifications into sticky flags and counters, estimates
//! bus load and recovers automatically from bus-off.
//!
//! Interrupt-side entry points live on [`LinkShared`]; everything else goes
//! through the [`CanLink`] owned by the main loop.

mod busload;
mod config;
mod controller;
mod error;
mod frame;
mod link;
mod recovery;
mod shared;
mod status;
mod timing;

pub mod mock;

pub use busload::{BusLoadEstimator, DEFAULT_BITS_PER_FRAME, DEFAULT_WINDOW_MS};
pub use config::{LinkConfig, DEFAULT_RECOVERY_DELAY_MS};
pub use controller::{CanController, Clock, ErrorFlags, FilterConfig, FilterMode, Interrupts, RxFifo};
pub use error::{ConfigError, RecoveryError, SendError};
pub use frame::{CanFrame, FrameSummary, ReceivedFrame, MAX_DLC};
pub use link::CanLink;
pub use recovery::{RecoveryOutcome, RecoveryState};
pub use shared::{LinkShared, DEFAULT_RX_SLOTS};
pub use status::{LinkStatus, StatusSnapshot};
pub use timing::{BitTimingProfile, CONTROLLER_CLOCK_HZ, SUPPORTED_BAUD_RATES};

pub use embedded_can::{ExtendedId, Frame, Id, StandardId};
