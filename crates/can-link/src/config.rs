//! Link configuration

use crate::busload::{DEFAULT_BITS_PER_FRAME, DEFAULT_WINDOW_MS};
use serde::{Deserialize, Serialize};

/// Default settle time before restarting a bus-off controller
pub const DEFAULT_RECOVERY_DELAY_MS: u32 = 100;

/// Link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Nominal bit rate applied by `initialize` (bit/s)
    pub baud_rate: u32,

    /// Wait before stopping and restarting a bus-off controller (ms)
    pub recovery_delay_ms: u32,

    /// Bus-load monitoring window (ms)
    pub bus_load_window_ms: u32,

    /// Estimated wire size of one frame (bits)
    pub bits_per_frame: u32,

    /// Let the controller retransmit frames that lost arbitration or went unacknowledged
    pub auto_retransmission: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: 125_000,
            recovery_delay_ms: DEFAULT_RECOVERY_DELAY_MS,
            bus_load_window_ms: DEFAULT_WINDOW_MS,
            bits_per_frame: DEFAULT_BITS_PER_FRAME,
            auto_retransmission: true,
        }
    }
}

impl LinkConfig {
    /// 1 Mbit/s link
    pub fn high_speed() -> Self {
        Self {
            baud_rate: 1_000_000,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::BitTimingProfile;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.baud_rate, 125_000);
        assert_eq!(config.recovery_delay_ms, 100);
        assert_eq!(config.bus_load_window_ms, 1000);
        assert_eq!(config.bits_per_frame, 128);
        assert!(config.auto_retransmission);
    }

    #[test]
    fn test_high_speed_preset() {
        let config = LinkConfig::high_speed();
        assert_eq!(config.baud_rate, 1_000_000);
        assert!(BitTimingProfile::lookup(config.baud_rate).is_some());
        assert_eq!(
            LinkConfig {
                baud_rate: 125_000,
                ..config
            },
            LinkConfig::default()
        );
    }
}
