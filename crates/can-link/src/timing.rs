//! Bit-timing table
//!
//! Prescaler and segment lengths for the supported bit rates, computed for a
//! 36 MHz controller clock (APB1 on the reference board).

use serde::Serialize;

/// Controller input clock the table is computed for
pub const CONTROLLER_CLOCK_HZ: u32 = 36_000_000;

/// Bit rates with a timing profile, ascending
pub const SUPPORTED_BAUD_RATES: [u32; 4] = [125_000, 250_000, 500_000, 1_000_000];

/// Timing parameters for one bit rate, segment lengths in time quanta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BitTimingProfile {
    pub baud_rate: u32,
    pub prescaler: u16,
    pub tseg1: u8,
    pub tseg2: u8,
    pub sjw: u8,
}

static PROFILES: [BitTimingProfile; 4] = [
    BitTimingProfile {
        baud_rate: 125_000,
        prescaler: 18,
        tseg1: 13,
        tseg2: 2,
        sjw: 1,
    },
    BitTimingProfile {
        baud_rate: 250_000,
        prescaler: 9,
        tseg1: 13,
        tseg2: 2,
        sjw: 1,
    },
    BitTimingProfile {
        baud_rate: 500_000,
        prescaler: 6,
        tseg1: 9,
        tseg2: 2,
        sjw: 1,
    },
    BitTimingProfile {
        baud_rate: 1_000_000,
        prescaler: 3,
        tseg1: 9,
        tseg2: 2,
        sjw: 1,
    },
];

impl BitTimingProfile {
    /// Find the profile for a bit rate
    pub fn lookup(baud_rate: u32) -> Option<&'static BitTimingProfile> {
        PROFILES.iter().find(|p| p.baud_rate == baud_rate)
    }

    /// All profiles, ascending by bit rate
    pub fn all() -> &'static [BitTimingProfile] {
        &PROFILES
    }

    /// Sync segment plus both time segments
    pub fn quanta_per_bit(&self) -> u32 {
        1 + self.tseg1 as u32 + self.tseg2 as u32
    }

    /// Bit rate this profile yields for a given controller clock
    pub fn bitrate(&self, clock_hz: u32) -> u32 {
        clock_hz / (self.prescaler as u32 * self.quanta_per_bit())
    }

    /// Sample point position in tenths of a percent
    pub fn sample_point_permille(&self) -> u32 {
        (1 + self.tseg1 as u32) * 1000 / self.quanta_per_bit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_supported_rates() {
        for rate in SUPPORTED_BAUD_RATES {
            let profile = BitTimingProfile::lookup(rate).unwrap();
            assert_eq!(profile.baud_rate, rate);
        }
    }

    #[test]
    fn test_lookup_rejects_unknown() {
        assert!(BitTimingProfile::lookup(0).is_none());
        assert!(BitTimingProfile::lookup(100_000).is_none());
        assert!(BitTimingProfile::lookup(800_000).is_none());
    }

    #[test]
    fn test_profiles_hit_their_rate() {
        for profile in BitTimingProfile::all() {
            assert_eq!(profile.bitrate(CONTROLLER_CLOCK_HZ), profile.baud_rate);
        }
    }

    #[test]
    fn test_sample_points() {
        // 14/16 and 10/12
        assert_eq!(BitTimingProfile::lookup(125_000).unwrap().sample_point_permille(), 875);
        assert_eq!(BitTimingProfile::lookup(1_000_000).unwrap().sample_point_permille(), 833);
    }
}
