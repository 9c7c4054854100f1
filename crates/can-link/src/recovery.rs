//! Bus-off recovery
//!
//! Polled from the main loop. When the bus-off flag is up the controller is
//! given time to settle, then stopped and restarted. There is no backoff: a
//! bus that stays faulted is recovered again on every poll.

use crate::controller::{CanController, Clock};
use crate::error::RecoveryError;
use crate::link::CanLink;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Normal,
    Recovering,
}

/// Result of one recovery poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Bus-off flag was clear, nothing done
    Idle,
    /// A full stop/start cycle ran and the flag was cleared
    Recovered,
}

impl<'a, C, K, const N: usize> CanLink<'a, C, K, N>
where
    C: CanController,
    K: Clock,
{
    /// Run a recovery cycle if the controller went bus-off.
    ///
    /// Blocks for the configured recovery delay, so it must only be called
    /// from the main loop. If the controller fails to restart the flag stays
    /// set and the next poll tries again.
    pub fn check_and_recover(&mut self) -> Result<RecoveryOutcome, RecoveryError> {
        if !self.shared.status().is_bus_off() {
            return Ok(RecoveryOutcome::Idle);
        }

        warn!("Bus-off detected, recovering in {} ms", self.config.recovery_delay_ms);
        self.recovery = RecoveryState::Recovering;

        let result = self.restart_controller();
        self.recovery = RecoveryState::Normal;
        result?;

        self.shared.status().clear_bus_off();
        self.shared.status().record_recovery();
        info!("Bus-off recovery complete");
        Ok(RecoveryOutcome::Recovered)
    }

    fn restart_controller(&mut self) -> Result<(), RecoveryError> {
        self.clock.delay_ms(self.config.recovery_delay_ms);

        self.controller.stop().map_err(|e| {
            error!("Recovery: stop failed: {:?}", e);
            RecoveryError::Stop(format!("{:?}", e))
        })?;
        self.controller.start().map_err(|e| {
            error!("Recovery: restart failed: {:?}", e);
            RecoveryError::Start(format!("{:?}", e))
        })
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.recovery
    }
}
