//! Encoder restart policy
//!
//! The retry budget, backoff and frame-rate degradation knobs for the push
//! channel, plus the pure rate function so throttling is testable without
//! touching any process I/O.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy governing encoder restarts after transport failures
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Consecutive restarts allowed before the channel gives up
    pub max_consecutive_restarts: u32,

    /// Wait before each reconnect attempt, in milliseconds
    pub backoff_ms: u64,

    /// Lowest frame rate the push may be throttled to
    pub floor_fps: u32,

    /// Frame-rate reduction applied per consecutive restart
    pub degradation_step: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_restarts: 5,
            backoff_ms: 1000,
            floor_fps: 10,
            degradation_step: 5,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay as a `Duration`
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Frame rate to hand a freshly spawned encoder after `restarts`
    /// consecutive failures.
    ///
    /// Repeated restarts under load mean the encoder cannot sustain the
    /// nominal rate, so the target drops one step per consecutive failure,
    /// clamped to `[floor_fps, nominal]`.
    pub fn degraded_rate(&self, nominal_fps: u32, restarts: u32) -> u32 {
        let floor = self.floor_fps.min(nominal_fps);
        nominal_fps
            .saturating_sub(self.degradation_step.saturating_mul(restarts))
            .clamp(floor, nominal_fps)
    }
}
