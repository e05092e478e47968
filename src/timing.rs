//! Timing policy: how long to wait between actions, how long one attempt may
//! run, and how long to pause before a retry.
//!
//! The policy is resolved once from a [`RunConfiguration`] before the run
//! starts; the engine never branches on the run mode again after that.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RunConfiguration;

/// Default per-attempt timeout (seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of retries after a failed attempt
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Inter-action delay substituted by slow mode when no explicit delay is set
pub const SLOW_MODE_DELAY: Duration = Duration::from_millis(500);

/// Lower bound for the pause before a retry attempt
pub const MIN_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Execution mode for a run. Resolved into concrete durations by
/// [`TimingPolicy`]; forwarded to the browser collaborator, which owns the
/// policy for what "test" suppresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Full-speed execution, headless browser
    #[default]
    Normal,
    /// Insert a delay between actions so a human can follow along
    Slow,
    /// Visible browser; the collaborator may suppress irreversible effects
    Test,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Normal => f.write_str("normal"),
            RunMode::Slow => f.write_str("slow"),
            RunMode::Test => f.write_str("test"),
        }
    }
}

/// Strategy deciding the pause before retry attempt `n` (first retry is 1).
///
/// The shipped strategy is constant-interval; exponential backoff can be
/// plugged in here without touching the engine.
pub trait BackoffStrategy: Send + Sync {
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
}

/// Constant-interval retry: every attempt waits the same duration
#[derive(Debug, Clone, Copy)]
pub struct ConstantBackoff(pub Duration);

impl BackoffStrategy for ConstantBackoff {
    fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Concrete durations for one run
pub struct TimingPolicy {
    between_actions: Duration,
    attempt_timeout: Duration,
    backoff: Box<dyn BackoffStrategy>,
}

impl std::fmt::Debug for TimingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingPolicy")
            .field("between_actions", &self.between_actions)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl TimingPolicy {
    /// Derive the effective policy from a run configuration.
    ///
    /// An explicit `action_delay` always wins over the mode-implied default;
    /// slow mode substitutes [`SLOW_MODE_DELAY`]; normal and test modes run
    /// with no inter-action delay.
    pub fn resolve(config: &RunConfiguration) -> Self {
        let between_actions = match (config.action_delay, config.mode) {
            (Some(delay), _) => delay,
            (None, RunMode::Slow) => SLOW_MODE_DELAY,
            (None, _) => Duration::ZERO,
        };

        let backoff = ConstantBackoff(between_actions.max(MIN_RETRY_BACKOFF));

        Self {
            between_actions,
            attempt_timeout: Duration::from_secs(config.timeout_secs),
            backoff: Box::new(backoff),
        }
    }

    /// Replace the retry strategy (extension point; default is constant)
    pub fn with_backoff(mut self, backoff: Box<dyn BackoffStrategy>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay applied between consecutive rows
    pub fn delay_between_actions(&self) -> Duration {
        self.between_actions
    }

    /// Upper bound for one action attempt
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Pause before retry attempt `attempt` (1 = first retry)
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }
}
