//! Bounded connection retry with a fixed delay.
//!
//! The retry budget is an explicit state machine so that attempt counting and
//! failure reporting can be exercised without a network:
//!
//! ```text
//! Idle --begin--> Connecting{1} --failure--> Connecting{2} ... --> Failed
//!                      |
//!                      +--success--> Connected
//! ```
//!
//! `retry_async` drives the machine around an async operation.

use crate::config::CommConfig;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Fixed delay between two attempts.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: CommConfig::CONNECT_MAX_ATTEMPTS,
            delay: CommConfig::CONNECT_RETRY_DELAY,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts. At least one attempt is always made.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Observable state of a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Idle,
    /// Attempt `attempt` (1-based) is in flight or about to be.
    Connecting { attempt: u32 },
    Connected,
    Failed,
}

impl fmt::Display for ConnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectState::Idle => write!(f, "IDLE"),
            ConnectState::Connecting { attempt } => write!(f, "CONNECTING({})", attempt),
            ConnectState::Connected => write!(f, "CONNECTED"),
            ConnectState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Total delay accumulated.
    pub total_delay: Duration,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error message if failed.
    pub last_error: Option<String>,
}

/// Retry budget state machine.
///
/// Every transition is pushed to the observer, if one is attached, so other
/// tasks can watch attempts progress while the owner is busy retrying.
#[derive(Debug)]
pub struct ConnectMachine {
    config: RetryConfig,
    state: ConnectState,
    stats: RetryStats,
    observer: Option<watch::Sender<ConnectState>>,
}

impl ConnectMachine {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            state: ConnectState::Idle,
            stats: RetryStats::default(),
            observer: None,
        }
    }

    /// Publish every state transition on `observer`.
    pub fn with_observer(mut self, observer: watch::Sender<ConnectState>) -> Self {
        observer.send_replace(self.state);
        self.observer = Some(observer);
        self
    }

    fn set_state(&mut self, state: ConnectState) {
        self.state = state;
        if let Some(observer) = &self.observer {
            observer.send_replace(state);
        }
    }

    pub fn state(&self) -> ConnectState {
        self.state
    }

    pub fn stats(&self) -> &RetryStats {
        &self.stats
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Start a fresh attempt sequence and return the first attempt number.
    pub fn begin(&mut self) -> u32 {
        self.stats = RetryStats {
            attempts: 1,
            ..RetryStats::default()
        };
        self.set_state(ConnectState::Connecting { attempt: 1 });
        1
    }

    /// The current attempt succeeded.
    pub fn on_success(&mut self) {
        self.stats.success = true;
        self.stats.last_error = None;
        self.set_state(ConnectState::Connected);
    }

    /// The current attempt failed with a retryable error.
    ///
    /// Returns the delay to wait before the next attempt, or `None` once the
    /// budget is spent (the machine is then `Failed`).
    pub fn on_failure(&mut self, error: impl Into<String>) -> Option<Duration> {
        self.stats.last_error = Some(error.into());
        let attempt = match self.state {
            ConnectState::Connecting { attempt } => attempt,
            _ => self.stats.attempts,
        };

        if attempt >= self.config.max_attempts {
            self.set_state(ConnectState::Failed);
            return None;
        }

        let next = attempt + 1;
        self.stats.attempts = next;
        self.stats.total_delay += self.config.delay;
        self.set_state(ConnectState::Connecting { attempt: next });
        Some(self.config.delay)
    }

    /// The current attempt failed in a way retrying cannot fix.
    pub fn on_fatal(&mut self, error: impl Into<String>) {
        self.stats.last_error = Some(error.into());
        self.set_state(ConnectState::Failed);
    }

    /// Return to `Idle`, e.g. after the established channel was released.
    pub fn reset(&mut self) {
        self.set_state(ConnectState::Idle);
    }
}

/// Retry an async operation under the machine's fixed-delay budget.
///
/// `should_retry` decides whether an error consumes another attempt or ends
/// the sequence immediately.
pub async fn retry_async<F, Fut, T, E>(
    machine: &mut ConnectMachine,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    machine.begin();

    loop {
        let attempt = machine.stats().attempts;
        match operation().await {
            Ok(value) => {
                machine.on_success();
                if attempt > 1 {
                    debug!("Operation succeeded after {} attempts", attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if !should_retry(&e) {
                    debug!("Error is not retryable: {}", e);
                    machine.on_fatal(e.to_string());
                    return Err(e);
                }

                match machine.on_failure(e.to_string()) {
                    Some(delay) => {
                        debug!(
                            "Attempt {}/{} failed: {}. Retrying in {:?}",
                            attempt,
                            machine.config().max_attempts,
                            e,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(
                            "All {} attempts exhausted. Last error: {}",
                            machine.config().max_attempts,
                            e
                        );
                        return Err(e);
                    }
                }
            }
        }
    }
}
