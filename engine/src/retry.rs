//! Retrying a unit of work on lock contention.
//!
//! The embedded store has a single write lock that another process may hold
//! at boot. [`Retry::run`] hands the work a fresh session per attempt and
//! backs off linearly between attempts. Running out of attempts is not an
//! error: the caller gets [`RetryOutcome::Exhausted`] and decides.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use schema_boot_core::{ErrorClass, Session, Store, classify_error};

use crate::error::{EngineError, Result};

/// Attempt budget and linear backoff step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Something that can wait.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Result of a retried unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Completed(T),
    /// Every attempt hit lock contention.
    Exhausted { attempts: u32 },
}

/// Runs units of work under a [`RetryPolicy`].
#[derive(Clone)]
pub struct Retry {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Retry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry").field("policy", &self.policy).finish()
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Retry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Runs `work` until it succeeds, fails for a reason other than lock
    /// contention, or the attempt budget is spent.
    ///
    /// Each attempt gets a brand-new session. After contention the session
    /// is rolled back and disposed before sleeping, so no handle is held
    /// across the wait.
    ///
    /// # Errors
    ///
    /// Returns the first error that is not lock contention, after rolling
    /// back its session.
    pub fn run<T, F>(&self, store: &dyn Store, label: &str, mut work: F) -> Result<RetryOutcome<T>>
    where
        F: FnMut(&mut dyn Session) -> Result<T>,
    {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            let mut session = match store.session() {
                Ok(session) => session,
                Err(e) if classify_error(&e) == ErrorClass::LockContention => {
                    self.back_off(label, attempt, attempts, &EngineError::from(e));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match work(session.as_mut()) {
                Ok(value) => return Ok(RetryOutcome::Completed(value)),
                Err(e) if e.is_lock_contention() => {
                    if let Err(rollback) = session.rollback() {
                        debug!(label, error = %rollback, "rollback after contention failed");
                    }
                    session.dispose();
                    self.back_off(label, attempt, attempts, &e);
                }
                Err(e) => {
                    if let Err(rollback) = session.rollback() {
                        debug!(label, error = %rollback, "rollback after failure failed");
                    }
                    return Err(e);
                }
            }
        }

        warn!(label, attempts, "lock contention persisted, giving up");
        Ok(RetryOutcome::Exhausted { attempts })
    }

    fn back_off(&self, label: &str, attempt: u32, attempts: u32, error: &EngineError) {
        if attempt >= attempts {
            return;
        }
        let delay = self.policy.delay(attempt);
        warn!(
            label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "lock contention, retrying"
        );
        self.sleeper.sleep(delay);
    }
}
