//! Lock contention retry
//!
//! SQLite allows one writer at a time. Writers that lose the race see
//! "database is locked" once the busy timeout expires; those calls are
//! repeated with doubling delays until `EngineConfig::db_max_lock_wait_ms`
//! is spent. Any other error is returned on the first attempt.

use imgedit_common::time::millis_to_duration;
use imgedit_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};

const FIRST_DELAY_MS: u64 = 10;
const DELAY_CAP_MS: u64 = 1_000;

/// Doubling delay schedule bounded by a total wait budget
#[derive(Debug)]
pub(crate) struct Backoff {
    started: Instant,
    budget: Duration,
    next_delay_ms: u64,
}

impl Backoff {
    pub(crate) fn new(max_wait_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            budget: millis_to_duration(max_wait_ms),
            next_delay_ms: FIRST_DELAY_MS,
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Delay before the next attempt, or None once the budget is used up
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.budget.checked_sub(self.elapsed())?;
        if remaining.is_zero() {
            return None;
        }
        let delay = millis_to_duration(self.next_delay_ms).min(remaining);
        self.next_delay_ms = (self.next_delay_ms * 2).min(DELAY_CAP_MS);
        Some(delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-lock error, or the
/// wait budget runs out.
///
/// `operation` is called afresh for every attempt, so it must not hold a
/// transaction across calls.
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Backoff::new(max_wait_ms);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempts,
                        waited_ms = backoff.elapsed().as_millis() as u64,
                        "Write went through after lock contention"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_lock_contention() => err,
            Err(err) => return Err(err),
        };

        let Some(delay) = backoff.next_delay() else {
            tracing::error!(
                operation = operation_name,
                attempts,
                max_wait_ms,
                error = %err,
                "Giving up on locked database"
            );
            return Err(Error::Internal(format!(
                "{}: database still locked after {} attempts over {} ms",
                operation_name,
                attempts,
                backoff.elapsed().as_millis()
            )));
        };

        tracing::warn!(
            operation = operation_name,
            attempts,
            delay_ms = delay.as_millis() as u64,
            "Database locked, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}
