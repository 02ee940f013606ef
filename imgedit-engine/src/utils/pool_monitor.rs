//! Timed transactions
//!
//! Every multi-statement write in the engine (version bump plus undo slot,
//! raster geometry plus overlay reset, history upsert plus eviction) runs in
//! a [`MonitoredTransaction`]. It logs how long the pool took to hand out a
//! connection and how long the write lock was then held, which is where
//! contention between sessions shows up first.

use imgedit_common::{Error, Result};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::time::Instant;

/// Acquisition slower than this means the pool is saturated
const SLOW_ACQUIRE_MS: u128 = 1_000;

/// Holding a write transaction longer than this stalls other sessions
const LONG_HOLD_MS: u128 = 2_000;

#[derive(Debug, Clone, Copy)]
enum Release {
    Commit,
    Rollback,
    Dropped,
}

impl Release {
    fn as_str(self) -> &'static str {
        match self {
            Release::Commit => "commit",
            Release::Rollback => "rollback",
            Release::Dropped => "drop",
        }
    }
}

/// Transaction that reports its hold time when it ends
pub struct MonitoredTransaction<'c> {
    tx: Option<Transaction<'c, Sqlite>>,
    caller: &'static str,
    began: Instant,
}

impl<'c> MonitoredTransaction<'c> {
    /// Connection to run statements on inside the transaction
    pub fn conn(&mut self) -> Result<&mut SqliteConnection> {
        self.tx.as_deref_mut().ok_or_else(consumed)
    }

    pub async fn commit(mut self) -> Result<()> {
        let tx = self.tx.take().ok_or_else(consumed)?;
        tx.commit().await?;
        self.report(Release::Commit);
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        let tx = self.tx.take().ok_or_else(consumed)?;
        tx.rollback().await?;
        self.report(Release::Rollback);
        Ok(())
    }

    fn report(&self, release: Release) {
        let held_ms = self.began.elapsed().as_millis();
        if held_ms > LONG_HOLD_MS {
            tracing::warn!(
                caller = self.caller,
                held_ms = held_ms as u64,
                release = release.as_str(),
                "Write transaction held the database for a long time"
            );
        } else {
            tracing::trace!(
                caller = self.caller,
                held_ms = held_ms as u64,
                release = release.as_str(),
                "Transaction finished"
            );
        }
    }
}

impl Drop for MonitoredTransaction<'_> {
    fn drop(&mut self) {
        // sqlx rolls back an unfinished transaction on drop
        if self.tx.is_some() {
            self.report(Release::Dropped);
        }
    }
}

fn consumed() -> Error {
    Error::Internal("transaction already finished".to_string())
}

/// Begin a transaction, logging slow connection acquisition
///
/// ```ignore
/// let mut tx = begin_monitored(&pool, "annotations::update").await?;
/// db::annotations::update_scene_if_version(tx.conn()?, ...).await?;
/// tx.commit().await?;
/// ```
pub async fn begin_monitored<'c>(
    pool: &'c SqlitePool,
    caller: &'static str,
) -> Result<MonitoredTransaction<'c>> {
    let requested = Instant::now();
    let tx = pool.begin().await?;

    let wait_ms = requested.elapsed().as_millis();
    if wait_ms > SLOW_ACQUIRE_MS {
        tracing::warn!(
            caller,
            wait_ms = wait_ms as u64,
            pool_size = pool.size(),
            idle = pool.num_idle(),
            "Slow connection acquisition, pool may be saturated"
        );
    }

    Ok(MonitoredTransaction {
        tx: Some(tx),
        caller,
        began: Instant::now(),
    })
}
