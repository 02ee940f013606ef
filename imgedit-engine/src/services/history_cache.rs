//! Recently viewed images per terminal session
//!
//! SQLite holds the authoritative rows. An in-memory mirror (newest first per
//! terminal key) answers reads; it is rebuilt from the store on startup and
//! on demand, never written back.
//!
//! Writes to one terminal key hold a per-key mutex across the durable
//! transaction and the mirror update, so the capacity check and the eviction
//! cannot interleave with another writer on the same key.

use chrono::{DateTime, Duration, Utc};
use imgedit_common::{time, EngineConfig};
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::models::{HistoryEntry, SourceType, MAX_HISTORY_PAGE};
use crate::utils::{begin_monitored, retry_on_lock};

type Mirror = HashMap<String, VecDeque<HistoryEntry>>;

#[derive(Debug, Clone)]
pub struct RecentHistoryCache {
    pool: SqlitePool,
    capacity: usize,
    retention: Duration,
    max_lock_wait_ms: u64,
    mirror: Arc<RwLock<Mirror>>,
    key_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// Durable result of one add_or_touch
struct Touched {
    entry: HistoryEntry,
    evicted: Vec<Uuid>,
}

impl RecentHistoryCache {
    pub fn new(pool: SqlitePool, config: &EngineConfig) -> Self {
        Self {
            pool,
            capacity: config.history_capacity.max(1),
            retention: Duration::days(config.history_retention_days),
            max_lock_wait_ms: config.db_max_lock_wait_ms,
            mirror: Arc::new(RwLock::new(HashMap::new())),
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Replace the mirror with the current contents of the store
    ///
    /// Returns the number of entries loaded.
    pub async fn rebuild_from_store(&self) -> EngineResult<usize> {
        let mut conn = self.pool.acquire().await?;
        let rows = db::history::list_all(&mut conn).await?;
        let count = rows.len();

        // Rows arrive grouped by terminal, newest first
        let mut rebuilt: Mirror = HashMap::new();
        for entry in rows {
            rebuilt
                .entry(entry.terminal_session_id.clone())
                .or_default()
                .push_back(entry);
        }

        let terminals = rebuilt.len();
        *self.mirror.write().await = rebuilt;

        info!(entries = count, terminals, "History mirror rebuilt from store");
        Ok(count)
    }

    /// Record that `terminal_session_id` viewed `image_path`
    ///
    /// A known pair has its view count incremented and moves to the front.
    /// A new pair evicts the least recently viewed entry of that terminal
    /// once the terminal is at capacity.
    pub async fn add_or_touch(
        &self,
        terminal_session_id: &str,
        image_path: &str,
        source_type: SourceType,
    ) -> EngineResult<HistoryEntry> {
        if terminal_session_id.trim().is_empty() {
            return Err(EngineError::Validation("terminal_session_id is empty".to_string()));
        }
        if image_path.trim().is_empty() {
            return Err(EngineError::Validation("image_path is empty".to_string()));
        }

        let _guard = self.key_lock(terminal_session_id).await;

        let pool = &self.pool;
        let capacity = self.capacity;
        let touched = retry_on_lock("history::add_or_touch", self.max_lock_wait_ms, || {
            upsert_entry(pool, terminal_session_id, image_path, source_type, capacity)
        })
        .await?;

        let cached = {
            let mut mirror = self.mirror.write().await;
            match mirror.get_mut(terminal_session_id) {
                Some(entries) => {
                    entries.retain(|e| e.id != touched.entry.id && !touched.evicted.contains(&e.id));
                    entries.push_front(touched.entry.clone());
                    entries.truncate(self.capacity);
                    true
                }
                None => false,
            }
        };
        if !cached {
            self.load_key(terminal_session_id).await?;
        }

        debug!(
            terminal_session_id,
            image_path,
            view_count = touched.entry.view_count,
            evicted = touched.evicted.len(),
            "History entry touched"
        );
        Ok(touched.entry)
    }

    /// Most recently viewed entries of one terminal, newest first
    pub async fn get(&self, terminal_session_id: &str, limit: usize) -> EngineResult<Vec<HistoryEntry>> {
        if limit == 0 || limit > MAX_HISTORY_PAGE {
            return Err(EngineError::Validation(format!(
                "limit must be between 1 and {}, got {}",
                MAX_HISTORY_PAGE, limit
            )));
        }

        if let Some(entries) = self.mirror.read().await.get(terminal_session_id) {
            return Ok(entries.iter().take(limit).cloned().collect());
        }

        let entries = self.load_key(terminal_session_id).await?;
        Ok(entries.into_iter().take(limit).collect())
    }

    /// One entry by id, read from the store
    pub async fn get_entry(&self, id: Uuid) -> EngineResult<HistoryEntry> {
        let mut conn = self.pool.acquire().await?;
        db::history::get_entry(&mut conn, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("History entry {}", id)))
    }

    /// Flag the entry for (terminal, path) as edited; false if there is none
    pub async fn mark_edited(&self, terminal_session_id: &str, image_path: &str) -> EngineResult<bool> {
        let _guard = self.key_lock(terminal_session_id).await;

        let mut conn = self.pool.acquire().await?;
        let updated = db::history::set_edited(&mut conn, terminal_session_id, image_path).await?;

        if updated {
            let mut mirror = self.mirror.write().await;
            if let Some(entries) = mirror.get_mut(terminal_session_id) {
                for entry in entries.iter_mut().filter(|e| e.image_path == image_path) {
                    entry.is_edited = true;
                }
            }
        }
        Ok(updated)
    }

    /// Remove history for one terminal, or for everyone when None
    pub async fn clear(&self, terminal_session_id: Option<&str>) -> EngineResult<u64> {
        let _guard = match terminal_session_id {
            Some(terminal) => Some(self.key_lock(terminal).await),
            None => None,
        };

        let mut conn = self.pool.acquire().await?;
        let removed = db::history::delete_for_terminal(&mut conn, terminal_session_id).await?;

        let mut mirror = self.mirror.write().await;
        match terminal_session_id {
            Some(terminal) => {
                mirror.remove(terminal);
            }
            None => mirror.clear(),
        }

        info!(terminal_session_id = ?terminal_session_id, removed, "History cleared");
        Ok(removed)
    }

    /// Delete entries not viewed within the retention period
    pub async fn sweep(&self) -> EngineResult<usize> {
        self.sweep_before(time::now() - self.retention).await
    }

    /// Delete entries last viewed before `cutoff`
    pub async fn sweep_before(&self, cutoff: DateTime<Utc>) -> EngineResult<usize> {
        let mut conn = self.pool.acquire().await?;
        let removed = db::history::delete_viewed_before(&mut conn, cutoff).await?;
        drop(conn);

        if !removed.is_empty() {
            let mut mirror = self.mirror.write().await;
            for (id, terminal) in &removed {
                if let Some(entries) = mirror.get_mut(terminal) {
                    entries.retain(|e| e.id != *id);
                }
            }
            mirror.retain(|_, entries| !entries.is_empty());
        }

        info!(removed = removed.len(), cutoff = %cutoff, "History sweep finished");
        Ok(removed.len())
    }

    /// Drop the mirror and per-key locks; the store is untouched
    pub async fn shutdown(&self) {
        let entries: usize = {
            let mut mirror = self.mirror.write().await;
            let total = mirror.values().map(VecDeque::len).sum();
            mirror.clear();
            total
        };
        self.key_locks.lock().await.clear();
        info!(entries, "History cache shut down");
    }

    /// Terminal keys currently held in memory
    pub async fn cached_terminals(&self) -> usize {
        self.mirror.read().await.len()
    }

    async fn load_key(&self, terminal_session_id: &str) -> EngineResult<Vec<HistoryEntry>> {
        let mut conn = self.pool.acquire().await?;
        let entries =
            db::history::list_for_terminal(&mut conn, terminal_session_id, self.capacity as i64)
                .await?;

        if !entries.is_empty() {
            self.mirror
                .write()
                .await
                .insert(terminal_session_id.to_string(), entries.iter().cloned().collect());
        }
        Ok(entries)
    }

    async fn key_lock(&self, terminal_session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.key_locks.lock().await;
            Arc::clone(locks.entry(terminal_session_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Touch or insert inside one transaction, evicting down to capacity first
async fn upsert_entry(
    pool: &SqlitePool,
    terminal_session_id: &str,
    image_path: &str,
    source_type: SourceType,
    capacity: usize,
) -> imgedit_common::Result<Touched> {
    let mut tx = begin_monitored(pool, "history::add_or_touch").await?;

    // Keep last_viewed_at strictly increasing per key so LRU order is total
    let mut viewed_at = time::now();
    if let Some(newest) = db::history::newest_viewed_at(tx.conn()?, terminal_session_id).await? {
        if newest >= viewed_at {
            viewed_at = newest + Duration::microseconds(1);
        }
    }

    if let Some(mut entry) = db::history::find_entry(tx.conn()?, terminal_session_id, image_path).await? {
        db::history::touch_entry(tx.conn()?, entry.id, viewed_at).await?;
        tx.commit().await?;

        entry.view_count += 1;
        entry.last_viewed_at = viewed_at;
        return Ok(Touched {
            entry,
            evicted: Vec::new(),
        });
    }

    let mut evicted = Vec::new();
    let mut count = db::history::count_for_terminal(tx.conn()?, terminal_session_id).await?;
    while count >= capacity as i64 {
        let Some(oldest) = db::history::oldest_for_terminal(tx.conn()?, terminal_session_id).await? else {
            break;
        };
        db::history::delete_entry(tx.conn()?, oldest.id).await?;
        debug!(
            terminal_session_id,
            image_path = %oldest.image_path,
            "Evicted least recently viewed history entry"
        );
        evicted.push(oldest.id);
        count -= 1;
    }

    let entry = HistoryEntry {
        id: Uuid::new_v4(),
        terminal_session_id: terminal_session_id.to_string(),
        image_path: image_path.to_string(),
        source_type,
        thumbnail_path: None,
        last_viewed_at: viewed_at,
        view_count: 1,
        is_edited: false,
    };
    db::history::insert_entry(tx.conn()?, &entry).await?;
    tx.commit().await?;

    Ok(Touched { entry, evicted })
}
