//! Annotation concurrency controller
//!
//! Overlay writes use optimistic locking: the caller names the version it
//! edited, and the write only lands if that is still the stored version. The
//! version check and the write are one conditional UPDATE, so two writers
//! holding the same version cannot both succeed.

use chrono::{DateTime, Utc};
use imgedit_common::time;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use super::undo;
use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::models::{AnnotationLayer, OperationType, Scene};
use crate::utils::{begin_monitored, retry_on_lock};

#[derive(Debug, Clone)]
pub struct AnnotationController {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl AnnotationController {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    /// Build a fresh empty layer for a new session (version 1)
    pub fn create_empty(session_id: Uuid) -> AnnotationLayer {
        AnnotationLayer {
            id: Uuid::new_v4(),
            session_id,
            scene: Scene::empty(),
            version: 1,
            last_updated: time::now(),
        }
    }

    /// Current layer of a session
    pub async fn get(&self, session_id: Uuid) -> EngineResult<AnnotationLayer> {
        let mut conn = self.pool.acquire().await?;
        let row = db::annotations::get_layer(&mut conn, session_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("Annotation layer for session {}", session_id))
            })?;

        row.decode().map_err(|e| {
            EngineError::Internal(format!("Stored scene for session {} is corrupt: {}", session_id, e))
        })
    }

    /// Replace the scene if `expected_version` is still current
    ///
    /// On success the parent session is marked modified in the same
    /// transaction and the new version is returned. A stale version fails
    /// with [`EngineError::Conflict`] and changes nothing.
    pub async fn update(
        &self,
        session_id: Uuid,
        new_scene: &Scene,
        expected_version: i64,
    ) -> EngineResult<i64> {
        self.write(session_id, new_scene, expected_version, None).await
    }

    /// Like [`AnnotationController::update`], also appending the new scene
    /// to the undo ring in the same transaction
    ///
    /// On a session with an empty ring the replaced scene is recorded first.
    /// A rejected write records nothing.
    pub async fn update_and_record(
        &self,
        session_id: Uuid,
        new_scene: &Scene,
        expected_version: i64,
        operation_type: OperationType,
    ) -> EngineResult<i64> {
        self.write(session_id, new_scene, expected_version, Some(operation_type))
            .await
    }

    async fn write(
        &self,
        session_id: Uuid,
        new_scene: &Scene,
        expected_version: i64,
        record: Option<OperationType>,
    ) -> EngineResult<i64> {
        new_scene
            .validate()
            .map_err(|e| EngineError::Validation(format!("Invalid scene: {}", e)))?;
        let scene_json = new_scene
            .to_json()
            .map_err(|e| EngineError::Validation(format!("Invalid scene: {}", e)))?;

        let now = time::now();
        let pool = &self.pool;
        let scene_json = scene_json.as_str();

        let outcome = retry_on_lock("annotations::update", self.max_lock_wait_ms, || {
            write_if_current(pool, session_id, scene_json, expected_version, record, now)
        })
        .await?;

        match outcome {
            WriteOutcome::Written => {
                let new_version = expected_version + 1;
                debug!(session_id = %session_id, new_version, "Annotation layer updated");
                Ok(new_version)
            }
            WriteOutcome::Missing => Err(EngineError::NotFound(format!(
                "Annotation layer for session {}",
                session_id
            ))),
            WriteOutcome::Stale(current) => {
                info!(
                    session_id = %session_id,
                    expected_version,
                    current_version = current,
                    "Rejected stale annotation write"
                );
                Err(EngineError::Conflict {
                    expected: expected_version,
                    current,
                })
            }
        }
    }
}

enum WriteOutcome {
    Written,
    Missing,
    Stale(i64),
}

async fn write_if_current(
    pool: &SqlitePool,
    session_id: Uuid,
    scene_json: &str,
    expected_version: i64,
    record: Option<OperationType>,
    now: DateTime<Utc>,
) -> imgedit_common::Result<WriteOutcome> {
    let mut tx = begin_monitored(pool, "annotations::update").await?;

    let baseline = match record {
        Some(_) => undo::pending_baseline(tx.conn()?, session_id).await?,
        None => None,
    };

    let written = db::annotations::update_scene_if_version(
        tx.conn()?,
        session_id,
        scene_json,
        expected_version,
        now,
    )
    .await?;

    if written == 0 {
        // Distinguish a missing layer from a stale version
        let current = db::annotations::current_version(tx.conn()?, session_id).await?;
        tx.rollback().await?;
        return Ok(match current {
            None => WriteOutcome::Missing,
            Some(current) => WriteOutcome::Stale(current),
        });
    }

    db::sessions::mark_modified(tx.conn()?, session_id, None, now).await?;
    if let Some(operation_type) = record {
        if let Some(baseline) = &baseline {
            undo::record_in(tx.conn()?, session_id, operation_type, baseline, None, now).await?;
        }
        undo::record_in(tx.conn()?, session_id, operation_type, scene_json, None, now).await?;
    }
    tx.commit().await?;
    Ok(WriteOutcome::Written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_empty_starts_at_version_one() {
        let session_id = Uuid::new_v4();
        let layer = AnnotationController::create_empty(session_id);
        assert_eq!(layer.version, 1);
        assert_eq!(layer.session_id, session_id);
        assert!(layer.scene.is_empty());
    }
}
