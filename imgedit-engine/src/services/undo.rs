//! Undo/redo ring
//!
//! Each session has `UNDO_SLOTS` snapshot slots. Snapshots carry an absolute
//! sequence number and live in slot `sequence % UNDO_SLOTS`, so the 51st
//! snapshot silently overwrites the 1st. The session row holds two pointers:
//! `undo_head` (newest sequence) and `undo_cursor` (sequence matching the
//! current overlay). Undo moves the cursor back, redo moves it forward, and
//! recording after an undo drops everything past the cursor.
//!
//! The first accepted edit of a session also records the overlay it replaced,
//! in the same transaction, so that edit can be undone. Snapshots remember the
//! raster size they were taken at; undo and redo never step onto a snapshot
//! whose coordinates belong to a different frame.

use chrono::{DateTime, Utc};
use imgedit_common::time;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::models::{slot_for, EditOperation, ImageSession, OperationType, Scene, UNDO_SLOTS};
use crate::utils::{begin_monitored, retry_on_lock};

/// Result of a successful undo or redo
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UndoOutcome {
    /// Scene now in the annotation layer
    pub scene: Scene,
    /// New annotation layer version
    pub version: i64,
    /// Operation that produced the restored snapshot
    pub operation_type: OperationType,
    /// Sequence the cursor now points at
    pub cursor: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Undo => "undo",
            Direction::Redo => "redo",
        }
    }
}

enum StepOutcome {
    Applied(UndoOutcome),
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct UndoRedoBuffer {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl UndoRedoBuffer {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    /// Write `scene` into slot `position`, overwriting any previous occupant
    ///
    /// This is a raw slot write; it does not move the undo pointer.
    pub async fn store_snapshot(
        &self,
        session_id: Uuid,
        operation_type: OperationType,
        scene: &Scene,
        position: i64,
    ) -> EngineResult<Uuid> {
        if !(0..UNDO_SLOTS).contains(&position) {
            return Err(EngineError::Validation(format!(
                "Snapshot position {} outside 0..{}",
                position, UNDO_SLOTS
            )));
        }
        let scene_json = scene_json(scene)?;

        let mut conn = self.pool.acquire().await?;
        let session = ensure_session(&mut conn, session_id).await?;
        let id = db::operations::upsert_slot(
            &mut conn,
            session_id,
            operation_type,
            &scene_json,
            None,
            (session.width, session.height),
            position,
            time::now(),
        )
        .await?;

        Ok(id)
    }

    /// Scene stored in slot `position`, or None if the slot is empty
    pub async fn get_snapshot(&self, session_id: Uuid, position: i64) -> EngineResult<Option<Scene>> {
        if !(0..UNDO_SLOTS).contains(&position) {
            return Err(EngineError::Validation(format!(
                "Snapshot position {} outside 0..{}",
                position, UNDO_SLOTS
            )));
        }

        let mut conn = self.pool.acquire().await?;
        let slot = db::operations::get_slot(&mut conn, session_id, position).await?;
        Ok(slot.map(|op| op.scene_snapshot))
    }

    /// Occupied slots, oldest first
    pub async fn list(&self, session_id: Uuid) -> EngineResult<Vec<EditOperation>> {
        let mut conn = self.pool.acquire().await?;
        ensure_session(&mut conn, session_id).await?;
        Ok(db::operations::list_slots(&mut conn, session_id).await?)
    }

    /// Append a snapshot after the cursor and make it current
    ///
    /// Returns the new sequence number.
    pub async fn record(
        &self,
        session_id: Uuid,
        operation_type: OperationType,
        scene: &Scene,
    ) -> EngineResult<i64> {
        let scene_json = scene_json(scene)?;
        let pool = &self.pool;
        let scene_json = scene_json.as_str();

        let sequence = retry_on_lock("undo::record", self.max_lock_wait_ms, || {
            record_standalone(pool, session_id, operation_type, scene_json)
        })
        .await?;

        sequence.ok_or_else(|| EngineError::NotFound(format!("Session {}", session_id)))
    }

    /// Restore the previous snapshot
    pub async fn undo(&self, session_id: Uuid) -> EngineResult<UndoOutcome> {
        self.step(session_id, Direction::Undo).await
    }

    /// Re-apply the snapshot after the cursor
    pub async fn redo(&self, session_id: Uuid) -> EngineResult<UndoOutcome> {
        self.step(session_id, Direction::Redo).await
    }

    async fn step(&self, session_id: Uuid, direction: Direction) -> EngineResult<UndoOutcome> {
        let pool = &self.pool;
        let outcome = retry_on_lock(direction.as_str(), self.max_lock_wait_ms, || {
            apply_step(pool, session_id, direction)
        })
        .await?;

        match outcome {
            StepOutcome::Applied(outcome) => {
                info!(
                    session_id = %session_id,
                    action = direction.as_str(),
                    cursor = outcome.cursor,
                    version = outcome.version,
                    "Restored overlay snapshot"
                );
                Ok(outcome)
            }
            StepOutcome::Unavailable(reason) => Err(EngineError::NotFound(reason)),
        }
    }
}

/// Append a snapshot inside the caller's transaction
///
/// `frame` is the raster size the scene refers to; None means the session's
/// size as currently stored. Returns the new sequence, or None if the session
/// does not exist.
pub async fn record_in(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    operation_type: OperationType,
    scene_json: &str,
    frame: Option<(u32, u32)>,
    now: DateTime<Utc>,
) -> imgedit_common::Result<Option<i64>> {
    let Some(session) = db::sessions::get_session(conn, session_id).await? else {
        return Ok(None);
    };

    let sequence = session.undo_cursor.map_or(0, |cursor| cursor + 1);
    db::operations::upsert_slot(
        conn,
        session_id,
        operation_type,
        scene_json,
        Some(sequence),
        frame.unwrap_or((session.width, session.height)),
        slot_for(sequence),
        now,
    )
    .await?;
    db::sessions::set_undo_pointer(conn, session_id, Some(sequence), Some(sequence)).await?;

    debug!(
        session_id = %session_id,
        operation = %operation_type,
        sequence,
        position = slot_for(sequence),
        "Recorded overlay snapshot"
    );
    Ok(Some(sequence))
}

/// Stored overlay to record before the first snapshot of a session
///
/// Read inside the transaction of the edit about to replace it. Returns None
/// once the ring has a snapshot, or if the session or its layer is gone. A
/// corrupt stored scene is recorded as empty.
pub async fn pending_baseline(
    conn: &mut SqliteConnection,
    session_id: Uuid,
) -> imgedit_common::Result<Option<String>> {
    let Some(session) = db::sessions::get_session(conn, session_id).await? else {
        return Ok(None);
    };
    if session.undo_cursor.is_some() {
        return Ok(None);
    }
    let Some(row) = db::annotations::get_layer(conn, session_id).await? else {
        return Ok(None);
    };

    match Scene::from_json(&row.scene_json) {
        Ok(_) => Ok(Some(row.scene_json)),
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Stored scene is corrupt; baseline snapshot will be empty");
            Scene::empty()
                .to_json()
                .map(Some)
                .map_err(|e| imgedit_common::Error::Internal(e.to_string()))
        }
    }
}

async fn record_standalone(
    pool: &SqlitePool,
    session_id: Uuid,
    operation_type: OperationType,
    scene_json: &str,
) -> imgedit_common::Result<Option<i64>> {
    let mut tx = begin_monitored(pool, "undo::record").await?;
    let sequence =
        record_in(tx.conn()?, session_id, operation_type, scene_json, None, time::now()).await?;
    tx.commit().await?;
    Ok(sequence)
}

async fn apply_step(
    pool: &SqlitePool,
    session_id: Uuid,
    direction: Direction,
) -> imgedit_common::Result<StepOutcome> {
    let mut tx = begin_monitored(pool, "undo::step").await?;

    let Some(session) = db::sessions::get_session(tx.conn()?, session_id).await? else {
        return Ok(StepOutcome::Unavailable(format!("Session {}", session_id)));
    };

    let (Some(head), Some(cursor)) = (session.undo_head, session.undo_cursor) else {
        return Ok(StepOutcome::Unavailable(format!(
            "Nothing to {} for session {}",
            direction.as_str(),
            session_id
        )));
    };

    let target = match direction {
        Direction::Undo => cursor - 1,
        Direction::Redo => cursor + 1,
    };
    // The slot must exist and not have been recycled by a newer snapshot
    if target < 0 || target > head || head - target >= UNDO_SLOTS {
        return Ok(StepOutcome::Unavailable(format!(
            "Nothing to {} for session {}",
            direction.as_str(),
            session_id
        )));
    }

    let slot = db::operations::get_slot(tx.conn()?, session_id, slot_for(target)).await?;
    let Some(slot) = slot.filter(|op| op.sequence.map_or(true, |s| s == target)) else {
        return Ok(StepOutcome::Unavailable(format!(
            "Snapshot {} of session {} is no longer available",
            target, session_id
        )));
    };
    if !slot.fits_frame(session.width, session.height) {
        debug!(
            session_id = %session_id,
            target,
            snapshot_width = slot.raster_width,
            snapshot_height = slot.raster_height,
            width = session.width,
            height = session.height,
            "Snapshot belongs to a different raster size"
        );
        return Ok(StepOutcome::Unavailable(format!(
            "Cannot {} across a crop or resize of session {}",
            direction.as_str(),
            session_id
        )));
    }

    let scene_json = slot
        .scene_snapshot
        .to_json()
        .map_err(|e| imgedit_common::Error::Internal(e.to_string()))?;
    let now = time::now();

    let Some(version) =
        db::annotations::replace_scene(tx.conn()?, session_id, &scene_json, now).await?
    else {
        return Ok(StepOutcome::Unavailable(format!(
            "Annotation layer for session {}",
            session_id
        )));
    };
    db::sessions::mark_modified(tx.conn()?, session_id, None, now).await?;
    db::sessions::set_undo_pointer(tx.conn()?, session_id, Some(head), Some(target)).await?;

    tx.commit().await?;

    Ok(StepOutcome::Applied(UndoOutcome {
        scene: slot.scene_snapshot,
        version,
        operation_type: slot.operation_type,
        cursor: target,
    }))
}

async fn ensure_session(
    conn: &mut SqliteConnection,
    session_id: Uuid,
) -> EngineResult<ImageSession> {
    db::sessions::get_session(conn, session_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("Session {}", session_id)))
}

fn scene_json(scene: &Scene) -> EngineResult<String> {
    scene.validate().map_err(|e| EngineError::Validation(format!("Invalid scene: {}", e)))?;
    scene
        .to_json()
        .map_err(|e| EngineError::Validation(format!("Invalid scene: {}", e)))
}
