//! Undo ring database operations

use chrono::{DateTime, Utc};
use imgedit_common::time::{parse_db_timestamp, to_db_timestamp};
use imgedit_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::annotations::parse_uuid;
use crate::models::{EditOperation, OperationType, Scene};

/// Write a ring slot, replacing whatever occupied it
///
/// `raster_size` is the (width, height) the scene's coordinates refer to.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_slot(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    operation_type: OperationType,
    scene_json: &str,
    sequence: Option<i64>,
    raster_size: (u32, u32),
    position: i64,
    now: DateTime<Utc>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO edit_operations (
            id, session_id, operation_type, scene_snapshot, sequence,
            raster_width, raster_height, timestamp, position
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_id, position) DO UPDATE SET
            id = excluded.id,
            operation_type = excluded.operation_type,
            scene_snapshot = excluded.scene_snapshot,
            sequence = excluded.sequence,
            raster_width = excluded.raster_width,
            raster_height = excluded.raster_height,
            timestamp = excluded.timestamp
        "#,
    )
    .bind(id.to_string())
    .bind(session_id.to_string())
    .bind(operation_type.as_str())
    .bind(scene_json)
    .bind(sequence)
    .bind(raster_size.0 as i64)
    .bind(raster_size.1 as i64)
    .bind(to_db_timestamp(&now))
    .bind(position)
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// Read one ring slot
pub async fn get_slot(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    position: i64,
) -> Result<Option<EditOperation>> {
    let row = sqlx::query(
        r#"
        SELECT id, session_id, operation_type, scene_snapshot, sequence,
               raster_width, raster_height, timestamp, position
        FROM edit_operations
        WHERE session_id = ? AND position = ?
        "#,
    )
    .bind(session_id.to_string())
    .bind(position)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_operation).transpose()
}

/// All occupied slots of a session, oldest sequence first
pub async fn list_slots(
    conn: &mut SqliteConnection,
    session_id: Uuid,
) -> Result<Vec<EditOperation>> {
    let rows = sqlx::query(
        r#"
        SELECT id, session_id, operation_type, scene_snapshot, sequence,
               raster_width, raster_height, timestamp, position
        FROM edit_operations
        WHERE session_id = ?
        ORDER BY sequence, position
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_operation).collect()
}

fn row_to_operation(row: &SqliteRow) -> Result<EditOperation> {
    let id: String = row.try_get("id")?;
    let session_id: String = row.try_get("session_id")?;
    let operation_type: String = row.try_get("operation_type")?;
    let scene_json: String = row.try_get("scene_snapshot")?;
    let timestamp: String = row.try_get("timestamp")?;
    let raster_width: Option<i64> = row.try_get("raster_width")?;
    let raster_height: Option<i64> = row.try_get("raster_height")?;

    Ok(EditOperation {
        id: parse_uuid(&id)?,
        session_id: parse_uuid(&session_id)?,
        operation_type: OperationType::parse(&operation_type).ok_or_else(|| {
            Error::Internal(format!("Unknown operation_type '{}'", operation_type))
        })?,
        scene_snapshot: Scene::from_json(&scene_json)
            .map_err(|e| Error::Internal(format!("Corrupt snapshot: {}", e)))?,
        sequence: row.try_get("sequence")?,
        raster_width: raster_width.map(|w| w as u32),
        raster_height: raster_height.map(|h| h as u32),
        timestamp: parse_db_timestamp(&timestamp)?,
        position: row.try_get("position")?,
    })
}
