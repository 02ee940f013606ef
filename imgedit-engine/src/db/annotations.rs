//! Annotation layer database operations
//!
//! Scenes are stored as JSON text. Rows are returned undecoded so callers
//! can decide what a corrupt stored scene means for them.

use chrono::{DateTime, Utc};
use imgedit_common::time::{parse_db_timestamp, to_db_timestamp};
use imgedit_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::models::{AnnotationLayer, Scene, SceneError};

/// Annotation layer as stored, scene still in JSON form
#[derive(Debug, Clone)]
pub struct AnnotationRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub scene_json: String,
    pub version: i64,
    pub last_updated: DateTime<Utc>,
}

impl AnnotationRow {
    /// Decode and validate the stored scene
    pub fn decode(self) -> std::result::Result<AnnotationLayer, SceneError> {
        let scene = Scene::from_json(&self.scene_json)?;
        Ok(AnnotationLayer {
            id: self.id,
            session_id: self.session_id,
            scene,
            version: self.version,
            last_updated: self.last_updated,
        })
    }
}

/// Insert a layer row
pub async fn insert_layer(
    conn: &mut SqliteConnection,
    id: Uuid,
    session_id: Uuid,
    scene_json: &str,
    version: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO annotation_layers (id, session_id, scene, version, last_updated)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(session_id.to_string())
    .bind(scene_json)
    .bind(version)
    .bind(to_db_timestamp(&now))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Load the layer of a session
pub async fn get_layer(
    conn: &mut SqliteConnection,
    session_id: Uuid,
) -> Result<Option<AnnotationRow>> {
    let row = sqlx::query(
        "SELECT id, session_id, scene, version, last_updated FROM annotation_layers WHERE session_id = ?",
    )
    .bind(session_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_annotation).transpose()
}

/// Current version of a session's layer
pub async fn current_version(
    conn: &mut SqliteConnection,
    session_id: Uuid,
) -> Result<Option<i64>> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM annotation_layers WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

    Ok(version)
}

/// Conditional write: succeeds only while the stored version equals `expected_version`
///
/// Returns the number of rows written (0 or 1).
pub async fn update_scene_if_version(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    scene_json: &str,
    expected_version: i64,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE annotation_layers
        SET scene = ?, version = version + 1, last_updated = ?
        WHERE session_id = ? AND version = ?
        "#,
    )
    .bind(scene_json)
    .bind(to_db_timestamp(&now))
    .bind(session_id.to_string())
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Unconditional write used by engine-initiated changes (crop, resize, undo)
///
/// Returns the new version, or None if the session has no layer.
pub async fn replace_scene(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    scene_json: &str,
    now: DateTime<Utc>,
) -> Result<Option<i64>> {
    let version: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE annotation_layers
        SET scene = ?, version = version + 1, last_updated = ?
        WHERE session_id = ?
        RETURNING version
        "#,
    )
    .bind(scene_json)
    .bind(to_db_timestamp(&now))
    .bind(session_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(version)
}

fn row_to_annotation(row: &SqliteRow) -> Result<AnnotationRow> {
    let id: String = row.try_get("id")?;
    let session_id: String = row.try_get("session_id")?;
    let last_updated: String = row.try_get("last_updated")?;

    Ok(AnnotationRow {
        id: parse_uuid(&id)?,
        session_id: parse_uuid(&session_id)?,
        scene_json: row.try_get("scene")?,
        version: row.try_get("version")?,
        last_updated: parse_db_timestamp(&last_updated)?,
    })
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid UUID '{}': {}", value, e)))
}
