//! Image session database operations
//!
//! Functions take a connection so they run the same on a pooled connection
//! or inside a caller's transaction (`tx.conn()?`).

use chrono::{DateTime, Utc};
use imgedit_common::time::{parse_db_timestamp, to_db_timestamp};
use imgedit_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::path::PathBuf;
use uuid::Uuid;

use crate::models::{ImageFormat, ImageSession, SourceType};

const SESSION_COLUMNS: &str = r#"
    id, terminal_session_id, source_type, source_path, format, width, height,
    size_bytes, working_copy_path, full_resolution_path, undo_head, undo_cursor,
    created_at, last_modified_at, is_modified
"#;

/// Insert a new session row
pub async fn insert_session(
    conn: &mut SqliteConnection,
    session: &ImageSession,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO image_sessions (
            id, terminal_session_id, source_type, source_path, format, width, height,
            size_bytes, working_copy_path, full_resolution_path, undo_head, undo_cursor,
            created_at, last_modified_at, is_modified
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session.id.to_string())
    .bind(&session.terminal_session_id)
    .bind(session.source_type.as_str())
    .bind(&session.source_path)
    .bind(session.format.as_str())
    .bind(session.width as i64)
    .bind(session.height as i64)
    .bind(session.size_bytes as i64)
    .bind(session.working_copy_path.to_string_lossy().into_owned())
    .bind(
        session
            .full_resolution_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
    )
    .bind(session.undo_head)
    .bind(session.undo_cursor)
    .bind(to_db_timestamp(&session.created_at))
    .bind(to_db_timestamp(&session.last_modified_at))
    .bind(session.is_modified)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Load one session
pub async fn get_session(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<Option<ImageSession>> {
    let sql = format!("SELECT {} FROM image_sessions WHERE id = ?", SESSION_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_session).transpose()
}

/// Sessions opened by one terminal, newest first
pub async fn list_sessions_for_terminal(
    conn: &mut SqliteConnection,
    terminal_session_id: &str,
) -> Result<Vec<ImageSession>> {
    let sql = format!(
        "SELECT {} FROM image_sessions WHERE terminal_session_id = ? ORDER BY created_at DESC",
        SESSION_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(terminal_session_id)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(row_to_session).collect()
}

/// Sessions created strictly before `cutoff`
pub async fn list_sessions_created_before(
    conn: &mut SqliteConnection,
    cutoff: DateTime<Utc>,
) -> Result<Vec<ImageSession>> {
    let sql = format!(
        "SELECT {} FROM image_sessions WHERE created_at < ? ORDER BY created_at",
        SESSION_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(to_db_timestamp(&cutoff))
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(row_to_session).collect()
}

/// Record new raster geometry after crop/resize
///
/// Also drops the full-resolution link: the edited geometry is now the
/// target size for save.
pub async fn update_raster_geometry(
    conn: &mut SqliteConnection,
    id: Uuid,
    width: u32,
    height: u32,
    size_bytes: u64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE image_sessions
        SET width = ?, height = ?, size_bytes = ?, full_resolution_path = NULL,
            is_modified = 1, last_modified_at = ?
        WHERE id = ?
        "#,
    )
    .bind(width as i64)
    .bind(height as i64)
    .bind(size_bytes as i64)
    .bind(to_db_timestamp(&now))
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Set is_modified and bump last_modified_at, optionally recording a new file size
pub async fn mark_modified(
    conn: &mut SqliteConnection,
    id: Uuid,
    size_bytes: Option<u64>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE image_sessions
        SET is_modified = 1, last_modified_at = ?, size_bytes = COALESCE(?, size_bytes)
        WHERE id = ?
        "#,
    )
    .bind(to_db_timestamp(&now))
    .bind(size_bytes.map(|s| s as i64))
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Clear is_modified after a successful save
pub async fn clear_modified(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<bool> {
    let result = sqlx::query("UPDATE image_sessions SET is_modified = 0 WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Store the undo ring pointer
pub async fn set_undo_pointer(
    conn: &mut SqliteConnection,
    id: Uuid,
    head: Option<i64>,
    cursor: Option<i64>,
) -> Result<bool> {
    let result =
        sqlx::query("UPDATE image_sessions SET undo_head = ?, undo_cursor = ? WHERE id = ?")
            .bind(head)
            .bind(cursor)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete a session; annotation layer and undo ring cascade
pub async fn delete_session(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<bool> {
    let result = sqlx::query("DELETE FROM image_sessions WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

fn row_to_session(row: &SqliteRow) -> Result<ImageSession> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Invalid session id '{}': {}", id, e)))?;

    let source_type: String = row.try_get("source_type")?;
    let source_type = SourceType::parse(&source_type)
        .ok_or_else(|| Error::Internal(format!("Unknown source_type '{}'", source_type)))?;

    let format: String = row.try_get("format")?;
    let format = ImageFormat::parse(&format)
        .ok_or_else(|| Error::Internal(format!("Unknown format '{}'", format)))?;

    let working_copy_path: String = row.try_get("working_copy_path")?;
    let full_resolution_path: Option<String> = row.try_get("full_resolution_path")?;
    let created_at: String = row.try_get("created_at")?;
    let last_modified_at: String = row.try_get("last_modified_at")?;

    Ok(ImageSession {
        id,
        terminal_session_id: row.try_get("terminal_session_id")?,
        source_type,
        source_path: row.try_get("source_path")?,
        format,
        width: row.try_get::<i64, _>("width")? as u32,
        height: row.try_get::<i64, _>("height")? as u32,
        size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
        working_copy_path: PathBuf::from(working_copy_path),
        full_resolution_path: full_resolution_path.map(PathBuf::from),
        undo_head: row.try_get("undo_head")?,
        undo_cursor: row.try_get("undo_cursor")?,
        created_at: parse_db_timestamp(&created_at)?,
        last_modified_at: parse_db_timestamp(&last_modified_at)?,
        is_modified: row.try_get("is_modified")?,
    })
}
