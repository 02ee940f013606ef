//! Recently viewed history database operations

use chrono::{DateTime, Utc};
use imgedit_common::time::{parse_db_timestamp, to_db_timestamp};
use imgedit_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::annotations::parse_uuid;
use crate::models::{HistoryEntry, SourceType};

const HISTORY_COLUMNS: &str = r#"
    id, terminal_session_id, image_path, source_type, thumbnail_path,
    last_viewed_at, view_count, is_edited
"#;

/// Entry for a (terminal, path) pair
pub async fn find_entry(
    conn: &mut SqliteConnection,
    terminal_session_id: &str,
    image_path: &str,
) -> Result<Option<HistoryEntry>> {
    let sql = format!(
        "SELECT {} FROM session_history WHERE terminal_session_id = ? AND image_path = ?",
        HISTORY_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(terminal_session_id)
        .bind(image_path)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_entry).transpose()
}

/// Entry by id
pub async fn get_entry(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<HistoryEntry>> {
    let sql = format!("SELECT {} FROM session_history WHERE id = ?", HISTORY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_entry).transpose()
}

/// Newest last_viewed_at for a terminal
pub async fn newest_viewed_at(
    conn: &mut SqliteConnection,
    terminal_session_id: &str,
) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = sqlx::query_scalar(
        "SELECT MAX(last_viewed_at) FROM session_history WHERE terminal_session_id = ?",
    )
    .bind(terminal_session_id)
    .fetch_one(&mut *conn)
    .await?;

    value.as_deref().map(parse_db_timestamp).transpose()
}

/// Number of entries a terminal currently holds
pub async fn count_for_terminal(
    conn: &mut SqliteConnection,
    terminal_session_id: &str,
) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM session_history WHERE terminal_session_id = ?")
            .bind(terminal_session_id)
            .fetch_one(&mut *conn)
            .await?;

    Ok(count)
}

/// Least recently viewed entry of a terminal
pub async fn oldest_for_terminal(
    conn: &mut SqliteConnection,
    terminal_session_id: &str,
) -> Result<Option<HistoryEntry>> {
    let sql = format!(
        r#"
        SELECT {} FROM session_history
        WHERE terminal_session_id = ?
        ORDER BY last_viewed_at ASC, id ASC
        LIMIT 1
        "#,
        HISTORY_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(terminal_session_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_entry).transpose()
}

/// Insert a new entry
pub async fn insert_entry(conn: &mut SqliteConnection, entry: &HistoryEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO session_history (
            id, terminal_session_id, image_path, source_type, thumbnail_path,
            last_viewed_at, view_count, is_edited
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.id.to_string())
    .bind(&entry.terminal_session_id)
    .bind(&entry.image_path)
    .bind(entry.source_type.as_str())
    .bind(&entry.thumbnail_path)
    .bind(to_db_timestamp(&entry.last_viewed_at))
    .bind(entry.view_count)
    .bind(entry.is_edited)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Increment view_count and refresh last_viewed_at
pub async fn touch_entry(
    conn: &mut SqliteConnection,
    id: Uuid,
    viewed_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE session_history
        SET view_count = view_count + 1, last_viewed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(to_db_timestamp(&viewed_at))
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Flag an entry as edited
pub async fn set_edited(
    conn: &mut SqliteConnection,
    terminal_session_id: &str,
    image_path: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE session_history SET is_edited = 1 WHERE terminal_session_id = ? AND image_path = ?",
    )
    .bind(terminal_session_id)
    .bind(image_path)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete one entry
pub async fn delete_entry(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM session_history WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Entries of a terminal, most recently viewed first
pub async fn list_for_terminal(
    conn: &mut SqliteConnection,
    terminal_session_id: &str,
    limit: i64,
) -> Result<Vec<HistoryEntry>> {
    let sql = format!(
        r#"
        SELECT {} FROM session_history
        WHERE terminal_session_id = ?
        ORDER BY last_viewed_at DESC, id DESC
        LIMIT ?
        "#,
        HISTORY_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(terminal_session_id)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(row_to_entry).collect()
}

/// Every entry, grouped by terminal, most recent first within a terminal
pub async fn list_all(conn: &mut SqliteConnection) -> Result<Vec<HistoryEntry>> {
    let sql = format!(
        "SELECT {} FROM session_history ORDER BY terminal_session_id, last_viewed_at DESC, id DESC",
        HISTORY_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

    rows.iter().map(row_to_entry).collect()
}

/// Delete entries last viewed before `cutoff`, returning (id, terminal) of each
pub async fn delete_viewed_before(
    conn: &mut SqliteConnection,
    cutoff: DateTime<Utc>,
) -> Result<Vec<(Uuid, String)>> {
    let rows = sqlx::query(
        "DELETE FROM session_history WHERE last_viewed_at < ? RETURNING id, terminal_session_id",
    )
    .bind(to_db_timestamp(&cutoff))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<(Uuid, String)> {
            let id: String = row.try_get("id")?;
            Ok((parse_uuid(&id)?, row.try_get("terminal_session_id")?))
        })
        .collect()
}

/// Delete every entry of a terminal, or of all terminals when None
pub async fn delete_for_terminal(
    conn: &mut SqliteConnection,
    terminal_session_id: Option<&str>,
) -> Result<u64> {
    let result = match terminal_session_id {
        Some(terminal) => {
            sqlx::query("DELETE FROM session_history WHERE terminal_session_id = ?")
                .bind(terminal)
                .execute(&mut *conn)
                .await?
        }
        None => {
            sqlx::query("DELETE FROM session_history")
                .execute(&mut *conn)
                .await?
        }
    };

    Ok(result.rows_affected())
}

fn row_to_entry(row: &SqliteRow) -> Result<HistoryEntry> {
    let id: String = row.try_get("id")?;
    let source_type: String = row.try_get("source_type")?;
    let last_viewed_at: String = row.try_get("last_viewed_at")?;

    Ok(HistoryEntry {
        id: parse_uuid(&id)?,
        terminal_session_id: row.try_get("terminal_session_id")?,
        image_path: row.try_get("image_path")?,
        source_type: SourceType::parse(&source_type)
            .ok_or_else(|| Error::Internal(format!("Unknown source_type '{}'", source_type)))?,
        thumbnail_path: row.try_get("thumbnail_path")?,
        last_viewed_at: parse_db_timestamp(&last_viewed_at)?,
        view_count: row.try_get("view_count")?,
        is_edited: row.try_get("is_edited")?,
    })
}
