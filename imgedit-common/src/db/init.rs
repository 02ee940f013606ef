//! Database initialization
//!
//! Creates the SQLite database on first run, applies connection pragmas and
//! brings the schema up to date. Safe to call on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default SQLite busy timeout; lock contention beyond this surfaces as an error
/// and is handled by the engine's retry logic.
const BUSY_TIMEOUT_MS: u64 = 250;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas go through the connect options so every pooled connection gets
    // them, not just the first one.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    // Manual migrations run after CREATE TABLE IF NOT EXISTS
    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_image_sessions_table(pool).await?;
    create_annotation_layers_table(pool).await?;
    create_edit_operations_table(pool).await?;
    create_session_history_table(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the image_sessions table
///
/// One row per open image. `undo_head`/`undo_cursor` hold the absolute
/// sequence numbers of the undo ring; both stay NULL until the first snapshot.
pub async fn create_image_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS image_sessions (
            id TEXT PRIMARY KEY,
            terminal_session_id TEXT NOT NULL,
            source_type TEXT NOT NULL CHECK (source_type IN ('file', 'clipboard', 'url')),
            source_path TEXT,
            format TEXT NOT NULL CHECK (format IN ('png', 'jpeg', 'gif', 'webp', 'bmp')),
            width INTEGER NOT NULL CHECK (width BETWEEN 1 AND 32767),
            height INTEGER NOT NULL CHECK (height BETWEEN 1 AND 32767),
            size_bytes INTEGER NOT NULL CHECK (size_bytes > 0 AND size_bytes <= 52428800),
            working_copy_path TEXT NOT NULL CHECK (instr(working_copy_path, '..') = 0),
            full_resolution_path TEXT,
            undo_head INTEGER,
            undo_cursor INTEGER,
            created_at TEXT NOT NULL,
            last_modified_at TEXT NOT NULL,
            is_modified INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_image_sessions_terminal ON image_sessions(terminal_session_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_image_sessions_created_at ON image_sessions(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the annotation_layers table (1:1 with image_sessions)
pub async fn create_annotation_layers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS annotation_layers (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL UNIQUE
                REFERENCES image_sessions(id) ON DELETE CASCADE,
            scene TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1 CHECK (version >= 1),
            last_updated TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the edit_operations table (the undo ring, one row per slot)
///
/// `raster_width`/`raster_height` record the frame a snapshot's coordinates
/// refer to; NULL for slots written before migration v3.
pub async fn create_edit_operations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS edit_operations (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL
                REFERENCES image_sessions(id) ON DELETE CASCADE,
            operation_type TEXT NOT NULL
                CHECK (operation_type IN ('draw', 'text', 'shape', 'filter', 'crop', 'resize')),
            scene_snapshot TEXT NOT NULL,
            sequence INTEGER,
            raster_width INTEGER,
            raster_height INTEGER,
            timestamp TEXT NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0 AND position < 50),
            UNIQUE (session_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_edit_operations_session_position ON edit_operations(session_id, position)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the session_history table (recently viewed images per terminal)
pub async fn create_session_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_history (
            id TEXT PRIMARY KEY,
            terminal_session_id TEXT NOT NULL,
            image_path TEXT NOT NULL,
            source_type TEXT NOT NULL CHECK (source_type IN ('file', 'clipboard', 'url')),
            thumbnail_path TEXT,
            last_viewed_at TEXT NOT NULL,
            view_count INTEGER NOT NULL DEFAULT 1 CHECK (view_count >= 1),
            is_edited INTEGER NOT NULL DEFAULT 0,
            UNIQUE (terminal_session_id, image_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_session_history_terminal_viewed ON session_history(terminal_session_id, last_viewed_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
