//! Database schema migrations
//!
//! Versioned, idempotent migrations tracked in the `schema_version` table.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - they must stay stable for users upgrading
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Use ALTER TABLE** - prefer it over DROP/CREATE to preserve data
//! 4. **Check before altering** - a fresh database already has the latest columns

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        warn!("This may indicate a downgrade. Proceeding with caution.");
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        // v1 is the baseline created by init::create_schema
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed (baseline)");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    if current_version < 3 {
        migrate_v3(pool).await?;
        set_schema_version(pool, 3).await?;
        info!("✓ Migration v3 completed");
    }

    info!("All migrations completed successfully");
    Ok(())
}

/// Migration v2: undo pointer, full-resolution link and snapshot sequence
///
/// **Background:** The first schema kept the undo pointer in memory only, so
/// it was lost on restart. The pointer now lives on `image_sessions`, next to
/// the path of the untouched full-resolution copy used when saving a
/// downsampled session. Ring slots record the sequence they were written for.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: undo pointer columns");

    add_column_if_missing(pool, "image_sessions", "full_resolution_path", "TEXT").await?;
    add_column_if_missing(pool, "image_sessions", "undo_head", "INTEGER").await?;
    add_column_if_missing(pool, "image_sessions", "undo_cursor", "INTEGER").await?;
    add_column_if_missing(pool, "edit_operations", "sequence", "INTEGER").await?;

    Ok(())
}

/// Migration v3: raster frame of each undo snapshot
///
/// **Background:** Overlay coordinates are only meaningful against the raster
/// size they were drawn on. Restoring a snapshot taken before a crop or resize
/// put objects back at positions of the old frame, so each slot now records
/// the raster size it was taken at. Existing slots keep NULL.
async fn migrate_v3(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v3: snapshot raster size");

    add_column_if_missing(pool, "edit_operations", "raster_width", "INTEGER").await?;
    add_column_if_missing(pool, "edit_operations", "raster_height", "INTEGER").await?;

    Ok(())
}

/// Add a column unless it is already present
async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    column_type: &str,
) -> Result<()> {
    let has_column: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await?;

    if has_column > 0 {
        info!("  {}.{} already exists - skipping", table, column);
        return Ok(());
    }

    let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_type);
    match sqlx::query(&sql).execute(pool).await {
        Ok(_) => {
            info!("  ✓ Added {}.{}", table, column);
            Ok(())
        }
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
            // Another process beat us to it
            info!("  {}.{} added concurrently - skipping", table, column);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
