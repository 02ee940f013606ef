//! Database Test Utilities
//!
//! Temporary databases and engines for integration tests

use anyhow::Result;
use imgedit_common::EngineConfig;
use imgedit_engine::EditorEngine;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Column information from PRAGMA table_info
#[derive(Debug, sqlx::FromRow)]
pub struct ColumnInfo {
    pub cid: i32,
    pub name: String,
    pub r#type: String,
    pub notnull: i32,
    pub dflt_value: Option<String>,
    pub pk: i32,
}

/// Create temporary test database with the full schema
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_imgedit.db");
    let pool = imgedit_engine::db::init_database(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Engine defaults with a small worker pool
pub fn test_config() -> EngineConfig {
    EngineConfig {
        max_raster_jobs: 2,
        ..EngineConfig::default()
    }
}

/// Engine rooted in a fresh temp directory
pub async fn create_test_engine() -> Result<(TempDir, EditorEngine)> {
    create_test_engine_with(test_config()).await
}

pub async fn create_test_engine_with(config: EngineConfig) -> Result<(TempDir, EditorEngine)> {
    let temp_dir = TempDir::new()?;
    let engine = EditorEngine::open(&temp_dir.path().join("root"), config).await?;
    Ok((temp_dir, engine))
}

/// Get table schema information
pub async fn get_table_columns(pool: &SqlitePool, table_name: &str) -> Result<Vec<ColumnInfo>> {
    let query = format!("PRAGMA table_info({})", table_name);
    let columns = sqlx::query_as::<_, ColumnInfo>(&query)
        .fetch_all(pool)
        .await?;
    Ok(columns)
}

/// Check if table has specific column
pub async fn has_column(pool: &SqlitePool, table_name: &str, column_name: &str) -> Result<bool> {
    let columns = get_table_columns(pool, table_name).await?;
    Ok(columns.iter().any(|c| c.name == column_name))
}

/// Get all table names in database
pub async fn get_table_names(pool: &SqlitePool) -> Result<Vec<String>> {
    let tables = sqlx::query_scalar::<_, String>(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
    )
    .fetch_all(pool)
    .await?;
    Ok(tables)
}
