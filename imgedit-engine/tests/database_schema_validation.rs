//! Database schema validation
//!
//! Checks the tables, columns and constraints the engine relies on.

mod helpers;

use helpers::{create_test_db, get_table_columns, get_table_names, has_column};
use sqlx::SqlitePool;

const NOW: &str = "2026-01-01T00:00:00.000000Z";

async fn insert_session(pool: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO image_sessions (
            id, terminal_session_id, source_type, format, width, height,
            size_bytes, working_copy_path, created_at, last_modified_at
        ) VALUES (?, 't', 'file', 'png', 10, 10, 100, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(format!("/work/{}.png", id))
    .bind(NOW)
    .bind(NOW)
    .execute(pool)
    .await
    .map(|_| ())
}

async fn insert_slot(pool: &SqlitePool, id: &str, session: &str, position: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO edit_operations (id, session_id, operation_type, scene_snapshot, timestamp, position)
        VALUES (?, ?, 'draw', '{"objects":[]}', ?, ?)
        "#,
    )
    .bind(id)
    .bind(session)
    .bind(NOW)
    .bind(position)
    .execute(pool)
    .await
    .map(|_| ())
}

#[tokio::test]
async fn test_all_tables_exist() {
    let (_temp, pool) = create_test_db().await.unwrap();
    let tables = get_table_names(&pool).await.unwrap();

    for table in [
        "annotation_layers",
        "edit_operations",
        "image_sessions",
        "schema_version",
        "session_history",
    ] {
        assert!(tables.contains(&table.to_string()), "missing table {}", table);
    }
}

#[tokio::test]
async fn test_image_sessions_columns() {
    let (_temp, pool) = create_test_db().await.unwrap();

    for column in [
        "id",
        "terminal_session_id",
        "source_type",
        "source_path",
        "format",
        "width",
        "height",
        "size_bytes",
        "working_copy_path",
        "full_resolution_path",
        "undo_head",
        "undo_cursor",
        "created_at",
        "last_modified_at",
        "is_modified",
    ] {
        assert!(
            has_column(&pool, "image_sessions", column).await.unwrap(),
            "image_sessions.{} missing",
            column
        );
    }

    let columns = get_table_columns(&pool, "image_sessions").await.unwrap();
    let id = columns.iter().find(|c| c.name == "id").unwrap();
    assert_eq!(id.pk, 1);
    let undo_head = columns.iter().find(|c| c.name == "undo_head").unwrap();
    assert_eq!(undo_head.notnull, 0);
}

#[tokio::test]
async fn test_edit_operations_columns() {
    let (_temp, pool) = create_test_db().await.unwrap();

    for column in [
        "id",
        "session_id",
        "operation_type",
        "scene_snapshot",
        "sequence",
        "raster_width",
        "raster_height",
        "timestamp",
        "position",
    ] {
        assert!(
            has_column(&pool, "edit_operations", column).await.unwrap(),
            "edit_operations.{} missing",
            column
        );
    }
}

#[tokio::test]
async fn test_session_check_constraints() {
    let (_temp, pool) = create_test_db().await.unwrap();
    insert_session(&pool, "ok").await.unwrap();

    let rejected = [
        "UPDATE image_sessions SET width = 0 WHERE id = 'ok'",
        "UPDATE image_sessions SET height = 32768 WHERE id = 'ok'",
        "UPDATE image_sessions SET size_bytes = 52428801 WHERE id = 'ok'",
        "UPDATE image_sessions SET format = 'tiff' WHERE id = 'ok'",
        "UPDATE image_sessions SET source_type = 'camera' WHERE id = 'ok'",
        "UPDATE image_sessions SET working_copy_path = '/work/../etc/passwd' WHERE id = 'ok'",
    ];
    for statement in rejected {
        assert!(
            sqlx::query(statement).execute(&pool).await.is_err(),
            "accepted: {}",
            statement
        );
    }
}

#[tokio::test]
async fn test_undo_slot_position_bounds_and_uniqueness() {
    let (_temp, pool) = create_test_db().await.unwrap();
    insert_session(&pool, "s").await.unwrap();

    insert_slot(&pool, "a", "s", 0).await.unwrap();
    insert_slot(&pool, "b", "s", 49).await.unwrap();
    assert!(insert_slot(&pool, "c", "s", 50).await.is_err());
    assert!(insert_slot(&pool, "d", "s", -1).await.is_err());

    // One row per (session, position)
    assert!(insert_slot(&pool, "e", "s", 0).await.is_err());
}

#[tokio::test]
async fn test_annotation_layer_is_one_per_session() {
    let (_temp, pool) = create_test_db().await.unwrap();
    insert_session(&pool, "s").await.unwrap();

    let insert = |id: &'static str, version: i64| {
        sqlx::query(
            "INSERT INTO annotation_layers (id, session_id, scene, version, last_updated) VALUES (?, 's', '{}', ?, ?)",
        )
        .bind(id)
        .bind(version)
        .bind(NOW)
    };

    assert!(insert("bad", 0).execute(&pool).await.is_err());
    insert("l1", 1).execute(&pool).await.unwrap();
    assert!(insert("l2", 1).execute(&pool).await.is_err());
}

#[tokio::test]
async fn test_deleting_session_cascades() {
    let (_temp, pool) = create_test_db().await.unwrap();
    insert_session(&pool, "s").await.unwrap();
    insert_slot(&pool, "a", "s", 3).await.unwrap();
    sqlx::query(
        "INSERT INTO annotation_layers (id, session_id, scene, version, last_updated) VALUES ('l', 's', '{}', 1, ?)",
    )
    .bind(NOW)
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query("DELETE FROM image_sessions WHERE id = 's'")
        .execute(&pool)
        .await
        .unwrap();

    for table in ["annotation_layers", "edit_operations"] {
        let remaining: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0, "{} rows survived the session", table);
    }
}

#[tokio::test]
async fn test_slot_for_unknown_session_is_rejected() {
    let (_temp, pool) = create_test_db().await.unwrap();
    assert!(insert_slot(&pool, "a", "ghost", 0).await.is_err());
}

#[tokio::test]
async fn test_history_is_unique_per_terminal_and_path() {
    let (_temp, pool) = create_test_db().await.unwrap();
    let insert = |id: &'static str, terminal: &'static str| {
        sqlx::query(
            "INSERT INTO session_history (id, terminal_session_id, image_path, source_type, last_viewed_at)
             VALUES (?, ?, '/a.png', 'file', ?)",
        )
        .bind(id)
        .bind(terminal)
        .bind(NOW)
    };

    insert("h1", "t1").execute(&pool).await.unwrap();
    insert("h2", "t2").execute(&pool).await.unwrap();
    assert!(insert("h3", "t1").execute(&pool).await.is_err());

    let view_count: i64 = sqlx::query_scalar("SELECT view_count FROM session_history WHERE id = 'h1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(view_count, 1);
}

#[tokio::test]
async fn test_schema_version_is_current() {
    let (_temp, pool) = create_test_db().await.unwrap();
    let version = imgedit_common::db::get_schema_version(&pool).await.unwrap();
    assert_eq!(version, imgedit_common::db::CURRENT_SCHEMA_VERSION);
}
