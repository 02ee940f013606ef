//! Integration tests for concurrent access patterns
//!
//! Many sessions are edited in parallel; operations on one session are
//! serialized and never interleave their raster and overlay updates.

mod helpers;

use helpers::{create_test_engine, png_bytes};
use imgedit_engine::models::{OperationType, Scene};
use imgedit_engine::{EditorEngine, ImageSource};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinSet;

async fn open(engine: &EditorEngine, size: u32) -> uuid::Uuid {
    engine
        .open_image("t", ImageSource::Clipboard(png_bytes(size, size)))
        .await
        .unwrap()
        .session
        .id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_sessions_are_independent() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let engine = Arc::new(engine);

    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(open(&engine, 64).await);
    }

    let mut tasks = JoinSet::new();
    for (i, id) in ids.iter().copied().enumerate() {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move {
            let side = 10 + i as i64;
            engine.crop(id, 0, 0, side, side).await.unwrap();
            engine.blur(id, 1.0).await.unwrap();
            (id, side as u32)
        });
    }

    while let Some(result) = tasks.join_next().await {
        let (id, side) = result.unwrap();
        let session = engine.get_session(id).await.unwrap();
        assert_eq!((session.width, session.height), (side, side));
        assert_eq!(
            image::image_dimensions(&session.working_copy_path).unwrap(),
            (side, side)
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_session_operations_are_serialized() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let engine = Arc::new(engine);
    let id = open(&engine, 128).await;

    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move { engine.resize(id, 100, 100, false).await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let session = engine.get_session(id).await.unwrap();
    assert_eq!((session.width, session.height), (100, 100));
    let layer = engine.get_annotations(id).await.unwrap();
    // One version bump per resize
    assert_eq!(layer.version, 11);
    let slots = engine.undo_buffer().list(id).await.unwrap();
    // Baseline plus ten resizes
    assert_eq!(slots.len(), 11);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_annotation_writers_on_many_sessions() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let engine = Arc::new(engine);

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(open(&engine, 16).await);
    }

    let mut tasks = JoinSet::new();
    for id in ids.clone() {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move {
            let mut version = 1;
            for step in 0..5 {
                let scene = Scene::from_value(json!({
                    "objects": [{"type": "rect", "left": step, "top": 0, "width": 1, "height": 1}]
                }))
                .unwrap();
                version = engine
                    .update_annotations(id, &scene, version, OperationType::Shape)
                    .await
                    .unwrap();
            }
            version
        });
    }

    while let Some(result) = tasks.join_next().await {
        assert_eq!(result.unwrap(), 6);
    }
}
