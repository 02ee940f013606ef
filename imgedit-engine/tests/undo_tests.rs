//! Integration tests for the undo/redo ring

mod helpers;

use helpers::{create_test_engine, png_bytes};
use imgedit_engine::models::{OperationType, Scene, UNDO_SLOTS};
use imgedit_engine::{EditorEngine, EngineError, ImageSource};
use serde_json::json;
use uuid::Uuid;

fn scene(marker: i64) -> Scene {
    Scene::from_value(json!({
        "version": "1",
        "objects": [{"type": "circle", "left": marker, "top": 0, "radius": 3}]
    }))
    .unwrap()
}

async fn open(engine: &EditorEngine) -> Uuid {
    engine
        .open_image("t", ImageSource::Clipboard(png_bytes(32, 32)))
        .await
        .unwrap()
        .session
        .id
}

#[tokio::test]
async fn test_store_twice_at_same_position_keeps_second() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let id = open(&engine).await;
    let undo = engine.undo_buffer();

    undo.store_snapshot(id, OperationType::Draw, &scene(1), 7).await.unwrap();
    undo.store_snapshot(id, OperationType::Text, &scene(2), 7).await.unwrap();

    assert_eq!(undo.get_snapshot(id, 7).await.unwrap(), Some(scene(2)));
    assert_eq!(undo.get_snapshot(id, 8).await.unwrap(), None);
    assert_eq!(undo.list(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_positions_outside_ring_are_rejected() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let id = open(&engine).await;
    let undo = engine.undo_buffer();

    for position in [-1, UNDO_SLOTS, 1_000] {
        assert!(matches!(
            undo.store_snapshot(id, OperationType::Draw, &scene(0), position).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            undo.get_snapshot(id, position).await,
            Err(EngineError::Validation(_))
        ));
    }
}

#[tokio::test]
async fn test_undo_and_redo_walk_the_history() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let id = open(&engine).await;

    let mut version = 1;
    for marker in 1..=3 {
        version = engine
            .update_annotations(id, &scene(marker), version, OperationType::Shape)
            .await
            .unwrap();
    }

    let undone = engine.undo(id).await.unwrap();
    assert_eq!(undone.scene, scene(2));
    assert_eq!(undone.version, version + 1);
    assert_eq!(engine.get_annotations(id).await.unwrap().scene, scene(2));

    assert_eq!(engine.undo(id).await.unwrap().scene, scene(1));
    // Back to the state before the first edit
    assert!(engine.undo(id).await.unwrap().scene.is_empty());
    assert!(matches!(engine.undo(id).await, Err(EngineError::NotFound(_))));

    assert_eq!(engine.redo(id).await.unwrap().scene, scene(1));
    assert_eq!(engine.redo(id).await.unwrap().scene, scene(2));
    assert_eq!(engine.redo(id).await.unwrap().scene, scene(3));
    assert!(matches!(engine.redo(id).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_new_edit_after_undo_discards_redo_tail() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let id = open(&engine).await;

    let v2 = engine
        .update_annotations(id, &scene(1), 1, OperationType::Draw)
        .await
        .unwrap();
    let v3 = engine
        .update_annotations(id, &scene(2), v2, OperationType::Draw)
        .await
        .unwrap();
    let undone = engine.undo(id).await.unwrap();
    assert_eq!(undone.version, v3 + 1);

    engine
        .update_annotations(id, &scene(9), undone.version, OperationType::Draw)
        .await
        .unwrap();

    assert!(matches!(engine.redo(id).await, Err(EngineError::NotFound(_))));
    assert_eq!(engine.undo(id).await.unwrap().scene, scene(1));
}

#[tokio::test]
async fn test_ring_keeps_only_the_last_fifty_snapshots() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let id = open(&engine).await;
    let undo = engine.undo_buffer();

    // Sequences 0..=59: ten more than the ring holds
    for marker in 0..60 {
        undo.record(id, OperationType::Draw, &scene(marker)).await.unwrap();
    }
    assert_eq!(undo.list(id).await.unwrap().len(), UNDO_SLOTS as usize);

    let mut steps = 0;
    let mut last = None;
    while let Ok(outcome) = undo.undo(id).await {
        steps += 1;
        last = Some(outcome.scene);
    }

    // Cursor at 59 can walk back to 10, the oldest surviving snapshot
    assert_eq!(steps, 49);
    assert_eq!(last, Some(scene(10)));
}

#[tokio::test]
async fn test_undo_on_fresh_session_is_not_found() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let id = open(&engine).await;
    assert_eq!(engine.undo(id).await.unwrap_err().code(), "NOT_FOUND");
    assert_eq!(engine.redo(id).await.unwrap_err().code(), "NOT_FOUND");
}

async fn open_sized(engine: &EditorEngine, width: u32, height: u32) -> Uuid {
    engine
        .open_image("t", ImageSource::Clipboard(png_bytes(width, height)))
        .await
        .unwrap()
        .session
        .id
}

fn rect_at(left: f64) -> Scene {
    Scene::from_value(json!({
        "version": "1",
        "objects": [{"type": "rect", "left": left, "top": 20, "width": 40, "height": 40}]
    }))
    .unwrap()
}

async fn assert_ring_untouched(engine: &EditorEngine, id: Uuid, after: &str) {
    let session = engine.get_session(id).await.unwrap();
    assert_eq!(
        (session.undo_head, session.undo_cursor),
        (None, None),
        "undo pointer moved after {}",
        after
    );
    assert!(
        engine.undo_buffer().list(id).await.unwrap().is_empty(),
        "snapshot written after {}",
        after
    );
}

#[tokio::test]
async fn test_rejected_calls_leave_undo_state_untouched() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let id = open(&engine).await;

    let stale = engine
        .update_annotations(id, &scene(1), 7, OperationType::Shape)
        .await;
    assert!(matches!(stale, Err(EngineError::Conflict { expected: 7, current: 1 })));
    assert_ring_untouched(&engine, id, "stale update").await;

    let invalid: Scene = serde_json::from_value(json!({"objects": [{"left": 1, "top": 2}]})).unwrap();
    let rejected = engine
        .update_annotations(id, &invalid, 1, OperationType::Draw)
        .await;
    assert!(matches!(rejected, Err(EngineError::Validation(_))));
    assert_ring_untouched(&engine, id, "invalid scene").await;

    assert!(matches!(engine.crop(id, 0, 0, 64, 64).await, Err(EngineError::Validation(_))));
    assert_ring_untouched(&engine, id, "oversized crop").await;

    assert!(matches!(engine.blur(id, 50.0).await, Err(EngineError::Validation(_))));
    assert_ring_untouched(&engine, id, "blur radius 50").await;

    assert!(matches!(engine.sharpen(id, -1.0).await, Err(EngineError::Validation(_))));
    assert_ring_untouched(&engine, id, "negative sharpen").await;

    assert!(matches!(
        engine.resize(id, 16, -5, true).await,
        Err(EngineError::Validation(_))
    ));
    assert_ring_untouched(&engine, id, "negative resize height").await;

    // The first accepted edit records the overlay it replaced, tagged with its own kind
    engine
        .update_annotations(id, &scene(1), 1, OperationType::Text)
        .await
        .unwrap();
    let slots = engine.undo_buffer().list(id).await.unwrap();
    assert_eq!(slots.len(), 2);
    assert!(slots[0].scene_snapshot.is_empty());
    assert_eq!(slots[0].operation_type, OperationType::Text);
    assert_eq!(slots[1].scene_snapshot, scene(1));
}

#[tokio::test]
async fn test_first_transform_records_baseline_in_the_old_frame() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let id = open_sized(&engine, 400, 200).await;

    let resized = engine.resize(id, 100, 50, false).await.unwrap();
    assert_eq!(resized.sequence, 1);

    let slots = engine.undo_buffer().list(id).await.unwrap();
    assert_eq!(slots.len(), 2);
    assert_eq!((slots[0].raster_width, slots[0].raster_height), (Some(400), Some(200)));
    assert_eq!((slots[1].raster_width, slots[1].raster_height), (Some(100), Some(50)));
    assert!(slots.iter().all(|op| op.operation_type == OperationType::Resize));
}

#[tokio::test]
async fn test_undo_stops_at_a_resize() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let id = open_sized(&engine, 400, 200).await;

    engine
        .update_annotations(id, &rect_at(300.0), 1, OperationType::Shape)
        .await
        .unwrap();
    let resized = engine.resize(id, 100, 50, false).await.unwrap();
    assert_eq!(resized.scene, rect_at(300.0).scaled(0.25, 0.25));

    // The previous snapshot places the rect at left=300 on a 100px wide raster
    let err = engine.undo(id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(msg) if msg.contains("resize")));

    let layer = engine.get_annotations(id).await.unwrap();
    assert_eq!(layer.scene, resized.scene);
    assert_eq!(layer.version, resized.annotation_version);
    let session = engine.get_session(id).await.unwrap();
    assert_eq!(session.undo_cursor, Some(resized.sequence));

    // Edits made on the new frame still undo back to the resize
    engine
        .update_annotations(id, &rect_at(10.0), resized.annotation_version, OperationType::Shape)
        .await
        .unwrap();
    assert_eq!(engine.undo(id).await.unwrap().scene, resized.scene);
    assert!(matches!(engine.undo(id).await, Err(EngineError::NotFound(_))));
    assert_eq!(engine.redo(id).await.unwrap().scene, rect_at(10.0));
}

#[tokio::test]
async fn test_undo_stops_at_a_crop() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let id = open_sized(&engine, 400, 200).await;

    engine
        .update_annotations(id, &rect_at(300.0), 1, OperationType::Shape)
        .await
        .unwrap();
    let cropped = engine.crop(id, 0, 0, 200, 100).await.unwrap();
    assert!(cropped.scene.is_empty());

    assert_eq!(engine.undo(id).await.unwrap_err().code(), "NOT_FOUND");
    assert!(engine.get_annotations(id).await.unwrap().scene.is_empty());
}
