//! Integration tests for crop, resize, filters and save

mod helpers;

use helpers::{create_test_engine, write_image, write_png};
use image::ImageFormat as Codec;
use imgedit_engine::models::{OperationType, Scene, SceneItem, SceneObject};
use imgedit_engine::{EditorEngine, EngineError, ImageSource};
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

async fn open_png(engine: &EditorEngine, dir: &TempDir, width: u32, height: u32) -> Uuid {
    let path = write_png(dir.path(), &format!("{}x{}.png", width, height), width, height);
    engine
        .open_image("terminal-1", ImageSource::File(path))
        .await
        .unwrap()
        .session
        .id
}

fn annotated_scene() -> Scene {
    Scene::from_value(json!({
        "version": "1",
        "objects": [
            {"type": "rect", "left": 100, "top": 60, "width": 50, "height": 30, "strokeWidth": 4},
            {"type": "text", "left": 10, "top": 20, "text": "note", "fontSize": 20},
            {"type": "star", "left": 40, "top": 80, "strokeWidth": 2}
        ]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_crop_inside_bounds_updates_geometry_and_resets_overlay() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let images = TempDir::new().unwrap();
    let id = open_png(&engine, &images, 500, 400).await;
    engine
        .update_annotations(id, &annotated_scene(), 1, OperationType::Shape)
        .await
        .unwrap();

    let outcome = engine.crop(id, 100, 50, 300, 200).await.unwrap();

    assert_eq!((outcome.session.width, outcome.session.height), (300, 200));
    assert!(outcome.session.is_modified);
    assert!(outcome.scene.is_empty());
    assert_eq!(outcome.annotation_version, 3);
    assert_eq!(
        image::image_dimensions(&outcome.session.working_copy_path).unwrap(),
        (300, 200)
    );

    let layer = engine.get_annotations(id).await.unwrap();
    assert!(layer.scene.is_empty());
    assert_eq!(layer.version, 3);
}

#[tokio::test]
async fn test_crop_out_of_bounds_leaves_image_unchanged() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let images = TempDir::new().unwrap();
    let id = open_png(&engine, &images, 500, 400).await;
    let before = engine.get_session(id).await.unwrap();
    let raster_before = std::fs::read(&before.working_copy_path).unwrap();

    let err = engine.crop(id, 120, 0, 400, 100).await.unwrap_err();
    assert!(matches!(&err, EngineError::Validation(msg) if msg == "crop exceeds image bounds: x+w=520 > width=500"));

    for (x, y, w, h) in [(-1, 0, 10, 10), (0, 0, 0, 10), (0, 0, 10, -5), (0, 350, 10, 51)] {
        assert!(matches!(
            engine.crop(id, x, y, w, h).await,
            Err(EngineError::Validation(_))
        ));
    }

    let after = engine.get_session(id).await.unwrap();
    assert_eq!((after.width, after.height), (500, 400));
    assert!(!after.is_modified);
    assert_eq!(std::fs::read(&after.working_copy_path).unwrap(), raster_before);
}

#[tokio::test]
async fn test_resize_rescales_overlay() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let images = TempDir::new().unwrap();
    let id = open_png(&engine, &images, 400, 300).await;
    engine
        .update_annotations(id, &annotated_scene(), 1, OperationType::Shape)
        .await
        .unwrap();

    // sx = 0.5, sy = 2.0
    let outcome = engine.resize(id, 200, 600, false).await.unwrap();
    assert_eq!((outcome.session.width, outcome.session.height), (200, 600));
    assert_eq!(outcome.annotation_version, 3);

    let scene = engine.get_annotations(id).await.unwrap().scene;
    match &scene.objects[0] {
        SceneItem::Known(SceneObject::Rect { left, top, width, height, style }) => {
            assert_eq!(*left, 50.0);
            assert_eq!(*top, 120.0);
            assert_eq!(*width, 25.0);
            assert_eq!(*height, 60.0);
            assert_eq!(style.stroke_width, Some(2.0));
        }
        other => panic!("expected rect, got {:?}", other),
    }
    match &scene.objects[1] {
        SceneItem::Known(SceneObject::Text { font_size, .. }) => assert_eq!(*font_size, 10.0),
        other => panic!("expected text, got {:?}", other),
    }
    match &scene.objects[2] {
        SceneItem::Opaque(value) => {
            assert_eq!(value["left"], json!(20.0));
            assert_eq!(value["top"], json!(160.0));
            assert_eq!(value["strokeWidth"], json!(1.0));
        }
        other => panic!("expected opaque star, got {:?}", other),
    }
}

#[tokio::test]
async fn test_resize_keep_aspect_derives_height() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let images = TempDir::new().unwrap();
    let id = open_png(&engine, &images, 400, 300).await;

    let outcome = engine.resize(id, 200, 1, true).await.unwrap();
    assert_eq!((outcome.session.width, outcome.session.height), (200, 150));
    assert_eq!(
        image::image_dimensions(&outcome.session.working_copy_path).unwrap(),
        (200, 150)
    );
}

#[tokio::test]
async fn test_resize_clears_corrupt_scene() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let images = TempDir::new().unwrap();
    let id = open_png(&engine, &images, 40, 40).await;

    sqlx::query("UPDATE annotation_layers SET scene = '{not json' WHERE session_id = ?")
        .bind(id.to_string())
        .execute(engine.pool())
        .await
        .unwrap();

    let outcome = engine.resize(id, 20, 20, false).await.unwrap();
    assert!(outcome.scene.is_empty());
    assert!(engine.get_annotations(id).await.unwrap().scene.is_empty());
}

#[tokio::test]
async fn test_resize_rejects_bad_dimensions() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let images = TempDir::new().unwrap();
    let id = open_png(&engine, &images, 40, 40).await;

    for (w, h) in [(0, 10), (10, 0), (32_768, 10), (10, -1)] {
        assert!(matches!(
            engine.resize(id, w, h, false).await,
            Err(EngineError::Validation(_))
        ));
    }
}

#[tokio::test]
async fn test_filters_preserve_dimensions_and_record_operation() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let images = TempDir::new().unwrap();
    let id = open_png(&engine, &images, 60, 40).await;
    let before = std::fs::read(engine.get_session(id).await.unwrap().working_copy_path).unwrap();

    let blurred = engine.blur(id, 3.0).await.unwrap();
    assert_eq!((blurred.session.width, blurred.session.height), (60, 40));
    assert!(blurred.session.is_modified);
    assert_eq!(blurred.annotation_version, 1);
    assert_ne!(std::fs::read(&blurred.session.working_copy_path).unwrap(), before);

    let sharpened = engine.sharpen(id, 1.5).await.unwrap();
    assert_eq!((sharpened.session.width, sharpened.session.height), (60, 40));
    assert_eq!(sharpened.sequence, blurred.sequence + 1);

    let slots = engine.undo_buffer().list(id).await.unwrap();
    let filters = slots
        .iter()
        .filter(|op| op.operation_type == OperationType::Filter && op.sequence.unwrap_or(0) > 0)
        .count();
    assert_eq!(filters, 2);
}

#[tokio::test]
async fn test_filter_parameters_are_bounded() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let images = TempDir::new().unwrap();
    let id = open_png(&engine, &images, 10, 10).await;

    assert!(matches!(engine.blur(id, 20.5).await, Err(EngineError::Validation(_))));
    assert!(matches!(engine.blur(id, -1.0).await, Err(EngineError::Validation(_))));
    assert!(matches!(engine.blur(id, f32::NAN).await, Err(EngineError::Validation(_))));
    assert!(matches!(engine.sharpen(id, 10.5).await, Err(EngineError::Validation(_))));
    assert!(engine.blur(id, 0.0).await.is_ok());
    assert!(engine.sharpen(id, 10.0).await.is_ok());
}

#[tokio::test]
async fn test_transform_on_missing_session_is_not_found() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let err = engine.crop(Uuid::new_v4(), 0, 0, 1, 1).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_failed_decode_reports_unmutated_state() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let images = TempDir::new().unwrap();
    let id = open_png(&engine, &images, 30, 30).await;
    let session = engine.get_session(id).await.unwrap();
    std::fs::write(&session.working_copy_path, b"garbage").unwrap();

    match engine.blur(id, 1.0).await.unwrap_err() {
        EngineError::Transform { raster_mutated, overlay_mutated, .. } => {
            assert!(!raster_mutated);
            assert!(!overlay_mutated);
        }
        other => panic!("expected transform error, got {:?}", other),
    }

    let after = engine.get_session(id).await.unwrap();
    assert!(!after.is_modified);

    // No temp files left behind
    let leftovers = std::fs::read_dir(engine.working_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_save_writes_requested_format_and_clears_modified() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let images = TempDir::new().unwrap();
    let source = write_image(images.path(), "pic.png", 80, 60, Codec::Png);
    let opened = engine
        .open_image("terminal-1", ImageSource::File(source.clone()))
        .await
        .unwrap();
    let id = opened.session.id;

    engine.crop(id, 0, 0, 40, 30).await.unwrap();

    let output = images.path().join("out.jpg");
    let saved = engine.save(id, &output).await.unwrap();

    assert_eq!((saved.width, saved.height), (40, 30));
    assert!(saved.size_bytes > 0);
    assert_eq!(image::ImageFormat::from_path(&output).unwrap(), Codec::Jpeg);
    assert_eq!(image::image_dimensions(&output).unwrap(), (40, 30));
    assert!(!engine.get_session(id).await.unwrap().is_modified);

    let history = engine.recent_history("terminal-1", 10).await.unwrap();
    assert!(history[0].is_edited);

    // Source untouched
    assert_eq!(image::image_dimensions(&source).unwrap(), (80, 60));
}

#[tokio::test]
async fn test_save_rejects_unsafe_output() {
    let (_temp, engine) = create_test_engine().await.unwrap();
    let images = TempDir::new().unwrap();
    let id = open_png(&engine, &images, 10, 10).await;

    let traversal = images.path().join("..").join("escape.png");
    assert!(matches!(engine.save(id, &traversal).await, Err(EngineError::Validation(_))));

    let missing_dir = images.path().join("nope").join("out.png");
    assert!(matches!(engine.save(id, &missing_dir).await, Err(EngineError::Validation(_))));
}
