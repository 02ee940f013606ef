//! Integration tests for interactive downsampling and full-resolution save

mod helpers;

use helpers::{create_test_engine_with, test_config, write_png};
use imgedit_engine::services::{RasterWorkerPool, ResolutionAdapter};
use imgedit_engine::ImageSource;
use tempfile::TempDir;

fn adapter() -> ResolutionAdapter {
    ResolutionAdapter::new(RasterWorkerPool::new(2))
}

#[tokio::test]
async fn test_downsample_is_noop_when_image_fits() {
    let dir = TempDir::new().unwrap();
    let source = write_png(dir.path(), "small.png", 120, 80);

    let result = adapter().downsample(&source, 120).await.unwrap();
    assert_eq!(result, None);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_downsample_then_upsample_restores_original_size() {
    let dir = TempDir::new().unwrap();
    let source = write_png(dir.path(), "big.png", 300, 120);
    let original_bytes = std::fs::read(&source).unwrap();

    let small = adapter()
        .downsample(&source, 100)
        .await
        .unwrap()
        .expect("image is larger than the limit");
    assert_eq!(image::image_dimensions(&small).unwrap(), (100, 40));
    assert_eq!(std::fs::read(&source).unwrap(), original_bytes);

    let output = dir.path().join("final.png");
    let (width, height, size) = adapter().upsample(&small, &source, &output).await.unwrap();
    assert_eq!((width, height), (300, 120));
    assert!(size > 0);
    assert_eq!(image::image_dimensions(&output).unwrap(), (300, 120));
}

#[tokio::test]
async fn test_large_image_is_edited_downsampled_and_saved_full_size() {
    let mut config = test_config();
    config.interactive_max_dimension = 64;
    let (_temp, engine) = create_test_engine_with(config).await.unwrap();
    let images = TempDir::new().unwrap();
    let source = write_png(images.path(), "wide.png", 256, 128);

    let opened = engine
        .open_image("t", ImageSource::File(source))
        .await
        .unwrap();
    let session = opened.session;
    assert_eq!((session.width, session.height), (64, 32));
    let full = session.full_resolution_path.clone().expect("full-resolution copy kept");
    assert_eq!(image::image_dimensions(&full).unwrap(), (256, 128));
    assert_eq!(image::image_dimensions(&session.working_copy_path).unwrap(), (64, 32));

    engine.blur(session.id, 1.0).await.unwrap();

    let output = images.path().join("saved.png");
    let saved = engine.save(session.id, &output).await.unwrap();
    assert_eq!((saved.width, saved.height), (256, 128));
    assert_eq!(image::image_dimensions(&output).unwrap(), (256, 128));

    // Deleting the session removes both working files
    engine.delete_session(session.id).await.unwrap();
    assert!(!session.working_copy_path.exists());
    assert!(!full.exists());
}

#[tokio::test]
async fn test_geometry_change_drops_full_resolution_link() {
    let mut config = test_config();
    config.interactive_max_dimension = 64;
    let (_temp, engine) = create_test_engine_with(config).await.unwrap();
    let images = TempDir::new().unwrap();
    let source = write_png(images.path(), "wide.png", 256, 128);

    let id = engine
        .open_image("t", ImageSource::File(source))
        .await
        .unwrap()
        .session
        .id;

    let outcome = engine.crop(id, 0, 0, 32, 32).await.unwrap();
    assert_eq!(outcome.session.full_resolution_path, None);

    let output = images.path().join("cropped.png");
    let saved = engine.save(id, &output).await.unwrap();
    assert_eq!((saved.width, saved.height), (32, 32));
}

#[tokio::test]
async fn test_downsampling_can_be_disabled() {
    let mut config = test_config();
    config.interactive_max_dimension = 0;
    let (_temp, engine) = create_test_engine_with(config).await.unwrap();
    let images = TempDir::new().unwrap();
    let source = write_png(images.path(), "wide.png", 256, 128);

    let session = engine
        .open_image("t", ImageSource::File(source))
        .await
        .unwrap()
        .session;
    assert_eq!((session.width, session.height), (256, 128));
    assert_eq!(session.full_resolution_path, None);
}
