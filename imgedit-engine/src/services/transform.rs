//! Transform pipeline
//!
//! Crop, resize and the two filters share one commit sequence:
//!
//! 1. Validate arguments against the stored session geometry
//! 2. Decode, transform and encode on the raster worker pool into a temp file
//!    next to the working copy
//! 3. Open a transaction, update the session row and the overlay, record an
//!    undo snapshot
//! 4. Rename the temp file over the working copy
//! 5. Commit
//!
//! A failure before step 4 leaves both raster and overlay untouched. Only a
//! failed commit after the rename can leave the raster ahead of the database,
//! and that is reported through [`EngineError::Transform`].

use chrono::{DateTime, Utc};
use imgedit_common::time;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::raster::{self, MAX_BLUR_RADIUS, MAX_SHARPEN_AMOUNT};
use super::resolution::ResolutionAdapter;
use super::undo;
use super::worker_pool::RasterWorkerPool;
use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::models::{ImageFormat, ImageSession, OperationType, Scene};
use crate::utils::begin_monitored;

/// Session state after a committed transform
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformOutcome {
    pub session: ImageSession,
    /// Annotation layer version after the transform
    pub annotation_version: i64,
    /// Overlay after the transform
    pub scene: Scene,
    /// Undo sequence recorded for this transform
    pub sequence: i64,
}

/// Result of writing a session to its final destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedImage {
    pub path: PathBuf,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

/// What happens to the overlay when the raster changes
#[derive(Debug, Clone, Copy)]
enum OverlayChange {
    /// Crop: previous coordinates no longer mean anything
    Reset,
    /// Resize: every object follows the new geometry
    Rescale { sx: f64, sy: f64 },
    /// Filters: geometry is unchanged
    Keep,
}

/// Raster produced by the worker pool, not yet visible to anyone
struct StagedRaster {
    temp_path: PathBuf,
    width: u32,
    height: u32,
    size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    pool: SqlitePool,
    workers: RasterWorkerPool,
    resolution: ResolutionAdapter,
    max_dimension: u32,
}

impl TransformPipeline {
    pub fn new(
        pool: SqlitePool,
        workers: RasterWorkerPool,
        resolution: ResolutionAdapter,
        max_dimension: u32,
    ) -> Self {
        Self {
            pool,
            workers,
            resolution,
            max_dimension,
        }
    }

    /// Cut the session down to the rectangle (x, y, width, height)
    ///
    /// The overlay is cleared: its coordinates referred to the old frame.
    pub async fn crop(
        &self,
        session_id: Uuid,
        x: i64,
        y: i64,
        width: i64,
        height: i64,
    ) -> EngineResult<TransformOutcome> {
        let session = self.load_session(session_id).await?;
        let (x, y, w, h) = validate_crop(&session, x, y, width, height)?;

        let staged = self
            .stage(&session, "crop", move |img| raster::crop(img, x, y, w, h))
            .await?;

        self.commit(&session, staged, OperationType::Crop, OverlayChange::Reset)
            .await
    }

    /// Resample the session to a new size
    ///
    /// With `keep_aspect` the width drives and the height is derived; if the
    /// derived height exceeds the ceiling it is clamped and the width
    /// recomputed.
    pub async fn resize(
        &self,
        session_id: Uuid,
        target_width: i64,
        target_height: i64,
        keep_aspect: bool,
    ) -> EngineResult<TransformOutcome> {
        let session = self.load_session(session_id).await?;
        let (w, h) = resize_target(
            session.width,
            session.height,
            target_width,
            target_height,
            keep_aspect,
            self.max_dimension,
        )?;

        let sx = w as f64 / session.width as f64;
        let sy = h as f64 / session.height as f64;

        let staged = self
            .stage(&session, "resize", move |img| raster::resize(img, w, h))
            .await?;

        self.commit(
            &session,
            staged,
            OperationType::Resize,
            OverlayChange::Rescale { sx, sy },
        )
        .await
    }

    /// Gaussian blur with sigma `radius` in [0, 20]
    pub async fn blur(&self, session_id: Uuid, radius: f32) -> EngineResult<TransformOutcome> {
        if !radius.is_finite() || !(0.0..=MAX_BLUR_RADIUS).contains(&radius) {
            return Err(EngineError::Validation(format!(
                "blur radius must be between 0 and {}, got {}",
                MAX_BLUR_RADIUS, radius
            )));
        }

        let session = self.load_session(session_id).await?;
        let staged = self
            .stage(&session, "blur", move |img| raster::blur(img, radius))
            .await?;

        self.commit(&session, staged, OperationType::Filter, OverlayChange::Keep)
            .await
    }

    /// 3x3 sharpen with `amount` in [0, 10]
    pub async fn sharpen(&self, session_id: Uuid, amount: f32) -> EngineResult<TransformOutcome> {
        if !amount.is_finite() || !(0.0..=MAX_SHARPEN_AMOUNT).contains(&amount) {
            return Err(EngineError::Validation(format!(
                "sharpen amount must be between 0 and {}, got {}",
                MAX_SHARPEN_AMOUNT, amount
            )));
        }

        let session = self.load_session(session_id).await?;
        let staged = self
            .stage(&session, "sharpen", move |img| raster::sharpen(img, amount))
            .await?;

        self.commit(&session, staged, OperationType::Filter, OverlayChange::Keep)
            .await
    }

    /// Write the working copy to `output_path`
    ///
    /// The format follows the output extension, or the session format when
    /// the extension is missing or unsupported. A downsampled session is
    /// resampled back to its full resolution first.
    pub async fn save(&self, session_id: Uuid, output_path: &Path) -> EngineResult<SavedImage> {
        validate_output_path(output_path)?;
        let session = self.load_session(session_id).await?;

        let format = output_path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ImageFormat::parse)
            .unwrap_or(session.format);
        let temp_path = with_extension(&raster::temp_path_for(output_path), format);

        let written = match &session.full_resolution_path {
            Some(original) => {
                self.resolution
                    .upsample(&session.working_copy_path, original, &temp_path)
                    .await
            }
            None => {
                let source = session.working_copy_path.clone();
                let source_format = session.format;
                let target = temp_path.clone();
                self.workers
                    .run("save", move || {
                        let img = raster::decode_file(&source, source_format)?;
                        let size = raster::encode_to_file(&img, format, &target)?;
                        Ok((img.width(), img.height(), size))
                    })
                    .await
            }
        };

        let (width, height, size_bytes) = match written {
            Ok(dims) => dims,
            Err(e) => {
                remove_quietly(&temp_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&temp_path, output_path).await {
            remove_quietly(&temp_path).await;
            return Err(EngineError::transform("save", format!("Cannot write output: {}", e)));
        }

        let mut conn = self.pool.acquire().await?;
        db::sessions::clear_modified(&mut conn, session_id).await?;

        info!(
            session_id = %session_id,
            output = %output_path.display(),
            format = %format,
            width,
            height,
            size_bytes,
            "Saved image"
        );

        Ok(SavedImage {
            path: output_path.to_path_buf(),
            format,
            width,
            height,
            size_bytes,
        })
    }

    async fn load_session(&self, session_id: Uuid) -> EngineResult<ImageSession> {
        let mut conn = self.pool.acquire().await?;
        db::sessions::get_session(&mut conn, session_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Session {}", session_id)))
    }

    /// Decode the working copy, apply `op` and encode the result to a temp file
    async fn stage<F>(
        &self,
        session: &ImageSession,
        stage: &'static str,
        op: F,
    ) -> EngineResult<StagedRaster>
    where
        F: FnOnce(&image::DynamicImage) -> image::DynamicImage + Send + 'static,
    {
        let source = session.working_copy_path.clone();
        let format = session.format;
        let temp_path = raster::temp_path_for(&source);
        let target = temp_path.clone();

        let result = self
            .workers
            .run(stage, move || {
                let img = raster::decode_file(&source, format)?;
                let out = op(&img);
                let size_bytes = raster::encode_to_file(&out, format, &target)?;
                Ok((out.width(), out.height(), size_bytes))
            })
            .await;

        match result {
            Ok((width, height, size_bytes)) => Ok(StagedRaster {
                temp_path,
                width,
                height,
                size_bytes,
            }),
            Err(e) => {
                remove_quietly(&temp_path).await;
                Err(match e {
                    EngineError::Io(io) => EngineError::transform(stage, io.to_string()),
                    other => other,
                })
            }
        }
    }

    /// Persist a staged raster together with its overlay change and undo snapshot
    async fn commit(
        &self,
        session: &ImageSession,
        staged: StagedRaster,
        operation_type: OperationType,
        overlay: OverlayChange,
    ) -> EngineResult<TransformOutcome> {
        let stage = operation_type.as_str();
        let now = time::now();

        let mut tx = match begin_monitored(&self.pool, "transform::commit").await {
            Ok(tx) => tx,
            Err(e) => {
                remove_quietly(&staged.temp_path).await;
                return Err(EngineError::transform(stage, e.to_string()));
            }
        };

        let applied = match tx.conn() {
            Ok(conn) => apply_db_changes(conn, session, &staged, operation_type, overlay, now).await,
            Err(e) => Err(e),
        };
        let (annotation_version, scene, sequence) = match applied {
            Ok(applied) => applied,
            Err(e) => {
                // Dropping the transaction rolls it back
                drop(tx);
                remove_quietly(&staged.temp_path).await;
                error!(session_id = %session.id, stage, error = %e, "Transform aborted before raster swap");
                return Err(EngineError::transform(stage, e.to_string()));
            }
        };

        if let Err(e) = tokio::fs::rename(&staged.temp_path, &session.working_copy_path).await {
            drop(tx);
            remove_quietly(&staged.temp_path).await;
            error!(session_id = %session.id, stage, error = %e, "Cannot replace working copy");
            return Err(EngineError::transform(stage, format!("Cannot replace working copy: {}", e)));
        }

        if let Err(e) = tx.commit().await {
            error!(
                session_id = %session.id,
                stage,
                error = %e,
                "Commit failed after working copy was replaced"
            );
            return Err(EngineError::Transform {
                stage,
                raster_mutated: true,
                overlay_mutated: false,
                message: e.to_string(),
            });
        }

        let updated = self.load_session(session.id).await?;
        info!(
            session_id = %session.id,
            operation = stage,
            width = updated.width,
            height = updated.height,
            size_bytes = updated.size_bytes,
            annotation_version,
            "Transform applied"
        );

        Ok(TransformOutcome {
            session: updated,
            annotation_version,
            scene,
            sequence,
        })
    }
}

/// Session row, overlay and undo ring updates for one transform
///
/// Returns (annotation version, overlay, undo sequence).
async fn apply_db_changes(
    conn: &mut SqliteConnection,
    session: &ImageSession,
    staged: &StagedRaster,
    operation_type: OperationType,
    overlay: OverlayChange,
    now: DateTime<Utc>,
) -> imgedit_common::Result<(i64, Scene, i64)> {
    let missing = || imgedit_common::Error::NotFound(format!("Session {}", session.id));

    let updated = match overlay {
        OverlayChange::Keep => {
            db::sessions::mark_modified(conn, session.id, Some(staged.size_bytes), now).await?
        }
        OverlayChange::Reset | OverlayChange::Rescale { .. } => {
            db::sessions::update_raster_geometry(
                conn,
                session.id,
                staged.width,
                staged.height,
                staged.size_bytes,
                now,
            )
            .await?
        }
    };
    if !updated {
        return Err(missing());
    }

    // First snapshot of the session: keep the overlay this transform replaces,
    // tagged with the frame it was drawn on
    if let Some(baseline) = undo::pending_baseline(conn, session.id).await? {
        undo::record_in(
            conn,
            session.id,
            operation_type,
            &baseline,
            Some((session.width, session.height)),
            now,
        )
        .await?;
    }

    let row = db::annotations::get_layer(conn, session.id)
        .await?
        .ok_or_else(|| {
            imgedit_common::Error::NotFound(format!("Annotation layer for session {}", session.id))
        })?;
    let current_version = row.version;

    let (scene, version) = match overlay {
        OverlayChange::Keep => match row.decode() {
            Ok(layer) => (layer.scene, current_version),
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Stored scene is corrupt; snapshot will be empty");
                (Scene::empty(), current_version)
            }
        },
        OverlayChange::Reset => {
            let scene = Scene::empty();
            let version = replace(conn, session.id, &scene, now).await?;
            (scene, version)
        }
        OverlayChange::Rescale { sx, sy } => {
            let scene = match row.decode() {
                Ok(layer) => layer.scene.scaled(sx, sy),
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Stored scene is corrupt; clearing it for resize");
                    Scene::empty()
                }
            };
            let version = replace(conn, session.id, &scene, now).await?;
            (scene, version)
        }
    };

    let scene_json = to_json(&scene)?;
    let sequence = undo::record_in(conn, session.id, operation_type, &scene_json, None, now)
        .await?
        .ok_or_else(missing)?;

    Ok((version, scene, sequence))
}

async fn replace(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    scene: &Scene,
    now: DateTime<Utc>,
) -> imgedit_common::Result<i64> {
    let scene_json = to_json(scene)?;
    db::annotations::replace_scene(conn, session_id, &scene_json, now)
        .await?
        .ok_or_else(|| {
            imgedit_common::Error::NotFound(format!("Annotation layer for session {}", session_id))
        })
}

fn to_json(scene: &Scene) -> imgedit_common::Result<String> {
    scene
        .to_json()
        .map_err(|e| imgedit_common::Error::Internal(e.to_string()))
}

/// Check a crop rectangle against the session geometry
pub fn validate_crop(
    session: &ImageSession,
    x: i64,
    y: i64,
    width: i64,
    height: i64,
) -> EngineResult<(u32, u32, u32, u32)> {
    if x < 0 || y < 0 {
        return Err(EngineError::Validation(format!(
            "crop origin must be non-negative: x={}, y={}",
            x, y
        )));
    }
    if width <= 0 || height <= 0 {
        return Err(EngineError::Validation(format!(
            "crop size must be positive: w={}, h={}",
            width, height
        )));
    }

    let image_w = session.width as i64;
    let image_h = session.height as i64;
    if x + width > image_w {
        return Err(EngineError::Validation(format!(
            "crop exceeds image bounds: x+w={} > width={}",
            x + width,
            image_w
        )));
    }
    if y + height > image_h {
        return Err(EngineError::Validation(format!(
            "crop exceeds image bounds: y+h={} > height={}",
            y + height,
            image_h
        )));
    }

    // All four fit in u32: they are bounded by the stored dimensions
    Ok((x as u32, y as u32, width as u32, height as u32))
}

/// Final (width, height) for a resize request
pub fn resize_target(
    original_width: u32,
    original_height: u32,
    target_width: i64,
    target_height: i64,
    keep_aspect: bool,
    max_dimension: u32,
) -> EngineResult<(u32, u32)> {
    let max = max_dimension as i64;
    if target_width <= 0 || target_width > max {
        return Err(EngineError::Validation(format!(
            "resize width must be between 1 and {}, got {}",
            max, target_width
        )));
    }
    // Checked even when the aspect ratio decides the final height
    if target_height <= 0 || target_height > max {
        return Err(EngineError::Validation(format!(
            "resize height must be between 1 and {}, got {}",
            max, target_height
        )));
    }
    if original_width == 0 || original_height == 0 {
        return Err(EngineError::Internal(format!(
            "Session has empty dimensions {}x{}",
            original_width, original_height
        )));
    }

    if !keep_aspect {
        return Ok((target_width as u32, target_height as u32));
    }

    let ratio = original_height as f64 / original_width as f64;
    let height = (target_width as f64 * ratio).round().max(1.0);
    if height <= max as f64 {
        return Ok((target_width as u32, height as u32));
    }

    let width = (max as f64 / ratio).round().clamp(1.0, max as f64);
    Ok((width as u32, max_dimension))
}

/// Reject output paths that could escape where the caller meant to write
pub fn validate_output_path(path: &Path) -> EngineResult<()> {
    let text = path.to_string_lossy();
    if text.is_empty() {
        return Err(EngineError::Validation("Output path is empty".to_string()));
    }
    if text.contains('\0') || text.contains("..") || text.contains('~') {
        return Err(EngineError::Validation(format!(
            "Unsafe output path '{}'",
            text.replace('\0', "\\0")
        )));
    }
    if path.is_dir() {
        return Err(EngineError::Validation(format!(
            "Output path '{}' is a directory",
            text
        )));
    }

    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => Ok(()),
        _ => Err(EngineError::Validation(format!(
            "Output directory for '{}' does not exist",
            text
        ))),
    }
}

fn with_extension(path: &Path, format: ImageFormat) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()).and_then(ImageFormat::parse) {
        Some(existing) if existing == format => path.to_path_buf(),
        _ => {
            let mut name = path.as_os_str().to_owned();
            name.push(".");
            name.push(format.extension());
            PathBuf::from(name)
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn session(width: u32, height: u32) -> ImageSession {
        let now = time::now();
        ImageSession {
            id: Uuid::new_v4(),
            terminal_session_id: "t1".to_string(),
            source_type: SourceType::File,
            source_path: None,
            format: ImageFormat::Png,
            width,
            height,
            size_bytes: 1,
            working_copy_path: PathBuf::from("/w/x.png"),
            full_resolution_path: None,
            undo_head: None,
            undo_cursor: None,
            created_at: now,
            last_modified_at: now,
            is_modified: false,
        }
    }

    #[test]
    fn test_crop_inside_bounds() {
        let s = session(500, 400);
        assert_eq!(validate_crop(&s, 0, 0, 500, 400).unwrap(), (0, 0, 500, 400));
        assert_eq!(validate_crop(&s, 100, 50, 400, 350).unwrap(), (100, 50, 400, 350));
    }

    #[test]
    fn test_crop_bounds_message_names_the_overflow() {
        let s = session(500, 400);
        let err = validate_crop(&s, 120, 0, 400, 10).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: crop exceeds image bounds: x+w=520 > width=500"
        );
        assert!(validate_crop(&s, 0, 1, 10, 400).is_err());
    }

    #[test]
    fn test_crop_rejects_negative_and_empty() {
        let s = session(500, 400);
        assert!(validate_crop(&s, -1, 0, 10, 10).is_err());
        assert!(validate_crop(&s, 0, -1, 10, 10).is_err());
        assert!(validate_crop(&s, 0, 0, 0, 10).is_err());
        assert!(validate_crop(&s, 0, 0, 10, 0).is_err());
    }

    #[test]
    fn test_resize_exact_when_not_keeping_aspect() {
        assert_eq!(resize_target(800, 600, 200, 50, false, 32_767).unwrap(), (200, 50));
    }

    #[test]
    fn test_resize_keep_aspect_is_width_first() {
        // A valid height argument is overridden when the width drives
        assert_eq!(resize_target(800, 600, 400, 1, true, 32_767).unwrap(), (400, 300));
        assert_eq!(resize_target(3, 2, 10, 1, true, 32_767).unwrap(), (10, 7));
    }

    #[test]
    fn test_resize_keep_aspect_clamps_derived_height() {
        // 1x10 stretched to width 10_000 would need height 100_000
        let (w, h) = resize_target(1, 10, 10_000, 10, true, 32_767).unwrap();
        assert_eq!(h, 32_767);
        assert_eq!(w, 3277);
    }

    #[test]
    fn test_resize_rejects_out_of_range() {
        assert!(resize_target(10, 10, 0, 10, false, 32_767).is_err());
        assert!(resize_target(10, 10, 10, 32_768, false, 32_767).is_err());
        assert!(resize_target(10, 10, 40_000, 10, true, 32_767).is_err());
    }

    #[test]
    fn test_resize_keep_aspect_still_checks_height() {
        for height in [-5, 0, 32_768] {
            let err = resize_target(400, 200, 100, height, true, 32_767).unwrap_err();
            assert!(matches!(err, EngineError::Validation(msg) if msg.contains("height")));
        }
    }

    #[test]
    fn test_output_path_rejects_traversal() {
        assert!(validate_output_path(Path::new("/tmp/../etc/out.png")).is_err());
        assert!(validate_output_path(Path::new("~/out.png")).is_err());
        assert!(validate_output_path(Path::new("/definitely/missing/dir/out.png")).is_err());
    }

    #[test]
    fn test_with_extension_appends_only_when_needed() {
        assert_eq!(
            with_extension(Path::new("/w/.a.tmp.png"), ImageFormat::Png),
            PathBuf::from("/w/.a.tmp.png")
        );
        assert_eq!(
            with_extension(Path::new("/w/.a.tmp"), ImageFormat::Jpeg),
            PathBuf::from("/w/.a.tmp.jpeg")
        );
    }
}
