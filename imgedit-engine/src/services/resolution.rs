//! Resolution adapter
//!
//! Very large images are edited on a downsampled working copy; on save the
//! edited buffer is resampled back to the original's size.

use std::path::{Path, PathBuf};
use tracing::info;

use super::raster;
use super::worker_pool::RasterWorkerPool;
use crate::error::{EngineError, EngineResult};
use crate::models::ImageFormat;

/// Default longest side for interactive editing
pub const DEFAULT_INTERACTIVE_MAX_DIMENSION: u32 = 4096;

#[derive(Debug, Clone)]
pub struct ResolutionAdapter {
    workers: RasterWorkerPool,
}

impl ResolutionAdapter {
    pub fn new(workers: RasterWorkerPool) -> Self {
        Self { workers }
    }

    /// Write a copy of `path` whose longer side is `max_dim`
    ///
    /// Returns None (and writes nothing) when both sides already fit. The
    /// source file is never modified.
    pub async fn downsample(&self, path: &Path, max_dim: u32) -> EngineResult<Option<PathBuf>> {
        if max_dim == 0 {
            return Err(EngineError::Validation(
                "max_dim must be greater than 0".to_string(),
            ));
        }

        let source = path.to_path_buf();
        self.workers
            .run("downsample", move || {
                let format = format_of(&source)?;
                let (width, height) = raster::file_dimensions(&source)?;
                let Some((new_width, new_height)) = fit_within(width, height, max_dim) else {
                    return Ok(None);
                };

                let img = raster::decode_file(&source, format)?;
                let resized = raster::resize(&img, new_width, new_height);
                let target = downsampled_path(&source, max_dim);
                raster::encode_to_file(&resized, format, &target)?;

                info!(
                    source = %source.display(),
                    from = %format!("{}x{}", width, height),
                    to = %format!("{}x{}", new_width, new_height),
                    "Downsampled image for interactive editing"
                );
                Ok(Some(target))
            })
            .await
    }

    /// Resample `edited_path` to the size of `original_path` and write it to `output_path`
    ///
    /// Only the original's header is read. The output format follows the
    /// output extension, falling back to the original's. Returns the final
    /// (width, height) and the written byte size.
    pub async fn upsample(
        &self,
        edited_path: &Path,
        original_path: &Path,
        output_path: &Path,
    ) -> EngineResult<(u32, u32, u64)> {
        let edited = edited_path.to_path_buf();
        let original = original_path.to_path_buf();
        let output = output_path.to_path_buf();

        self.workers
            .run("upsample", move || {
                let format = format_of(&output).or_else(|_| format_of(&original))?;
                let (width, height) = raster::file_dimensions(&original)?;
                let img = raster::decode_file(&edited, format_of(&edited)?)?;
                let resized = raster::resize(&img, width, height);
                let size = raster::encode_to_file(&resized, format, &output)?;
                Ok((width, height, size))
            })
            .await
    }
}

/// Target size so the longer side equals `max_dim`, or None if the image already fits
pub fn fit_within(width: u32, height: u32, max_dim: u32) -> Option<(u32, u32)> {
    if width <= max_dim && height <= max_dim {
        return None;
    }
    let scale = max_dim as f64 / width.max(height) as f64;
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).clamp(1, max_dim);
    Some((scaled(width), scaled(height)))
}

fn downsampled_path(source: &Path, max_dim: u32) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string());
    source.with_file_name(format!("{}_{}px.{}", stem, max_dim, ext))
}

fn format_of(path: &Path) -> EngineResult<ImageFormat> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(ImageFormat::parse)
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "Cannot determine image format from '{}'",
                path.display()
            ))
        })
}
