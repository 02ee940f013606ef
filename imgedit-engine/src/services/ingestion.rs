//! Source ingestion
//!
//! Turns a file path, URL or clipboard buffer into a new [`ImageSession`]:
//! the bytes are validated, copied into a freshly named working file and
//! registered together with an empty annotation layer. The source itself is
//! never opened for writing.

use imgedit_common::{time, EngineConfig};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use super::annotations::AnnotationController;
use super::raster::{self, ImageInfo};
use super::resolution::{fit_within, ResolutionAdapter};
use super::url_fetch::UrlFetcher;
use super::worker_pool::RasterWorkerPool;
use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::models::{AnnotationLayer, ImageSession, SourceType};
use crate::utils::{begin_monitored, retry_on_lock};

/// Where an image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    File(PathBuf),
    Url(String),
    /// Raw bytes handed over by the clipboard bridge
    Clipboard(Vec<u8>),
}

impl ImageSource {
    pub fn source_type(&self) -> SourceType {
        match self {
            ImageSource::File(_) => SourceType::File,
            ImageSource::Url(_) => SourceType::Url,
            ImageSource::Clipboard(_) => SourceType::Clipboard,
        }
    }

    /// Key used for the recently viewed history; None for clipboard images
    pub fn history_key(&self) -> Option<String> {
        match self {
            ImageSource::File(path) => Some(path.to_string_lossy().into_owned()),
            ImageSource::Url(url) => Some(url.clone()),
            ImageSource::Clipboard(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceIngestion {
    pool: SqlitePool,
    workers: RasterWorkerPool,
    resolution: ResolutionAdapter,
    fetcher: UrlFetcher,
    working_dir: PathBuf,
    max_image_bytes: u64,
    max_dimension: u32,
    interactive_limit: Option<u32>,
    max_lock_wait_ms: u64,
}

impl SourceIngestion {
    pub fn new(
        pool: SqlitePool,
        workers: RasterWorkerPool,
        resolution: ResolutionAdapter,
        config: &EngineConfig,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            pool,
            workers,
            resolution,
            fetcher: UrlFetcher::new(config),
            working_dir,
            max_image_bytes: config.max_image_bytes,
            max_dimension: config.max_dimension,
            interactive_limit: config.interactive_limit(),
            max_lock_wait_ms: config.db_max_lock_wait_ms,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Validate `source` and open it as a new session
    ///
    /// Any violation fails with [`EngineError::Validation`] and leaves no
    /// rows and no working files behind.
    pub async fn load(
        &self,
        terminal_session_id: &str,
        source: ImageSource,
    ) -> EngineResult<(ImageSession, AnnotationLayer)> {
        if terminal_session_id.trim().is_empty() {
            return Err(EngineError::Validation("terminal_session_id is empty".to_string()));
        }

        let source_type = source.source_type();
        let (bytes, source_path) = match source {
            ImageSource::File(path) => {
                let bytes = self.read_file(&path).await?;
                (bytes, Some(path.to_string_lossy().into_owned()))
            }
            ImageSource::Url(url) => {
                let fetched = self.fetcher.fetch(&url, self.max_image_bytes).await?;
                (fetched.bytes, Some(url))
            }
            ImageSource::Clipboard(bytes) => (bytes, None),
        };
        self.check_size(bytes.len() as u64)?;

        let max_dimension = self.max_dimension;
        let (info, bytes) = self
            .workers
            .run("inspect", move || {
                let info = raster::inspect_bytes(&bytes, max_dimension)?;
                Ok((info, bytes))
            })
            .await?;

        let session_id = Uuid::new_v4();
        let full_path = self
            .working_dir
            .join(format!("{}.{}", session_id, info.format.extension()));
        self.write_working_file(&full_path, &bytes).await?;

        let (working_copy_path, full_resolution_path, width, height, size_bytes) =
            match self.prepare_working_copy(&full_path, &info, bytes.len() as u64).await {
                Ok(prepared) => prepared,
                Err(e) => {
                    remove_quietly(&full_path).await;
                    return Err(e);
                }
            };

        let now = time::now();
        let session = ImageSession {
            id: session_id,
            terminal_session_id: terminal_session_id.to_string(),
            source_type,
            source_path,
            format: info.format,
            width,
            height,
            size_bytes,
            working_copy_path,
            full_resolution_path,
            undo_head: None,
            undo_cursor: None,
            created_at: now,
            last_modified_at: now,
            is_modified: false,
        };
        let layer = AnnotationController::create_empty(session_id);

        if let Err(e) = self.persist(&session, &layer).await {
            remove_quietly(&session.working_copy_path).await;
            if let Some(full) = &session.full_resolution_path {
                remove_quietly(full).await;
            }
            return Err(e);
        }

        info!(
            session_id = %session.id,
            terminal_session_id,
            source_type = %source_type,
            format = %session.format,
            width = session.width,
            height = session.height,
            downsampled = session.full_resolution_path.is_some(),
            "Image session opened"
        );
        Ok((session, layer))
    }

    async fn read_file(&self, path: &Path) -> EngineResult<Vec<u8>> {
        validate_source_path(path)?;

        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::Validation(format!(
                    "File '{}' does not exist",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(EngineError::Validation(format!(
                    "File '{}' is not readable: {}",
                    path.display(),
                    e
                )));
            }
        };

        if metadata.file_type().is_symlink() {
            return Err(EngineError::Validation(format!(
                "Symbolic links are not accepted: '{}'",
                path.display()
            )));
        }
        if !metadata.is_file() {
            return Err(EngineError::Validation(format!(
                "'{}' is not a regular file",
                path.display()
            )));
        }
        self.check_size(metadata.len())?;

        tokio::fs::read(path).await.map_err(|e| {
            EngineError::Validation(format!("File '{}' is not readable: {}", path.display(), e))
        })
    }

    fn check_size(&self, size: u64) -> EngineResult<()> {
        if size == 0 {
            return Err(EngineError::Validation("Image is empty".to_string()));
        }
        if size > self.max_image_bytes {
            return Err(EngineError::Validation(format!(
                "Image size {} bytes exceeds limit of {} bytes",
                size, self.max_image_bytes
            )));
        }
        Ok(())
    }

    async fn write_working_file(&self, path: &Path, bytes: &[u8]) -> EngineResult<()> {
        tokio::fs::create_dir_all(&self.working_dir).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        let written = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            remove_quietly(path).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Downsample the working copy when it is larger than the interactive limit
    ///
    /// Returns (working copy, full-resolution copy, width, height, size).
    async fn prepare_working_copy(
        &self,
        full_path: &Path,
        info: &ImageInfo,
        size_bytes: u64,
    ) -> EngineResult<(PathBuf, Option<PathBuf>, u32, u32, u64)> {
        let unchanged = (full_path.to_path_buf(), None, info.width, info.height, size_bytes);

        let Some(limit) = self.interactive_limit else {
            return Ok(unchanged);
        };
        let Some((width, height)) = fit_within(info.width, info.height, limit) else {
            return Ok(unchanged);
        };
        let Some(working) = self.resolution.downsample(full_path, limit).await? else {
            return Ok(unchanged);
        };

        let size = match tokio::fs::metadata(&working).await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                remove_quietly(&working).await;
                return Err(e.into());
            }
        };

        Ok((working, Some(full_path.to_path_buf()), width, height, size))
    }

    async fn persist(&self, session: &ImageSession, layer: &AnnotationLayer) -> EngineResult<()> {
        let scene_json = layer
            .scene
            .to_json()
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let pool = &self.pool;
        let scene_json = scene_json.as_str();

        retry_on_lock("ingestion::persist", self.max_lock_wait_ms, || {
            insert_session_with_layer(pool, session, layer, scene_json)
        })
        .await?;
        Ok(())
    }
}

async fn insert_session_with_layer(
    pool: &SqlitePool,
    session: &ImageSession,
    layer: &AnnotationLayer,
    scene_json: &str,
) -> imgedit_common::Result<()> {
    let mut tx = begin_monitored(pool, "ingestion::persist").await?;
    db::sessions::insert_session(tx.conn()?, session).await?;
    db::annotations::insert_layer(
        tx.conn()?,
        layer.id,
        session.id,
        scene_json,
        layer.version,
        layer.last_updated,
    )
    .await?;
    tx.commit().await
}

/// Reject source paths with traversal, home expansion or embedded NUL bytes
pub fn validate_source_path(path: &Path) -> EngineResult<()> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(EngineError::Validation("Source path is empty".to_string()));
    }
    if text.contains('\0') {
        return Err(EngineError::Validation(
            "Source path contains a null byte".to_string(),
        ));
    }
    if text.contains("..") {
        return Err(EngineError::Validation(format!(
            "Source path '{}' contains a traversal sequence",
            text
        )));
    }
    if text.contains('~') {
        return Err(EngineError::Validation(format!(
            "Source path '{}' uses home expansion",
            text
        )));
    }
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove working file");
        }
    }
}
