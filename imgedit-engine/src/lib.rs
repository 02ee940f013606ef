//! imgedit-engine library interface
//!
//! [`EditorEngine`] is the entry point: it owns the database pool and wires
//! ingestion, annotations, transforms, the undo ring and the recently viewed
//! history together. Operations on one session are serialized; different
//! sessions run in parallel.

pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{EngineError, EngineResult};
pub use crate::services::ImageSource;

use chrono::{DateTime, Duration, Utc};
use imgedit_common::config::RootFolderInitializer;
use imgedit_common::{time, EngineConfig};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{AnnotationLayer, HistoryEntry, ImageSession, OperationType, Scene};
use crate::services::{
    AnnotationController, RasterWorkerPool, RecentHistoryCache, ResolutionAdapter, SavedImage,
    SessionLocks, SourceIngestion, TransformOutcome, TransformPipeline, UndoOutcome, UndoRedoBuffer,
};

/// A newly opened image with its empty overlay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenedImage {
    pub session: ImageSession,
    pub annotations: AnnotationLayer,
    /// Recently viewed entry; None for clipboard images
    pub history: Option<HistoryEntry>,
}

/// Image edit session engine
#[derive(Debug, Clone)]
pub struct EditorEngine {
    pool: SqlitePool,
    config: EngineConfig,
    workers: RasterWorkerPool,
    ingestion: SourceIngestion,
    annotations: AnnotationController,
    transforms: TransformPipeline,
    undo: UndoRedoBuffer,
    history: RecentHistoryCache,
    locks: SessionLocks,
    startup_time: DateTime<Utc>,
}

impl EditorEngine {
    /// Assemble an engine around an initialized database
    ///
    /// The history cache is injected so callers control its lifecycle;
    /// [`EditorEngine::open`] builds and rebuilds one automatically.
    pub fn new(
        pool: SqlitePool,
        config: EngineConfig,
        working_dir: PathBuf,
        history: RecentHistoryCache,
    ) -> EngineResult<Self> {
        config.validate()?;

        let workers = RasterWorkerPool::new(config.max_raster_jobs);
        let resolution = ResolutionAdapter::new(workers.clone());
        let ingestion = SourceIngestion::new(
            pool.clone(),
            workers.clone(),
            resolution.clone(),
            &config,
            working_dir,
        );
        let annotations = AnnotationController::new(pool.clone(), config.db_max_lock_wait_ms);
        let transforms = TransformPipeline::new(
            pool.clone(),
            workers.clone(),
            resolution,
            config.max_dimension,
        );
        let undo = UndoRedoBuffer::new(pool.clone(), config.db_max_lock_wait_ms);

        Ok(Self {
            pool,
            config,
            workers,
            ingestion,
            annotations,
            transforms,
            undo,
            history,
            locks: SessionLocks::new(),
            startup_time: time::now(),
        })
    }

    /// Create the root folder layout, open the database and rebuild the history mirror
    pub async fn open(root_folder: &Path, config: EngineConfig) -> EngineResult<Self> {
        let layout = RootFolderInitializer::new(root_folder.to_path_buf());
        layout.ensure_directory_exists()?;

        let pool = db::init_database(&layout.database_path()).await?;
        let history = RecentHistoryCache::new(pool.clone(), &config);
        history.rebuild_from_store().await?;

        let engine = Self::new(pool, config, layout.working_dir(), history)?;
        info!(
            root_folder = %root_folder.display(),
            max_raster_jobs = engine.workers.max_jobs(),
            "Editor engine ready"
        );
        Ok(engine)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn working_dir(&self) -> &Path {
        self.ingestion.working_dir()
    }

    pub fn history(&self) -> &RecentHistoryCache {
        &self.history
    }

    pub fn undo_buffer(&self) -> &UndoRedoBuffer {
        &self.undo
    }

    pub fn startup_time(&self) -> DateTime<Utc> {
        self.startup_time
    }

    /// Open an image from a file, URL or clipboard buffer
    pub async fn open_image(
        &self,
        terminal_session_id: &str,
        source: ImageSource,
    ) -> EngineResult<OpenedImage> {
        let history_key = source.history_key();
        let source_type = source.source_type();

        let (session, annotations) = self.ingestion.load(terminal_session_id, source).await?;

        // History is advisory: a failure here must not lose the opened session
        let history = match history_key {
            Some(key) => match self
                .history
                .add_or_touch(terminal_session_id, &key, source_type)
                .await
            {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Failed to record history entry");
                    None
                }
            },
            None => None,
        };

        Ok(OpenedImage {
            session,
            annotations,
            history,
        })
    }

    pub async fn get_session(&self, session_id: Uuid) -> EngineResult<ImageSession> {
        let mut conn = self.pool.acquire().await?;
        db::sessions::get_session(&mut conn, session_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Session {}", session_id)))
    }

    /// Sessions of one terminal, newest first
    pub async fn list_sessions(&self, terminal_session_id: &str) -> EngineResult<Vec<ImageSession>> {
        let mut conn = self.pool.acquire().await?;
        Ok(db::sessions::list_sessions_for_terminal(&mut conn, terminal_session_id).await?)
    }

    pub async fn get_annotations(&self, session_id: Uuid) -> EngineResult<AnnotationLayer> {
        self.annotations.get(session_id).await
    }

    /// Replace the overlay if `expected_version` is current and record an undo snapshot
    ///
    /// Returns the new version. A stale version fails with
    /// [`EngineError::Conflict`].
    pub async fn update_annotations(
        &self,
        session_id: Uuid,
        scene: &Scene,
        expected_version: i64,
        operation_type: OperationType,
    ) -> EngineResult<i64> {
        let _guard = self.locks.lock(session_id).await;
        self.annotations
            .update_and_record(session_id, scene, expected_version, operation_type)
            .await
    }

    pub async fn crop(
        &self,
        session_id: Uuid,
        x: i64,
        y: i64,
        width: i64,
        height: i64,
    ) -> EngineResult<TransformOutcome> {
        let _guard = self.locks.lock(session_id).await;
        self.transforms.crop(session_id, x, y, width, height).await
    }

    pub async fn resize(
        &self,
        session_id: Uuid,
        width: i64,
        height: i64,
        keep_aspect: bool,
    ) -> EngineResult<TransformOutcome> {
        let _guard = self.locks.lock(session_id).await;
        self.transforms
            .resize(session_id, width, height, keep_aspect)
            .await
    }

    pub async fn blur(&self, session_id: Uuid, radius: f32) -> EngineResult<TransformOutcome> {
        let _guard = self.locks.lock(session_id).await;
        self.transforms.blur(session_id, radius).await
    }

    pub async fn sharpen(&self, session_id: Uuid, amount: f32) -> EngineResult<TransformOutcome> {
        let _guard = self.locks.lock(session_id).await;
        self.transforms.sharpen(session_id, amount).await
    }

    /// Restore the overlay to the previous snapshot
    ///
    /// Fails with [`EngineError::NotFound`] when there is nothing to undo or
    /// the previous snapshot was taken before a crop or resize.
    pub async fn undo(&self, session_id: Uuid) -> EngineResult<UndoOutcome> {
        let _guard = self.locks.lock(session_id).await;
        self.undo.undo(session_id).await
    }

    pub async fn redo(&self, session_id: Uuid) -> EngineResult<UndoOutcome> {
        let _guard = self.locks.lock(session_id).await;
        self.undo.redo(session_id).await
    }

    /// Write the edited image to `output_path` and flag its history entry as edited
    pub async fn save(&self, session_id: Uuid, output_path: &Path) -> EngineResult<SavedImage> {
        let _guard = self.locks.lock(session_id).await;

        let saved = self.transforms.save(session_id, output_path).await?;
        let session = self.get_session(session_id).await?;
        if let Some(source_path) = &session.source_path {
            if let Err(e) = self
                .history
                .mark_edited(&session.terminal_session_id, source_path)
                .await
            {
                warn!(session_id = %session_id, error = %e, "Failed to flag history entry as edited");
            }
        }

        Ok(saved)
    }

    /// Remove a session, its overlay, its undo ring and its working files
    pub async fn delete_session(&self, session_id: Uuid) -> EngineResult<()> {
        {
            let _guard = self.locks.lock(session_id).await;
            let session = self.get_session(session_id).await?;

            let mut conn = self.pool.acquire().await?;
            db::sessions::delete_session(&mut conn, session_id).await?;
            drop(conn);

            remove_working_file(&session.working_copy_path).await;
            if let Some(full) = &session.full_resolution_path {
                remove_working_file(full).await;
            }
            info!(session_id = %session_id, "Session deleted");
        }
        self.locks.forget(session_id).await;
        Ok(())
    }

    /// Delete sessions older than `session_max_age_hours`
    pub async fn sweep_sessions(&self) -> EngineResult<usize> {
        let cutoff = time::now() - Duration::hours(self.config.session_max_age_hours);
        self.sweep_sessions_before(cutoff).await
    }

    /// Delete sessions created before `cutoff`
    pub async fn sweep_sessions_before(&self, cutoff: DateTime<Utc>) -> EngineResult<usize> {
        let expired = {
            let mut conn = self.pool.acquire().await?;
            db::sessions::list_sessions_created_before(&mut conn, cutoff).await?
        };

        let mut removed = 0;
        for session in expired {
            match self.delete_session(session.id).await {
                Ok(()) => removed += 1,
                // Deleted concurrently
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        info!(removed, cutoff = %cutoff, "Session sweep finished");
        Ok(removed)
    }

    /// Delete history entries past the retention period
    pub async fn sweep_history(&self) -> EngineResult<usize> {
        self.history.sweep().await
    }

    /// Recently viewed images of one terminal, newest first
    pub async fn recent_history(
        &self,
        terminal_session_id: &str,
        limit: usize,
    ) -> EngineResult<Vec<HistoryEntry>> {
        self.history.get(terminal_session_id, limit).await
    }

    /// Drop in-memory state; the database pool is left for the owner to close
    pub async fn shutdown(&self) {
        self.history.shutdown().await;
        info!(
            uptime_secs = (time::now() - self.startup_time).num_seconds(),
            "Editor engine shut down"
        );
    }

}

async fn remove_working_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove working file");
        }
    }
}
