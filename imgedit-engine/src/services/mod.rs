//! Engine services
//!
//! Each service owns one concern and is wired together by
//! [`EditorEngine`](crate::EditorEngine). Raster work always goes through the
//! shared [`RasterWorkerPool`].

pub mod annotations;
pub mod history_cache;
pub mod ingestion;
pub mod raster;
pub mod resolution;
pub mod session_locks;
pub mod transform;
pub mod undo;
pub mod url_fetch;
pub mod worker_pool;

pub use annotations::AnnotationController;
pub use history_cache::RecentHistoryCache;
pub use ingestion::{ImageSource, SourceIngestion};
pub use resolution::{ResolutionAdapter, DEFAULT_INTERACTIVE_MAX_DIMENSION};
pub use session_locks::SessionLocks;
pub use transform::{SavedImage, TransformOutcome, TransformPipeline};
pub use undo::{UndoOutcome, UndoRedoBuffer};
pub use url_fetch::{FetchedImage, UrlFetcher};
pub use worker_pool::RasterWorkerPool;
