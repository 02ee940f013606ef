//! Data models for imgedit-engine

pub mod history;
pub mod operation;
pub mod scene;
pub mod session;

pub use history::{HistoryEntry, MAX_HISTORY_PAGE};
pub use operation::{slot_for, AnnotationLayer, EditOperation, OperationType, UNDO_SLOTS};
pub use scene::{Point, Scene, SceneError, SceneItem, SceneObject, Style};
pub use session::{ImageFormat, ImageSession, SourceType};
