//! Annotation layer and undo-ring models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::scene::Scene;

/// Number of slots in each session's undo ring
pub const UNDO_SLOTS: i64 = 50;

/// Vector overlay attached to exactly one image session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationLayer {
    pub id: Uuid,
    pub session_id: Uuid,
    pub scene: Scene,
    /// Starts at 1, +1 per accepted write
    pub version: i64,
    pub last_updated: DateTime<Utc>,
}

/// Kind of edit that produced a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Draw,
    Text,
    Shape,
    Filter,
    Crop,
    Resize,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Draw => "draw",
            OperationType::Text => "text",
            OperationType::Shape => "shape",
            OperationType::Filter => "filter",
            OperationType::Crop => "crop",
            OperationType::Resize => "resize",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draw" => Some(OperationType::Draw),
            "text" => Some(OperationType::Text),
            "shape" => Some(OperationType::Shape),
            "filter" => Some(OperationType::Filter),
            "crop" => Some(OperationType::Crop),
            "resize" => Some(OperationType::Resize),
            _ => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One occupied slot of the undo ring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditOperation {
    pub id: Uuid,
    pub session_id: Uuid,
    pub operation_type: OperationType,
    pub scene_snapshot: Scene,
    /// Absolute sequence this slot was written for; None for raw slot writes
    pub sequence: Option<i64>,
    /// Raster size the snapshot's coordinates refer to; None for slots
    /// written before the size was tracked
    pub raster_width: Option<u32>,
    pub raster_height: Option<u32>,
    pub timestamp: DateTime<Utc>,
    /// Slot index in `0..UNDO_SLOTS`
    pub position: i64,
}

impl EditOperation {
    /// Whether restoring this snapshot onto a `width`x`height` raster keeps
    /// its coordinates meaningful
    ///
    /// Slots without a recorded size are trusted.
    pub fn fits_frame(&self, width: u32, height: u32) -> bool {
        match (self.raster_width, self.raster_height) {
            (Some(w), Some(h)) => w == width && h == height,
            _ => true,
        }
    }
}

/// Ring slot for an absolute sequence number
pub fn slot_for(sequence: i64) -> i64 {
    sequence.rem_euclid(UNDO_SLOTS)
}
