//! Image session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Where an image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    File,
    Clipboard,
    Url,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::File => "file",
            SourceType::Clipboard => "clipboard",
            SourceType::Url => "url",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "file" => Some(SourceType::File),
            "clipboard" => Some(SourceType::Clipboard),
            "url" => Some(SourceType::Url),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported raster formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Bmp => "bmp",
        }
    }

    /// Parse a format name or file extension; "jpg" normalizes to jpeg
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpeg" | "jpg" => Some(ImageFormat::Jpeg),
            "gif" => Some(ImageFormat::Gif),
            "webp" => Some(ImageFormat::Webp),
            "bmp" => Some(ImageFormat::Bmp),
            _ => None,
        }
    }

    /// File extension used for working copies
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Codec selector for the `image` crate
    pub fn codec(&self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Gif => image::ImageFormat::Gif,
            ImageFormat::Webp => image::ImageFormat::WebP,
            ImageFormat::Bmp => image::ImageFormat::Bmp,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One open image being edited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSession {
    pub id: Uuid,
    pub terminal_session_id: String,
    pub source_type: SourceType,
    /// Original path or URL; None for clipboard images
    pub source_path: Option<String>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    pub working_copy_path: PathBuf,
    /// Untouched full-resolution copy when the working copy was downsampled
    pub full_resolution_path: Option<PathBuf>,
    /// Sequence number of the newest undo snapshot
    pub undo_head: Option<i64>,
    /// Sequence number of the snapshot matching the current overlay
    pub undo_cursor: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub is_modified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jpg_alias_normalizes_to_jpeg() {
        assert_eq!(ImageFormat::parse("jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::parse("JPEG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::Jpeg.as_str(), "jpeg");
    }

    #[test]
    fn test_unsupported_formats_rejected() {
        assert_eq!(ImageFormat::parse("tiff"), None);
        assert_eq!(ImageFormat::parse("svg"), None);
        assert_eq!(SourceType::parse("ftp"), None);
    }
}
