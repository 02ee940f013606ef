//! Raster primitives
//!
//! Blocking helpers around the `image` crate. Callers run them on the
//! [`RasterWorkerPool`](super::worker_pool::RasterWorkerPool).

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::ImageFormat;

/// Largest accepted blur radius (sigma)
pub const MAX_BLUR_RADIUS: f32 = 20.0;

/// Largest accepted sharpen amount
pub const MAX_SHARPEN_AMOUNT: f32 = 10.0;

/// Format, width and height of an in-memory image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

/// Identify the format from magic bytes
pub fn sniff_format(bytes: &[u8]) -> EngineResult<ImageFormat> {
    let kind = infer::get(bytes)
        .ok_or_else(|| EngineError::Validation("Unrecognized image data".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(EngineError::Validation(format!(
            "Not an image (detected {})",
            kind.mime_type()
        )));
    }

    ImageFormat::parse(kind.extension()).ok_or_else(|| {
        EngineError::Validation(format!(
            "Unsupported image format '{}' (supported: png, jpeg, gif, webp, bmp)",
            kind.extension()
        ))
    })
}

/// Validate encoded bytes: supported format, dimensions within `max_dimension`,
/// and a full decode that succeeds
///
/// Dimensions come from the header first so oversize images are rejected
/// before any pixel buffer is allocated.
pub fn inspect_bytes(bytes: &[u8], max_dimension: u32) -> EngineResult<ImageInfo> {
    let format = sniff_format(bytes)?;

    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format.codec())
        .into_dimensions()
        .map_err(|e| EngineError::Validation(format!("Unreadable {} header: {}", format, e)))?;

    if width == 0 || height == 0 {
        return Err(EngineError::Validation(format!(
            "Image has empty dimensions {}x{}",
            width, height
        )));
    }
    if width > max_dimension || height > max_dimension {
        return Err(EngineError::Validation(format!(
            "Image dimensions {}x{} exceed maximum {}x{}",
            width, height, max_dimension, max_dimension
        )));
    }

    ImageReader::with_format(Cursor::new(bytes), format.codec())
        .decode()
        .map_err(|e| EngineError::Validation(format!("Corrupt {} image: {}", format, e)))?;

    Ok(ImageInfo { format, width, height })
}

/// Decode an image file
pub fn decode_file(path: &Path, format: ImageFormat) -> EngineResult<DynamicImage> {
    let file = File::open(path)?;
    ImageReader::with_format(std::io::BufReader::new(file), format.codec())
        .decode()
        .map_err(|e| EngineError::transform("decode", summarize_codec_error(&e)))
}

/// Encode `img` to `path` in `format`
///
/// JPEG has no alpha channel, so it is flattened to RGB first; WebP, GIF and
/// BMP are written from RGBA8.
pub fn encode_to_file(img: &DynamicImage, format: ImageFormat, path: &Path) -> EngineResult<u64> {
    let converted = match format {
        ImageFormat::Png => None,
        ImageFormat::Jpeg => Some(DynamicImage::ImageRgb8(img.to_rgb8())),
        ImageFormat::Gif | ImageFormat::Webp | ImageFormat::Bmp => {
            Some(DynamicImage::ImageRgba8(img.to_rgba8()))
        }
    };
    let img = converted.as_ref().unwrap_or(img);

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    img.write_to(&mut writer, format.codec())
        .map_err(|e| EngineError::transform("encode", summarize_codec_error(&e)))?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    Ok(std::fs::metadata(path)?.len())
}

/// Unique temp file next to `target`, on the same filesystem so a rename is atomic
///
/// The target's extension is kept last so the format can still be derived
/// from the temp name.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    match target.extension().and_then(|e| e.to_str()) {
        Some(ext) => dir.join(format!(".{}.tmp.{}", Uuid::new_v4(), ext)),
        None => dir.join(format!(".{}.tmp", Uuid::new_v4())),
    }
}

/// Header-only dimensions of an image file
pub fn file_dimensions(path: &Path) -> EngineResult<(u32, u32)> {
    image::image_dimensions(path)
        .map_err(|e| EngineError::transform("decode", summarize_codec_error(&e)))
}

pub fn crop(img: &DynamicImage, x: u32, y: u32, width: u32, height: u32) -> DynamicImage {
    img.crop_imm(x, y, width, height)
}

/// Lanczos3 resample to exactly `width` x `height`
pub fn resize(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    img.resize_exact(width, height, FilterType::Lanczos3)
}

/// Gaussian blur; radius 0 leaves the image unchanged
pub fn blur(img: &DynamicImage, radius: f32) -> DynamicImage {
    if radius <= 0.0 {
        return img.clone();
    }
    img.blur(radius)
}

/// 3x3 sharpen with `-amount` on the cross and `1 + 4 * amount` in the centre
pub fn sharpen(img: &DynamicImage, amount: f32) -> DynamicImage {
    if amount <= 0.0 {
        return img.clone();
    }
    img.filter3x3(&sharpen_kernel(amount))
}

pub fn sharpen_kernel(amount: f32) -> [f32; 9] {
    [
        0.0,
        -amount,
        0.0,
        -amount,
        1.0 + 4.0 * amount,
        -amount,
        0.0,
        -amount,
        0.0,
    ]
}

/// Codec errors can embed large internal detail; keep only the first line
fn summarize_codec_error(err: &image::ImageError) -> String {
    let text = err.to_string();
    let first = text.lines().next().unwrap_or("codec error");
    first.chars().take(200).collect()
}
