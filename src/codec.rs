//! Image decoding and encoding at the edge of the pipeline.

use std::path::{Path, PathBuf};

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder, ImageFormat, Luma, RgbaImage};

use crate::error::DecodeError;

/// Formats accepted as input.
pub const SUPPORTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Bmp,
];

/// MIME type of the encoded output.
pub const OUTPUT_CONTENT_TYPE: &str = "image/png";

/// File extension of the encoded output, without the dot.
pub const OUTPUT_EXTENSION: &str = "png";

/// Reject payloads whose declared content type is not an image.
///
/// A missing header or `application/octet-stream` is accepted; the bytes are
/// sniffed by [`decode`] anyway.
///
/// # Errors
///
/// Returns [`DecodeError::NotAnImage`] for any other declared type.
pub fn check_content_type(content_type: Option<&str>) -> Result<(), DecodeError> {
    let Some(declared) = content_type else {
        return Ok(());
    };
    let mime = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if mime.starts_with("image/") || mime == "application/octet-stream" || mime.is_empty() {
        Ok(())
    } else {
        Err(DecodeError::NotAnImage(mime))
    }
}

/// Decode JPEG, PNG, WebP or BMP bytes into an RGBA raster.
///
/// The format is sniffed from the content, not trusted from any header.
///
/// # Errors
///
/// Returns [`DecodeError::Empty`], [`DecodeError::UnsupportedFormat`] or
/// [`DecodeError::Image`] for corrupt data.
pub fn decode(bytes: &[u8]) -> Result<RgbaImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let format = image::guess_format(bytes)
        .map_err(|_| DecodeError::UnsupportedFormat("unrecognized".to_string()))?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(DecodeError::UnsupportedFormat(format!("{format:?}")));
    }
    Ok(image::load_from_memory_with_format(bytes, format)?.to_rgba8())
}

/// Single-channel view for the classifier.
///
/// Uses luminance formula: `0.299*R + 0.587*G + 0.114*B`. Alpha is ignored.
#[must_use]
pub fn grayscale(image: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let px = image.get_pixel(x, y);
        let lum = 0.299 * f32::from(px[0]) + 0.587 * f32::from(px[1]) + 0.114 * f32::from(px[2]);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let value = lum.round().clamp(0.0, 255.0) as u8;
        Luma([value])
    })
}

/// Encode as PNG.
///
/// No ancillary chunks are written, so identical pixels give identical bytes.
///
/// # Errors
///
/// Returns [`DecodeError::Encode`] if the encoder fails.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, DecodeError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(DecodeError::Encode)?;
    Ok(buf)
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        ),
        None => false,
    }
}

/// Generate a default output path from an input path.
///
/// Example: `"photo.jpg"` becomes `"photo_masked.png"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_masked.{OUTPUT_EXTENSION}"))
}
