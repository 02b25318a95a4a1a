//! Cover art normalization before embedding
//!
//! Catalog covers are often multi-megabyte originals. Before a cover is
//! embedded it is normalized:
//! - Longest side capped at 640px, aspect ratio preserved
//! - Transparent PNGs and GIFs keep their format
//! - Everything else becomes JPEG, lowering quality until it fits in 500KB
//!
//! Normalization is best-effort: if the image cannot be decoded the original
//! bytes are embedded unchanged.

use anyhow::{Context, Result, bail};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::{debug, warn};

/// Maximum dimension for cover art (width or height)
const MAX_COVER_SIZE: u32 = 640;

/// Maximum encoded size for lossy cover art in bytes (500KB)
const MAX_COVER_BYTES: usize = 500 * 1024;

/// First JPEG quality tried, in tenths (0.9)
const INITIAL_QUALITY_TENTHS: u8 = 9;

/// Lowest JPEG quality tried, in tenths (0.1)
const MIN_QUALITY_TENTHS: u8 = 1;

/// Encoded cover image and its MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    pub data: Vec<u8>,
    pub mime: String,
}

/// Result of a successful normalization
#[derive(Debug)]
struct NormalizedCover {
    image: CoverImage,
    width: u32,
    height: u32,
    /// Encoder quality in [0.1, 1.0]; 1.0 for lossless output
    quality: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Png,
    Gif,
    Jpeg,
}

/// Normalize cover art for embedding
///
/// Never fails: on any decode or encode error the input is returned as-is.
pub fn normalize_cover(data: &[u8], mime: &str) -> CoverImage {
    match process_cover_art(data, mime) {
        Ok(normalized) => normalized.image,
        Err(e) => {
            warn!("Embedding original cover art ({}): {:#}", mime, e);
            CoverImage {
                data: data.to_vec(),
                mime: mime.to_string(),
            }
        }
    }
}

fn process_cover_art(data: &[u8], mime: &str) -> Result<NormalizedCover> {
    let mime = mime_essence(mime);
    if !mime.starts_with("image/") {
        bail!("not an image type");
    }

    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .context("Failed to guess image format")?
        .decode()
        .context("Failed to decode cover art")?;

    let img = resize_to_fit(img);
    let format = choose_format(&mime, &img);

    let normalized = match format {
        OutputFormat::Png => encode_lossless(&img, ImageFormat::Png, "image/png")?,
        OutputFormat::Gif => encode_lossless(&img, ImageFormat::Gif, "image/gif")?,
        OutputFormat::Jpeg => encode_jpeg_within_budget(&img)?,
    };

    debug!(
        "Normalized cover art: {} bytes {} -> {}x{} {} bytes {} (quality {:.1})",
        data.len(),
        mime,
        normalized.width,
        normalized.height,
        normalized.image.data.len(),
        normalized.image.mime,
        normalized.quality
    );
    Ok(normalized)
}

/// `image/PNG; charset=binary` -> `image/png`
fn mime_essence(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn choose_format(mime: &str, img: &DynamicImage) -> OutputFormat {
    match mime {
        "image/png" if has_transparency(img) => OutputFormat::Png,
        "image/gif" => OutputFormat::Gif,
        _ => OutputFormat::Jpeg,
    }
}

/// Whether any pixel is not fully opaque
fn has_transparency(img: &DynamicImage) -> bool {
    img.color().has_alpha() && img.to_rgba8().pixels().any(|p| p.0[3] < u8::MAX)
}

/// Resize image so its longer side is at most MAX_COVER_SIZE, keeping aspect ratio
fn resize_to_fit(img: DynamicImage) -> DynamicImage {
    let (width, height) = (img.width(), img.height());

    // Don't resize if already small enough
    if width <= MAX_COVER_SIZE && height <= MAX_COVER_SIZE {
        return img;
    }

    let (new_width, new_height) = scaled_dimensions(width, height);
    debug!(
        "Resizing cover art: {}x{} -> {}x{}",
        width, height, new_width, new_height
    );

    img.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

fn scaled_dimensions(width: u32, height: u32) -> (u32, u32) {
    let scale = |side: u32, longer: u32| -> u32 {
        let scaled = (side as f64 * MAX_COVER_SIZE as f64 / longer as f64).round() as u32;
        scaled.max(1)
    };

    if width >= height {
        (MAX_COVER_SIZE, scale(height, width))
    } else {
        (scale(width, height), MAX_COVER_SIZE)
    }
}

fn encode_lossless(img: &DynamicImage, format: ImageFormat, mime: &str) -> Result<NormalizedCover> {
    let mut output = Vec::new();
    img.write_to(&mut Cursor::new(&mut output), format)
        .with_context(|| format!("Failed to encode cover art as {:?}", format))?;

    Ok(NormalizedCover {
        image: CoverImage {
            data: output,
            mime: mime.to_string(),
        },
        width: img.width(),
        height: img.height(),
        quality: 1.0,
    })
}

/// Encode as JPEG, stepping quality down by 0.1 until the size budget is met
fn encode_jpeg_within_budget(img: &DynamicImage) -> Result<NormalizedCover> {
    let rgb = img.to_rgb8();
    let mut tenths = INITIAL_QUALITY_TENTHS;

    loop {
        let mut output = Vec::new();
        JpegEncoder::new_with_quality(&mut output, tenths * 10)
            .encode_image(&rgb)
            .context("Failed to encode cover art as JPEG")?;

        if output.len() <= MAX_COVER_BYTES || tenths <= MIN_QUALITY_TENTHS {
            return Ok(NormalizedCover {
                image: CoverImage {
                    data: output,
                    mime: "image/jpeg".to_string(),
                },
                width: rgb.width(),
                height: rgb.height(),
                quality: f32::from(tenths) / 10.0,
            });
        }

        debug!(
            "Cover art too large ({} bytes) at quality 0.{}, retrying at 0.{}",
            output.len(),
            tenths,
            tenths - 1
        );
        tenths -= 1;
    }
}
