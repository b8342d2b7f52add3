//! Thumbnail generation: embedded preview first, full decode as fallback
//!
//! The fast path pulls a preview the container already carries (the EXIF
//! thumbnail, or an embedded JPEG stream inside camera RAW files) and downscales
//! it, provided it is at least as large as the thumbnail being made. Otherwise
//! the full image is decoded and resized; a smaller preview is still used when
//! the full decode fails. Either way the result is re-encoded as JPEG at a
//! fixed quality.

use crate::error::CodecError;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

/// Long-edge cap for previews taken from the embedded-preview fast path
pub const PREVIEW_MAX_DIMENSION: u32 = 800;

/// JPEG quality used for every generated thumbnail
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Embedded JPEG streams smaller than this are ignored (usually icons or tiles)
const MIN_EMBEDDED_JPEG_BYTES: usize = 4 * 1024;

/// How much of a RAW container is scanned for embedded JPEG streams
const MAX_EMBEDDED_SCAN_BYTES: usize = 8 * 1024 * 1024;

const JPEG_SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// A decoded thumbnail bitmap, shared between the memory cache and callers
pub type DecodedImage = Arc<DynamicImage>;

/// Anything that can turn a source image into encoded thumbnail bytes
pub trait ThumbnailSource: Send + Sync {
    fn produce(&self, source: &Path, max_dimension: u32) -> Result<Vec<u8>, CodecError>;
}

/// Production codec backed by the `image` and `kamadak-exif` crates
#[derive(Debug, Clone, Copy)]
pub struct ImageCodec {
    preview_max_dimension: u32,
    quality: u8,
}

impl Default for ImageCodec {
    fn default() -> Self {
        Self {
            preview_max_dimension: PREVIEW_MAX_DIMENSION,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl ImageCodec {
    pub fn new(preview_max_dimension: u32, quality: u8) -> Self {
        Self {
            preview_max_dimension: preview_max_dimension.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl ThumbnailSource for ImageCodec {
    fn produce(&self, source: &Path, max_dimension: u32) -> Result<Vec<u8>, CodecError> {
        let max_dimension = max_dimension.max(1);
        let data = fs::read(source).map_err(|e| CodecError::unreadable(source, e))?;
        let cap = self.preview_max_dimension.min(max_dimension);
        let raw = is_raw_container(source, &data);

        let preview = match extract_embedded_preview(&data, raw) {
            Some(preview) if long_edge(&preview) >= cap => {
                log::trace!("using embedded preview for {}", source.display());
                return encode_jpeg(&downscale_preview(preview, cap), self.quality);
            }
            other => other,
        };

        match decode_full(source, &data) {
            Ok(img) => encode_jpeg(&resize_image(img, max_dimension), self.quality),
            Err(e) => {
                // RAW containers were already scanned; anything else gets one
                // more chance in case the extension lied about the contents
                let fallback = match preview {
                    Some(preview) => Some(preview),
                    None if !raw => scan_embedded_jpeg(&data),
                    None => None,
                };
                match fallback {
                    Some(preview) => {
                        log::debug!(
                            "full decode failed, using embedded preview for {}",
                            source.display()
                        );
                        encode_jpeg(&downscale_preview(preview, cap), self.quality)
                    }
                    None => Err(e),
                }
            }
        }
    }
}

fn decode_full(source: &Path, data: &[u8]) -> Result<DynamicImage, CodecError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| CodecError::unreadable(source, e))?
        .decode()
        .map_err(|e| CodecError::unreadable(source, e))
}

/// Decode thumbnail bytes (from disk or freshly generated) into a bitmap
pub fn decode_thumbnail(data: &[u8]) -> Result<DecodedImage, CodecError> {
    let img = image::load_from_memory(data)
        .map_err(|e| CodecError::CorruptThumbnail(e.to_string()))?;
    Ok(Arc::new(img))
}

/// Camera RAW files: an extension the `image` crate does not handle, or
/// contents it cannot identify. TIFF-based RAWs (CR2, NEF, ARW, DNG) sniff as
/// TIFF, so the extension decides for them.
fn is_raw_container(source: &Path, data: &[u8]) -> bool {
    ImageFormat::from_path(source).is_err() || image::guess_format(data).is_err()
}

/// The largest container-provided preview: the EXIF thumbnail, and for RAW
/// containers also the largest embedded JPEG stream.
fn extract_embedded_preview(data: &[u8], raw: bool) -> Option<DynamicImage> {
    let exif = exif_thumbnail(data);
    let embedded = if raw { scan_embedded_jpeg(data) } else { None };

    match (exif, embedded) {
        (Some(a), Some(b)) => Some(if long_edge(&a) >= long_edge(&b) { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn scan_embedded_jpeg(data: &[u8]) -> Option<DynamicImage> {
    let scan_len = data.len().min(MAX_EMBEDDED_SCAN_BYTES);
    largest_embedded_jpeg(&data[..scan_len])
}

fn long_edge(img: &DynamicImage) -> u32 {
    img.width().max(img.height())
}

fn exif_thumbnail(data: &[u8]) -> Option<DynamicImage> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()?;

    let offset = exif
        .get_field(exif::Tag::JPEGInterchangeFormat, exif::In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;
    let length = exif
        .get_field(exif::Tag::JPEGInterchangeFormatLength, exif::In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;

    // Offsets are relative to the TIFF header, which is what `buf` holds
    let bytes = exif.buf().get(offset..offset.checked_add(length)?)?;
    image::load_from_memory_with_format(bytes, ImageFormat::Jpeg).ok()
}

/// Find every JPEG stream in `data` and return the largest one that decodes
fn largest_embedded_jpeg(data: &[u8]) -> Option<DynamicImage> {
    let mut candidates: Vec<&[u8]> = data
        .windows(JPEG_SOI.len())
        .enumerate()
        .filter(|(_, window)| *window == JPEG_SOI)
        .filter_map(|(start, _)| {
            let end_offset = data[start..]
                .windows(JPEG_EOI.len())
                .position(|window| window == JPEG_EOI)?;
            let end = start + end_offset + JPEG_EOI.len();
            Some(&data[start..end])
        })
        .filter(|stream| stream.len() >= MIN_EMBEDDED_JPEG_BYTES)
        .collect();

    candidates.sort_by_key(|stream| std::cmp::Reverse(stream.len()));
    candidates
        .into_iter()
        .find_map(|stream| image::load_from_memory_with_format(stream, ImageFormat::Jpeg).ok())
}

fn downscale_preview(img: DynamicImage, cap: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width.max(height) <= cap {
        return img;
    }
    img.thumbnail(cap, cap)
}

/// Resize to fit within `max_dim` on both axes, preserving aspect ratio.
/// Images already within bounds are returned untouched.
pub fn resize_image(img: DynamicImage, max_dim: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    let max_existing = width.max(height);

    if max_existing <= max_dim {
        return img;
    }

    let ratio = max_dim as f64 / max_existing as f64;
    let new_width = ((width as f64 * ratio).round() as u32).clamp(1, max_dim);
    let new_height = ((height as f64 * ratio).round() as u32).clamp(1, max_dim);

    img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3)
}

/// Encode as JPEG at `quality` (1-100)
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(CodecError::EncodeFailed(format!(
            "cannot encode a {}x{} image",
            width, height
        )));
    }

    let rgb = img.to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(&rgb)
        .map_err(|e| CodecError::EncodeFailed(e.to_string()))?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use image::{ImageBuffer, Rgb};
    use tempfile::tempdir;

    fn patterned(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([((x * 7) ^ (y * 13)) as u8, (x + y) as u8, (x * y) as u8])
        }))
    }

    #[test]
    fn test_resize_logic() {
        let img = DynamicImage::new_rgb8(1000, 800);

        let resized = resize_image(img.clone(), 300);
        let (w, h) = resized.dimensions();
        assert_eq!(w, 300);
        assert_eq!(h, 240);

        // Portrait keeps height as the limiting edge
        let portrait = resize_image(DynamicImage::new_rgb8(600, 1200), 512);
        assert_eq!(portrait.dimensions(), (256, 512));

        // Small images are not upscaled
        let small_img = DynamicImage::new_rgb8(100, 80);
        let not_resized = resize_image(small_img.clone(), 300);
        assert_eq!(not_resized.dimensions(), small_img.dimensions());
    }

    #[test]
    fn test_extreme_aspect_ratio_keeps_one_pixel() {
        let resized = resize_image(DynamicImage::new_rgb8(4000, 2), 100);
        assert_eq!(resized.dimensions(), (100, 1));
    }

    #[test]
    fn test_produce_from_png_bounds_dimensions() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("wide.png");
        patterned(1200, 600).save(&path)?;

        let bytes = ImageCodec::default().produce(&path, 512)?;
        let decoded = decode_thumbnail(&bytes)?;
        assert_eq!(decoded.dimensions(), (512, 256));
        assert_eq!(image::guess_format(&bytes)?, ImageFormat::Jpeg);
        Ok(())
    }

    #[test]
    fn test_produce_keeps_small_sources() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("small.png");
        patterned(64, 48).save(&path)?;

        let bytes = ImageCodec::default().produce(&path, 512)?;
        assert_eq!(decode_thumbnail(&bytes)?.dimensions(), (64, 48));
        Ok(())
    }

    #[test]
    fn test_embedded_jpeg_in_unknown_container() -> Result<()> {
        let temp_dir = tempdir()?;

        let mut preview = Vec::new();
        JpegEncoder::new_with_quality(&mut preview, 90)
            .encode_image(&patterned(1600, 1200).to_rgb8())?;
        assert!(preview.len() >= MIN_EMBEDDED_JPEG_BYTES);

        // Fake RAW: opaque header, embedded preview, opaque trailer
        let mut container = b"FAKERAW\x00\x01\x02".to_vec();
        container.extend(std::iter::repeat(0x11).take(4096));
        container.extend_from_slice(&preview);
        container.extend(std::iter::repeat(0x22).take(4096));
        let path = temp_dir.path().join("shot.xyzraw");
        fs::write(&path, &container)?;

        let bytes = ImageCodec::default().produce(&path, 2000)?;
        let decoded = decode_thumbnail(&bytes)?;
        // Capped by the preview limit, not by max_dimension
        assert_eq!(decoded.width().max(decoded.height()), PREVIEW_MAX_DIMENSION);

        let bytes = ImageCodec::default().produce(&path, 256)?;
        let decoded = decode_thumbnail(&bytes)?;
        assert!(decoded.width().max(decoded.height()) <= 256);
        Ok(())
    }

    fn tiff_headed_raw(preview: &[u8]) -> Vec<u8> {
        // Little-endian TIFF header, IFD0 at offset 8 with no entries
        let mut container = b"II*\x00\x08\x00\x00\x00".to_vec();
        container.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        container.extend(std::iter::repeat(0x11).take(4096));
        container.extend_from_slice(preview);
        container.extend(std::iter::repeat(0x22).take(4096));
        container
    }

    #[test]
    fn test_embedded_jpeg_in_tiff_based_raw() -> Result<()> {
        let temp_dir = tempdir()?;

        let mut preview = Vec::new();
        JpegEncoder::new_with_quality(&mut preview, 90)
            .encode_image(&patterned(1600, 1200).to_rgb8())?;
        let container = tiff_headed_raw(&preview);
        assert_eq!(image::guess_format(&container)?, ImageFormat::Tiff);

        for name in ["shot.cr2", "shot.nef", "shot.dng"] {
            let path = temp_dir.path().join(name);
            fs::write(&path, &container)?;

            let bytes = ImageCodec::default().produce(&path, 512)?;
            assert_eq!(decode_thumbnail(&bytes)?.dimensions(), (512, 384), "{}", name);
        }
        Ok(())
    }

    #[test]
    fn test_mislabelled_container_falls_back_to_scan() -> Result<()> {
        let temp_dir = tempdir()?;

        let mut preview = Vec::new();
        JpegEncoder::new_with_quality(&mut preview, 90)
            .encode_image(&patterned(1600, 1200).to_rgb8())?;
        let path = temp_dir.path().join("actually_raw.tif");
        fs::write(&path, tiff_headed_raw(&preview))?;

        let bytes = ImageCodec::default().produce(&path, 512)?;
        assert_eq!(decode_thumbnail(&bytes)?.dimensions(), (512, 384));
        Ok(())
    }

    #[test]
    fn test_corrupt_thumbnail_bytes() {
        let err = decode_thumbnail(b"not a thumbnail").unwrap_err();
        assert!(matches!(err, CodecError::CorruptThumbnail(_)));
        assert!(!err.to_string().contains("unreadable source"));
    }

    #[test]
    fn test_corrupt_source_is_unreadable() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("notes.jpg");
        fs::write(&path, b"definitely not an image")?;

        let err = ImageCodec::default().produce(&path, 512).unwrap_err();
        assert!(matches!(err, CodecError::Unreadable { .. }));

        let missing = temp_dir.path().join("missing.jpg");
        let err = ImageCodec::default().produce(&missing, 512).unwrap_err();
        assert!(matches!(err, CodecError::Unreadable { .. }));
        Ok(())
    }

    #[test]
    fn test_zero_size_encode_fails() {
        let err = encode_jpeg(&DynamicImage::new_rgb8(0, 0), 75).unwrap_err();
        assert!(matches!(err, CodecError::EncodeFailed(_)));
    }

    #[test]
    fn test_rgba_sources_encode() -> Result<()> {
        let bytes = encode_jpeg(&DynamicImage::new_rgba8(40, 30), 75)?;
        assert_eq!(decode_thumbnail(&bytes)?.dimensions(), (40, 30));
        Ok(())
    }
}
