//! Pure-Rust image operations used by both generator pipelines: fitting,
//! WebP stills, long-strip slicing, sheet compositing and the pixel
//! statistics behind cover-frame selection.
//!
//! Everything here works on [`DynamicImage`]; process-spawning work
//! (frame extraction, animated assembly) lives behind
//! [`Encoder`](crate::encoder::Encoder) instead.

use std::fs;
use std::io::BufReader;
use std::path::Path;

use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::{WebPDecoder, WebPEncoder};
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, GenericImageView, ImageReader, RgbaImage, imageops};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// A strip taller than this many times its width gets sliced into segments
/// for the animated preview.
const LONG_STRIP_RATIO: u32 = 3;

/// Target aspect used to estimate long-strip segment count (portrait).
const LONG_STRIP_SEGMENT_ASPECT: f64 = 9.0 / 16.0;

pub fn load(path: &Path) -> Result<DynamicImage, ImagingError> {
    Ok(ImageReader::open(path)?.decode()?)
}

pub fn dimensions(path: &Path) -> Result<(u32, u32), ImagingError> {
    Ok(image::image_dimensions(path)?)
}

/// Dimensions scaled down to fit inside `max_w` × `max_h`, preserving
/// aspect ratio and never upscaling.
pub fn fit_dimensions(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }
    let scale = (max_w as f64 / width as f64).min(max_h as f64 / height as f64);
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}

/// Downscale to fit inside the maximum dimensions (no-op when already
/// small enough).
pub fn fit(image: &DynamicImage, max_w: u32, max_h: u32) -> DynamicImage {
    let (w, h) = image.dimensions();
    if w <= max_w && h <= max_h {
        return image.clone();
    }
    image.resize(max_w, max_h, FilterType::Lanczos3)
}

/// Write a WebP still. `image` 0.25 encodes WebP losslessly only; the
/// resulting previews trade a little size for a dependency-free encode.
pub fn save_webp(image: &DynamicImage, path: &Path) -> Result<(), ImagingError> {
    let file = fs::File::create(path)?;
    let encoder = WebPEncoder::new_lossless(std::io::BufWriter::new(file));
    image.to_rgba8().write_with_encoder(encoder)?;
    Ok(())
}

/// Number of vertical segments a long-strip image should be sliced into
/// for the animated preview, or `None` for normally proportioned images.
pub fn long_strip_segments(width: u32, height: u32) -> Option<u32> {
    if width == 0 || height <= width * LONG_STRIP_RATIO {
        return None;
    }
    let times = ((height as f64 * LONG_STRIP_SEGMENT_ASPECT) / width as f64).round() as u32;
    Some(times.max(1))
}

/// Slice a long strip into `segments` near-square vertical crops.
pub fn slice_strip(image: &DynamicImage, segments: u32) -> Vec<DynamicImage> {
    let (width, height) = image.dimensions();
    let segment_height = ((height as f64 / segments as f64).round() as u32).max(1);
    (0..segments)
        .map(|i| {
            let offset = i * segment_height;
            let h = segment_height.min(height.saturating_sub(offset)).max(1);
            image.crop_imm(0, offset, width, h)
        })
        .collect()
}

/// Mean width/height across frames, used as the common animated-preview
/// size to avoid distortion from outliers.
pub fn mean_dimensions(sizes: &[(u32, u32)]) -> Option<(u32, u32)> {
    if sizes.is_empty() {
        return None;
    }
    let n = sizes.len() as f64;
    let w = sizes.iter().map(|&(w, _)| w as f64).sum::<f64>() / n;
    let h = sizes.iter().map(|&(_, h)| h as f64).sum::<f64>() / n;
    Some(((w.round() as u32).max(1), (h.round() as u32).max(1)))
}

/// Largest per-channel standard deviation of pixel intensity. A frame that
/// is flat in every channel (black intro, fade) scores near zero.
pub fn max_channel_stddev(image: &DynamicImage) -> f64 {
    let rgb = image.to_rgb8();
    let count = (rgb.width() as u64 * rgb.height() as u64) as f64;
    if count == 0.0 {
        return 0.0;
    }
    let mut sums = [0.0f64; 3];
    let mut squares = [0.0f64; 3];
    for pixel in rgb.pixels() {
        for c in 0..3 {
            let v = pixel.0[c] as f64;
            sums[c] += v;
            squares[c] += v * v;
        }
    }
    (0..3)
        .map(|c| {
            let mean = sums[c] / count;
            (squares[c] / count - mean * mean).max(0.0).sqrt()
        })
        .fold(0.0, f64::max)
}

/// Composite `tiles` left-to-right, top-to-bottom onto a sheet `columns`
/// wide. Row count mirrors the tile count rounded up plus the trailing
/// partial row the original sheet layout always reserves.
pub fn compose_sheet(
    tiles: &[DynamicImage],
    columns: u32,
    cell_w: u32,
    cell_h: u32,
) -> DynamicImage {
    let rows = (tiles.len() as u32) / columns + 1;
    let mut sheet = RgbaImage::new(columns * cell_w, rows * cell_h);
    for (i, tile) in tiles.iter().enumerate() {
        let x = (i as u32 % columns) * cell_w;
        let y = (i as u32 / columns) * cell_h;
        imageops::replace(&mut sheet, &tile.to_rgba8(), x as i64, y as i64);
    }
    DynamicImage::ImageRgba8(sheet)
}

/// Whether the file holds a multi-frame image. Best-effort: undecodable or
/// single-frame-only formats report `false`.
pub fn is_animated(path: &Path) -> bool {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("gif") => gif_has_frames(path).unwrap_or(false),
        Some("webp") => webp_is_animated(path).unwrap_or(false),
        Some("png") => png_is_apng(path).unwrap_or(false),
        _ => false,
    }
}

fn gif_has_frames(path: &Path) -> Option<bool> {
    let decoder = GifDecoder::new(BufReader::new(fs::File::open(path).ok()?)).ok()?;
    let mut frames = decoder.into_frames();
    frames.next()?.ok()?;
    Some(frames.next().is_some())
}

fn webp_is_animated(path: &Path) -> Option<bool> {
    let decoder = WebPDecoder::new(BufReader::new(fs::File::open(path).ok()?)).ok()?;
    Some(decoder.has_animation())
}

fn png_is_apng(path: &Path) -> Option<bool> {
    let decoder = PngDecoder::new(BufReader::new(fs::File::open(path).ok()?)).ok()?;
    decoder.is_apng().ok()
}
