//! Filesystem entry classification: image, video, or gallery.
//!
//! Classification is extension-based MIME guessing — cheap enough to run on
//! every entry of a large tree without opening files. Content sniffing is
//! deliberately not performed; a wrong extension simply classifies wrong and
//! the generator for that item fails in isolation later.
//!
//! A **gallery** is a directory holding more than [`GALLERY_BOUNDARY`] image
//! files whose stems carry at least one digit. Both guards matter: the count
//! keeps a folder with a couple of cover scans from becoming a gallery, and
//! the digit requirement excludes directories of incidental, non-sequential
//! images (logos, screenshots) that happen to live together.

use std::fs;
use std::path::Path;

/// Minimum number of qualifying images before a directory counts as a gallery.
pub const GALLERY_BOUNDARY: usize = 5;

/// Extension → MIME type, image formats.
const IMAGE_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("jpe", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("avif", "image/avif"),
];

/// Extension → MIME type, video containers.
const VIDEO_TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("m4v", "video/x-m4v"),
    ("mkv", "video/x-matroska"),
    ("webm", "video/webm"),
    ("avi", "video/x-msvideo"),
    ("mov", "video/quicktime"),
    ("wmv", "video/x-ms-wmv"),
    ("flv", "video/x-flv"),
    ("mpg", "video/mpeg"),
    ("mpeg", "video/mpeg"),
    ("ts", "video/mp2t"),
    ("ogv", "video/ogg"),
];

/// Guess a MIME type from the file extension alone.
pub fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    IMAGE_TYPES
        .iter()
        .chain(VIDEO_TYPES)
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// True if the path has an image extension (the path need not exist).
pub fn is_image(path: &Path) -> bool {
    guess_mime(path).is_some_and(|m| m.starts_with("image/"))
}

/// True if the path has a video extension (the path need not exist).
pub fn is_video(path: &Path) -> bool {
    guess_mime(path).is_some_and(|m| m.starts_with("video/"))
}

/// True if `path` is a file that exists and classifies as a video.
pub fn is_video_file(path: &Path) -> bool {
    path.is_file() && is_video(path)
}

/// True if `path` is a directory containing more than `boundary` image files
/// whose stem contains at least one digit.
pub fn is_gallery(path: &Path, boundary: usize) -> bool {
    if !path.is_dir() {
        return false;
    }
    let Ok(entries) = fs::read_dir(path) else {
        return false;
    };
    let qualifying = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_image(p) && stem_has_digit(p))
        .count();
    qualifying > boundary
}

fn stem_has_digit(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.chars().any(|c| c.is_ascii_digit()))
}
