//! Cache pipeline for image-gallery directories.
//!
//! Entry layout:
//!
//! ```text
//! gallery/
//! ├─ preview.webp
//! ├─ animated.webp
//! ├─ previews/
//! │  ├─ 1.webp
//! │  ├─ 2.webp
//! ├─ meta.json
//! ├─ gallery.type
//! ├─ is-cache
//! ├─ file-index.txt
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::classify::is_image;
use crate::config::GalleryConfig;
use crate::encoder::Encoder;
use crate::fileindex::FileIndex;
use crate::imaging;
use crate::meta::{GalleryImageMeta, GalleryMeta, MetaRecord};

use super::{Generator, GeneratorError, discard_scratch, reset_scratch};

const SCRATCH_DIR: &str = ".animated";

pub struct GalleryGenerator<'a> {
    source: PathBuf,
    dest: PathBuf,
    config: &'a GalleryConfig,
    encoder: &'a dyn Encoder,
    /// Relevant files in presentation order, filled by the meta stage.
    images: Vec<GalleryImageMeta>,
}

impl<'a> GalleryGenerator<'a> {
    pub fn new(
        source: impl Into<PathBuf>,
        dest: impl Into<PathBuf>,
        config: &'a GalleryConfig,
        encoder: &'a dyn Encoder,
    ) -> Result<Self, GeneratorError> {
        let source = source.into();
        if !source.exists() {
            return Err(GeneratorError::NotFound(source.display().to_string()));
        }
        Ok(Self {
            source,
            dest: dest.into(),
            config,
            encoder,
            images: Vec::new(),
        })
    }

    fn scratch_dir(&self) -> PathBuf {
        self.dest.join(SCRATCH_DIR)
    }

    fn previews_dir(&self) -> PathBuf {
        self.dest.join("previews")
    }

    /// Image files whose stem ends in digits (preferred) or contains digits
    /// (fallback), ascending by that number.
    pub fn relevant_files(source: &Path) -> Result<Vec<PathBuf>, GeneratorError> {
        let mut candidates: Vec<(PathBuf, u64)> = Vec::new();
        for entry in fs::read_dir(source)? {
            let path = entry?.path();
            if !path.is_file() || !is_image(&path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(number) = trailing_number(stem).or_else(|| first_number(stem)) {
                candidates.push((path, number));
            }
        }
        if candidates.is_empty() {
            return Err(GeneratorError::NotFound(format!(
                "no numbered image files in {}",
                source.display()
            )));
        }
        candidates.sort_by_key(|&(_, number)| number);
        Ok(candidates.into_iter().map(|(path, _)| path).collect())
    }
}

fn trailing_number(stem: &str) -> Option<u64> {
    let prefix = stem.trim_end_matches(|c: char| c.is_ascii_digit());
    parse_digits(&stem[prefix.len()..])
}

fn first_number(stem: &str) -> Option<u64> {
    let start = stem.find(|c: char| c.is_ascii_digit())?;
    let rest = &stem[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    parse_digits(&rest[..end])
}

/// Saturating parse; absurdly long digit runs still sort after short ones.
fn parse_digits(digits: &str) -> Option<u64> {
    if digits.is_empty() {
        return None;
    }
    Some(digits.bytes().fold(0u64, |acc, b| {
        acc.saturating_mul(10).saturating_add((b - b'0') as u64)
    }))
}

impl Generator for GalleryGenerator<'_> {
    fn source(&self) -> &Path {
        &self.source
    }

    fn dest(&self) -> &Path {
        &self.dest
    }

    fn type_marker(&self) -> &'static str {
        "gallery.type"
    }

    fn generate_meta(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
        let files = Self::relevant_files(&self.source)?;
        self.images = files
            .iter()
            .map(|path| {
                let (width, height) = imaging::dimensions(path)?;
                Ok(GalleryImageMeta {
                    filename: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    ext: path
                        .extension()
                        .map(|e| format!(".{}", e.to_string_lossy()))
                        .unwrap_or_default(),
                    width,
                    height,
                    filesize: fs::metadata(path)?.len(),
                    is_animated: imaging::is_animated(path),
                })
            })
            .collect::<Result<_, GeneratorError>>()?;

        let record = MetaRecord::Gallery(GalleryMeta {
            images: self.images.clone(),
        });
        let body = serde_json::to_vec_pretty(&record)?;
        fs::write(index.add_file("meta.json"), body)?;
        Ok(())
    }

    fn generate_previews(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
        let (max_w, max_h) = self.config.max_dimensions();
        let scratch = self.scratch_dir();
        reset_scratch(&scratch)?;
        fs::create_dir_all(self.previews_dir())?;

        let mut scratch_count = 0usize;
        for (i, info) in self.images.iter().enumerate() {
            let path = self.source.join(&info.filename);
            let image = imaging::load(&path)?;

            if scratch_count < self.config.max_images {
                match imaging::long_strip_segments(image.width(), image.height()) {
                    Some(segments) => {
                        debug!(
                            "{}: slicing long strip into {segments} frames",
                            info.filename
                        );
                        for slice in imaging::slice_strip(&image, segments) {
                            scratch_count += 1;
                            let frame = imaging::fit(&slice, max_w, max_h);
                            imaging::save_webp(
                                &frame,
                                &scratch.join(format!("{scratch_count}.webp")),
                            )?;
                        }
                    }
                    None => {
                        scratch_count += 1;
                        let frame = imaging::fit(&image, max_w, max_h);
                        imaging::save_webp(&frame, &scratch.join(format!("{scratch_count}.webp")))?;
                    }
                }
            }

            let still = imaging::fit(&image, max_w, max_h);
            imaging::save_webp(&still, &index.add_file(format!("previews/{}.webp", i + 1)))?;
        }
        Ok(())
    }

    fn generate_static_preview(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
        let first = self.previews_dir().join("1.webp");
        if !first.is_file() {
            return Err(GeneratorError::NotFound(first.display().to_string()));
        }
        fs::copy(first, index.add_file("preview.webp"))?;
        Ok(())
    }

    fn generate_animated_preview(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
        let scratch = self.scratch_dir();
        let frames = numbered_webp_files(&scratch)?;
        let frames: Vec<_> = frames.into_iter().take(self.config.max_images).collect();
        if frames.is_empty() {
            return Err(GeneratorError::NotFound("no animated-preview frames".into()));
        }
        let sizes = frames
            .iter()
            .map(|p| imaging::dimensions(p))
            .collect::<Result<Vec<_>, _>>()?;
        let mean = imaging::mean_dimensions(&sizes);
        debug!("animated preview size {mean:?} over {} frames", frames.len());
        self.encoder.assemble_animation(
            &scratch,
            1.0 / self.config.frame_time,
            mean,
            &index.add_file("animated.webp"),
        )?;
        Ok(())
    }

    fn cleanup(&mut self) {
        discard_scratch(&self.scratch_dir());
    }
}

/// `*.webp` files in `dir`, sorted by their numeric stem.
pub(super) fn numbered_webp_files(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files: Vec<(u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let number = path
            .extension()
            .filter(|e| *e == "webp")
            .and_then(|_| path.file_stem())
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse().ok());
        if let Some(number) = number {
            files.push((number, path));
        }
    }
    files.sort_by_key(|&(number, _)| number);
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::tests::MockEncoder;
    use crate::meta::read_json;
    use image::{DynamicImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32, value: u8) {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([value, value, value, 255]),
        ))
        .save(path)
        .unwrap();
    }

    fn make_gallery(dir: &Path, count: usize) {
        fs::create_dir_all(dir).unwrap();
        for i in 1..=count {
            write_png(&dir.join(format!("page-{i:03}.png")), 640, 480, (i * 10) as u8);
        }
    }

    #[test]
    fn relevant_files_sort_by_trailing_number() {
        let tmp = TempDir::new().unwrap();
        for name in ["page-010.png", "page-002.png", "page-001.png"] {
            write_png(&tmp.path().join(name), 8, 8, 0);
        }
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();
        let files = GalleryGenerator::relevant_files(tmp.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["page-001.png", "page-002.png", "page-010.png"]);
    }

    #[test]
    fn relevant_files_fall_back_to_any_digit_run() {
        let tmp = TempDir::new().unwrap();
        write_png(&tmp.path().join("ch2-cover.png"), 8, 8, 0);
        write_png(&tmp.path().join("ch10-cover.png"), 8, 8, 0);
        let files = GalleryGenerator::relevant_files(tmp.path()).unwrap();
        assert_eq!(files[0].file_name().unwrap(), "ch2-cover.png");
        assert_eq!(files[1].file_name().unwrap(), "ch10-cover.png");
    }

    #[test]
    fn relevant_files_require_digits() {
        let tmp = TempDir::new().unwrap();
        write_png(&tmp.path().join("cover.png"), 8, 8, 0);
        let err = GalleryGenerator::relevant_files(tmp.path()).unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }

    #[test]
    fn full_run_produces_complete_entry() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("comic");
        make_gallery(&source, 8);
        let dest = tmp.path().join("cache/comic");
        let config = GalleryConfig::default();
        let encoder = MockEncoder::default();

        let mut generator =
            GalleryGenerator::new(&source, &dest, &config, &encoder).unwrap();
        super::super::run(&mut generator).unwrap();

        for name in ["is-cache", "meta.json", "preview.webp", "animated.webp", "gallery.type"] {
            assert!(dest.join(name).is_file(), "{name}");
        }
        for i in 1..=8 {
            assert!(dest.join(format!("previews/{i}.webp")).is_file());
        }
        assert!(!dest.join(SCRATCH_DIR).exists(), "scratch must be cleaned");

        let record: MetaRecord = read_json(&dest.join("meta.json")).unwrap();
        let MetaRecord::Gallery(meta) = record else {
            panic!("expected gallery meta");
        };
        assert_eq!(meta.images.len(), 8);
        assert_eq!(meta.images[0].filename, "page-001.png");
        assert_eq!(meta.images[0].ext, ".png");
        assert_eq!((meta.images[0].width, meta.images[0].height), (640, 480));
        assert!(!meta.images[0].is_animated);
    }

    #[test]
    fn previews_fit_within_max_dimensions() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("comic");
        fs::create_dir_all(&source).unwrap();
        write_png(&source.join("1.png"), 2048, 1024, 50);
        let dest = tmp.path().join("cache/comic");
        let config = GalleryConfig::default();
        let encoder = MockEncoder::default();

        let mut generator =
            GalleryGenerator::new(&source, &dest, &config, &encoder).unwrap();
        super::super::run(&mut generator).unwrap();

        let (w, h) = imaging::dimensions(&dest.join("previews/1.webp")).unwrap();
        assert!(w <= 512 && h <= 512);
        assert_eq!((w, h), (512, 256));
    }

    #[test]
    fn second_run_on_unchanged_source_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("comic");
        make_gallery(&source, 6);
        let dest = tmp.path().join("cache/comic");
        let config = GalleryConfig::default();
        let encoder = MockEncoder::default();

        let mut generator =
            GalleryGenerator::new(&source, &dest, &config, &encoder).unwrap();
        super::super::run(&mut generator).unwrap();
        let first_meta = fs::read(dest.join("meta.json")).unwrap();
        let first_index = fs::read_to_string(dest.join(crate::fileindex::INDEX_FILE_NAME)).unwrap();

        let mut generator =
            GalleryGenerator::new(&source, &dest, &config, &encoder).unwrap();
        super::super::run(&mut generator).unwrap();
        assert_eq!(fs::read(dest.join("meta.json")).unwrap(), first_meta);
        assert_eq!(
            fs::read_to_string(dest.join(crate::fileindex::INDEX_FILE_NAME)).unwrap(),
            first_index
        );
    }

    #[test]
    fn long_strip_is_sliced_into_scratch_frames() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("strip");
        fs::create_dir_all(&source).unwrap();
        // 9 near-square segments at 512x8192
        write_png(&source.join("1.png"), 512, 8192, 80);
        let dest = tmp.path().join("cache/strip");
        let config = GalleryConfig::default();
        let encoder = MockEncoder::default();

        let mut generator =
            GalleryGenerator::new(&source, &dest, &config, &encoder).unwrap();
        fs::create_dir_all(&dest).unwrap();
        let mut index = FileIndex::new(&dest);
        generator.generate_meta(&mut index).unwrap();
        generator.generate_previews(&mut index).unwrap();

        let frames = numbered_webp_files(&generator.scratch_dir()).unwrap();
        assert_eq!(frames.len(), 9);
        // one still per source image regardless of slicing
        assert!(dest.join("previews/1.webp").is_file());
        assert!(!dest.join("previews/2.webp").exists());
    }
}
