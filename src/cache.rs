//! Cache orchestration: invalidation, job collection, generation with
//! per-item failure isolation, aggregate manifests, the filesystem lock
//! and the periodic run loop.
//!
//! One run is `invalidate → collect → generate`. Stale or missing entries
//! are generated one at a time; every success rewrites `media.json` and
//! every failure rewrites `problems.json` immediately, so a crash mid-run
//! leaves the manifests consistent with whatever completed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use thiserror::Error;
use walkdir::WalkDir;

use crate::classify::{GALLERY_BOUNDARY, is_gallery, is_video_file};
use crate::config::Config;
use crate::encoder::{Encoder, EncoderError, FfmpegEncoder};
use crate::generator::{self, GalleryGenerator, GeneratorError, VideoGenerator};
use crate::ignore::IgnoreRules;
use crate::lock::{CacheLock, LockAttempt};
use crate::meta::{self, MediaEntry, MetaRecord, ProblemEntry};
use crate::probe::{FfprobeProber, ProbeError, Prober};
use crate::stale;

/// Shadow directory created inside the source root.
pub const APP_DIR: &str = ".glimpse";
const CACHE_DIR: &str = "cache";
const MEDIA_FILE: &str = "media.json";
const PROBLEMS_FILE: &str = "problems.json";
const LOCK_FILE: &str = "lock";

/// Consecutive failing iterations tolerated before the run loop gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("giving up after {failures} consecutive failed iterations")]
    RunLoop { failures: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Gallery,
    Video,
}

/// One source entry scheduled for (re)generation checks.
#[derive(Debug, Clone)]
pub struct Job {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub kind: JobKind,
}

pub struct Cache<'a> {
    root: PathBuf,
    config: &'a Config,
    ignore: IgnoreRules,
    prober: Box<dyn Prober>,
    encoder: Box<dyn Encoder>,
}

impl<'a> Cache<'a> {
    /// Build a cache over `root`, locating the external tools on PATH
    /// unless the config overrides their paths.
    pub fn new(root: impl Into<PathBuf>, config: &'a Config) -> Result<Self, CacheError> {
        let prober: Box<dyn Prober> = match &config.tools.ffprobe {
            Some(path) => Box::new(FfprobeProber::new(path)),
            None => Box::new(FfprobeProber::discover()?),
        };
        let encoder: Box<dyn Encoder> = match &config.tools.ffmpeg {
            Some(path) => Box::new(FfmpegEncoder::new(path)),
            None => Box::new(FfmpegEncoder::discover()?),
        };
        Ok(Self::with_tools(root, config, prober, encoder))
    }

    /// Build a cache with injected tool implementations.
    pub fn with_tools(
        root: impl Into<PathBuf>,
        config: &'a Config,
        prober: Box<dyn Prober>,
        encoder: Box<dyn Encoder>,
    ) -> Self {
        Self {
            root: root.into(),
            ignore: IgnoreRules::new(&config.cache.ignore),
            config,
            prober,
            encoder,
        }
    }

    pub fn app_dir(&self) -> PathBuf {
        self.root.join(APP_DIR)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.app_dir().join(CACHE_DIR)
    }

    /// Walk the cache tree bottom-up, dropping leftover empty directories
    /// and entries whose source vanished, went stale, or never completed.
    /// Directories without the cache marker are foreign and left alone.
    pub fn invalidate(&self) -> Result<(), CacheError> {
        info!("invalidating stale cache entries");
        let cache_dir = self.cache_dir();
        if !cache_dir.is_dir() {
            return Ok(());
        }
        for entry in WalkDir::new(&cache_dir).contents_first(true) {
            let entry = entry?;
            let dest = entry.path();
            if !entry.file_type().is_dir() || dest == cache_dir {
                continue;
            }
            if stale::is_cache_entry(dest) {
                let source = match dest.strip_prefix(&cache_dir) {
                    Ok(rel) => self.root.join(rel),
                    Err(_) => continue,
                };
                let obsolete = match stale::is_deprecated(&source, dest) {
                    Ok(deprecated) => deprecated || stale::is_incomplete(dest),
                    // source vanished
                    Err(_) => true,
                };
                if obsolete {
                    info!("removing obsolete cache entry {}", dest.display());
                    generator::remove(dest)?;
                }
            } else if dir_is_empty(dest)? {
                fs::remove_dir(dest)?;
            }
        }
        Ok(())
    }

    /// Walk the source tree, prune ignored subtrees, classify the rest,
    /// and return jobs sorted case-insensitively by source path.
    pub fn find_jobs(&self) -> Result<Vec<Job>, CacheError> {
        info!("collecting generator jobs");
        let cache_dir = self.cache_dir();
        let mut jobs = Vec::new();
        let walker = WalkDir::new(&self.root).into_iter().filter_entry(|e| {
            e.depth() == 0
                || e.path()
                    .strip_prefix(&self.root)
                    .map(|rel| !self.ignore.ignored(rel))
                    .unwrap_or(true)
        });
        for entry in walker {
            let entry = entry?;
            if entry.depth() == 0 {
                continue;
            }
            let source = entry.path();
            let Ok(rel) = source.strip_prefix(&self.root) else {
                continue;
            };
            let kind = if entry.file_type().is_dir() && is_gallery(source, GALLERY_BOUNDARY) {
                JobKind::Gallery
            } else if is_video_file(source) {
                JobKind::Video
            } else {
                continue;
            };
            jobs.push(Job {
                source: source.to_path_buf(),
                dest: cache_dir.join(rel),
                kind,
            });
        }
        jobs.sort_by_key(|job| job.source.to_string_lossy().to_lowercase());
        Ok(jobs)
    }

    /// Generate every stale or missing entry, folding fresh ones straight
    /// into the media manifest.
    pub fn generate(&self) -> Result<(), CacheError> {
        let jobs = self.find_jobs()?;
        info!("{} source entries found", jobs.len());
        let mut media: Vec<MediaEntry> = Vec::new();
        let mut problems: Vec<ProblemEntry> = Vec::new();

        for job in &jobs {
            let fresh = !stale::is_incomplete(&job.dest)
                && !stale::is_deprecated(&job.source, &job.dest).unwrap_or(true);
            if fresh {
                // a fresh entry whose records turn out unreadable is
                // treated as stale instead
                if let Ok(entry) = self.media_entry(job) {
                    media.push(entry);
                    continue;
                }
            }

            info!("generating {}", job.source.display());
            match self.run_generator(job) {
                Ok(()) => {
                    media.push(self.media_entry(job)?);
                    meta::write_json_atomic(&self.app_dir().join(MEDIA_FILE), &media)?;
                }
                Err(err) => {
                    error!("generation failed for {}: {err}", job.source.display());
                    problems.push(ProblemEntry {
                        path: self.relative_path(&job.source),
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                        trace: err.trace(),
                    });
                    meta::write_json_atomic(&self.app_dir().join(PROBLEMS_FILE), &problems)?;
                }
            }
        }

        meta::write_json_atomic(&self.app_dir().join(MEDIA_FILE), &media)?;
        meta::write_json_atomic(&self.app_dir().join(PROBLEMS_FILE), &problems)?;
        Ok(())
    }

    fn run_generator(&self, job: &Job) -> Result<(), GeneratorError> {
        match job.kind {
            JobKind::Gallery => {
                let mut generator = GalleryGenerator::new(
                    &job.source,
                    &job.dest,
                    &self.config.gallery,
                    &*self.encoder,
                )?;
                generator::run(&mut generator)
            }
            JobKind::Video => {
                let mut generator = VideoGenerator::new(
                    &job.source,
                    &job.dest,
                    &self.config.video,
                    &*self.prober,
                    &*self.encoder,
                )?;
                generator::run(&mut generator)
            }
        }
    }

    fn media_entry(&self, job: &Job) -> io::Result<MediaEntry> {
        let record: MetaRecord = meta::read_json(&job.dest.join("meta.json"))?;
        let name = match job.kind {
            JobKind::Gallery => job.source.file_name(),
            JobKind::Video => job.source.file_stem(),
        };
        let ext = match job.kind {
            JobKind::Gallery => String::new(),
            JobKind::Video => job
                .source
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default(),
        };
        Ok(MediaEntry {
            path: self.relative_path(&job.source),
            name: name.map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            ext,
            created: meta::unix_secs(stale::source_created(&job.source)?),
            modified: meta::unix_secs(stale::source_mtime(&job.source)?),
            meta: record,
        })
    }

    /// Source path relative to the tree root, `/`-separated.
    fn relative_path(&self, source: &Path) -> String {
        source
            .strip_prefix(&self.root)
            .unwrap_or(source)
            .iter()
            .map(|c| c.to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// One locked run: invalidate, then generate. Returns `false` when
    /// another run holds the lock (the iteration is skipped, not failed).
    pub fn iteration(&self) -> Result<bool, CacheError> {
        fs::create_dir_all(self.cache_dir())?;
        let guard = match CacheLock::acquire(&self.app_dir().join(LOCK_FILE))? {
            LockAttempt::Acquired(guard) => guard,
            LockAttempt::Held => {
                warn!("another run holds the cache lock, skipping this iteration");
                return Ok(false);
            }
        };
        self.invalidate()?;
        self.generate()?;
        drop(guard);
        Ok(true)
    }

    /// Periodic scheduling of [`Cache::iteration`] until `shutdown` flips.
    /// A few consecutive failing ticks are tolerated; more mean something
    /// is fatally broken.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<(), CacheError> {
        let interval = Duration::from_secs(self.config.cache.scan_interval_secs());
        let mut failures = 0u32;
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested, stopping the run loop");
                return Ok(());
            }
            match self.iteration() {
                Ok(_) => failures = 0,
                Err(err) => {
                    failures += 1;
                    error!("scheduled iteration failed ({failures} in a row): {err}");
                    if failures > MAX_CONSECUTIVE_FAILURES {
                        return Err(CacheError::RunLoop { failures });
                    }
                }
            }
            let deadline = Instant::now() + interval;
            while Instant::now() < deadline {
                if shutdown.load(Ordering::Relaxed) {
                    info!("shutdown requested, stopping the run loop");
                    return Ok(());
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                std::thread::sleep(remaining.min(Duration::from_secs(1)));
            }
        }
    }

    /// Delete the whole shadow directory. With `ignore_errors`, deletion
    /// failures are logged and swallowed.
    pub fn remove(&self, ignore_errors: bool) -> Result<(), CacheError> {
        let app_dir = self.app_dir();
        info!("removing {}", app_dir.display());
        match fs::remove_dir_all(&app_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) if ignore_errors => {
                warn!("ignoring removal failure: {e}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn dir_is_empty(dir: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::tests::MockEncoder;
    use crate::probe::tests::{MockProber, sample_probe};
    use image::{DynamicImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn make_gallery(dir: &Path, count: usize) {
        fs::create_dir_all(dir).unwrap();
        for i in 1..=count {
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                64,
                48,
                Rgba([(i * 20) as u8, 0, 0, 255]),
            ))
            .save(dir.join(format!("page-{i:02}.png")))
            .unwrap();
        }
    }

    fn mock_cache<'a>(root: &Path, config: &'a Config) -> Cache<'a> {
        Cache::with_tools(
            root,
            config,
            Box::new(MockProber::new(sample_probe(30.0, 640, 480))),
            Box::new(MockEncoder::default()),
        )
    }

    fn read_media(cache: &Cache) -> Vec<MediaEntry> {
        meta::read_json(&cache.app_dir().join(MEDIA_FILE)).unwrap()
    }

    fn read_problems(cache: &Cache) -> Vec<ProblemEntry> {
        meta::read_json(&cache.app_dir().join(PROBLEMS_FILE)).unwrap()
    }

    #[test]
    fn iteration_caches_gallery_and_video() {
        let tmp = TempDir::new().unwrap();
        make_gallery(&tmp.path().join("comic"), 8);
        fs::write(tmp.path().join("clip.mp4"), "x").unwrap();
        let config = Config::default();
        let cache = mock_cache(tmp.path(), &config);

        assert!(cache.iteration().unwrap());

        let media = read_media(&cache);
        assert_eq!(media.len(), 2);
        assert_eq!(media[0].path, "clip.mp4");
        assert_eq!(media[0].name, "clip");
        assert_eq!(media[0].ext, ".mp4");
        assert_eq!(media[1].path, "comic");
        assert_eq!(media[1].ext, "");
        assert!(read_problems(&cache).is_empty());

        for rel in ["clip.mp4", "comic"] {
            let dest = cache.cache_dir().join(rel);
            for name in ["is-cache", "meta.json", "preview.webp", "animated.webp"] {
                assert!(dest.join(name).is_file(), "{rel}/{name}");
            }
            assert!(!stale::is_incomplete(&dest));
        }
        assert!(cache.cache_dir().join("clip.mp4/video.type").is_file());
        assert!(cache.cache_dir().join("comic/gallery.type").is_file());
    }

    #[test]
    fn second_iteration_regenerates_nothing() {
        let tmp = TempDir::new().unwrap();
        make_gallery(&tmp.path().join("comic"), 6);
        fs::write(tmp.path().join("clip.mp4"), "x").unwrap();
        let config = Config::default();
        let cache = mock_cache(tmp.path(), &config);

        cache.iteration().unwrap();
        let mtime_of = |rel: &str| {
            fs::metadata(cache.cache_dir().join(rel).join("meta.json"))
                .unwrap()
                .modified()
                .unwrap()
        };
        let before = (mtime_of("comic"), mtime_of("clip.mp4"));

        cache.iteration().unwrap();
        assert_eq!((mtime_of("comic"), mtime_of("clip.mp4")), before);
        assert_eq!(read_media(&cache).len(), 2);
    }

    #[test]
    fn failing_item_is_isolated_into_problems() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("good.mp4"), "x").unwrap();
        fs::write(tmp.path().join("corrupt.mp4"), "x").unwrap();
        let config = Config::default();
        let mut prober = MockProber::new(sample_probe(30.0, 640, 480));
        prober.fail_substring = Some("corrupt".into());
        let cache = Cache::with_tools(
            tmp.path(),
            &config,
            Box::new(prober),
            Box::new(MockEncoder::default()),
        );

        cache.iteration().unwrap();

        let media = read_media(&cache);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].path, "good.mp4");

        let problems = read_problems(&cache);
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].path, "corrupt.mp4");
        assert_eq!(problems[0].kind, "probe");
        assert!(problems[0].trace.contains("moov atom"));

        assert!(!cache.cache_dir().join("corrupt.mp4").exists());
        assert!(cache.cache_dir().join("good.mp4/meta.json").is_file());
    }

    #[test]
    fn invalidate_removes_orphaned_entries_but_keeps_foreign_dirs() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("clip.mp4"), "x").unwrap();
        let config = Config::default();
        let cache = mock_cache(tmp.path(), &config);
        cache.iteration().unwrap();

        let foreign = cache.cache_dir().join("not-ours");
        fs::create_dir_all(&foreign).unwrap();
        fs::write(foreign.join("keep.txt"), "x").unwrap();

        fs::remove_file(tmp.path().join("clip.mp4")).unwrap();
        cache.invalidate().unwrap();

        assert!(!cache.cache_dir().join("clip.mp4").exists());
        assert!(foreign.join("keep.txt").is_file());
    }

    #[test]
    fn invalidate_drops_empty_leftover_directories() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default();
        let cache = mock_cache(tmp.path(), &config);
        let empty = cache.cache_dir().join("a/b");
        fs::create_dir_all(&empty).unwrap();

        cache.invalidate().unwrap();
        assert!(!cache.cache_dir().join("a").exists());
        assert!(cache.cache_dir().exists());
    }

    #[test]
    fn ignored_subtrees_produce_no_jobs() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("keep.mp4"), "x").unwrap();
        fs::create_dir_all(tmp.path().join("trash")).unwrap();
        fs::write(tmp.path().join("trash/drop.mp4"), "x").unwrap();
        fs::create_dir_all(tmp.path().join(".hidden")).unwrap();
        fs::write(tmp.path().join(".hidden/secret.mp4"), "x").unwrap();

        let config = Config::from_str("[cache]\nignore = [\"trash\"]\n").unwrap();
        let cache = mock_cache(tmp.path(), &config);
        let jobs = cache.find_jobs().unwrap();
        let paths: Vec<_> = jobs.iter().map(|j| cache.relative_path(&j.source)).collect();
        assert_eq!(paths, ["keep.mp4"]);
    }

    #[test]
    fn jobs_sort_case_insensitively() {
        let tmp = TempDir::new().unwrap();
        for name in ["Bravo.mp4", "alpha.mp4", "Charlie.mp4"] {
            fs::write(tmp.path().join(name), "x").unwrap();
        }
        let config = Config::default();
        let cache = mock_cache(tmp.path(), &config);
        let jobs = cache.find_jobs().unwrap();
        let names: Vec<_> = jobs.iter().map(|j| cache.relative_path(&j.source)).collect();
        assert_eq!(names, ["alpha.mp4", "Bravo.mp4", "Charlie.mp4"]);
    }

    #[test]
    fn held_lock_skips_the_iteration() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("clip.mp4"), "x").unwrap();
        let config = Config::default();
        let cache = mock_cache(tmp.path(), &config);

        fs::create_dir_all(cache.app_dir()).unwrap();
        fs::write(cache.app_dir().join(LOCK_FILE), "12345").unwrap();

        assert!(!cache.iteration().unwrap());
        assert!(!cache.app_dir().join(MEDIA_FILE).exists());
        // the foreign lock is left in place
        assert!(cache.app_dir().join(LOCK_FILE).is_file());
    }

    #[test]
    fn remove_deletes_the_shadow_directory() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("clip.mp4"), "x").unwrap();
        let config = Config::default();
        let cache = mock_cache(tmp.path(), &config);
        cache.iteration().unwrap();
        assert!(cache.app_dir().is_dir());

        cache.remove(false).unwrap();
        assert!(!cache.app_dir().exists());
        // removing an absent cache is fine
        cache.remove(false).unwrap();
    }

    #[test]
    fn run_returns_immediately_when_shutdown_is_set() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default();
        let cache = mock_cache(tmp.path(), &config);
        let shutdown = AtomicBool::new(true);
        cache.run(&shutdown).unwrap();
    }
}
