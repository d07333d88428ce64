//! # Glimpse
//!
//! A preview-cache generator for media directory trees. Point it at a
//! directory of videos and image galleries and it maintains a shadow cache
//! (`.glimpse/`) of thumbnails, animated previews, storyboards and metadata
//! next to the originals — without ever touching them.
//!
//! # Architecture: Invalidate → Collect → Generate
//!
//! One cache iteration runs three phases over the tree:
//!
//! ```text
//! 1. Invalidate  .glimpse/cache/  →  stale entries removed
//! 2. Collect     source tree      →  jobs (galleries + videos, sorted)
//! 3. Generate    jobs             →  cache entries + media.json/problems.json
//! ```
//!
//! Each job is generated in isolation: a corrupt video becomes one record in
//! `problems.json` while the rest of the tree caches normally. Every file a
//! generator writes is registered in the entry's `file-index.txt`, which is
//! the only authority for later deletion — regeneration and invalidation
//! never remove a file the cache did not itself create.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`cache`] | Orchestrator — invalidation, job collection, manifests, lock, run loop |
//! | [`classify`] | Source classification: video files and image-gallery directories |
//! | [`generator`] | Per-entry pipeline driver plus the gallery and video generators |
//! | [`probe`] | `ffprobe` wrapper — stream, chapter and duration inspection |
//! | [`encoder`] | `ffmpeg` wrapper — frame extraction, tiling, remuxing, animation |
//! | [`imaging`] | In-process image operations: fit, crop, slice, WebP encoding |
//! | [`fileindex`] | Per-entry manifest of generated files; index-driven deletion |
//! | [`stale`] | Staleness oracle comparing source and cache-entry mtimes |
//! | [`ignore`] | Gitignore-like exclusion rules for the source scan |
//! | [`meta`] | Serialized record types and atomic JSON persistence |
//! | [`vtt`] | WebVTT rendering for chapters, storyboards and subtitles |
//! | [`config`] | `.glimpse.toml` loading with full defaults |
//! | [`lock`] | Filesystem lock keeping concurrent runs off the same tree |
//!
//! # Design Decisions
//!
//! ## External ffmpeg, In-Process Stills
//!
//! Frame extraction, storyboard tiling, subtitle remuxing and animated-WebP
//! assembly shell out to `ffmpeg`/`ffprobe`; everything operating on
//! individual stills (resizing, long-strip slicing, sheet composition, cover
//! selection) uses the `image` crate in-process. Both tools sit behind
//! traits ([`probe::Prober`], [`encoder::Encoder`]) so the whole pipeline is
//! testable with mocks and no installed tools.
//!
//! ## The File Index
//!
//! Cache entries live inside the user's media tree, so deletion must be
//! conservative. Each entry's `file-index.txt` lists exactly the files the
//! generator created; removal walks that list and then drops only the
//! directories it emptied. A user file dropped into a cache entry survives
//! regeneration and invalidation.
//!
//! ## Wholesale Manifest Rewrites
//!
//! `media.json` and `problems.json` are rewritten completely via
//! write-then-rename after every generated entry. A reader polling the
//! manifests never sees a truncated document, and a crash mid-run leaves
//! them consistent with whatever finished.

pub mod cache;
pub mod classify;
pub mod config;
pub mod encoder;
pub mod fileindex;
pub mod generator;
pub mod ignore;
pub mod imaging;
pub mod lock;
pub mod meta;
pub mod probe;
pub mod stale;
pub mod vtt;
