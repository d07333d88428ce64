//! Cache pipeline for video files.
//!
//! Entry layout:
//!
//! ```text
//! video.mp4/
//! ├─ preview.webp
//! ├─ animated.webp
//! ├─ previews/
//! │  ├─ 1.webp
//! │  ├─ 2.webp
//! ├─ storyboard.webp
//! ├─ storyboard.vtt
//! ├─ chapters.vtt
//! ├─ subtitles.eng.vtt
//! ├─ meta.json
//! ├─ video.type
//! ├─ is-cache
//! ├─ file-index.txt
//! ```
//!
//! One scene per chapter (offset past the boundary) or, for chapterless
//! files, a duration-scaled number of evenly spaced scenes. Each scene is
//! a burst of frames for the animated preview; its first frame is the
//! scene's still thumbnail.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, warn};

use crate::classify::guess_mime;
use crate::config::VideoConfig;
use crate::encoder::{Encoder, Scale};
use crate::fileindex::FileIndex;
use crate::imaging;
use crate::meta::{
    AudioStreamMeta, ChapterMeta, MetaRecord, SubtitleStreamMeta, VideoMeta, VideoStreamMeta,
};
use crate::probe::{MediaProbe, Prober};
use crate::vtt;

use super::gallery::numbered_webp_files;
use super::{Generator, GeneratorError, discard_scratch, reset_scratch};

const FRAMES_SCRATCH: &str = ".frames";
const TILES_SCRATCH: &str = ".tiles";

/// A still picked as cover must have at least one channel with a pixel
/// stddev above this, so flat black intro frames are skipped.
const COVER_STDDEV_THRESHOLD: f64 = 40.0;

/// Storyboard sheets are this many cells wide.
const STORYBOARD_COLUMNS: u32 = 10;

/// Subtitle codecs stored as images; extraction is not supported.
const IMAGE_SUBTITLE_CODECS: &[&str] =
    &["dvb_subtitle", "dvd_subtitle", "hdmv_pgs_subtitle", "xsub"];

/// Text subtitle codecs the encoder can remux to WebVTT.
const TEXT_SUBTITLE_CODECS: &[&str] = &[
    "ass", "jacosub", "microdvd", "mov_text", "mpl2", "pjs", "realtext", "sami", "srt", "ssa",
    "stl", "subrip", "subviewer", "subviewer1", "text", "vplayer", "webvtt",
];

#[derive(Debug, Clone, Copy)]
struct MainStreamStats {
    width: u32,
    height: u32,
    duration: f64,
    fps: f64,
    nb_frames: u64,
}

pub struct VideoGenerator<'a> {
    source: PathBuf,
    dest: PathBuf,
    config: &'a VideoConfig,
    prober: &'a dyn Prober,
    encoder: &'a dyn Encoder,
    probe: Option<(MediaProbe, MainStreamStats)>,
}

impl<'a> VideoGenerator<'a> {
    pub fn new(
        source: impl Into<PathBuf>,
        dest: impl Into<PathBuf>,
        config: &'a VideoConfig,
        prober: &'a dyn Prober,
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
            prober,
            encoder,
            probe: None,
        })
    }

    fn frames_scratch(&self) -> PathBuf {
        self.dest.join(FRAMES_SCRATCH)
    }

    fn tiles_scratch(&self) -> PathBuf {
        self.dest.join(TILES_SCRATCH)
    }

    fn previews_dir(&self) -> PathBuf {
        self.dest.join("previews")
    }

    /// Probe once, lazily, caching the result and the main-stream stats.
    fn probed(&mut self) -> Result<(MediaProbe, MainStreamStats), GeneratorError> {
        if let Some(cached) = &self.probe {
            return Ok(cached.clone());
        }
        let probe = self.prober.probe(&self.source)?;
        let main = probe
            .main_video_stream()
            .ok_or_else(|| GeneratorError::NoVideoStream(self.source.clone()))?;
        let duration = main.duration_or(probe.format.duration);
        let stats = MainStreamStats {
            width: main.width,
            height: main.height,
            duration,
            fps: main.fps(),
            nb_frames: main.frame_count(duration),
        };
        self.probe = Some((probe.clone(), stats));
        Ok((probe, stats))
    }

    /// Scene count for a chapterless video of the given duration.
    pub fn scenes_for_duration(duration: f64) -> usize {
        const TABLE: &[(f64, usize)] = &[
            (9800.0, 36), // 3h
            (7200.0, 24), // 2h
            (4800.0, 18), // 1h30m
            (3600.0, 12), // 1h
            (2700.0, 9),  // 45m
            (1800.0, 6),  // 30m
            (600.0, 5),   // 10m
            (300.0, 4),   // 5m
            (180.0, 3),   // 3m
            (60.0, 2),    // 1m
        ];
        TABLE
            .iter()
            .find(|&&(boundary, _)| duration >= boundary)
            .map_or(1, |&(_, scenes)| scenes)
    }

    /// First frame index of every scene.
    fn main_frames(probe: &MediaProbe, stats: &MainStreamStats, scene_offset: f64) -> Vec<u64> {
        if !probe.chapters.is_empty() {
            return probe
                .chapters
                .iter()
                .map(|c| {
                    ((c.start_time * stats.fps) + (stats.fps * scene_offset)).round().max(0.0)
                        as u64
                })
                .collect();
        }
        let scenes = Self::scenes_for_duration(stats.duration);
        let every_n_seconds = stats.duration / scenes as f64;
        let start = stats.fps.round() as u64;
        let end = (stats.nb_frames as f64 - stats.fps).round().max(0.0) as u64;
        let step = ((every_n_seconds * stats.fps).round() as u64).max(1);
        (start..end).step_by(step as usize).collect()
    }

    /// Frame offsets of one scene burst, rate-converted from source fps.
    fn scene_offsets(&self, fps: f64) -> Vec<u64> {
        let burst = (self.config.scene_length * self.config.scene_fps as f64).round() as u64;
        (0..burst)
            .map(|i| ((fps / self.config.scene_fps as f64) * i as f64).round() as u64)
            .collect()
    }

    fn generate_storyboard(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
        if !self.config.thumbnails.enabled {
            return Ok(());
        }
        let (_, stats) = self.probed()?;
        let delay = self.config.thumbnails.delay;
        let (box_w, box_h) = self.config.thumbnails.cell_box();

        // fit the cell to the video aspect inside the configured box
        let aspect = stats.width as f64 / stats.height.max(1) as f64;
        let (cell_w, cell_h) = if box_w as f64 / box_h as f64 >= aspect {
            (((box_h as f64) * aspect).round() as u32, box_h)
        } else {
            (box_w, ((box_w as f64) / aspect).round() as u32)
        };
        debug!("storyboard cell {cell_w}x{cell_h}");

        let scratch = self.tiles_scratch();
        reset_scratch(&scratch)?;
        self.encoder
            .extract_tiles(&self.source, delay, cell_w, cell_h, &scratch)?;

        let tile_paths = numbered_webp_files(&scratch)?;
        let tiles = tile_paths
            .iter()
            .map(|p| imaging::load(p))
            .collect::<Result<Vec<_>, _>>()?;
        let sheet = imaging::compose_sheet(&tiles, STORYBOARD_COLUMNS, cell_w, cell_h);
        imaging::save_webp(&sheet, &index.add_file("storyboard.webp"))?;

        let cues: Vec<vtt::Cue> = tiles
            .iter()
            .enumerate()
            .map(|(i, tile)| {
                let x = (i as u32 % STORYBOARD_COLUMNS) * cell_w;
                let y = (i as u32 / STORYBOARD_COLUMNS) * cell_h;
                vtt::Cue {
                    start: i as f64 * delay,
                    end: (i + 1) as f64 * delay,
                    text: format!(
                        "storyboard.webp#xywh={x},{y},{},{}",
                        tile.width(),
                        tile.height()
                    ),
                }
            })
            .collect();
        fs::write(index.add_file("storyboard.vtt"), vtt::render(&cues))?;
        Ok(())
    }

    fn generate_chapters_vtt(&mut self, index: &mut FileIndex) {
        let Ok((probe, _)) = self.probed() else {
            return;
        };
        if probe.chapters.is_empty() {
            debug!("no chapters, skipping chapters.vtt");
            return;
        }
        let cues: Vec<vtt::Cue> = probe
            .chapters
            .iter()
            .map(|c| vtt::Cue {
                start: c.start_time,
                end: c.end_time,
                text: c.title.clone().unwrap_or_default(),
            })
            .collect();
        if let Err(e) = fs::write(index.add_file("chapters.vtt"), vtt::render(&cues)) {
            error!("failed to write chapters.vtt: {e}");
        }
    }

    fn generate_subtitles_vtt(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
        let subtitles = self.probed()?.0.subtitle_streams;
        for subtitle in &subtitles {
            let codec = subtitle.codec_name.as_str();
            let lang = subtitle.language.as_deref().unwrap_or("und");
            let name = format!("subtitles.{lang}.vtt");

            if IMAGE_SUBTITLE_CODECS.contains(&codec) {
                warn!("image-based subtitle extraction is not supported (#{}: {lang}, {codec})",
                    subtitle.index);
            } else if TEXT_SUBTITLE_CODECS.contains(&codec) {
                let dest = self.dest.join(&name);
                match self.encoder.remux_subtitles(&self.source, subtitle.index, &dest) {
                    Ok(()) => {
                        index.add_file(&name);
                    }
                    Err(e) => error!("failed to extract {name}: {e}"),
                }
            } else {
                error!("unsupported subtitle codec: {codec}");
            }
        }
        Ok(())
    }
}

impl Generator for VideoGenerator<'_> {
    fn source(&self) -> &Path {
        &self.source
    }

    fn dest(&self) -> &Path {
        &self.dest
    }

    fn type_marker(&self) -> &'static str {
        "video.type"
    }

    fn generate_meta(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
        let filesize = fs::metadata(&self.source)?.len();
        let mimetype = guess_mime(&self.source).unwrap_or("application/octet-stream");
        let (probe, stats) = self.probed()?;
        let n_previews = if probe.chapters.is_empty() {
            Self::scenes_for_duration(stats.duration)
        } else {
            probe.chapters.len()
        };

        let record = MetaRecord::Video(VideoMeta {
            filename: self
                .source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            mimetype: mimetype.to_string(),
            duration: stats.duration,
            width: stats.width,
            height: stats.height,
            filesize,
            n_previews,
            video_streams: probe
                .video_streams
                .iter()
                .map(|s| VideoStreamMeta {
                    is_default: s.is_default,
                    width: s.width,
                    height: s.height,
                    duration: s.duration_or(stats.duration),
                    avg_fps: s.fps(),
                })
                .collect(),
            audio_streams: probe
                .audio_streams
                .iter()
                .map(|s| AudioStreamMeta {
                    is_default: s.is_default,
                    language: s.language.clone().unwrap_or_else(|| "<unknown>".into()),
                })
                .collect(),
            subtitles: probe
                .subtitle_streams
                .iter()
                .map(|s| SubtitleStreamMeta {
                    is_default: s.is_default,
                    language: s.language.clone().unwrap_or_else(|| "<unknown>".into()),
                })
                .collect(),
            chapters: probe
                .chapters
                .iter()
                .map(|c| ChapterMeta {
                    id: c.id,
                    start_time: c.start_time,
                    end_time: c.end_time,
                    title: c.title.clone().unwrap_or_default(),
                })
                .collect(),
        });
        let body = serde_json::to_vec_pretty(&record)?;
        fs::write(index.add_file("meta.json"), body)?;
        Ok(())
    }

    fn generate_previews(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
        let (probe, stats) = self.probed()?;
        debug!("total frames: {}", stats.nb_frames);

        let main_frames = Self::main_frames(&probe, &stats, self.config.scene_offset);
        let offsets = self.scene_offsets(stats.fps);
        let extract: Vec<u64> = main_frames
            .iter()
            .flat_map(|&main| offsets.iter().map(move |&o| main + o))
            .collect();

        let (max_w, max_h) = self.config.max_dimensions();
        let scale = if stats.width > stats.height {
            Scale {
                width: max_w.min(stats.width) as i64,
                height: -2,
            }
        } else {
            Scale {
                width: -2,
                height: max_h.min(stats.height) as i64,
            }
        };

        let scratch = self.frames_scratch();
        reset_scratch(&scratch)?;
        self.encoder
            .extract_frames(&self.source, &extract, scale, &scratch)?;

        let actual = numbered_webp_files(&scratch)?.len();
        if actual != extract.len() {
            return Err(GeneratorError::FrameCount {
                expected: extract.len(),
                actual,
            });
        }

        // the first frame of each burst becomes a still thumbnail
        fs::create_dir_all(self.previews_dir())?;
        let burst = offsets.len().max(1);
        for (i, j) in (0..extract.len()).step_by(burst).enumerate() {
            let frame = scratch.join(format!("{}.webp", j + 1));
            fs::copy(frame, index.add_file(format!("previews/{}.webp", i + 1)))?;
        }
        Ok(())
    }

    fn generate_static_preview(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
        let stills = numbered_webp_files(&self.previews_dir())?;
        let mut cover = None;
        for still in &stills {
            let image = imaging::load(still)?;
            if imaging::max_channel_stddev(&image) > COVER_STDDEV_THRESHOLD {
                debug!("selecting {} as cover", still.display());
                cover = Some(still.clone());
                break;
            }
        }
        let cover = match cover {
            Some(path) => path,
            None => {
                debug!("no visually distinct still, falling back to the first");
                self.previews_dir().join("1.webp")
            }
        };
        if !cover.is_file() {
            return Err(GeneratorError::NotFound(cover.display().to_string()));
        }
        fs::copy(cover, index.add_file("preview.webp"))?;
        Ok(())
    }

    fn generate_animated_preview(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
        let scratch = self.frames_scratch();
        if numbered_webp_files(&scratch)?.is_empty() {
            return Err(GeneratorError::NotFound("no animated-preview frames".into()));
        }
        self.encoder.assemble_animation(
            &scratch,
            self.config.scene_fps as f64,
            None,
            &index.add_file("animated.webp"),
        )?;
        Ok(())
    }

    fn generate_extras(&mut self, index: &mut FileIndex) -> Result<(), GeneratorError> {
        self.generate_storyboard(index)?;
        self.generate_chapters_vtt(index);
        self.generate_subtitles_vtt(index)?;
        Ok(())
    }

    fn cleanup(&mut self) {
        discard_scratch(&self.frames_scratch());
        discard_scratch(&self.tiles_scratch());
    }
}
