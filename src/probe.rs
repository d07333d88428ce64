//! Media probing boundary.
//!
//! [`Prober`] is the seam between the generators and the external probe
//! tool; [`FfprobeProber`] shells out to
//! `ffprobe -v error -print_format json -show_format -show_streams
//! -show_chapters` and maps the JSON into the typed [`MediaProbe`] model.
//! The rest of the crate depends only on that model, never on the tool's
//! CLI surface.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe tool not found: {0}")]
    ToolMissing(#[from] which::Error),
    #[error("failed to run probe tool: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("probe tool failed ({status}): {stderr}")]
    Exit { status: String, stderr: String },
    #[error("probe output is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Exact frame rate as reported by the probe tool (`"30000/1001"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const ZERO: Self = Self { num: 0, den: 1 };

    /// Parse `num/den` or a plain number; `0/0` parses to zero.
    pub fn parse(text: &str) -> Option<Self> {
        match text.split_once('/') {
            Some((num, den)) => {
                let num = num.trim().parse().ok()?;
                let den = den.trim().parse().ok()?;
                Some(Self { num, den })
            }
            None => {
                let num = text.trim().parse().ok()?;
                Some(Self { num, den: 1 })
            }
        }
    }

    pub fn is_zero(self) -> bool {
        self.num == 0 || self.den == 0
    }

    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaProbe {
    pub format: FormatInfo,
    pub video_streams: Vec<VideoStream>,
    pub audio_streams: Vec<AudioStream>,
    pub subtitle_streams: Vec<SubtitleStream>,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormatInfo {
    pub duration: f64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoStream {
    pub index: u32,
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    pub duration: Option<f64>,
    pub nb_frames: Option<u64>,
    pub avg_frame_rate: Rational,
    pub r_frame_rate: Rational,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioStream {
    pub index: u32,
    pub is_default: bool,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleStream {
    pub index: u32,
    pub codec_name: String,
    pub is_default: bool,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub id: i64,
    pub start_time: f64,
    pub end_time: f64,
    pub title: Option<String>,
}

impl MediaProbe {
    /// The stream flagged default, or else the first video stream.
    pub fn main_video_stream(&self) -> Option<&VideoStream> {
        self.video_streams
            .iter()
            .find(|s| s.is_default)
            .or_else(|| self.video_streams.first())
    }
}

impl VideoStream {
    /// Effective frame rate: average rate when the probe reports one,
    /// otherwise the raw rate.
    pub fn fps(&self) -> f64 {
        if self.avg_frame_rate.is_zero() {
            self.r_frame_rate.as_f64()
        } else {
            self.avg_frame_rate.as_f64()
        }
    }

    pub fn duration_or(&self, fallback: f64) -> f64 {
        self.duration.unwrap_or(fallback)
    }

    /// Frame count, derived from duration when the container omits it.
    pub fn frame_count(&self, duration: f64) -> u64 {
        self.nb_frames
            .unwrap_or_else(|| (duration * self.fps()).round() as u64)
    }
}

pub trait Prober {
    fn probe(&self, path: &Path) -> Result<MediaProbe, ProbeError>;
}

/// A prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    program: PathBuf,
}

impl FfprobeProber {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Locate `ffprobe` on `PATH`.
    pub fn discover() -> Result<Self, ProbeError> {
        Ok(Self {
            program: which::which("ffprobe")?,
        })
    }
}

impl Prober for FfprobeProber {
    fn probe(&self, path: &Path) -> Result<MediaProbe, ProbeError> {
        let output = Command::new(&self.program)
            .args(["-v", "error", "-print_format", "json"])
            .args(["-show_format", "-show_streams", "-show_chapters"])
            .arg(path)
            .output()?;
        if !output.status.success() {
            return Err(ProbeError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let raw: RawProbe = serde_json::from_slice(&output.stdout)?;
        Ok(raw.into_model())
    }
}

// ---------------------------------------------------------------------------
// JSON structures (ffprobe emits most numbers as strings)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawProbe {
    #[serde(default)]
    streams: Vec<RawStream>,
    #[serde(default)]
    chapters: Vec<RawChapter>,
    format: RawFormat,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    nb_frames: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    disposition: RawDisposition,
    #[serde(default)]
    tags: RawTags,
}

#[derive(Debug, Default, Deserialize)]
struct RawDisposition {
    #[serde(default)]
    default: u8,
}

#[derive(Debug, Default, Deserialize)]
struct RawTags {
    language: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChapter {
    id: i64,
    start_time: Option<String>,
    end_time: Option<String>,
    #[serde(default)]
    tags: RawTags,
}

impl RawProbe {
    fn into_model(self) -> MediaProbe {
        let mut video_streams = Vec::new();
        let mut audio_streams = Vec::new();
        let mut subtitle_streams = Vec::new();

        for stream in self.streams {
            let is_default = stream.disposition.default == 1;
            match stream.codec_type.as_deref() {
                Some("video") => video_streams.push(VideoStream {
                    index: stream.index,
                    codec_name: stream.codec_name.unwrap_or_default(),
                    width: stream.width.unwrap_or(0),
                    height: stream.height.unwrap_or(0),
                    duration: parse_opt_f64(stream.duration),
                    nb_frames: stream.nb_frames.and_then(|s| s.parse().ok()),
                    avg_frame_rate: parse_rate(stream.avg_frame_rate),
                    r_frame_rate: parse_rate(stream.r_frame_rate),
                    is_default,
                }),
                Some("audio") => audio_streams.push(AudioStream {
                    index: stream.index,
                    is_default,
                    language: stream.tags.language,
                }),
                Some("subtitle") => subtitle_streams.push(SubtitleStream {
                    index: stream.index,
                    codec_name: stream.codec_name.unwrap_or_default(),
                    is_default,
                    language: stream.tags.language,
                }),
                _ => {}
            }
        }

        MediaProbe {
            format: FormatInfo {
                duration: parse_opt_f64(self.format.duration).unwrap_or(0.0),
                size: self
                    .format
                    .size
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
            },
            video_streams,
            audio_streams,
            subtitle_streams,
            chapters: self
                .chapters
                .into_iter()
                .map(|c| Chapter {
                    id: c.id,
                    start_time: parse_opt_f64(c.start_time).unwrap_or(0.0),
                    end_time: parse_opt_f64(c.end_time).unwrap_or(0.0),
                    title: c.tags.title,
                })
                .collect(),
        }
    }
}

fn parse_opt_f64(value: Option<String>) -> Option<f64> {
    value.and_then(|s| s.parse().ok())
}

fn parse_rate(value: Option<String>) -> Rational {
    value
        .as_deref()
        .and_then(Rational::parse)
        .unwrap_or(Rational::ZERO)
}
