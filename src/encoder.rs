//! Frame-extraction and encoding boundary.
//!
//! [`Encoder`] is the seam in front of the external encoder tool. The
//! production implementation, [`FfmpegEncoder`], builds one argument list
//! per operation and treats any non-zero exit as a failure of the current
//! item. Frame-accurate extraction selects exact frame indices in a single
//! invocation; callers verify the produced file count afterwards.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("encoder tool not found: {0}")]
    ToolMissing(#[from] which::Error),
    #[error("failed to run encoder tool: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("encoder tool failed ({status}): {stderr}")]
    Exit { status: String, stderr: String },
}

/// Output scale for frame extraction. One side may be `-2`, letting the
/// encoder derive it from the aspect ratio rounded to an even number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    pub width: i64,
    pub height: i64,
}

impl Scale {
    fn as_filter(self) -> String {
        format!("scale={}:{}", self.width, self.height)
    }
}

pub trait Encoder {
    /// Extract the frames with the given indices from `source` into
    /// `dest_dir` as lossless stills named `1.webp`, `2.webp`, ….
    fn extract_frames(
        &self,
        source: &Path,
        frames: &[u64],
        scale: Scale,
        dest_dir: &Path,
    ) -> Result<(), EncoderError>;

    /// Extract one `width`×`height` tile every `interval` seconds into
    /// `dest_dir`, numbered from 1.
    fn extract_tiles(
        &self,
        source: &Path,
        interval: f64,
        width: u32,
        height: u32,
        dest_dir: &Path,
    ) -> Result<(), EncoderError>;

    /// Remux one embedded subtitle stream to a WebVTT file.
    fn remux_subtitles(
        &self,
        source: &Path,
        stream_index: u32,
        dest: &Path,
    ) -> Result<(), EncoderError>;

    /// Assemble the numbered stills in `frames_dir` into a looping animated
    /// WebP at `fps`, optionally rescaled to a common size first.
    fn assemble_animation(
        &self,
        frames_dir: &Path,
        fps: f64,
        scale: Option<(u32, u32)>,
        dest: &Path,
    ) -> Result<(), EncoderError>;
}

/// An encoder backed by the `ffmpeg` CLI.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Locate `ffmpeg` on `PATH`.
    pub fn discover() -> Result<Self, EncoderError> {
        Ok(Self {
            program: which::which("ffmpeg")?,
        })
    }

    fn run(&self, args: Vec<OsString>) -> Result<(), EncoderError> {
        debug!("running {} with {} args", self.program.display(), args.len());
        let output = Command::new(&self.program)
            .args(["-v", "error", "-hide_banner"])
            .args(args)
            .output()?;
        if !output.status.success() {
            return Err(EncoderError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

impl Encoder for FfmpegEncoder {
    fn extract_frames(
        &self,
        source: &Path,
        frames: &[u64],
        scale: Scale,
        dest_dir: &Path,
    ) -> Result<(), EncoderError> {
        let select = frames
            .iter()
            .map(|f| format!("eq(n\\,{f})"))
            .collect::<Vec<_>>()
            .join("+");
        let filter = format!("select={},{}", select, scale.as_filter());
        let args: Vec<OsString> = vec![
            "-i".into(),
            source.into(),
            "-vf".into(),
            filter.into(),
            "-vframes".into(),
            frames.len().to_string().into(),
            "-vsync".into(),
            "0".into(),
            "-codec".into(),
            "libwebp".into(),
            "-lossless".into(),
            "1".into(),
            "-compression_level".into(),
            "0".into(),
            "-quality".into(),
            "0".into(),
            "-y".into(),
            dest_dir.join("%d.webp").into(),
        ];
        self.run(args)
    }

    fn extract_tiles(
        &self,
        source: &Path,
        interval: f64,
        width: u32,
        height: u32,
        dest_dir: &Path,
    ) -> Result<(), EncoderError> {
        let filter = format!("fps=1/{interval},scale={width}:{height}");
        let args: Vec<OsString> = vec![
            "-i".into(),
            source.into(),
            "-an".into(),
            "-sn".into(),
            "-vf".into(),
            filter.into(),
            "-codec".into(),
            "libwebp".into(),
            "-lossless".into(),
            "1".into(),
            "-compression_level".into(),
            "0".into(),
            "-quality".into(),
            "0".into(),
            "-y".into(),
            dest_dir.join("%d.webp").into(),
        ];
        self.run(args)
    }

    fn remux_subtitles(
        &self,
        source: &Path,
        stream_index: u32,
        dest: &Path,
    ) -> Result<(), EncoderError> {
        let args: Vec<OsString> = vec![
            "-i".into(),
            source.into(),
            "-map".into(),
            format!("0:{stream_index}").into(),
            "-y".into(),
            dest.into(),
        ];
        self.run(args)
    }

    fn assemble_animation(
        &self,
        frames_dir: &Path,
        fps: f64,
        scale: Option<(u32, u32)>,
        dest: &Path,
    ) -> Result<(), EncoderError> {
        let mut args: Vec<OsString> = vec![
            "-framerate".into(),
            fps.to_string().into(),
            "-i".into(),
            frames_dir.join("%d.webp").into(),
        ];
        if let Some((w, h)) = scale {
            args.push("-vf".into());
            args.push(format!("scale={w}:{h}:flags=lanczos").into());
        }
        for flag in ["-loop", "0", "-quality", "80", "-y"] {
            args.push(flag.into());
        }
        args.push(dest.into());
        self.run(args)
    }
}
