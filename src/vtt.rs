//! Minimal WebVTT writer for storyboard and chapter caption files.

use std::fmt::Write as _;

/// One caption cue.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    /// Start of the cue, seconds.
    pub start: f64,
    /// End of the cue, seconds.
    pub end: f64,
    pub text: String,
}

/// Render cues as a WebVTT document.
pub fn render(cues: &[Cue]) -> String {
    let mut out = String::from("WEBVTT\n");
    for cue in cues {
        let _ = write!(
            out,
            "\n{} --> {}\n{}\n",
            timestamp(cue.start),
            timestamp(cue.end),
            cue.text
        );
    }
    out
}

/// `HH:MM:SS.mmm` with hours growing unbounded.
pub fn timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let s = total_secs % 60;
    let m = (total_secs / 60) % 60;
    let h = total_secs / 3600;
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}
