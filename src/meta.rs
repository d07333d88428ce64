//! Serialized record types shared between the generators and the
//! orchestrator, plus atomic JSON persistence.
//!
//! `meta.json` holds one [`MetaRecord`] per cache entry. The tree-wide
//! `media.json` and `problems.json` manifests hold arrays of [`MediaEntry`]
//! and [`ProblemEntry`]; both are rewritten wholesale through
//! [`write_json_atomic`] so a concurrent reader never observes a truncated
//! document.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Per-entry metadata, serialized as the entry's `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetaRecord {
    Gallery(GalleryMeta),
    Video(VideoMeta),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryMeta {
    pub images: Vec<GalleryImageMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryImageMeta {
    pub filename: String,
    pub ext: String,
    pub width: u32,
    pub height: u32,
    pub filesize: u64,
    pub is_animated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMeta {
    pub filename: String,
    pub mimetype: String,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub filesize: u64,
    pub n_previews: usize,
    pub video_streams: Vec<VideoStreamMeta>,
    pub audio_streams: Vec<AudioStreamMeta>,
    pub subtitles: Vec<SubtitleStreamMeta>,
    pub chapters: Vec<ChapterMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStreamMeta {
    pub is_default: bool,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    pub avg_fps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStreamMeta {
    pub is_default: bool,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleStreamMeta {
    pub is_default: bool,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterMeta {
    pub id: i64,
    pub start_time: f64,
    pub end_time: f64,
    pub title: String,
}

/// One successfully cached source entry, as listed in `media.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaEntry {
    /// Path relative to the source root, `/`-separated.
    pub path: String,
    /// Display name (file stem for videos, directory name for galleries).
    pub name: String,
    pub ext: String,
    /// Unix seconds, best-effort birth time.
    pub created: u64,
    /// Unix seconds, representative modification time.
    pub modified: u64,
    pub meta: MetaRecord,
}

/// One failed source entry, as listed in `problems.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemEntry {
    pub path: String,
    pub kind: String,
    pub message: String,
    pub trace: String,
}

pub fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

/// Serialize `value` as pretty JSON and persist it via write-then-rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let body = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
    let file = fs::File::open(path)?;
    serde_json::from_reader(io::BufReader::new(file)).map_err(io::Error::other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_gallery() -> MetaRecord {
        MetaRecord::Gallery(GalleryMeta {
            images: vec![GalleryImageMeta {
                filename: "page-001.jpg".into(),
                ext: ".jpg".into(),
                width: 800,
                height: 1200,
                filesize: 123456,
                is_animated: false,
            }],
        })
    }

    #[test]
    fn meta_record_is_type_tagged() {
        let json = serde_json::to_value(sample_gallery()).unwrap();
        assert_eq!(json["type"], "gallery");
        assert_eq!(json["images"][0]["filename"], "page-001.jpg");
    }

    #[test]
    fn meta_record_round_trips() {
        let record = sample_gallery();
        let text = serde_json::to_string(&record).unwrap();
        let back: MetaRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn atomic_write_then_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("media.json");
        let entries = vec![MediaEntry {
            path: "shows/pilot.mp4".into(),
            name: "pilot".into(),
            ext: ".mp4".into(),
            created: 1_700_000_000,
            modified: 1_700_000_100,
            meta: sample_gallery(),
        }];
        write_json_atomic(&path, &entries).unwrap();
        let back: Vec<MediaEntry> = read_json(&path).unwrap();
        assert_eq!(back, entries);
        assert!(!tmp.path().join("media.json.tmp").exists());
    }

    #[test]
    fn atomic_write_replaces_previous_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("problems.json");
        write_json_atomic(&path, &vec!["old"]).unwrap();
        let problems = vec![ProblemEntry {
            path: "broken.mp4".into(),
            kind: "frame-count".into(),
            message: "expected 12 frames, extracted 7".into(),
            trace: "frame-count: expected 12 frames, extracted 7".into(),
        }];
        write_json_atomic(&path, &problems).unwrap();
        let back: Vec<ProblemEntry> = read_json(&path).unwrap();
        assert_eq!(back, problems);
    }
}
