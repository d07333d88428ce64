//! TOML configuration.
//!
//! Every field is defaulted, so a missing or partial `.glimpse.toml` is
//! valid. The struct is built once at startup and passed by reference into
//! the orchestrator and the generators.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config filename looked up in the source root when `--config` is absent.
pub const CONFIG_FILE_NAME: &str = ".glimpse.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gallery: GalleryConfig,
    pub video: VideoConfig,
    pub cache: CacheConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    /// Max preview width; falls back to `height`, then 512.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Max preview height; falls back to the resolved width.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Seconds each frame of the animated preview is shown.
    pub frame_time: f64,
    /// Max frames assembled into the animated preview.
    pub max_images: usize,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            frame_time: 1.0,
            max_images: 20,
        }
    }
}

impl GalleryConfig {
    pub fn max_dimensions(&self) -> (u32, u32) {
        resolve_dimensions(self.width, self.height, 512)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Length of each animated-preview scene, seconds.
    pub scene_length: f64,
    /// Frame rate of the animated preview.
    pub scene_fps: u32,
    /// Seconds skipped after a chapter boundary before a scene starts.
    pub scene_offset: f64,
    pub thumbnails: ThumbnailConfig,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            scene_length: 1.5,
            scene_fps: 8,
            scene_offset: 5.0,
            thumbnails: ThumbnailConfig::default(),
        }
    }
}

impl VideoConfig {
    pub fn max_dimensions(&self) -> (u32, u32) {
        resolve_dimensions(self.width, self.height, 512)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub enabled: bool,
    /// Seconds between storyboard thumbnails.
    pub delay: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: 15.0,
            width: None,
            height: None,
        }
    }
}

impl ThumbnailConfig {
    /// Bounding box a storyboard cell is fitted into. When only one side is
    /// configured the other is left effectively unbounded.
    pub fn cell_box(&self) -> (u32, u32) {
        match (self.width, self.height) {
            (None, None) => (320, 320),
            (Some(w), None) => (w, w * 10),
            (None, Some(h)) => (h * 10, h),
            (Some(w), Some(h)) => (w, h),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Gitignore-like patterns excluding source entries from scanning.
    pub ignore: Vec<String>,
    /// Seconds between scheduled iterations of the run loop.
    pub scan_interval: Option<u64>,
}

impl CacheConfig {
    pub fn scan_interval_secs(&self) -> u64 {
        self.scan_interval.unwrap_or(3600)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Override for the encoder executable; otherwise looked up on PATH.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg: Option<PathBuf>,
    /// Override for the probe executable; otherwise looked up on PATH.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffprobe: Option<PathBuf>,
}

fn resolve_dimensions(width: Option<u32>, height: Option<u32>, fallback: u32) -> (u32, u32) {
    let w = width.or(height).unwrap_or(fallback);
    let h = height.unwrap_or(w);
    (w, h)
}

impl Config {
    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_str(&fs::read_to_string(path)?)
    }

    /// Load `path` if given, else the source root's config file if present,
    /// else the defaults.
    pub fn resolve(path: Option<&Path>, source_root: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let implicit = source_root.join(CONFIG_FILE_NAME);
        if implicit.is_file() {
            return Self::load(&implicit);
        }
        Ok(Self::default())
    }

    /// Render the current (or default) settings as a TOML document.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_config_is_all_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.gallery.max_dimensions(), (512, 512));
        assert_eq!(config.video.max_dimensions(), (512, 512));
        assert_eq!(config.gallery.frame_time, 1.0);
        assert_eq!(config.gallery.max_images, 20);
        assert_eq!(config.video.scene_length, 1.5);
        assert_eq!(config.video.scene_fps, 8);
        assert_eq!(config.video.scene_offset, 5.0);
        assert!(config.video.thumbnails.enabled);
        assert_eq!(config.video.thumbnails.delay, 15.0);
        assert_eq!(config.video.thumbnails.cell_box(), (320, 320));
        assert_eq!(config.cache.scan_interval_secs(), 3600);
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let config = Config::from_str(
            r#"
            [video]
            scene_fps = 12

            [video.thumbnails]
            enabled = false

            [cache]
            ignore = ["trash", "*.part"]
            "#,
        )
        .unwrap();
        assert_eq!(config.video.scene_fps, 12);
        assert!(!config.video.thumbnails.enabled);
        assert_eq!(config.video.scene_length, 1.5);
        assert_eq!(config.cache.ignore, vec!["trash", "*.part"]);
    }

    #[test]
    fn single_dimension_defaults_the_other() {
        let config = Config::from_str("[gallery]\nwidth = 640\n").unwrap();
        assert_eq!(config.gallery.max_dimensions(), (640, 640));
        let config = Config::from_str("[video]\nheight = 256\n").unwrap();
        assert_eq!(config.video.max_dimensions(), (256, 256));
    }

    #[test]
    fn thumbnail_cell_box_unbounds_missing_side() {
        let config = Config::from_str("[video.thumbnails]\nwidth = 160\n").unwrap();
        assert_eq!(config.video.thumbnails.cell_box(), (160, 1600));
    }

    #[test]
    fn resolve_prefers_explicit_then_implicit() {
        let tmp = TempDir::new().unwrap();
        let explicit = tmp.path().join("custom.toml");
        fs::write(&explicit, "[gallery]\nmax_images = 5\n").unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            "[gallery]\nmax_images = 7\n",
        )
        .unwrap();

        let config = Config::resolve(Some(&explicit), tmp.path()).unwrap();
        assert_eq!(config.gallery.max_images, 5);
        let config = Config::resolve(None, tmp.path()).unwrap();
        assert_eq!(config.gallery.max_images, 7);
    }

    #[test]
    fn resolve_without_any_file_is_default() {
        let tmp = TempDir::new().unwrap();
        let config = Config::resolve(None, tmp.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn defaults_render_as_valid_toml() {
        let text = Config::default().to_toml().unwrap();
        let back = Config::from_str(&text).unwrap();
        assert_eq!(back, Config::default());
    }
}
