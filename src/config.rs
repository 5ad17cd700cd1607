//! Daemon configuration.
//!
//! Configuration is resolved once at startup and immutable afterwards.
//! Values come from three layers: command-line flags (which clap also feeds
//! from `FRAMECAST_*` environment variables), an optional JSON config file,
//! and built-in defaults. CLI wins over file, file wins over defaults.

use std::path::Path;

use anyhow::{anyhow, Result};
use serde::Deserialize;

pub const DEFAULT_FRAME_WIDTH: u32 = 1920;
pub const DEFAULT_FRAME_HEIGHT: u32 = 1280;
pub const DEFAULT_CAMERA_FPS: u32 = 10;
pub const DEFAULT_FILE_FPS: u32 = 100;
pub const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";

/// One layer of optional settings. Layers merge with `or`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub disable_auto_focus: Option<bool>,
    pub fps: Option<u32>,
    pub video_path: Option<String>,
    pub camera_device: Option<String>,
    pub show_debug_window: Option<bool>,
    pub pause_mode: Option<bool>,
    pub waiting_mode: Option<bool>,
    pub output_video_path: Option<String>,
    pub max_clip_duration_secs: Option<u32>,
    pub resize_image: Option<bool>,
}

impl ConfigOverrides {
    /// Read one layer from a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    }

    /// Merge, preferring `self`.
    pub fn or(self, fallback: Self) -> Self {
        Self {
            width: self.width.or(fallback.width),
            height: self.height.or(fallback.height),
            disable_auto_focus: self.disable_auto_focus.or(fallback.disable_auto_focus),
            fps: self.fps.or(fallback.fps),
            video_path: self.video_path.or(fallback.video_path),
            camera_device: self.camera_device.or(fallback.camera_device),
            show_debug_window: self.show_debug_window.or(fallback.show_debug_window),
            pause_mode: self.pause_mode.or(fallback.pause_mode),
            waiting_mode: self.waiting_mode.or(fallback.waiting_mode),
            output_video_path: self.output_video_path.or(fallback.output_video_path),
            max_clip_duration_secs: self
                .max_clip_duration_secs
                .or(fallback.max_clip_duration_secs),
            resize_image: self.resize_image.or(fallback.resize_image),
        }
    }
}

/// Resolved, validated daemon configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub width: u32,
    pub height: u32,
    pub disable_auto_focus: bool,
    /// Pacing rate; `None` picks the per-mode default.
    pub fps: Option<u32>,
    /// Source path or URI; empty selects camera mode.
    pub video_path: String,
    pub camera_device: String,
    pub show_debug_window: bool,
    pub pause_mode: bool,
    pub waiting_mode: bool,
    pub output_video_path: String,
    /// Recorded clip length in seconds; 0 means unlimited.
    pub max_clip_duration_secs: u32,
    pub resize_image: bool,
}

impl EngineConfig {
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self> {
        let cfg = Self {
            width: overrides.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            height: overrides.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            disable_auto_focus: overrides.disable_auto_focus.unwrap_or(false),
            fps: overrides.fps,
            video_path: overrides.video_path.unwrap_or_default(),
            camera_device: overrides
                .camera_device
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            show_debug_window: overrides.show_debug_window.unwrap_or(false),
            pause_mode: overrides.pause_mode.unwrap_or(false),
            waiting_mode: overrides.waiting_mode.unwrap_or(false),
            output_video_path: overrides.output_video_path.unwrap_or_default(),
            max_clip_duration_secs: overrides.max_clip_duration_secs.unwrap_or(0),
            resize_image: overrides.resize_image.unwrap_or(false),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn is_camera_mode(&self) -> bool {
        self.video_path.trim().is_empty()
    }

    /// Camera sources default to 10 fps, file sources to 100.
    pub fn effective_fps(&self) -> u32 {
        self.fps.unwrap_or(if self.is_camera_mode() {
            DEFAULT_CAMERA_FPS
        } else {
            DEFAULT_FILE_FPS
        })
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("frame width and height must be positive"));
        }
        if self.fps == Some(0) {
            return Err(anyhow!("fps must be positive when set"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_overrides_resolve_to_camera_defaults() {
        let cfg = EngineConfig::resolve(ConfigOverrides::default()).expect("resolve");
        assert!(cfg.is_camera_mode());
        assert_eq!(cfg.width, DEFAULT_FRAME_WIDTH);
        assert_eq!(cfg.height, DEFAULT_FRAME_HEIGHT);
        assert_eq!(cfg.effective_fps(), DEFAULT_CAMERA_FPS);
        assert_eq!(cfg.max_clip_duration_secs, 0);
    }

    #[test]
    fn file_mode_defaults_to_fast_playback() {
        let overrides = ConfigOverrides {
            video_path: Some("/videos/clip.mp4".to_string()),
            ..Default::default()
        };
        let cfg = EngineConfig::resolve(overrides).expect("resolve");
        assert!(!cfg.is_camera_mode());
        assert_eq!(cfg.effective_fps(), DEFAULT_FILE_FPS);
    }

    #[test]
    fn explicit_fps_wins_over_mode_default() {
        let overrides = ConfigOverrides {
            fps: Some(25),
            ..Default::default()
        };
        let cfg = EngineConfig::resolve(overrides).expect("resolve");
        assert_eq!(cfg.effective_fps(), 25);
    }

    #[test]
    fn zero_fps_is_rejected() {
        let overrides = ConfigOverrides {
            fps: Some(0),
            ..Default::default()
        };
        assert!(EngineConfig::resolve(overrides).is_err());
    }

    #[test]
    fn reads_overrides_from_a_json_file() {
        use std::io::Write as _;

        let mut file = tempfile::NamedTempFile::new().expect("temp config");
        file.write_all(
            br#"{
                "video_path": "/videos/clip.mp4",
                "fps": 24,
                "pause_mode": true,
                "max_clip_duration_secs": 30
            }"#,
        )
        .expect("write config");

        let overrides = ConfigOverrides::from_file(file.path()).expect("load");
        let cfg = EngineConfig::resolve(overrides).expect("resolve");
        assert_eq!(cfg.video_path, "/videos/clip.mp4");
        assert_eq!(cfg.effective_fps(), 24);
        assert!(cfg.pause_mode);
        assert_eq!(cfg.max_clip_duration_secs, 30);
    }

    #[test]
    fn rejects_malformed_config_files() {
        use std::io::Write as _;

        let mut file = tempfile::NamedTempFile::new().expect("temp config");
        file.write_all(b"not json").expect("write config");
        assert!(ConfigOverrides::from_file(file.path()).is_err());
    }

    #[test]
    fn layers_merge_cli_first() {
        let cli = ConfigOverrides {
            fps: Some(30),
            ..Default::default()
        };
        let file = ConfigOverrides {
            fps: Some(60),
            width: Some(640),
            ..Default::default()
        };
        let merged = cli.or(file);
        assert_eq!(merged.fps, Some(30));
        assert_eq!(merged.width, Some(640));
    }
}
