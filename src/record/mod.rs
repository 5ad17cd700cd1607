//! Rotating clip recording (camera sources only).
//!
//! The recorder sits on the pull-loop path: every emitted JPEG frame is
//! decoded back to pixels, resized to the recording resolution, and written
//! to the current clip. When a clip reaches the configured length the
//! recorder closes it, reports the finished file's path, and immediately
//! opens the next one - capture is continuous across the rotation boundary.
//!
//! The writer itself is an opaque capability behind `ClipWriter`; the
//! FFmpeg-backed implementation lives in `record::ffmpeg` (feature:
//! record-ffmpeg).

#[cfg(feature = "record-ffmpeg")]
pub mod ffmpeg;

use std::path::{Path, PathBuf};

use crate::control::{MessageSink, OutboundMessage};
use crate::error::EngineError;
use crate::frame::{decode_jpeg, resize_rgb, RawFrame};

/// Container codec code, selected by output file extension. The table is
/// closed and fixed; unknown extensions fall back to `mp4v`.
pub type FourCc = [u8; 4];

pub fn fourcc_for_extension(extension: &str) -> FourCc {
    match extension
        .trim_start_matches('.')
        .to_ascii_lowercase()
        .as_str()
    {
        "mp4" => *b"mjpg",
        "avi" => *b"divx",
        _ => *b"mp4v",
    }
}

/// Writes frames into one clip file at a time.
///
/// `open` and `write` failures are equivalent to the recorder: both kill
/// the current clip. Implementations are driven from the pull-loop thread
/// under the recorder lock and need no synchronization of their own.
pub trait ClipWriter: Send {
    fn open(
        &mut self,
        path: &Path,
        fourcc: FourCc,
        fps: u32,
        width: u32,
        height: u32,
    ) -> Result<(), EngineError>;

    fn is_open(&self) -> bool;

    fn write(&mut self, frame: &RawFrame) -> Result<(), EngineError>;

    /// Flush and close the current clip.
    fn close(&mut self) -> Result<(), EngineError>;
}

/// Recording configuration, fixed at engine construction.
#[derive(Clone, Debug)]
pub struct RecorderSettings {
    /// Configured output path; clips are written next to it with
    /// timestamped names. Empty disables `start_recording`.
    pub output_path: String,
    pub fps: u32,
    /// Clip length in seconds; 0 means unlimited (no rotation).
    pub max_clip_secs: u32,
    pub width: u32,
    pub height: u32,
}

pub struct Recorder {
    settings: RecorderSettings,
    writer: Box<dyn ClipWriter>,
    frames_written: u64,
    current_clip: Option<PathBuf>,
}

impl Recorder {
    pub fn new(settings: RecorderSettings, writer: Box<dyn ClipWriter>) -> Self {
        Self {
            settings,
            writer,
            frames_written: 0,
            current_clip: None,
        }
    }

    pub fn output_path(&self) -> &str {
        &self.settings.output_path
    }

    /// Point subsequent clips at a new configured path.
    pub fn set_output_path(&mut self, path: &str) {
        if !path.is_empty() {
            self.settings.output_path = path.to_string();
        }
    }

    pub fn is_recording(&self) -> bool {
        self.writer.is_open()
    }

    /// Open a new clip with a timestamp-derived name.
    pub fn start_recording(&mut self) -> Result<(), EngineError> {
        if self.settings.output_path.is_empty() {
            return Err(EngineError::RecordingWrite(
                "no output path configured".to_string(),
            ));
        }
        let path = timestamped_clip_path(Path::new(&self.settings.output_path));
        let fourcc = fourcc_for_extension(
            &path
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        self.writer.open(
            &path,
            fourcc,
            self.settings.fps,
            self.settings.width,
            self.settings.height,
        )?;
        self.frames_written = 0;
        self.current_clip = Some(path.clone());
        log::info!("recording to {}", path.display());
        Ok(())
    }

    /// Intercept one emitted frame. No-op while no clip is open.
    ///
    /// Rotation fires when `frames_written / fps` reaches the clip length;
    /// the boundary frame lands in the closing clip and the next clip opens
    /// before this call returns, so no frame is dropped.
    pub fn on_frame_captured(
        &mut self,
        jpeg: &[u8],
        sink: &dyn MessageSink,
    ) -> Result<(), EngineError> {
        if !self.writer.is_open() {
            return Ok(());
        }
        let raw = decode_jpeg(jpeg)?;
        let frame = resize_rgb(&raw, self.settings.width, self.settings.height)?;
        self.writer.write(&frame)?;

        if self.settings.max_clip_secs > 0 {
            self.frames_written += 1;
            let fps = u64::from(self.settings.fps.max(1));
            if self.frames_written / fps == u64::from(self.settings.max_clip_secs) {
                self.frames_written = 0;
                self.stop_recording(sink)?;
                self.start_recording()?;
            }
        }
        Ok(())
    }

    /// Close the open clip and report its path. Idempotent: a second stop
    /// with no open writer does nothing and reports nothing.
    pub fn stop_recording(&mut self, sink: &dyn MessageSink) -> Result<(), EngineError> {
        if !self.writer.is_open() {
            return Ok(());
        }
        self.writer.close()?;
        if let Some(path) = self.current_clip.take() {
            log::debug!("camera clip closed: {}", path.display());
            sink.send(OutboundMessage::CameraClipClosed(
                path.display().to_string(),
            ));
        }
        Ok(())
    }
}

/// `{stem}_{HHmmss-ddMMyyyy}{ext}`, alongside the configured path.
fn timestamped_clip_path(configured: &Path) -> PathBuf {
    let stem = configured
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = configured
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let stamp = chrono::Local::now().format("%H%M%S-%d%m%Y");
    let name = format!("{stem}_{stamp}{extension}");
    match configured.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_table_is_closed() {
        assert_eq!(fourcc_for_extension("mp4"), *b"mjpg");
        assert_eq!(fourcc_for_extension(".mp4"), *b"mjpg");
        assert_eq!(fourcc_for_extension("AVI"), *b"divx");
        assert_eq!(fourcc_for_extension("mkv"), *b"mp4v");
        assert_eq!(fourcc_for_extension(""), *b"mp4v");
    }

    #[test]
    fn clip_names_keep_stem_and_extension() {
        let path = timestamped_clip_path(Path::new("/var/clips/session.mp4"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("session_"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(path.parent().unwrap(), Path::new("/var/clips"));
        // HHmmss-ddMMyyyy is 15 characters.
        assert_eq!(name.len(), "session_".len() + 15 + ".mp4".len());
    }

    #[test]
    fn extensionless_output_gets_default_fourcc() {
        let path = timestamped_clip_path(Path::new("clips/raw"));
        assert!(path.to_string_lossy().starts_with("clips/raw_"));
        assert_eq!(fourcc_for_extension(""), *b"mp4v");
    }
}
