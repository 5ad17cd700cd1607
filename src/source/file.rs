//! Video file / blob URI source.
//!
//! Resolves a target string to a decodable input:
//! - `stub://<name>?frames=N` - synthetic clip with exactly N frames
//! - an existing local path     - opened directly (feature: source-ffmpeg)
//! - a well-formed URI          - resolved through the `BlobResolver`
//!                               collaborator, then opened
//!
//! File sources are seekable and report an exact frame count; the engine
//! uses both for stepping and slider seeks. An empty target is legal at
//! construction (waiting mode) but fails to open until a load request
//! supplies a real one.

use std::path::Path;
use std::sync::Arc;

use crate::blob::{is_valid_uri, BlobResolver};
use crate::error::EngineError;
use crate::frame::RawFrame;
use crate::source::{CaptureDevice, SourceKind};

const STUB_DEFAULT_FRAMES: u64 = 150;
const STUB_WIDTH: u32 = 640;
const STUB_HEIGHT: u32 = 480;

/// Seekable video file source.
pub struct FileSource {
    target: String,
    native_fps: f64,
    resolver: Arc<dyn BlobResolver>,
    backend: FileBackend,
}

enum FileBackend {
    Unopened,
    Synthetic(SyntheticClip),
    #[cfg(feature = "source-ffmpeg")]
    Ffmpeg(crate::source::file_ffmpeg::FfmpegClip),
}

impl FileSource {
    /// `target` may be empty: the source then waits for `retarget`.
    pub fn new(target: &str, native_fps: f64, resolver: Arc<dyn BlobResolver>) -> Self {
        Self {
            target: target.to_string(),
            native_fps,
            resolver,
            backend: FileBackend::Unopened,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether a target names something this source could open: an
    /// existing local file, a stub, or a well-formed URI.
    pub fn is_openable_target(target: &str) -> bool {
        if target.trim().is_empty() {
            return false;
        }
        if target.starts_with("stub://") {
            return true;
        }
        Path::new(target).exists() || is_valid_uri(target)
    }
}

impl CaptureDevice for FileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn open(&mut self) -> Result<(), EngineError> {
        if !matches!(self.backend, FileBackend::Unopened) {
            return Ok(());
        }
        if self.target.trim().is_empty() {
            return Err(EngineError::DeviceOpen(
                "no source path configured".to_string(),
            ));
        }

        if self.target.starts_with("stub://") {
            self.backend = FileBackend::Synthetic(SyntheticClip::open(&self.target));
            log::info!("FileSource: opened {} (synthetic)", self.target);
            return Ok(());
        }

        let location = if Path::new(&self.target).exists() {
            self.target.clone()
        } else {
            // Not on disk: treat as a blob URI and resolve it to a signed,
            // openable one.
            log::info!("FileSource: resolving URI {}", self.target);
            self.resolver.resolve(&self.target)?
        };

        #[cfg(feature = "source-ffmpeg")]
        {
            let clip = crate::source::file_ffmpeg::FfmpegClip::open(&location, self.native_fps)?;
            log::info!("FileSource: opened {}", self.target);
            self.backend = FileBackend::Ffmpeg(clip);
            Ok(())
        }
        #[cfg(not(feature = "source-ffmpeg"))]
        {
            let _ = location;
            Err(EngineError::DeviceOpen(format!(
                "file source {} requires the source-ffmpeg feature",
                self.target
            )))
        }
    }

    fn is_open(&self) -> bool {
        !matches!(self.backend, FileBackend::Unopened)
    }

    fn frame_count(&self) -> u64 {
        match &self.backend {
            FileBackend::Unopened => 0,
            FileBackend::Synthetic(clip) => clip.frames,
            #[cfg(feature = "source-ffmpeg")]
            FileBackend::Ffmpeg(clip) => clip.frame_count(),
        }
    }

    fn native_fps(&self) -> f64 {
        match &self.backend {
            FileBackend::Unopened => self.native_fps,
            FileBackend::Synthetic(_) => self.native_fps,
            #[cfg(feature = "source-ffmpeg")]
            FileBackend::Ffmpeg(clip) => clip.native_fps(),
        }
    }

    fn read_raw(&mut self) -> Result<Option<RawFrame>, EngineError> {
        match &mut self.backend {
            FileBackend::Unopened => {
                Err(EngineError::StreamRead("file source is not open".to_string()))
            }
            FileBackend::Synthetic(clip) => Ok(clip.read()),
            #[cfg(feature = "source-ffmpeg")]
            FileBackend::Ffmpeg(clip) => clip.read_raw(),
        }
    }

    fn seek(&mut self, frame_index: u64) -> bool {
        match &mut self.backend {
            FileBackend::Unopened => false,
            FileBackend::Synthetic(clip) => {
                clip.position = frame_index.min(clip.frames);
                true
            }
            #[cfg(feature = "source-ffmpeg")]
            FileBackend::Ffmpeg(clip) => clip.seek(frame_index),
        }
    }

    fn position(&self) -> u64 {
        match &self.backend {
            FileBackend::Unopened => 0,
            FileBackend::Synthetic(clip) => clip.position,
            #[cfg(feature = "source-ffmpeg")]
            FileBackend::Ffmpeg(clip) => clip.position(),
        }
    }

    fn retarget(&mut self, source: &str) -> Result<(), EngineError> {
        if !Self::is_openable_target(source) {
            return Err(EngineError::InvalidSource(format!(
                "{source} does not exist and is not a valid URI"
            )));
        }
        self.close();
        self.target = source.to_string();
        Ok(())
    }

    fn close(&mut self) {
        if !matches!(self.backend, FileBackend::Unopened) {
            log::info!("FileSource: closed {}", self.target);
        }
        self.backend = FileBackend::Unopened;
    }
}

// ----------------------------------------------------------------------------
// Synthetic clip (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticClip {
    frames: u64,
    position: u64,
}

impl SyntheticClip {
    /// Frame count is parsed from a `frames=N` query, defaulting to 150.
    fn open(target: &str) -> Self {
        let frames = target
            .split_once("frames=")
            .and_then(|(_, n)| n.parse().ok())
            .unwrap_or(STUB_DEFAULT_FRAMES);
        Self {
            frames,
            position: 0,
        }
    }

    fn read(&mut self) -> Option<RawFrame> {
        if self.position >= self.frames {
            return None;
        }
        let index = self.position;
        self.position += 1;

        // Deterministic per-index pixels so tests can identify frames.
        let pixel_count = (STUB_WIDTH * STUB_HEIGHT * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, px) in pixels.iter_mut().enumerate() {
            *px = ((i as u64 + index) % 256) as u8;
        }
        Some(RawFrame::new(pixels, STUB_WIDTH, STUB_HEIGHT))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
