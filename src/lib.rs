//! framecast
//!
//! A headless video capture/playback engine. One instance owns a single
//! source - a live camera or a seekable video file/URI - and exposes a
//! transport-agnostic control surface over it: play, pause, stop, frame
//! stepping, frame-exact seeking, frame-rate changes, source swapping, and
//! (camera mode) recording the live stream to rotating output clips.
//!
//! # Architecture
//!
//! - A dedicated background worker (the pull loop) fetches one frame per
//!   cadence tick, encodes it to JPEG, and pushes it through the
//!   `MessageSink` seam to an external dispatcher.
//! - Control commands arrive from the dispatcher on a separate thread and
//!   interleave with the running loop. The only shared mutual-exclusion
//!   regions are the device-access lock and the recorder lock.
//! - Pausing is a blocking gate; cancellation is a per-instance generation
//!   counter; stop joins the worker before the device is released.
//!
//! # Module Structure
//!
//! - `source`: capture device adapters (camera / file, plus `stub://`
//!   synthetic backends for tests)
//! - `engine`: the capture/playback state machine and pull loop
//! - `record`: rotating clip recording (camera mode)
//! - `control`: command parsing, outbound messages, dispatch router
//! - `blob`: URI validation and the blob-resolution collaborator seam
//! - `config`: daemon configuration
//! - `frame`: RGB frames and the JPEG codec path

pub mod blob;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod frame;
pub mod record;
pub mod source;

pub use blob::{is_valid_uri, BlobResolver, PassthroughResolver};
pub use config::{ConfigOverrides, EngineConfig};
pub use control::{
    CameraActionKind, CameraActionMessage, CommandRouter, ControlCommand, MessageSink,
    OutboundMessage, PathStatus,
};
pub use engine::{CaptureEngine, PlaybackState};
pub use error::EngineError;
pub use frame::{EncodeSettings, RawFrame};
#[cfg(feature = "record-ffmpeg")]
pub use record::ffmpeg::FfmpegClipWriter;
pub use record::{fourcc_for_extension, ClipWriter, FourCc, Recorder, RecorderSettings};
pub use source::{CameraSettings, CameraSource, CaptureDevice, FileSource, SourceKind};
