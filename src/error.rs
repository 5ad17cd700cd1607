//! Engine error taxonomy.
//!
//! Failure classes are deliberately coarse: the control surface only ever
//! needs to distinguish "this instance is dead" (`DeviceOpen`), "the stream
//! hiccupped" (`StreamRead`), "the caller asked for a bad source"
//! (`InvalidSource`), and "this source cannot do that" (`Unsupported`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The capture device could not be opened. Fatal for the instance:
    /// the pull loop never starts.
    #[error("failed to open capture device: {0}")]
    DeviceOpen(String),

    /// The open device returned no frame. Recoverable: playback
    /// auto-pauses and may be resumed or stopped.
    #[error("video stream read failed: {0}")]
    StreamRead(String),

    /// A load request named a path or URI that does not exist or is
    /// malformed. Existing engine state is unchanged.
    #[error("invalid source request: {0}")]
    InvalidSource(String),

    /// The operation is not supported by the active source kind
    /// (e.g. frame stepping on a live camera).
    #[error("operation not supported for this source: {0}")]
    Unsupported(&'static str),

    /// The recording writer failed to open or to accept a frame. Fatal to
    /// the current clip; open and write failures surface identically.
    #[error("recording writer error: {0}")]
    RecordingWrite(String),

    /// Frame encode/decode failure (JPEG codec or resize).
    #[error("frame codec error: {0}")]
    FrameCodec(String),

    /// A control message payload could not be parsed.
    #[error("malformed control message: {0}")]
    Control(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
