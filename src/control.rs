//! Control surface: command names, payload parsing, outbound messages, and
//! the dispatch router.
//!
//! Inbound commands are string-tagged messages from an external dispatcher;
//! the transport itself is out of scope and only the `MessageSink` seam is
//! defined here. Every dispatch failure is caught at this boundary and
//! logged - a bad command never takes down the control loop. Failures while
//! handling a CameraAction are additionally reported back as an outbound
//! `CameraAction` error message.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::CaptureEngine;
use crate::error::EngineError;
use crate::source::SourceKind;

// Inbound message names.
pub const PLAY_MESSAGE: &str = "Play";
pub const STOP_MESSAGE: &str = "Stop";
pub const NEXT_FRAME_MESSAGE: &str = "NextFrame";
pub const PREVIOUS_FRAME_MESSAGE: &str = "PreviousFrame";
pub const PAUSE_MESSAGE: &str = "Pause";
pub const SET_FRAME_MESSAGE: &str = "SetFrame";
pub const LOAD_REQUEST_MESSAGE: &str = "LoadRequest";
pub const GET_CURRENT_FRAME_MESSAGE: &str = "GetCurrentFrame";
pub const GET_TOTAL_VIDEO_FRAMES_MESSAGE: &str = "GetTotalVideoFrames";
pub const SET_FRAME_PER_SECOND_MESSAGE: &str = "SetFramePerSecond";
pub const GET_FRAME_PER_SECOND_MESSAGE: &str = "GetFramePerSecond";
pub const CAMERA_ACTION_MESSAGE: &str = "CameraAction";

// Outbound message names.
pub const CAMERA_FRAME_MESSAGE: &str = "CameraFrame";
pub const TOTAL_VIDEO_FRAMES_MESSAGE: &str = "TotalVideoFrames";
pub const PATH_STATUS_MESSAGE: &str = "PathStatus";
pub const FPS_STATUS_MESSAGE: &str = "FpsStatus";
pub const ON_CAMERA_CLIP_CLOSED_MESSAGE: &str = "OnCameraClipClosed";
pub const CLOSED_MESSAGE: &str = "Closed";

/// A typed inbound control command.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlCommand {
    Play,
    Stop,
    NextFrame,
    PreviousFrame,
    Pause,
    SetFrame(u64),
    LoadRequest(String),
    GetCurrentFrame,
    GetTotalVideoFrames,
    SetFramePerSecond(u32),
    GetFramePerSecond,
    CameraAction(CameraActionMessage),
}

impl ControlCommand {
    /// Parse a `(name, payload)` pair from the dispatcher. Numeric payloads
    /// arrive as decimal strings; CameraAction payloads are CBOR.
    pub fn parse(name: &str, payload: &[u8]) -> Result<Self, EngineError> {
        let text = || {
            std::str::from_utf8(payload)
                .map(str::trim)
                .map_err(|err| EngineError::Control(format!("{name}: payload is not UTF-8: {err}")))
        };
        match name {
            PLAY_MESSAGE => Ok(Self::Play),
            STOP_MESSAGE => Ok(Self::Stop),
            NEXT_FRAME_MESSAGE => Ok(Self::NextFrame),
            PREVIOUS_FRAME_MESSAGE => Ok(Self::PreviousFrame),
            PAUSE_MESSAGE => Ok(Self::Pause),
            SET_FRAME_MESSAGE => {
                let text = text()?;
                // The dispatcher sends slider positions as floats.
                let frame = text.parse::<f64>().map_err(|_| {
                    EngineError::Control(format!("SetFrame: bad frame index {text:?}"))
                })?;
                if !frame.is_finite() || frame < 0.0 {
                    return Err(EngineError::Control(format!(
                        "SetFrame: bad frame index {text:?}"
                    )));
                }
                Ok(Self::SetFrame(frame as u64))
            }
            LOAD_REQUEST_MESSAGE => Ok(Self::LoadRequest(text()?.to_string())),
            GET_CURRENT_FRAME_MESSAGE => Ok(Self::GetCurrentFrame),
            GET_TOTAL_VIDEO_FRAMES_MESSAGE => Ok(Self::GetTotalVideoFrames),
            SET_FRAME_PER_SECOND_MESSAGE => {
                let text = text()?;
                let fps = text.parse::<u32>().map_err(|_| {
                    EngineError::Control(format!("SetFramePerSecond: bad value {text:?}"))
                })?;
                Ok(Self::SetFramePerSecond(fps))
            }
            GET_FRAME_PER_SECOND_MESSAGE => Ok(Self::GetFramePerSecond),
            CAMERA_ACTION_MESSAGE => Ok(Self::CameraAction(CameraActionMessage::decode(payload)?)),
            other => Err(EngineError::Control(format!("unknown command {other:?}"))),
        }
    }
}

/// Load-request outcome reported back to the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathStatus {
    Valid,
    Invalid,
}

/// The recording-control actions exchanged as a compact binary message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraActionKind {
    Start,
    Stop,
    StartRecording,
    StopRecording,
    Error,
}

/// Wire form of the CameraAction message (CBOR-encoded).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraActionMessage {
    pub action: CameraActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_path: Option<String>,
    /// Present only for `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl CameraActionMessage {
    pub fn new(action: CameraActionKind) -> Self {
        Self {
            action,
            recording_path: None,
            error_msg: None,
        }
    }

    pub fn error(message: impl Into<String>, recording_path: impl Into<String>) -> Self {
        Self {
            action: CameraActionKind::Error,
            recording_path: Some(recording_path.into()),
            error_msg: Some(message.into()),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EngineError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|err| EngineError::Control(format!("CameraAction encode: {err}")))?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        ciborium::de::from_reader(bytes)
            .map_err(|err| EngineError::Control(format!("CameraAction decode: {err}")))
    }
}

/// Everything the engine and router emit outward.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundMessage {
    /// One encoded frame plus the playback position as a string.
    CameraFrame { data: Vec<u8>, position: String },
    TotalVideoFrames(u64),
    PathStatus(PathStatus),
    FpsStatus(u32),
    /// Path of the recording clip that just closed (rotation or stop).
    CameraClipClosed(String),
    CameraAction(CameraActionMessage),
    /// Graceful shutdown notification.
    Closed,
}

impl OutboundMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CameraFrame { .. } => CAMERA_FRAME_MESSAGE,
            Self::TotalVideoFrames(_) => TOTAL_VIDEO_FRAMES_MESSAGE,
            Self::PathStatus(_) => PATH_STATUS_MESSAGE,
            Self::FpsStatus(_) => FPS_STATUS_MESSAGE,
            Self::CameraClipClosed(_) => ON_CAMERA_CLIP_CLOSED_MESSAGE,
            Self::CameraAction(_) => CAMERA_ACTION_MESSAGE,
            Self::Closed => CLOSED_MESSAGE,
        }
    }
}

/// Outbound seam to the dispatcher. Implementations must be cheap and
/// non-blocking; they are called from the pull loop.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: OutboundMessage);
}

/// Maps inbound commands onto engine operations.
pub struct CommandRouter {
    engine: Arc<CaptureEngine>,
    sink: Arc<dyn MessageSink>,
}

impl CommandRouter {
    pub fn new(engine: Arc<CaptureEngine>, sink: Arc<dyn MessageSink>) -> Self {
        Self { engine, sink }
    }

    /// Handle one command. Never panics and never propagates: operation
    /// failures are logged (and, for CameraAction, reported outward).
    pub fn dispatch(&self, command: ControlCommand) {
        log::info!("{} message received", command_name(&command));
        let result = match command {
            ControlCommand::Play => {
                self.engine.on_play_btn();
                Ok(())
            }
            ControlCommand::Stop => {
                self.engine.on_stop_btn();
                Ok(())
            }
            ControlCommand::NextFrame => self.engine.on_next_btn(),
            ControlCommand::PreviousFrame => self.engine.on_previous_btn(),
            ControlCommand::Pause => {
                self.engine.on_pause_btn();
                Ok(())
            }
            ControlCommand::SetFrame(index) => self.engine.on_slider_value_changed(index),
            ControlCommand::LoadRequest(target) => self.handle_load_request(&target),
            ControlCommand::GetCurrentFrame => self.engine.send_current_frame(),
            ControlCommand::GetTotalVideoFrames => self.handle_get_total_frames(),
            ControlCommand::SetFramePerSecond(fps) => self.engine.set_fps(fps),
            ControlCommand::GetFramePerSecond => {
                self.sink.send(OutboundMessage::FpsStatus(self.engine.fps()));
                Ok(())
            }
            ControlCommand::CameraAction(action) => {
                self.handle_camera_action(action);
                Ok(())
            }
        };
        if let Err(err) = result {
            log::error!("command handling failed: {err}");
        }
    }

    fn handle_load_request(&self, target: &str) -> Result<(), EngineError> {
        match self.engine.load_request(target) {
            Ok(()) => {
                self.sink.send(OutboundMessage::PathStatus(PathStatus::Valid));
                Ok(())
            }
            Err(EngineError::InvalidSource(reason)) => {
                log::error!("{target} not loadable: {reason}");
                self.sink
                    .send(OutboundMessage::PathStatus(PathStatus::Invalid));
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    fn handle_get_total_frames(&self) -> Result<(), EngineError> {
        if self.engine.kind() != SourceKind::File {
            return Err(EngineError::Unsupported(
                "total frame count of a live camera",
            ));
        }
        self.sink
            .send(OutboundMessage::TotalVideoFrames(self.engine.total_frames()));
        Ok(())
    }

    fn handle_camera_action(&self, action: CameraActionMessage) {
        // On a file source every camera action except Stop is ignored.
        if self.engine.kind() != SourceKind::Camera
            && action.action != CameraActionKind::Stop
        {
            return;
        }
        let result = match action.action {
            CameraActionKind::Start => Ok(()), // placeholder, intentionally inert
            CameraActionKind::Stop => {
                self.engine.stop_camera();
                Ok(())
            }
            CameraActionKind::StartRecording => self
                .engine
                .start_recording(action.recording_path.as_deref()),
            CameraActionKind::StopRecording => self.engine.stop_recording(),
            CameraActionKind::Error => {
                log::warn!(
                    "CameraAction error received: {}",
                    action.error_msg.as_deref().unwrap_or("<no message>")
                );
                Ok(())
            }
        };
        if let Err(err) = result {
            let path = action.recording_path.unwrap_or_default();
            log::error!("camera action failed: {err}");
            self.sink
                .send(OutboundMessage::CameraAction(CameraActionMessage::error(
                    err.to_string(),
                    path,
                )));
        }
    }
}

fn command_name(command: &ControlCommand) -> &'static str {
    match command {
        ControlCommand::Play => PLAY_MESSAGE,
        ControlCommand::Stop => STOP_MESSAGE,
        ControlCommand::NextFrame => NEXT_FRAME_MESSAGE,
        ControlCommand::PreviousFrame => PREVIOUS_FRAME_MESSAGE,
        ControlCommand::Pause => PAUSE_MESSAGE,
        ControlCommand::SetFrame(_) => SET_FRAME_MESSAGE,
        ControlCommand::LoadRequest(_) => LOAD_REQUEST_MESSAGE,
        ControlCommand::GetCurrentFrame => GET_CURRENT_FRAME_MESSAGE,
        ControlCommand::GetTotalVideoFrames => GET_TOTAL_VIDEO_FRAMES_MESSAGE,
        ControlCommand::SetFramePerSecond(_) => SET_FRAME_PER_SECOND_MESSAGE,
        ControlCommand::GetFramePerSecond => GET_FRAME_PER_SECOND_MESSAGE,
        ControlCommand::CameraAction(_) => CAMERA_ACTION_MESSAGE,
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_commands() {
        assert_eq!(
            ControlCommand::parse(PLAY_MESSAGE, b"").unwrap(),
            ControlCommand::Play
        );
        assert_eq!(
            ControlCommand::parse(PAUSE_MESSAGE, b"").unwrap(),
            ControlCommand::Pause
        );
    }

    #[test]
    fn parses_set_frame_as_float_string() {
        assert_eq!(
            ControlCommand::parse(SET_FRAME_MESSAGE, b"42").unwrap(),
            ControlCommand::SetFrame(42)
        );
        assert_eq!(
            ControlCommand::parse(SET_FRAME_MESSAGE, b"17.0").unwrap(),
            ControlCommand::SetFrame(17)
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            ControlCommand::parse(SET_FRAME_MESSAGE, b"abc"),
            Err(EngineError::Control(_))
        ));
        assert!(matches!(
            ControlCommand::parse(SET_FRAME_PER_SECOND_MESSAGE, b"-3"),
            Err(EngineError::Control(_))
        ));
        assert!(matches!(
            ControlCommand::parse("NoSuchCommand", b""),
            Err(EngineError::Control(_))
        ));
    }

    #[test]
    fn camera_action_round_trips_through_cbor() {
        let msg = CameraActionMessage {
            action: CameraActionKind::StartRecording,
            recording_path: Some("/tmp/out.mp4".to_string()),
            error_msg: None,
        };
        let bytes = msg.encode().expect("encode");
        let decoded = CameraActionMessage::decode(&bytes).expect("decode");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn camera_action_error_carries_both_fields() {
        let msg = CameraActionMessage::error("writer exploded", "/tmp/out.mp4");
        let bytes = msg.encode().expect("encode");
        let decoded = CameraActionMessage::decode(&bytes).expect("decode");
        assert_eq!(decoded.action, CameraActionKind::Error);
        assert_eq!(decoded.error_msg.as_deref(), Some("writer exploded"));
        assert_eq!(decoded.recording_path.as_deref(), Some("/tmp/out.mp4"));
    }

    #[test]
    fn camera_action_decode_rejects_garbage() {
        assert!(matches!(
            CameraActionMessage::decode(b"\xff\xff\xff"),
            Err(EngineError::Control(_))
        ));
    }
}
