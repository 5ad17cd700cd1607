//! Dispatch-boundary behavior of the control surface.

use std::sync::{Arc, Mutex};

use framecast::{
    CameraActionKind, CameraActionMessage, CameraSettings, CameraSource, CaptureEngine,
    CommandRouter, ControlCommand, EncodeSettings, FileSource, MessageSink, OutboundMessage,
    PassthroughResolver, PathStatus, PlaybackState, SourceKind,
};

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSink {
    fn all(&self) -> Vec<OutboundMessage> {
        self.messages.lock().unwrap().clone()
    }

    fn total_frames_replies(&self) -> Vec<u64> {
        self.all()
            .into_iter()
            .filter_map(|msg| match msg {
                OutboundMessage::TotalVideoFrames(count) => Some(count),
                _ => None,
            })
            .collect()
    }

    fn path_statuses(&self) -> Vec<PathStatus> {
        self.all()
            .into_iter()
            .filter_map(|msg| match msg {
                OutboundMessage::PathStatus(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    fn camera_action_errors(&self) -> Vec<CameraActionMessage> {
        self.all()
            .into_iter()
            .filter_map(|msg| match msg {
                OutboundMessage::CameraAction(action)
                    if action.action == CameraActionKind::Error =>
                {
                    Some(action)
                }
                _ => None,
            })
            .collect()
    }

    fn fps_statuses(&self) -> Vec<u32> {
        self.all()
            .into_iter()
            .filter_map(|msg| match msg {
                OutboundMessage::FpsStatus(fps) => Some(fps),
                _ => None,
            })
            .collect()
    }

    fn closed_count(&self) -> usize {
        self.all()
            .iter()
            .filter(|msg| matches!(msg, OutboundMessage::Closed))
            .count()
    }
}

impl MessageSink for RecordingSink {
    fn send(&self, message: OutboundMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

fn encode_settings() -> EncodeSettings {
    EncodeSettings {
        resize: false,
        width: 0,
        height: 0,
    }
}

fn file_router(frames: u64) -> (Arc<CaptureEngine>, Arc<RecordingSink>, CommandRouter) {
    let sink = Arc::new(RecordingSink::default());
    let device = Box::new(FileSource::new(
        &format!("stub://clip?frames={frames}"),
        100.0,
        Arc::new(PassthroughResolver),
    ));
    let engine = Arc::new(CaptureEngine::new(
        device,
        sink.clone(),
        encode_settings(),
        100,
    ));
    let router = CommandRouter::new(Arc::clone(&engine), sink.clone());
    (engine, sink, router)
}

fn camera_router() -> (Arc<CaptureEngine>, Arc<RecordingSink>, CommandRouter) {
    let sink = Arc::new(RecordingSink::default());
    let settings = CameraSettings {
        device: "stub://bench".to_string(),
        width: 32,
        height: 24,
        auto_focus: false,
        fps: 100,
    };
    let device = Box::new(CameraSource::new(settings).expect("camera source"));
    let engine = Arc::new(CaptureEngine::new(
        device,
        sink.clone(),
        encode_settings(),
        100,
    ));
    let router = CommandRouter::new(Arc::clone(&engine), sink.clone());
    (engine, sink, router)
}

#[test]
fn total_frames_query_answers_for_files() {
    let (engine, sink, router) = file_router(42);
    engine.init().expect("init");

    router.dispatch(ControlCommand::GetTotalVideoFrames);

    assert_eq!(sink.total_frames_replies(), vec![42]);
}

#[test]
fn total_frames_query_on_a_camera_is_an_error_not_a_crash() {
    let (_engine, sink, router) = camera_router();

    router.dispatch(ControlCommand::GetTotalVideoFrames);

    assert!(sink.total_frames_replies().is_empty());
}

#[test]
fn load_request_reports_path_status() {
    let (engine, sink, router) = file_router(5);

    router.dispatch(ControlCommand::LoadRequest("stub://next?frames=3".into()));
    router.dispatch(ControlCommand::LoadRequest("/nonexistent/clip".into()));

    assert_eq!(
        sink.path_statuses(),
        vec![PathStatus::Valid, PathStatus::Invalid]
    );
    engine.on_stop_btn();
}

#[test]
fn camera_actions_on_a_file_source_are_ignored_except_stop() {
    let (engine, sink, router) = file_router(5);
    engine.init().expect("init");

    router.dispatch(ControlCommand::CameraAction(CameraActionMessage::new(
        CameraActionKind::StartRecording,
    )));
    router.dispatch(ControlCommand::CameraAction(CameraActionMessage::new(
        CameraActionKind::StopRecording,
    )));
    assert!(sink.camera_action_errors().is_empty());
    assert_eq!(sink.closed_count(), 0);

    router.dispatch(ControlCommand::CameraAction(CameraActionMessage::new(
        CameraActionKind::Stop,
    )));
    assert_eq!(engine.playback_state(), PlaybackState::Stopped);
    assert_eq!(sink.closed_count(), 1);
}

#[test]
fn recording_failures_surface_as_camera_action_errors() {
    // A camera engine without an attached recorder cannot record.
    let (_engine, sink, router) = camera_router();

    router.dispatch(ControlCommand::CameraAction(CameraActionMessage {
        action: CameraActionKind::StartRecording,
        recording_path: Some("/clips/out.mp4".to_string()),
        error_msg: None,
    }));

    let errors = sink.camera_action_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].recording_path.as_deref(), Some("/clips/out.mp4"));
    assert!(errors[0].error_msg.is_some());
}

#[test]
fn camera_action_start_is_an_inert_placeholder() {
    let (engine, sink, router) = camera_router();

    router.dispatch(ControlCommand::CameraAction(CameraActionMessage::new(
        CameraActionKind::Start,
    )));

    assert!(sink.all().is_empty());
    assert_eq!(engine.playback_state(), PlaybackState::Stopped);
}

#[test]
fn fps_round_trips_through_the_router() {
    let (_engine, sink, router) = file_router(5);

    router.dispatch(ControlCommand::SetFramePerSecond(42));
    router.dispatch(ControlCommand::GetFramePerSecond);

    assert_eq!(sink.fps_statuses(), vec![42]);
}

#[test]
fn unsupported_step_commands_do_not_poison_the_router() {
    let (engine, sink, router) = camera_router();

    // Stepping a live camera fails; the router logs and keeps serving.
    router.dispatch(ControlCommand::NextFrame);
    router.dispatch(ControlCommand::PreviousFrame);
    router.dispatch(ControlCommand::SetFrame(7));
    router.dispatch(ControlCommand::GetFramePerSecond);

    assert_eq!(sink.fps_statuses(), vec![100]);
    assert_eq!(engine.kind(), SourceKind::Camera);
}
