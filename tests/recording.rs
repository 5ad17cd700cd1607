//! Recorder behavior: clip rotation, idempotent stop, naming.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use framecast::frame::encode_jpeg;
use framecast::{
    CameraSettings, CameraSource, CaptureEngine, ClipWriter, EncodeSettings, EngineError,
    FourCc, MessageSink, OutboundMessage, RawFrame, Recorder, RecorderSettings,
};

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSink {
    fn closed_clips(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|msg| match msg {
                OutboundMessage::CameraClipClosed(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    fn frames(&self) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| matches!(msg, OutboundMessage::CameraFrame { .. }))
            .count()
    }
}

impl MessageSink for RecordingSink {
    fn send(&self, message: OutboundMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

/// In-memory clip writer that records what the recorder asked of it.
#[derive(Default)]
struct WriterLog {
    open: bool,
    opened_paths: Vec<PathBuf>,
    frames_in_current_clip: u64,
    frames_per_closed_clip: Vec<u64>,
}

#[derive(Clone)]
struct StubWriter {
    log: Arc<Mutex<WriterLog>>,
}

impl StubWriter {
    fn new() -> (Self, Arc<Mutex<WriterLog>>) {
        let log = Arc::new(Mutex::new(WriterLog::default()));
        (Self { log: log.clone() }, log)
    }
}

impl ClipWriter for StubWriter {
    fn open(
        &mut self,
        path: &Path,
        _fourcc: FourCc,
        _fps: u32,
        _width: u32,
        _height: u32,
    ) -> Result<(), EngineError> {
        let mut log = self.log.lock().unwrap();
        assert!(!log.open, "recorder must never double-open a writer");
        log.open = true;
        log.frames_in_current_clip = 0;
        log.opened_paths.push(path.to_path_buf());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.log.lock().unwrap().open
    }

    fn write(&mut self, _frame: &RawFrame) -> Result<(), EngineError> {
        let mut log = self.log.lock().unwrap();
        assert!(log.open, "write on a closed writer");
        log.frames_in_current_clip += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        let mut log = self.log.lock().unwrap();
        log.open = false;
        let frames = log.frames_in_current_clip;
        log.frames_per_closed_clip.push(frames);
        Ok(())
    }
}

fn test_recorder(
    output_path: &str,
    fps: u32,
    max_clip_secs: u32,
) -> (Recorder, Arc<Mutex<WriterLog>>) {
    let (writer, log) = StubWriter::new();
    let settings = RecorderSettings {
        output_path: output_path.to_string(),
        fps,
        max_clip_secs,
        width: 32,
        height: 24,
    };
    (Recorder::new(settings, Box::new(writer)), log)
}

fn jpeg_frame() -> Vec<u8> {
    let data = vec![128u8; 32 * 24 * 3];
    let frame = RawFrame::new(data, 32, 24);
    let settings = EncodeSettings {
        resize: false,
        width: 0,
        height: 0,
    };
    encode_jpeg(&frame, &settings).expect("encode test frame")
}

#[test]
fn rotation_closes_reports_and_reopens_without_losing_frames() {
    let (mut recorder, log) = test_recorder("clips/session.mp4", 5, 2);
    let sink = RecordingSink::default();
    let jpeg = jpeg_frame();

    recorder.start_recording().expect("start");
    for _ in 0..25 {
        recorder.on_frame_captured(&jpeg, &sink).expect("frame");
    }

    let log = log.lock().unwrap();
    // 5 fps * 2 s = 10 frames per clip: two rotations in 25 frames.
    assert_eq!(log.opened_paths.len(), 3);
    assert_eq!(log.frames_per_closed_clip, vec![10, 10]);
    assert_eq!(log.frames_in_current_clip, 5, "capture continues after rotation");
    assert!(log.open);

    let closed = sink.closed_clips();
    assert_eq!(closed.len(), 2);
    // Rotation reports the clip that just closed, never the new one.
    assert_eq!(Path::new(&closed[0]), log.opened_paths[0]);
    assert_eq!(Path::new(&closed[1]), log.opened_paths[1]);
}

#[test]
fn stop_recording_is_idempotent() {
    let (mut recorder, _log) = test_recorder("clips/session.mp4", 5, 0);
    let sink = RecordingSink::default();
    let jpeg = jpeg_frame();

    recorder.start_recording().expect("start");
    for _ in 0..3 {
        recorder.on_frame_captured(&jpeg, &sink).expect("frame");
    }

    recorder.stop_recording(&sink).expect("stop");
    recorder.stop_recording(&sink).expect("second stop");

    assert_eq!(sink.closed_clips().len(), 1, "only one close may be reported");
}

#[test]
fn frames_are_ignored_while_no_clip_is_open() {
    let (mut recorder, log) = test_recorder("clips/session.mp4", 5, 0);
    let sink = RecordingSink::default();
    let jpeg = jpeg_frame();

    recorder.on_frame_captured(&jpeg, &sink).expect("frame");
    assert_eq!(log.lock().unwrap().opened_paths.len(), 0);
    assert!(sink.closed_clips().is_empty());
}

#[test]
fn start_recording_requires_an_output_path() {
    let (mut recorder, _log) = test_recorder("", 5, 0);
    assert!(matches!(
        recorder.start_recording(),
        Err(EngineError::RecordingWrite(_))
    ));
}

#[test]
fn unlimited_clips_never_rotate() {
    let (mut recorder, log) = test_recorder("clips/session.mp4", 2, 0);
    let sink = RecordingSink::default();
    let jpeg = jpeg_frame();

    recorder.start_recording().expect("start");
    for _ in 0..50 {
        recorder.on_frame_captured(&jpeg, &sink).expect("frame");
    }

    assert_eq!(log.lock().unwrap().opened_paths.len(), 1);
    assert!(sink.closed_clips().is_empty());
}

#[test]
fn clips_are_timestamp_named_next_to_the_configured_path() {
    let (mut recorder, log) = test_recorder("clips/session.mp4", 5, 0);
    let sink = RecordingSink::default();

    recorder.start_recording().expect("start");
    recorder.stop_recording(&sink).expect("stop");

    let log = log.lock().unwrap();
    let opened = &log.opened_paths[0];
    assert_eq!(opened.parent().unwrap(), Path::new("clips"));
    let name = opened.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("session_"));
    assert!(name.ends_with(".mp4"));
}

#[test]
fn set_output_path_redirects_the_next_clip() {
    let (mut recorder, log) = test_recorder("clips/session.mp4", 5, 0);
    let sink = RecordingSink::default();

    recorder.start_recording().expect("start");
    recorder.stop_recording(&sink).expect("stop");

    recorder.set_output_path("elsewhere/capture.avi");
    recorder.start_recording().expect("restart");
    recorder.stop_recording(&sink).expect("stop again");

    let log = log.lock().unwrap();
    assert_eq!(log.opened_paths[1].parent().unwrap(), Path::new("elsewhere"));
    let name = log.opened_paths[1]
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    assert!(name.starts_with("capture_"));
    assert!(name.ends_with(".avi"));
}

#[test]
fn camera_engine_writes_emitted_frames_to_the_clip() {
    let sink = Arc::new(RecordingSink::default());
    let settings = CameraSettings {
        device: "stub://bench".to_string(),
        width: 32,
        height: 24,
        auto_focus: false,
        fps: 100,
    };
    let device = Box::new(CameraSource::new(settings).expect("camera source"));
    let encode = EncodeSettings {
        resize: false,
        width: 0,
        height: 0,
    };

    let (writer, log) = StubWriter::new();
    let recorder = Recorder::new(
        RecorderSettings {
            output_path: "clips/live.mp4".to_string(),
            fps: 100,
            max_clip_secs: 0,
            width: 32,
            height: 24,
        },
        Box::new(writer),
    );
    let engine = Arc::new(
        CaptureEngine::new(device, sink.clone(), encode, 100).with_recorder(recorder),
    );

    engine.start_recording(None).expect("start recording");
    engine.start_playing();

    let deadline = Instant::now() + Duration::from_secs(10);
    while sink.frames() < 5 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(sink.frames() >= 5, "expected live frames");

    engine.stop_camera();

    let log = log.lock().unwrap();
    assert!(!log.open, "stop must close the clip");
    assert_eq!(log.frames_per_closed_clip.len(), 1);
    assert!(log.frames_per_closed_clip[0] >= 5);
    assert_eq!(sink.closed_clips().len(), 1);
}
