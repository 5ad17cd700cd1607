//! Capture/playback state machine.
//!
//! One `CaptureEngine` owns one capture device and one background worker
//! (the pull loop). Control operations arrive from the dispatcher thread
//! and interleave with the running loop; the only shared mutual-exclusion
//! regions are the device-access lock (reads, seeks, position queries) and
//! the recorder lock. Pausing is a blocking gate, cancellation is a
//! generation counter, and stop is synchronous: it joins the worker before
//! the device is released, so the loop can never touch a closed device.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::control::{CameraActionMessage, MessageSink, OutboundMessage};
use crate::error::EngineError;
use crate::frame::{encode_jpeg, EncodeSettings, RawFrame};
use crate::record::Recorder;
use crate::source::{CaptureDevice, SourceKind};

const MILLIS_PER_SECOND: u32 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// Binary rendezvous signal gating the pull loop. Open lets the loop run;
/// closed blocks it inside the loop body without spinning.
struct PauseGate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl PauseGate {
    fn new() -> Self {
        Self {
            open: Mutex::new(true),
            cond: Condvar::new(),
        }
    }

    fn is_open(&self) -> bool {
        *lock(&self.open)
    }

    fn open(&self) {
        *lock(&self.open) = true;
        self.cond.notify_all();
    }

    fn close(&self) {
        *lock(&self.open) = false;
    }

    fn wait_open(&self) {
        let mut open = lock(&self.open);
        while !*open {
            open = self
                .cond
                .wait(open)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// State shared between the control side and the worker.
struct EngineShared {
    /// The device-access lock: every read, seek, and position query runs
    /// under it, so a seek can never race an in-flight read.
    device: Mutex<Box<dyn CaptureDevice>>,
    gate: PauseGate,
    state: Mutex<PlaybackState>,
    /// Cancellation generation. A worker binds to the value current at
    /// spawn; bumping it cancels that worker, and the new value is the
    /// fresh token the next start binds to.
    generation: AtomicU64,
    fps: AtomicU32,
    freshly_loaded: AtomicBool,
    frame_count: AtomicU64,
}

impl EngineShared {
    /// Recoverable stream failure: pause playback, keep the loop alive.
    fn auto_pause(&self) {
        *lock(&self.state) = PlaybackState::Paused;
        self.gate.close();
    }
}

pub struct CaptureEngine {
    shared: Arc<EngineShared>,
    sink: Arc<dyn MessageSink>,
    kind: SourceKind,
    encode: EncodeSettings,
    recorder: Option<Arc<Mutex<Recorder>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureEngine {
    pub fn new(
        device: Box<dyn CaptureDevice>,
        sink: Arc<dyn MessageSink>,
        encode: EncodeSettings,
        fps: u32,
    ) -> Self {
        let kind = device.kind();
        Self {
            shared: Arc::new(EngineShared {
                device: Mutex::new(device),
                gate: PauseGate::new(),
                state: Mutex::new(PlaybackState::Stopped),
                generation: AtomicU64::new(0),
                fps: AtomicU32::new(fps.max(1)),
                freshly_loaded: AtomicBool::new(false),
                frame_count: AtomicU64::new(0),
            }),
            sink,
            kind,
            encode,
            recorder: None,
            worker: Mutex::new(None),
        }
    }

    /// Attach a recorder (camera engines only).
    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(Arc::new(Mutex::new(recorder)));
        self
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn playback_state(&self) -> PlaybackState {
        *lock(&self.shared.state)
    }

    pub fn total_frames(&self) -> u64 {
        self.shared.frame_count.load(Ordering::SeqCst)
    }

    pub fn fps(&self) -> u32 {
        self.shared.fps.load(Ordering::SeqCst)
    }

    /// Pacing rate; effective on the next loop iteration.
    pub fn set_fps(&self, fps: u32) -> Result<(), EngineError> {
        if fps == 0 {
            return Err(EngineError::Control("fps must be positive".to_string()));
        }
        self.shared.fps.store(fps, Ordering::SeqCst);
        Ok(())
    }

    /// Idempotent device open; records the frame count.
    pub fn init(&self) -> Result<(), EngineError> {
        let mut device = lock(&self.shared.device);
        device.open()?;
        self.shared
            .frame_count
            .store(device.frame_count(), Ordering::SeqCst);
        Ok(())
    }

    /// Launch the background pull loop bound to the current cancellation
    /// generation. A no-op while a worker is still running.
    pub fn start_playing(&self) {
        let mut slot = lock(&self.worker);
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                log::warn!("pull loop is already running");
                return;
            }
        }

        let generation = self.shared.generation.load(Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let sink = Arc::clone(&self.sink);
        let recorder = self.recorder.clone();
        let encode = self.encode;
        let kind = self.kind;
        *slot = Some(std::thread::spawn(move || {
            run_pull_loop(shared, sink, recorder, encode, kind, generation);
        }));
    }

    /// Whether the background worker has exited (or never started).
    pub fn worker_finished(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }

    pub fn on_play_btn(&self) {
        let mut state = lock(&self.shared.state);
        if *state != PlaybackState::Playing {
            *state = PlaybackState::Playing;
            self.shared.gate.open();
        }
    }

    pub fn on_pause_btn(&self) {
        *lock(&self.shared.state) = PlaybackState::Paused;
        self.shared.gate.close();
    }

    /// Synchronous stop: cancels the worker, waits for it to exit, then
    /// releases the device and emits the shutdown notification. The
    /// generation bump doubles as the fresh token for a later restart.
    pub fn on_stop_btn(&self) {
        *lock(&self.shared.state) = PlaybackState::Stopped;
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.gate.open();

        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        lock(&self.shared.device).close();
        self.sink.send(OutboundMessage::Closed);
    }

    /// Step one frame forward (file sources): pause, clamp, emit the frame
    /// at the new position.
    pub fn on_next_btn(&self) -> Result<(), EngineError> {
        self.require_file("frame stepping on a live camera")?;
        self.on_pause_btn();
        self.step(1)
    }

    /// Step one frame back (file sources).
    pub fn on_previous_btn(&self) -> Result<(), EngineError> {
        self.require_file("frame stepping on a live camera")?;
        self.on_pause_btn();
        self.step(-1)
    }

    /// Seek to an arbitrary frame, preserving Playing/Paused across the
    /// reposition. Emits nothing.
    pub fn on_slider_value_changed(&self, frame_index: u64) -> Result<(), EngineError> {
        self.require_file("seeking on a live camera")?;
        let was_playing = self.playback_state() == PlaybackState::Playing;
        self.on_pause_btn();
        {
            let mut device = lock(&self.shared.device);
            let target = frame_index.min(device.frame_count());
            device.seek(target);
        }
        if was_playing {
            self.on_play_btn();
        }
        Ok(())
    }

    /// Re-emit the frame at the current position without advancing.
    pub fn send_current_frame(&self) -> Result<(), EngineError> {
        self.require_file("re-emitting a frame on a live camera")?;
        let frame = {
            let mut device = lock(&self.shared.device);
            if !device.is_open() {
                return Err(EngineError::StreamRead("device is not open".to_string()));
            }
            let position = device.position();
            read_frame_at(&mut **device, position)?
        };
        self.emit_single(frame)
    }

    pub fn current_frame_position(&self) -> u64 {
        lock(&self.shared.device).position()
    }

    /// Swap in a new source target. Validation happens before anything is
    /// disturbed; an invalid target leaves playback untouched. On success
    /// the old worker is halted, the new source opened and marked freshly
    /// loaded, playback paused, and the loop relaunched.
    pub fn load_request(&self, target: &str) -> Result<(), EngineError> {
        self.require_file("loading a source into a live camera")?;
        {
            let mut device = lock(&self.shared.device);
            device.retarget(target)?;
        }
        self.halt_worker();
        self.init()?;
        self.shared.freshly_loaded.store(true, Ordering::SeqCst);
        self.on_pause_btn();
        self.start_playing();
        Ok(())
    }

    /// CameraAction Stop: full stop, plus closing any open recording clip.
    pub fn stop_camera(&self) {
        self.on_stop_btn();
        log::info!("stop camera - closing instance");
        if let Some(recorder) = &self.recorder {
            if let Err(err) = lock(recorder).stop_recording(self.sink.as_ref()) {
                log::error!("closing recording clip failed: {err}");
            }
        }
    }

    /// Open a recording clip, optionally switching the configured output
    /// path first. Camera engines only.
    pub fn start_recording(&self, path_override: Option<&str>) -> Result<(), EngineError> {
        let recorder = self
            .recorder
            .as_ref()
            .ok_or(EngineError::Unsupported("recording on this source"))?;
        let mut recorder = lock(recorder);
        if let Some(path) = path_override {
            recorder.set_output_path(path);
        }
        recorder.start_recording()
    }

    /// Close the open clip and report its path; no-op when none is open.
    pub fn stop_recording(&self) -> Result<(), EngineError> {
        let recorder = self
            .recorder
            .as_ref()
            .ok_or(EngineError::Unsupported("recording on this source"))?;
        lock(recorder).stop_recording(self.sink.as_ref())
    }

    fn require_file(&self, what: &'static str) -> Result<(), EngineError> {
        if self.kind == SourceKind::File {
            Ok(())
        } else {
            Err(EngineError::Unsupported(what))
        }
    }

    /// Cancel and join the current worker, if any.
    fn halt_worker(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            self.shared.gate.open();
            let _ = handle.join();
        }
    }

    /// Seek-and-emit for the step operations. The target is clamped to
    /// `[0, frame_count]`; stepping past the end emits nothing.
    fn step(&self, delta: i64) -> Result<(), EngineError> {
        let frame = {
            let mut device = lock(&self.shared.device);
            if !device.is_open() {
                return Err(EngineError::StreamRead("device is not open".to_string()));
            }
            let position = device.position();
            let target = if delta >= 0 {
                position.saturating_add(delta as u64).min(device.frame_count())
            } else {
                position.saturating_sub(delta.unsigned_abs())
            };
            read_frame_at(&mut **device, target)?
        };
        self.emit_single(frame)
    }

    fn emit_single(&self, frame: Option<(RawFrame, u64)>) -> Result<(), EngineError> {
        let Some((raw, position)) = frame else {
            return Ok(());
        };
        let data = encode_jpeg(&raw, &self.encode)?;
        self.sink.send(OutboundMessage::CameraFrame {
            data,
            position: position.to_string(),
        });
        Ok(())
    }
}

/// Seek, read one frame, and seek back so the position rests at `target`.
/// One critical section: the caller holds the device lock. Returns `None`
/// past the end of the stream (a clamped step, not an error).
fn read_frame_at(
    device: &mut dyn CaptureDevice,
    target: u64,
) -> Result<Option<(RawFrame, u64)>, EngineError> {
    let target = target.min(device.frame_count());
    if !device.seek(target) {
        return Err(EngineError::Unsupported("seeking on this source"));
    }
    match device.read_raw()? {
        Some(raw) => {
            device.seek(target);
            Ok(Some((raw, target)))
        }
        None => Ok(None),
    }
}

/// The background pull loop.
fn run_pull_loop(
    shared: Arc<EngineShared>,
    sink: Arc<dyn MessageSink>,
    recorder: Option<Arc<Mutex<Recorder>>>,
    encode: EncodeSettings,
    kind: SourceKind,
    generation: u64,
) {
    // A freshly loaded source was already initialized by the load request.
    if !shared.freshly_loaded.load(Ordering::SeqCst) {
        let mut device = lock(&shared.device);
        if let Err(err) = device.open() {
            drop(device);
            log::error!("fatal: couldn't open video stream: {err}");
            if kind == SourceKind::Camera {
                let path = recorder
                    .as_ref()
                    .map(|rec| lock(rec).output_path().to_string())
                    .unwrap_or_default();
                sink.send(OutboundMessage::CameraAction(CameraActionMessage::error(
                    "Failed to open camera",
                    path,
                )));
            }
            return;
        }
        shared
            .frame_count
            .store(device.frame_count(), Ordering::SeqCst);
    }

    // Device is open; an open gate means playback starts immediately.
    if shared.gate.is_open() {
        *lock(&shared.state) = PlaybackState::Playing;
    }

    log::info!("start reading from video stream");
    loop {
        shared.gate.wait_open();
        if shared.generation.load(Ordering::SeqCst) != generation {
            break;
        }

        let pulled = {
            let mut device = lock(&shared.device);
            if !device.is_open() {
                break;
            }
            let result = device.read_raw();
            (result, device.position())
        };
        match pulled.0 {
            Ok(Some(raw)) => match encode_jpeg(&raw, &encode) {
                Ok(data) => {
                    if let Some(recorder) = &recorder {
                        let mut recorder = lock(recorder);
                        if let Err(err) = recorder.on_frame_captured(&data, sink.as_ref()) {
                            log::error!("recording frame failed: {err}");
                            sink.send(OutboundMessage::CameraAction(
                                CameraActionMessage::error(
                                    err.to_string(),
                                    recorder.output_path().to_string(),
                                ),
                            ));
                        }
                    }
                    sink.send(OutboundMessage::CameraFrame {
                        data,
                        position: pulled.1.to_string(),
                    });
                }
                Err(err) => log::error!("frame encode failed: {err}"),
            },
            Ok(None) => {
                log::error!("video stream returned empty frame");
                shared.auto_pause();
                continue;
            }
            Err(err) => {
                log::error!("video stream read failed: {err}");
                shared.auto_pause();
                continue;
            }
        }

        let fps = shared.fps.load(Ordering::SeqCst).max(1);
        std::thread::sleep(Duration::from_millis(u64::from(MILLIS_PER_SECOND / fps)));
        if shared.generation.load(Ordering::SeqCst) != generation {
            break;
        }
    }

    shared.freshly_loaded.store(false, Ordering::SeqCst);
    log::info!("pull loop exited");
}

/// Poisoning is unrecoverable here; keep the surviving data and continue.
fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
