//! framecastd - video capture/playback daemon.
//!
//! Wires one capture engine to an MQTT dispatcher:
//! 1. Resolves configuration (CLI flags, env vars, optional JSON file)
//! 2. Builds the camera or file engine and, in camera mode, the recorder
//! 3. Bootstraps playback per the configured mode (normal / pause / waiting)
//! 4. Relays control messages from `{prefix}/control/<Name>` topics and
//!    publishes frames and status messages outward

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{mqttbytes::QoS, Client, Event, MqttOptions};
use serde_json::json;

use framecast::config::DEFAULT_FILE_FPS;
use framecast::{
    CameraSettings, CameraSource, CaptureEngine, CommandRouter, ConfigOverrides, ControlCommand,
    EncodeSettings, EngineConfig, FileSource, MessageSink, OutboundMessage, PassthroughResolver,
    PlaybackState, SourceKind,
};

const DAEMON_NAME: &str = "framecastd";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Stream a camera or video file to the message dispatcher"
)]
struct Args {
    /// Frame width (camera mode; also the resize target).
    #[arg(short = 'w', long, env = "FRAMECAST_WIDTH")]
    width: Option<u32>,

    /// Frame height (camera mode; also the resize target).
    #[arg(long, env = "FRAMECAST_HEIGHT")]
    height: Option<u32>,

    /// Disable camera auto-focus (camera mode).
    #[arg(long, env = "FRAMECAST_DISABLE_AUTO_FOCUS")]
    disable_auto_focus: bool,

    /// Frames per second (defaults: 10 for cameras, 100 for files).
    #[arg(short = 'f', long, env = "FRAMECAST_FPS")]
    fps: Option<u32>,

    /// Video file or URI to stream (file mode). Unset selects camera mode.
    #[arg(short = 'p', long, env = "FRAMECAST_VIDEO_PATH")]
    video_path: Option<String>,

    /// Camera device node (camera mode).
    #[arg(long, env = "FRAMECAST_CAMERA_DEVICE")]
    camera_device: Option<String>,

    /// Show a debug window displaying frames.
    #[arg(long, env = "FRAMECAST_SHOW_DEBUG_WINDOW")]
    show_debug_window: bool,

    /// Start paused; playback waits for a Play command.
    #[arg(long, env = "FRAMECAST_PAUSE_MODE")]
    pause_mode: bool,

    /// Start with no source; playback waits for a LoadRequest command.
    #[arg(long, env = "FRAMECAST_WAITING_MODE")]
    waiting_mode: bool,

    /// Output file the camera stream is recorded to (camera mode).
    #[arg(long, env = "FRAMECAST_OUTPUT_VIDEO_PATH")]
    output_video_path: Option<String>,

    /// Max recorded clip duration in seconds, 0 = unlimited (camera mode).
    #[arg(long, env = "FRAMECAST_MAX_CLIP_DURATION")]
    max_clip_duration: Option<u32>,

    /// Resize frames to width x height before encoding.
    #[arg(long, env = "FRAMECAST_RESIZE_IMAGE")]
    resize_image: bool,

    /// Optional JSON config file; CLI flags win over file values.
    #[arg(long, env = "FRAMECAST_CONFIG")]
    config: Option<PathBuf>,

    /// MQTT broker address.
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    mqtt_broker_addr: String,

    /// Allow non-loopback MQTT connections.
    #[arg(long, env = "ALLOW_REMOTE_MQTT")]
    allow_remote_mqtt: bool,

    /// MQTT topic prefix.
    #[arg(long, env = "MQTT_TOPIC_PREFIX", default_value = "framecast")]
    mqtt_topic_prefix: String,

    /// MQTT client identifier.
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = DAEMON_NAME)]
    mqtt_client_id: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            width: self.width,
            height: self.height,
            disable_auto_focus: self.disable_auto_focus.then_some(true),
            fps: self.fps,
            video_path: self.video_path.clone(),
            camera_device: self.camera_device.clone(),
            show_debug_window: self.show_debug_window.then_some(true),
            pause_mode: self.pause_mode.then_some(true),
            waiting_mode: self.waiting_mode.then_some(true),
            output_video_path: self.output_video_path.clone(),
            max_clip_duration_secs: self.max_clip_duration,
            resize_image: self.resize_image.then_some(true),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let file_overrides = match &args.config {
        Some(path) => ConfigOverrides::from_file(path)?,
        None => ConfigOverrides::default(),
    };
    let cfg = EngineConfig::resolve(args.overrides().or(file_overrides))?;

    let (host, port) = split_host_port(&args.mqtt_broker_addr)?;
    if !args.allow_remote_mqtt {
        validate_loopback(&host, &args.mqtt_broker_addr)?;
    } else {
        log::warn!("remote MQTT enabled - ensure the broker is in a trusted network");
    }

    let mut options = MqttOptions::new(&args.mqtt_client_id, &host, port);
    options.set_keep_alive(Duration::from_secs(60));
    let (client, mut connection) = Client::new(options, 64);

    let sink = Arc::new(MqttSink {
        client: client.clone(),
        prefix: args.mqtt_topic_prefix.clone(),
    });
    let engine = Arc::new(build_engine(&cfg, sink.clone())?);
    bootstrap(&cfg, &engine, sink.clone());

    let router = CommandRouter::new(Arc::clone(&engine), sink);

    let control_topic = format!("{}/control/#", args.mqtt_topic_prefix);
    client
        .subscribe(&control_topic, QoS::AtLeastOnce)
        .context("subscribe to control topics")?;
    log::info!("listening for control messages on {control_topic}");

    {
        let engine = Arc::clone(&engine);
        let client = client.clone();
        ctrlc::set_handler(move || {
            log::info!("interrupt received, stopping");
            engine.on_stop_btn();
            let _ = client.disconnect();
        })
        .context("install interrupt handler")?;
    }

    let control_prefix = format!("{}/control/", args.mqtt_topic_prefix);
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic = String::from_utf8_lossy(&publish.topic).into_owned();
                let Some(name) = topic.strip_prefix(&control_prefix) else {
                    continue;
                };
                match ControlCommand::parse(name, &publish.payload) {
                    Ok(command) => router.dispatch(command),
                    Err(err) => log::error!("{err}"),
                }
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("MQTT connection error: {err}");
                break;
            }
        }
    }

    if engine.playback_state() != PlaybackState::Stopped {
        engine.on_stop_btn();
    }
    Ok(())
}

fn build_engine(cfg: &EngineConfig, sink: Arc<MqttSink>) -> Result<CaptureEngine> {
    let encode = EncodeSettings {
        resize: cfg.resize_image,
        width: cfg.width,
        height: cfg.height,
    };

    if cfg.waiting_mode {
        // No source yet: an empty file engine that waits for LoadRequest.
        let device = Box::new(FileSource::new(
            "",
            f64::from(DEFAULT_FILE_FPS),
            Arc::new(PassthroughResolver),
        ));
        return Ok(CaptureEngine::new(device, sink, encode, DEFAULT_FILE_FPS));
    }

    let fps = cfg.effective_fps();
    if cfg.is_camera_mode() {
        let settings = CameraSettings {
            device: cfg.camera_device.clone(),
            width: cfg.width,
            height: cfg.height,
            auto_focus: !cfg.disable_auto_focus,
            fps,
        };
        let device =
            Box::new(CameraSource::new(settings).context("initialize video capture")?);
        let engine = CaptureEngine::new(device, sink, encode, fps);
        return Ok(attach_recorder(engine, cfg, fps));
    }

    let device = Box::new(FileSource::new(
        &cfg.video_path,
        f64::from(fps),
        Arc::new(PassthroughResolver),
    ));
    Ok(CaptureEngine::new(device, sink, encode, fps))
}

#[cfg(feature = "record-ffmpeg")]
fn attach_recorder(engine: CaptureEngine, cfg: &EngineConfig, fps: u32) -> CaptureEngine {
    use framecast::{FfmpegClipWriter, Recorder, RecorderSettings};

    let output_path = if cfg.output_video_path.is_empty() {
        String::new()
    } else {
        std::path::absolute(&cfg.output_video_path)
            .map(|path| path.display().to_string())
            .unwrap_or_else(|_| cfg.output_video_path.clone())
    };
    let settings = RecorderSettings {
        output_path,
        fps,
        max_clip_secs: cfg.max_clip_duration_secs,
        width: cfg.width,
        height: cfg.height,
    };
    engine.with_recorder(Recorder::new(settings, Box::new(FfmpegClipWriter::new())))
}

#[cfg(not(feature = "record-ffmpeg"))]
fn attach_recorder(engine: CaptureEngine, cfg: &EngineConfig, _fps: u32) -> CaptureEngine {
    if !cfg.output_video_path.is_empty() {
        log::warn!("recording requested but framecastd was built without record-ffmpeg");
    }
    engine
}

/// Start playback per the configured mode.
fn bootstrap(cfg: &EngineConfig, engine: &Arc<CaptureEngine>, sink: Arc<MqttSink>) {
    if cfg.show_debug_window {
        log::warn!("debug window is not available in this build");
    }

    if cfg.waiting_mode {
        log::info!("waiting for LoadRequest message");
        return;
    }

    if cfg.pause_mode && engine.kind() == SourceKind::File {
        if let Err(err) = engine.init() {
            log::error!("fatal: failed to initialize video capture - {err}");
        }
        engine.on_pause_btn();
        engine.start_playing();
        log::info!("waiting for Play message");
        return;
    }

    if engine.kind() == SourceKind::Camera
        && !cfg.pause_mode
        && !cfg.output_video_path.is_empty()
    {
        if let Err(err) = engine.start_recording(None) {
            log::error!("failed to start recording: {err}");
        }
    }
    engine.start_playing();

    // Notify the dispatcher when the capture loop ends on its own; a
    // stop-command shutdown already reports through the engine.
    let engine = Arc::clone(engine);
    std::thread::spawn(move || {
        while !engine.worker_finished() {
            std::thread::sleep(Duration::from_millis(250));
        }
        if engine.playback_state() != PlaybackState::Stopped {
            sink.send(OutboundMessage::Closed);
        }
    });
}

// ----------------------------------------------------------------------------
// MQTT glue
// ----------------------------------------------------------------------------

struct MqttSink {
    client: Client,
    prefix: String,
}

impl MqttSink {
    fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.prefix, suffix)
    }
}

impl MessageSink for MqttSink {
    fn send(&self, message: OutboundMessage) {
        let result = match &message {
            OutboundMessage::CameraFrame { data, position } => self
                .client
                .publish(self.topic("frame"), QoS::AtMostOnce, false, data.clone())
                .and_then(|_| {
                    self.client.publish(
                        self.topic("frame/position"),
                        QoS::AtMostOnce,
                        false,
                        position.clone().into_bytes(),
                    )
                }),
            OutboundMessage::CameraAction(action) => match action.encode() {
                Ok(bytes) => {
                    self.client
                        .publish(self.topic("camera-action"), QoS::AtLeastOnce, false, bytes)
                }
                Err(err) => {
                    log::error!("{err}");
                    return;
                }
            },
            other => self.client.publish(
                self.topic("events"),
                QoS::AtLeastOnce,
                false,
                envelope_json(other).to_string().into_bytes(),
            ),
        };
        if let Err(err) = result {
            log::warn!("failed to publish {}: {err}", message.name());
        }
    }
}

fn envelope_json(message: &OutboundMessage) -> serde_json::Value {
    match message {
        OutboundMessage::TotalVideoFrames(count) => {
            json!({"type": message.name(), "value": count})
        }
        OutboundMessage::PathStatus(status) => json!({"type": message.name(), "value": status}),
        OutboundMessage::FpsStatus(fps) => json!({"type": message.name(), "value": fps}),
        OutboundMessage::CameraClipClosed(path) => {
            json!({"type": message.name(), "value": path})
        }
        _ => json!({"type": message.name()}),
    }
}

// ----------------------------------------------------------------------------
// Broker address handling
// ----------------------------------------------------------------------------

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let mut remainder = addr.trim();
    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    if let Some(rest) = remainder.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = remainder
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}

fn validate_loopback(host: &str, original: &str) -> Result<()> {
    if host == "localhost" {
        return Ok(());
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        if ip.is_loopback() {
            return Ok(());
        }
    }
    Err(anyhow!(
        "MQTT broker must be loopback: {} (use --allow-remote-mqtt to override)",
        original
    ))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_host_port_accepts_plain_and_scheme_forms() {
        assert_eq!(
            split_host_port("127.0.0.1:1883").unwrap(),
            ("127.0.0.1".to_string(), 1883)
        );
        assert_eq!(
            split_host_port("mqtt://broker.local:1883").unwrap(),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(
            split_host_port("[::1]:1883").unwrap(),
            ("::1".to_string(), 1883)
        );
    }

    #[test]
    fn split_host_port_rejects_missing_port() {
        assert!(split_host_port("127.0.0.1").is_err());
        assert!(split_host_port("mqtts://secure.local:8883").is_err());
    }

    #[test]
    fn loopback_validation() {
        assert!(validate_loopback("127.0.0.1", "127.0.0.1:1883").is_ok());
        assert!(validate_loopback("localhost", "localhost:1883").is_ok());
        assert!(validate_loopback("::1", "[::1]:1883").is_ok());
        assert!(validate_loopback("192.168.1.10", "192.168.1.10:1883").is_err());
    }
}
