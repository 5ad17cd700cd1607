//! V4L2 camera backend.
//!
//! Drives a local device node (e.g. /dev/video0) through libv4l: negotiates
//! RGB24 at the requested resolution and frame rate, applies the auto-focus
//! setting, and captures through a memory-mapped buffer stream.

use anyhow::Context as _;
use ouroboros::self_referencing;

use crate::error::EngineError;
use crate::frame::RawFrame;
use crate::source::camera::CameraSettings;

const V4L2_CID_FOCUS_AUTO: u32 = 0x009a_090c;

pub(crate) struct DeviceCamera {
    settings: CameraSettings,
    state: Option<DeviceState>,
    active_width: u32,
    active_height: u32,
    active_fps: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceCamera {
    pub(crate) fn new(settings: CameraSettings) -> Self {
        Self {
            active_width: settings.width,
            active_height: settings.height,
            active_fps: settings.fps,
            settings,
            state: None,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.is_some()
    }

    pub(crate) fn native_fps(&self) -> f64 {
        f64::from(self.active_fps)
    }

    pub(crate) fn open(&mut self) -> Result<(), EngineError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        if self.state.is_some() {
            return Ok(());
        }

        let open = || -> anyhow::Result<DeviceState> {
            let mut device = v4l::Device::with_path(&self.settings.device)
                .with_context(|| format!("open v4l2 device {}", self.settings.device))?;

            let mut format = device.format().context("read v4l2 format")?;
            format.width = self.settings.width;
            format.height = self.settings.height;
            format.fourcc = v4l::FourCC::new(b"RGB3");
            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!(
                        "CameraSource: failed to set format on {}: {}",
                        self.settings.device,
                        err
                    );
                    device
                        .format()
                        .context("read v4l2 format after set failure")?
                }
            };
            self.active_width = format.width;
            self.active_height = format.height;

            if self.settings.fps > 0 {
                let params = v4l::video::capture::Parameters::with_fps(self.settings.fps);
                if let Err(err) = device.set_params(&params) {
                    log::warn!(
                        "CameraSource: failed to set fps on {}: {}",
                        self.settings.device,
                        err
                    );
                }
            }

            let focus = v4l::control::Control {
                id: V4L2_CID_FOCUS_AUTO,
                value: v4l::control::Value::Boolean(self.settings.auto_focus),
            };
            if let Err(err) = device.set_control(focus) {
                log::warn!(
                    "CameraSource: failed to set auto-focus on {}: {}",
                    self.settings.device,
                    err
                );
            }

            DeviceStateBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| {
                            anyhow::Error::new(err).context("create v4l2 buffer stream")
                        })
                },
            }
            .try_build()
        };

        match open() {
            Ok(state) => {
                self.state = Some(state);
                log::info!(
                    "CameraSource: opened {} ({}x{} @ {} fps)",
                    self.settings.device,
                    self.active_width,
                    self.active_height,
                    self.active_fps
                );
                Ok(())
            }
            Err(err) => Err(EngineError::DeviceOpen(format!(
                "failed to open camera {}: {err:#}",
                self.settings.device
            ))),
        }
    }

    pub(crate) fn read_raw(&mut self) -> Result<Option<RawFrame>, EngineError> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Err(EngineError::StreamRead("camera is not open".to_string()));
        };

        let frame = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, _meta)| buf.to_vec())
        });
        match frame {
            Ok(pixels) if pixels.is_empty() => Ok(None),
            Ok(pixels) => Ok(Some(RawFrame::new(
                pixels,
                self.active_width,
                self.active_height,
            ))),
            Err(err) => Err(EngineError::StreamRead(format!(
                "capture v4l2 frame: {err}"
            ))),
        }
    }

    pub(crate) fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("CameraSource: closed {}", self.settings.device);
        }
    }
}
