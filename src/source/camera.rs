//! Live camera source.
//!
//! Wraps a local camera device (V4L2 when built with `source-v4l2`) or a
//! synthetic `stub://` camera used by tests. Cameras are always "live":
//! frame count is 0, position is 0, seeking is unsupported.
//!
//! Targets understood:
//! - `stub://<name>` - synthetic camera, infinite frames
//! - `stub://fail`   - synthetic camera whose open always fails
//! - anything else   - device node path (e.g. `/dev/video0`)

use crate::error::EngineError;
use crate::frame::RawFrame;
#[cfg(feature = "source-v4l2")]
use crate::source::v4l2::DeviceCamera;
use crate::source::{CaptureDevice, SourceKind};

const STUB_FAIL_TARGET: &str = "stub://fail";

/// Camera settings, fixed for the lifetime of one open device.
#[derive(Clone, Debug)]
pub struct CameraSettings {
    /// Device node path, or a `stub://` target.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub auto_focus: bool,
    pub fps: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1920,
            height: 1280,
            auto_focus: true,
            fps: 10,
        }
    }
}

/// Live camera source.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "source-v4l2")]
    Device(DeviceCamera),
}

impl CameraSource {
    pub fn new(settings: CameraSettings) -> Result<Self, EngineError> {
        if settings.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(settings)),
            });
        }
        #[cfg(feature = "source-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(DeviceCamera::new(settings)),
            })
        }
        #[cfg(not(feature = "source-v4l2"))]
        {
            Err(EngineError::DeviceOpen(format!(
                "camera device {} requires the source-v4l2 feature",
                settings.device
            )))
        }
    }
}

impl CaptureDevice for CameraSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Camera
    }

    fn open(&mut self) -> Result<(), EngineError> {
        // The original desktop implementation disables MSMF hardware
        // transforms before opening; V4L2 has no such quirk to work around.
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.open(),
            #[cfg(feature = "source-v4l2")]
            CameraBackend::Device(camera) => camera.open(),
        }
    }

    fn is_open(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(camera) => camera.open,
            #[cfg(feature = "source-v4l2")]
            CameraBackend::Device(camera) => camera.is_open(),
        }
    }

    fn frame_count(&self) -> u64 {
        0
    }

    fn native_fps(&self) -> f64 {
        match &self.backend {
            CameraBackend::Synthetic(camera) => f64::from(camera.settings.fps),
            #[cfg(feature = "source-v4l2")]
            CameraBackend::Device(camera) => camera.native_fps(),
        }
    }

    fn read_raw(&mut self) -> Result<Option<RawFrame>, EngineError> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.read_raw(),
            #[cfg(feature = "source-v4l2")]
            CameraBackend::Device(camera) => camera.read_raw(),
        }
    }

    fn seek(&mut self, _frame_index: u64) -> bool {
        false
    }

    fn position(&self) -> u64 {
        0
    }

    fn close(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.open = false,
            #[cfg(feature = "source-v4l2")]
            CameraBackend::Device(camera) => camera.close(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    settings: CameraSettings,
    open: bool,
    frames_served: u64,
    scene_state: u8,
}

impl SyntheticCamera {
    fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            open: false,
            frames_served: 0,
            scene_state: 0,
        }
    }

    fn open(&mut self) -> Result<(), EngineError> {
        if self.settings.device == STUB_FAIL_TARGET {
            return Err(EngineError::DeviceOpen(format!(
                "failed to open camera {}",
                self.settings.device
            )));
        }
        if !self.open {
            self.open = true;
            log::info!("CameraSource: opened {} (synthetic)", self.settings.device);
        }
        Ok(())
    }

    fn read_raw(&mut self) -> Result<Option<RawFrame>, EngineError> {
        if !self.open {
            return Err(EngineError::StreamRead("camera is not open".to_string()));
        }
        self.frames_served += 1;
        if self.frames_served % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let pixel_count = (self.settings.width * self.settings.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, px) in pixels.iter_mut().enumerate() {
            *px = ((i as u64 + self.frames_served + self.scene_state as u64) % 256) as u8;
        }
        Ok(Some(RawFrame::new(
            pixels,
            self.settings.width,
            self.settings.height,
        )))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
