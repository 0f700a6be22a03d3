//! Raspberry Pi CSI camera backend (`camera_v4l` feature): the legacy and
//! v2 Pi cameras both expose themselves as V4L2 devices once the
//! `bcm2835-v4l2` kernel module is loaded, so both variants share this
//! implementation and differ only in their default resolution/format.

use crate::camera::{Camera, FrameHook};
use crate::error::DropError;
use crate::types::{Frame, Roi};
use async_trait::async_trait;
use log::warn;
use std::collections::HashMap;

#[cfg(feature = "camera_v4l")]
use v4l::buffer::Type as BufferType;
#[cfg(feature = "camera_v4l")]
use v4l::io::traits::CaptureStream;
#[cfg(feature = "camera_v4l")]
use v4l::prelude::*;
#[cfg(feature = "camera_v4l")]
use v4l::video::Capture;

/// Distinguishes the legacy Pi camera module from the v2 module; both speak
/// V4L2, but their sensor-native resolutions differ.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PiCameraVariant {
    Legacy,
    V2,
}

impl PiCameraVariant {
    fn native_resolution(self) -> (u32, u32) {
        match self {
            PiCameraVariant::Legacy => (2592, 1944),
            PiCameraVariant::V2 => (3280, 2464),
        }
    }
}

#[cfg(feature = "camera_v4l")]
pub struct PiCamera {
    device: v4l::Device,
    stream: Option<v4l::io::mmap::Stream<'static>>,
    width: u32,
    height: u32,
    sequence: u64,
    hook: Option<FrameHook>,
}

#[cfg(feature = "camera_v4l")]
impl PiCamera {
    pub fn open(device_path: &str, variant: PiCameraVariant, width: u32, height: u32) -> Result<Self, DropError> {
        let device = v4l::Device::with_path(device_path)
            .map_err(|e| DropError::Capture(format!("failed to open {device_path}: {e}")))?;

        let mut format = device
            .format()
            .map_err(|e| DropError::Capture(format!("failed to query format: {e}")))?;
        format.width = width;
        format.height = height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        device
            .set_format(&format)
            .map_err(|e| DropError::Capture(format!("failed to set format: {e}")))?;

        let (native_w, native_h) = variant.native_resolution();
        if width > native_w || height > native_h {
            warn!("requested {width}x{height} exceeds {variant:?} native {native_w}x{native_h}");
        }

        Ok(Self {
            device,
            stream: None,
            width,
            height,
            sequence: 0,
            hook: None,
        })
    }
}

#[cfg(feature = "camera_v4l")]
#[async_trait]
impl Camera for PiCamera {
    async fn start(&mut self) -> Result<(), DropError> {
        let stream = v4l::io::mmap::Stream::with_buffers(&self.device, BufferType::VideoCapture, 4)
            .map_err(|e| DropError::Capture(format!("failed to start capture stream: {e}")))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DropError> {
        self.stream = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DropError> {
        self.stream = None;
        Ok(())
    }

    async fn capture_full(&mut self) -> Result<Frame, DropError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DropError::Capture("camera not started".into()))?;
        let (buf, _meta) = stream
            .next()
            .map_err(|e| DropError::Capture(format!("frame read failed: {e}")))?;

        let timestamp_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let frame = Frame::new(self.height, self.width, buf.to_vec(), timestamp_ns, self.sequence);
        self.sequence += 1;

        if let Some(hook) = &self.hook {
            hook(&frame);
        }
        Ok(frame)
    }

    async fn capture_roi(&mut self, roi: Roi) -> Result<Frame, DropError> {
        let frame = self.capture_full().await?;
        crate::camera::software_crop(&frame, roi)
    }

    fn set_frame_callback(&mut self, hook: Option<FrameHook>) {
        self.hook = hook;
    }

    fn list_features(&self) -> HashMap<String, bool> {
        let mut features = HashMap::new();
        features.insert("hardware_roi".to_string(), false);
        features.insert("hardware_trigger".to_string(), false);
        features
    }
}
