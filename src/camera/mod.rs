//! Camera adapter (C4): pluggable frame sources behind one trait, so the
//! coordinator and supervisor don't care whether frames come from a Pi CSI
//! camera, a V4L2 machine-vision camera, or the simulated backend used in
//! tests.

pub mod machine_vision;
pub mod pi;
pub mod simulated;

use crate::error::DropError;
use crate::types::{Frame, Roi};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use simulated::SimulatedCamera;

/// Invoked once per captured frame, on the capture thread, after the pixel
/// buffer is ready but before the frame is handed to consumers. Must not
/// block for longer than one frame period (§4.4).
pub type FrameHook = Arc<dyn Fn(&Frame) + Send + Sync>;

/// A pluggable source of [`Frame`]s.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn start(&mut self) -> Result<(), DropError>;
    async fn stop(&mut self) -> Result<(), DropError>;
    async fn close(&mut self) -> Result<(), DropError>;

    async fn capture_full(&mut self) -> Result<Frame, DropError>;
    async fn capture_roi(&mut self, roi: Roi) -> Result<Frame, DropError>;

    /// Installs (or clears, with `None`) the per-frame callback.
    fn set_frame_callback(&mut self, hook: Option<FrameHook>);

    /// Backend capability flags: `hardware_roi`, `hardware_trigger`, etc.
    fn list_features(&self) -> HashMap<String, bool>;

    /// Attempts to crop before readout in hardware. Returns `Ok(false)` (not
    /// an error) when the backend has no such capability — callers fall back
    /// to software cropping via [`Camera::capture_roi`].
    async fn set_hardware_roi(&mut self, _roi: Roi) -> Result<bool, DropError> {
        Ok(false)
    }
}

/// Crops `frame` to `roi` in software, the fallback path used by any backend
/// without hardware ROI support.
pub fn software_crop(frame: &Frame, roi: Roi) -> Result<Frame, DropError> {
    roi.validate(frame.width, frame.height)
        .map_err(DropError::Capture)?;

    let mut pixels = Vec::with_capacity(roi.w as usize * roi.h as usize * 3);
    for row in roi.y..roi.y + roi.h {
        let row_start = (row * frame.width + roi.x) as usize * 3;
        let row_end = row_start + roi.w as usize * 3;
        pixels.extend_from_slice(&frame.pixels[row_start..row_end]);
    }

    Ok(Frame {
        height: roi.h,
        width: roi.w,
        pixels,
        timestamp_ns: frame.timestamp_ns,
        sequence: frame.sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_software_crop_extracts_expected_region() {
        let width = 4u32;
        let height = 4u32;
        let mut pixels = vec![0u8; (width * height * 3) as usize];
        // Mark pixel (1,1) distinctly so the crop can be checked precisely.
        let idx = ((1 * width + 1) * 3) as usize;
        pixels[idx] = 255;

        let frame = Frame::new(height, width, pixels, 0, 0);
        let roi = Roi { x: 1, y: 1, w: 2, h: 2 };
        let cropped = software_crop(&frame, roi).unwrap();
        assert_eq!(cropped.width, 2);
        assert_eq!(cropped.height, 2);
        assert_eq!(cropped.pixels[0], 255);
    }

    #[test]
    fn test_software_crop_rejects_out_of_bounds_roi() {
        let frame = Frame::new(4, 4, vec![0u8; 48], 0, 0);
        let roi = Roi { x: 0, y: 0, w: 100, h: 100 };
        assert!(software_crop(&frame, roi).is_err());
    }
}
