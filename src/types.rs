//! Core data types shared across the transport, coordinator, and detector
//! pipeline: frames, regions of interest, detection configuration, droplet
//! measurements, and per-module device state.

use serde::{Deserialize, Serialize};

/// A captured RGB frame, read-only after capture. Ownership passes from the
/// camera adapter to the frame queue to the detector exactly once.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Frame height in pixels.
    pub height: u32,
    /// Frame width in pixels.
    pub width: u32,
    /// Interleaved 8-bit RGB pixel data, length `height * width * 3`.
    pub pixels: Vec<u8>,
    /// Monotonic capture timestamp, nanoseconds since the acquisition clock's epoch.
    pub timestamp_ns: u64,
    /// Strictly increasing sequence number assigned by the camera adapter.
    pub sequence: u64,
}

impl Frame {
    /// Builds a frame, panicking if `pixels` does not match `height * width * 3`.
    ///
    /// Adapters construct frames from a backend's own buffer; a length
    /// mismatch there is a backend bug, not a runtime condition callers
    /// should handle.
    pub fn new(height: u32, width: u32, pixels: Vec<u8>, timestamp_ns: u64, sequence: u64) -> Self {
        assert_eq!(
            pixels.len(),
            height as usize * width as usize * 3,
            "frame buffer size does not match height*width*3"
        );
        Self {
            height,
            width,
            pixels,
            timestamp_ns,
            sequence,
        }
    }
}

/// A region of interest in source-frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Roi {
    /// Validates the ROI against a frame of the given dimensions: non-degenerate
    /// (`w, h >= 10`) and fully contained within `(frame_width, frame_height)`.
    pub fn validate(&self, frame_width: u32, frame_height: u32) -> Result<(), String> {
        if self.w < 10 || self.h < 10 {
            return Err(format!(
                "roi {}x{} smaller than the 10x10 minimum",
                self.w, self.h
            ));
        }
        if self.x.saturating_add(self.w) > frame_width || self.y.saturating_add(self.h) > frame_height
        {
            return Err(format!(
                "roi ({}, {}, {}, {}) exceeds frame bounds {}x{}",
                self.x, self.y, self.w, self.h, frame_width, frame_height
            ));
        }
        Ok(())
    }
}

/// Threshold mode selected by the detection configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    Otsu,
    Adaptive,
}

/// Background estimation method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMethod {
    Static,
    HighPass,
}

/// Morphological cleanup applied to the binary mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MorphologyOp {
    Open,
    Close,
    Both,
}

/// Downstream direction used by the motion gate (C8) to decide which
/// contours are "arriving" versus "leaving" the observed channel band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    Increasing,
    Decreasing,
}

/// Motion gate parameters (C8): rejects contours whose apparent motion does
/// not match the configured downstream direction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionGateConfig {
    pub direction: FlowDirection,
    /// Minimum centroid displacement, in pixels, between consecutive frames
    /// for a contour to be considered "moving" rather than a static artifact.
    pub min_displacement_px: f32,
    /// Radius, in pixels, within which a historical centroid is considered
    /// "the same feature" as a candidate rather than a newly entering
    /// droplet with no prior history to compare against.
    #[serde(default = "default_motion_gate_radius_px")]
    pub radius_px: f32,
}

fn default_motion_gate_radius_px() -> f32 {
    12.0
}

/// Immutable detection configuration, swapped atomically by the supervisor.
/// The detector reads one stable snapshot per frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub threshold_mode: ThresholdMode,
    pub background_method: BackgroundMethod,
    pub morphology_op: MorphologyOp,
    pub morphology_kernel: u32,
    pub min_area_px2: f32,
    pub max_area_px2: f32,
    pub min_aspect_ratio: f32,
    pub max_aspect_ratio: f32,
    /// Optional vertical band, in ROI coordinates, outside which contours are ignored.
    pub channel_band: Option<(u32, u32)>,
    /// Process every Nth frame; 1 means every frame.
    pub frame_skip: u32,
    /// Micrometres per pixel, used to convert pixel measurements to physical units.
    pub pixel_ratio_um: f32,
    pub unit_label: String,
    pub motion_gate: MotionGateConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold_mode: ThresholdMode::Otsu,
            background_method: BackgroundMethod::Static,
            morphology_op: MorphologyOp::Both,
            morphology_kernel: 3,
            min_area_px2: 25.0,
            max_area_px2: 200_000.0,
            min_aspect_ratio: 0.1,
            max_aspect_ratio: 10.0,
            channel_band: None,
            frame_skip: 1,
            pixel_ratio_um: 1.0,
            unit_label: "um".to_string(),
            motion_gate: MotionGateConfig {
                direction: FlowDirection::Increasing,
                min_displacement_px: 0.5,
                radius_px: default_motion_gate_radius_px(),
            },
        }
    }
}

/// A single droplet measurement, immutable once produced by the measurer (C9).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DropletMeasurement {
    pub area_px2: f32,
    pub major_axis_px: f32,
    pub minor_axis_px: f32,
    pub equivalent_diameter_px: f32,
    pub aspect_ratio: f32,
    pub centroid: (f32, f32),
    pub bbox: (u32, u32, u32, u32),
    pub frame_seq: u64,
}

/// Coarse lifecycle state reported by the supervisor's status record (C17).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initialized,
    Configured,
    Armed,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Strobe device state, mirrored from firmware (§3, §6).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StrobeState {
    pub wait_ns: u32,
    pub duration_ns: u32,
    pub enabled: bool,
    pub trigger_mode_hardware: bool,
    pub cam_read_time_us: u16,
}

/// Flow-channel device state, mirrored from firmware (C13).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    pub pressure_mode: bool,
    pub pressure_target: f32,
    pub pressure_actual: f32,
    pub flow_target: f32,
    pub flow_actual: f32,
    pub pid_kp: f32,
    pub pid_ki: f32,
    pub pid_kd: f32,
}

/// Heater device state, mirrored from firmware (C14).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaterState {
    pub temp_target: f32,
    pub temp_actual: f32,
    pub pid_running: bool,
    pub autotune_running: bool,
    pub stir_running: bool,
    pub stir_speed: f32,
    pub power_limit: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_rejects_undersized() {
        let roi = Roi { x: 0, y: 0, w: 5, h: 20 };
        assert!(roi.validate(640, 480).is_err());
    }

    #[test]
    fn test_roi_rejects_out_of_bounds() {
        let roi = Roi { x: 600, y: 0, w: 100, h: 100 };
        assert!(roi.validate(640, 480).is_err());
    }

    #[test]
    fn test_roi_accepts_valid() {
        let roi = Roi { x: 10, y: 10, w: 100, h: 100 };
        assert!(roi.validate(640, 480).is_ok());
    }

    #[test]
    fn test_detection_config_default_is_sane() {
        let cfg = DetectionConfig::default();
        assert!(cfg.min_area_px2 < cfg.max_area_px2);
        assert!(cfg.frame_skip >= 1);
    }
}
