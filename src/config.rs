//! Layered configuration surface (C16).
//!
//! Configuration is loaded from a base TOML file, an optional named profile
//! overlay, and environment variables prefixed `DROPCORE_`, in that order of
//! precedence (environment wins). The merged result is validated before it
//! is handed to the rest of the system, so a malformed config fails at
//! startup rather than surfacing as a confusing runtime error later.

use crate::error::{DropError, DropResult};
use crate::types::DetectionConfig;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Control-mode selector for the strobe/camera coordinator (C5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    StrobeClocked,
    CameraClocked,
}

/// Whether ROI cropping happens in hardware (camera-side) or software.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoiMode {
    Software,
    Hardware,
}

/// Camera backend selector (C4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraBackend {
    PiLegacy,
    PiV2,
    MachineVision,
    Simulated,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplicationConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub simulate: bool,
    pub control_mode: ControlMode,
    pub roi_mode: RoiMode,
    #[serde(default)]
    pub flow_enabled: bool,
    #[serde(default)]
    pub heater_enabled: bool,
    #[serde(default = "default_true")]
    pub droplet_enabled: bool,
    #[serde(default = "default_queue_capacity")]
    pub frame_queue_capacity: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    pub serial_device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Chip-select pin assignment, keyed by module name (e.g. "strobe", "flow", "heater0").
    pub chip_select_pins: std::collections::HashMap<String, u8>,
    #[serde(default = "default_bus_timeout_ms")]
    pub timeout_ms: u64,
    /// Per-module minimum reply pause in milliseconds, keyed by the same
    /// module names as `chip_select_pins`. A module with no entry here uses
    /// `default_reply_pause_ms` (§3/§4.2's typical 50-100ms firmware
    /// processing time).
    #[serde(default)]
    pub reply_pause_ms: std::collections::HashMap<String, u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraConfig {
    pub backend: CameraBackend,
    pub default_roi: RoiConfig,
    #[serde(default = "default_frame_rate")]
    pub default_frame_rate_hz: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoiConfig {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GpioConfig {
    #[serde(default = "default_trigger_pin")]
    pub trigger_pin_bcm: u8,
    #[serde(default)]
    pub active_high: bool,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            trigger_pin_bcm: default_trigger_pin(),
            active_high: true,
        }
    }
}

/// The top-level configuration record (§3), loaded once at startup and
/// re-validated on any hot `update_config` call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DropConfig {
    pub application: ApplicationConfig,
    pub bus: BusConfig,
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    #[serde(default)]
    pub gpio: GpioConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    2
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_bus_timeout_ms() -> u64 {
    500
}

/// Reply pause applied to any chip-select module without an explicit
/// `bus.reply_pause_ms` entry.
pub fn default_reply_pause_ms() -> u64 {
    75
}

fn default_frame_rate() -> f32 {
    30.0
}

fn default_trigger_pin() -> u8 {
    18
}

impl DropConfig {
    /// Loads configuration from `base_path`, an optional `profile` overlay
    /// (`<base-stem>.<profile>.toml` alongside `base_path`), and `DROPCORE_*`
    /// environment variables, then validates the merged result.
    pub fn load(base_path: impl AsRef<Path>, profile: Option<&str>) -> DropResult<Self> {
        let base_path = base_path.as_ref();
        let mut figment = Figment::new().merge(Toml::file(base_path));

        if let Some(profile) = profile {
            if let Some(overlay) = profile_overlay_path(base_path, profile) {
                figment = figment.merge(Toml::file(overlay));
            }
        }

        let figment = figment.merge(Env::prefixed("DROPCORE_").split("_"));
        let config: Self = figment
            .extract()
            .map_err(|e| DropError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Re-validates a candidate configuration before it replaces the running
    /// one (C12's `update_config`). The caller retains the old config on error.
    pub fn validate(&self) -> DropResult<()> {
        if self.application.frame_queue_capacity == 0 {
            return Err(DropError::Configuration(
                "application.frame_queue_capacity must be >= 1".into(),
            ));
        }
        if self.detection.min_area_px2 >= self.detection.max_area_px2 {
            return Err(DropError::Configuration(
                "detection.min_area_px2 must be less than max_area_px2".into(),
            ));
        }
        if self.detection.min_aspect_ratio >= self.detection.max_aspect_ratio {
            return Err(DropError::Configuration(
                "detection.min_aspect_ratio must be less than max_aspect_ratio".into(),
            ));
        }
        if self.detection.frame_skip == 0 {
            return Err(DropError::Configuration(
                "detection.frame_skip must be >= 1".into(),
            ));
        }
        if self.bus.chip_select_pins.is_empty() {
            return Err(DropError::Configuration(
                "bus.chip_select_pins must assign at least the strobe module".into(),
            ));
        }
        Ok(())
    }

    /// Re-loads from a Figment built purely in memory, used by the hot
    /// `update_config` path when the caller already holds a deserialized value.
    pub fn from_value(value: impl Serialize) -> DropResult<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(value))
            .extract()
            .map_err(|e| DropError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

fn profile_overlay_path(base_path: &Path, profile: &str) -> Option<PathBuf> {
    let stem = base_path.file_stem()?.to_str()?;
    let ext = base_path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    let overlay_name = format!("{stem}.{profile}.{ext}");
    Some(base_path.with_file_name(overlay_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[application]
control_mode = "strobe_clocked"
roi_mode = "software"

[bus]
serial_device = "/dev/ttyUSB0"
[bus.chip_select_pins]
strobe = 8

[camera]
backend = "simulated"
[camera.default_roi]
x = 0
y = 0
w = 640
h = 480

[detection]
threshold_mode = "otsu"
background_method = "static"
morphology_op = "both"
morphology_kernel = 3
min_area_px2 = 25.0
max_area_px2 = 200000.0
min_aspect_ratio = 0.1
max_aspect_ratio = 10.0
frame_skip = 1
pixel_ratio_um = 1.0
unit_label = "um"
[detection.motion_gate]
direction = "increasing"
min_displacement_px = 0.5
"#
    }

    #[test]
    fn test_load_valid_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_toml().as_bytes()).unwrap();
        let config = DropConfig::load(file.path(), None).unwrap();
        assert_eq!(config.bus.serial_device, "/dev/ttyUSB0");
        assert_eq!(config.camera.backend, CameraBackend::Simulated);
        assert_eq!(config.bus.baud_rate, 115_200);
    }

    #[test]
    fn test_env_override_wins_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_toml().as_bytes()).unwrap();
        std::env::set_var("DROPCORE_BUS_BAUD_RATE", "9600");
        let config = DropConfig::load(file.path(), None).unwrap();
        std::env::remove_var("DROPCORE_BUS_BAUD_RATE");
        assert_eq!(config.bus.baud_rate, 9600);
    }

    #[test]
    fn test_validate_rejects_inverted_area_bounds() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_toml().as_bytes()).unwrap();
        let mut config = DropConfig::load(file.path(), None).unwrap();
        config.detection.min_area_px2 = 500.0;
        config.detection.max_area_px2 = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_chip_select() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_toml().as_bytes()).unwrap();
        let mut config = DropConfig::load(file.path(), None).unwrap();
        config.bus.chip_select_pins.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_key_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let toml = sample_toml().replacen(
            "control_mode = \"strobe_clocked\"",
            "control_mode = \"strobe_clocked\"\nbogus_field = true",
            1,
        );
        file.write_all(toml.as_bytes()).unwrap();
        let result = DropConfig::load(file.path(), None);
        assert!(matches!(result, Err(DropError::Configuration(_))));
    }
}
