//! Error types for the acquisition-synchronization-and-measurement core.
//!
//! This module defines `DropError`, the single error type threaded through the
//! SPI transport, the strobe/camera coordinator, the detector pipeline, and the
//! supervisor. It follows the taxonomy of component error kinds (transport,
//! bus, device, capture, pipeline, config) so that every fallible call site
//! composes with `?` while still carrying enough detail for the supervisor's
//! status record to classify what went wrong.

use thiserror::Error;

/// Convenience alias for results using the core error type.
pub type DropResult<T> = std::result::Result<T, DropError>;

/// Coarse classification of a `DropError`, used by the supervisor's status
/// record (`{state, last_error_kind, degraded_subsystems}`) without requiring
/// observers to match on the full error enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    Transport,
    Bus,
    Device,
    Capture,
    Pipeline,
    Config,
    Io,
}

#[derive(Error, Debug)]
pub enum DropError {
    /// Framing, checksum, length, or timeout failure at the SPI packet layer (§7).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Arbiter contention timeout or chip-select failure (§4.2, §7).
    #[error("bus error: {0}")]
    Bus(String),

    /// Firmware-reported non-OK status, or an out-of-range device parameter (§7).
    #[error("device error ({module}): {message}")]
    Device { module: String, message: String },

    /// Camera backend failure, dropped frames, or an ROI outside frame bounds (§7, §8.3).
    #[error("capture error: {0}")]
    Capture(String),

    /// Unrecoverable exception in a detector stage, after the retry budget is spent (§4.11).
    #[error("pipeline error in stage '{stage}': {message}")]
    Pipeline { stage: String, message: String },

    /// Invalid or inconsistent configuration at load or update time (§3, §4.16).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Wraps errors from the `config` crate's deserialization/merge step.
    #[error("configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("feature '{0}' is not enabled; rebuild with --features {0}")]
    FeatureNotEnabled(String),

    /// Clean session teardown encountered more than one failure while quiescing hardware (§7).
    #[error("shutdown failed with {} error(s)", .0.len())]
    ShutdownFailed(Vec<DropError>),
}

impl DropError {
    /// The coarse kind used by the supervisor's status record.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DropError::Transport(_) => ErrorKind::Transport,
            DropError::Bus(_) => ErrorKind::Bus,
            DropError::Device { .. } => ErrorKind::Device,
            DropError::Capture(_) => ErrorKind::Capture,
            DropError::Pipeline { .. } => ErrorKind::Pipeline,
            DropError::Configuration(_) | DropError::ConfigSource(_) => ErrorKind::Config,
            DropError::Io(_) | DropError::FeatureNotEnabled(_) | DropError::ShutdownFailed(_) => {
                ErrorKind::Io
            }
        }
    }
}

/// Errors raised by the SPI packet transport (C1), before any type-specific
/// decoding by a module driver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("no STX byte observed within the bus timeout")]
    InvalidFraming,

    #[error("declared packet length {0} exceeds 255 or the receive buffer")]
    LengthOutOfRange(usize),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("timed out waiting for reply")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DropError::Device {
            module: "strobe".to_string(),
            message: "out of range".to_string(),
        };
        assert_eq!(err.to_string(), "device error (strobe): out of range");
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            DropError::Transport(TransportError::Timeout).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            DropError::Pipeline {
                stage: "preprocess".into(),
                message: "boom".into()
            }
            .kind(),
            ErrorKind::Pipeline
        );
    }

    #[test]
    fn test_shutdown_failed_error() {
        let err = DropError::ShutdownFailed(vec![
            DropError::Bus("arbiter timeout".into()),
            DropError::Capture("camera closed".into()),
        ]);
        assert!(err.to_string().contains("2 error"));
    }
}
