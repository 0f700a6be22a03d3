//! Strobe driver (C3): commands the strobe microcontroller's wait/duration
//! timing, enable/hold, and trigger mode, and reports the camera's read time.

use crate::error::{DropError, TransportError};
use crate::transport::BusArbiter;
use crate::types::StrobeState;
use log::{debug, warn};

const MODULE: &str = "strobe";

const SET_ENABLE: u8 = 1;
const SET_TIMING: u8 = 2;
const SET_HOLD: u8 = 3;
const GET_CAM_READ_TIME: u8 = 4;
const SET_TRIGGER_MODE: u8 = 5;

/// Firmware-bounded maximum for wait/duration on a typical 32 MHz core (§4.3).
pub const MAX_TIMING_NS: u32 = 16_000_000;

const STATUS_OK: u8 = 0;

/// Host-side driver for the strobe module, talking to firmware through the
/// shared bus arbiter.
pub struct StrobeDriver<'a> {
    bus: &'a BusArbiter,
}

impl<'a> StrobeDriver<'a> {
    pub fn new(bus: &'a BusArbiter) -> Self {
        Self { bus }
    }

    pub async fn set_enable(&self, enabled: bool) -> Result<(), DropError> {
        let reply = self
            .bus
            .with_module(MODULE, SET_ENABLE, &[enabled as u8])
            .await?;
        expect_status_ok(&reply, "set_enable")
    }

    /// Requests `(wait_ns, duration_ns)` and returns the firmware's *actual*
    /// achieved values (firmware picks the closest representable value not
    /// exceeding the request; callers must display these, not the request).
    pub async fn set_timing(&self, wait_ns: u32, duration_ns: u32) -> Result<(u32, u32), DropError> {
        if wait_ns > MAX_TIMING_NS || duration_ns > MAX_TIMING_NS {
            return Err(DropError::Device {
                module: MODULE.into(),
                message: format!(
                    "requested timing ({wait_ns}, {duration_ns}) exceeds firmware bound {MAX_TIMING_NS}"
                ),
            });
        }
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&wait_ns.to_le_bytes());
        payload.extend_from_slice(&duration_ns.to_le_bytes());

        let reply = self.bus.with_module(MODULE, SET_TIMING, &payload).await?;
        expect_status_ok(&reply, "set_timing")?;
        if reply.len() < 9 {
            return Err(DropError::Transport(TransportError::LengthOutOfRange(reply.len())));
        }
        let actual_wait = u32::from_le_bytes(reply[1..5].try_into().unwrap());
        let actual_duration = u32::from_le_bytes(reply[5..9].try_into().unwrap());
        debug!(
            "strobe timing requested ({wait_ns}, {duration_ns}) -> actual ({actual_wait}, {actual_duration})"
        );
        Ok((actual_wait, actual_duration))
    }

    pub async fn set_hold(&self, hold: bool) -> Result<(), DropError> {
        let reply = self.bus.with_module(MODULE, SET_HOLD, &[hold as u8]).await?;
        expect_status_ok(&reply, "set_hold")
    }

    /// Reads the camera's read time in microseconds, used by the coordinator
    /// to compute the minimum strobe-clocked frame period.
    pub async fn get_cam_read_time_us(&self) -> Result<u16, DropError> {
        let reply = self.bus.with_module(MODULE, GET_CAM_READ_TIME, &[]).await?;
        expect_status_ok(&reply, "get_cam_read_time")?;
        if reply.len() < 3 {
            return Err(DropError::Transport(TransportError::LengthOutOfRange(reply.len())));
        }
        Ok(u16::from_le_bytes(reply[1..3].try_into().unwrap()))
    }

    pub async fn set_trigger_mode_hardware(&self, hardware: bool) -> Result<(), DropError> {
        let reply = self
            .bus
            .with_module(MODULE, SET_TRIGGER_MODE, &[hardware as u8])
            .await?;
        expect_status_ok(&reply, "set_trigger_mode")
    }
}

fn expect_status_ok(reply: &[u8], op: &str) -> Result<(), DropError> {
    match reply.first() {
        Some(&STATUS_OK) => Ok(()),
        Some(&code) => {
            warn!("strobe {op} returned non-OK status {code}");
            Err(DropError::Device {
                module: MODULE.into(),
                message: format!("{op} returned status {code}"),
            })
        }
        None => Err(DropError::Transport(TransportError::InvalidFraming)),
    }
}

/// Pure helper used by the poller and the coordinator to refresh a cached
/// [`StrobeState`] snapshot from the results of the individual GET_* calls.
pub fn merge_cam_read_time(state: &mut StrobeState, cam_read_time_us: u16) {
    state.cam_read_time_us = cam_read_time_us;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{GpioBank, SimulatedLine};
    use crate::transport::SimulatedTransport;
    use std::sync::Arc;

    fn arbiter_with_timing_reply(actual_wait: u32, actual_duration: u32) -> BusArbiter {
        let mut sim = SimulatedTransport::default();
        let mut reply = vec![STATUS_OK];
        reply.extend_from_slice(&actual_wait.to_le_bytes());
        reply.extend_from_slice(&actual_duration.to_le_bytes());
        sim.replies.insert(SET_TIMING, reply);

        let mut bank = GpioBank::new();
        bank.register("strobe", Arc::new(SimulatedLine::new()));
        BusArbiter::new(Box::new(sim), bank)
    }

    #[tokio::test]
    async fn test_set_timing_returns_actual_values() {
        let bus = arbiter_with_timing_reply(1980, 1490);
        let driver = StrobeDriver::new(&bus);
        let (wait, duration) = driver.set_timing(2000, 1500).await.unwrap();
        assert_eq!(wait, 1980);
        assert_eq!(duration, 1490);
    }

    #[tokio::test]
    async fn test_set_timing_rejects_out_of_range() {
        let bus = arbiter_with_timing_reply(0, 0);
        let driver = StrobeDriver::new(&bus);
        let result = driver.set_timing(MAX_TIMING_NS + 1, 0).await;
        assert!(matches!(result, Err(DropError::Device { .. })));
    }

    #[tokio::test]
    async fn test_get_cam_read_time() {
        let mut sim = SimulatedTransport::default();
        sim.replies.insert(GET_CAM_READ_TIME, vec![STATUS_OK, 0x20, 0x00]);
        let mut bank = GpioBank::new();
        bank.register("strobe", Arc::new(SimulatedLine::new()));
        let bus = BusArbiter::new(Box::new(sim), bank);
        let driver = StrobeDriver::new(&bus);
        assert_eq!(driver.get_cam_read_time_us().await.unwrap(), 32);
    }
}
