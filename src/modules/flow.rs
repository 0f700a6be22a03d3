//! Flow-module driver (C13): host-side driver mirroring a flow channel's
//! pressure/flow/PID device state over SPI.

use crate::error::{DropError, TransportError};
use crate::transport::BusArbiter;
use crate::types::FlowState;

const SET_PRESSURE_TARGET: u8 = 2;
const GET_PRESSURE_TARGET: u8 = 3;
const GET_PRESSURE_ACTUAL: u8 = 4;
const SET_FLOW_TARGET: u8 = 5;
const GET_FLOW_TARGET: u8 = 6;
const GET_FLOW_ACTUAL: u8 = 7;
const SET_CONTROL_MODE: u8 = 8;
const GET_CONTROL_MODE: u8 = 9;
const SET_PID_CONSTS: u8 = 10;
const GET_PID_CONSTS: u8 = 11;

const STATUS_OK: u8 = 0;

/// Host-side driver for one flow channel, addressed by its bus module name
/// (e.g. "flow0").
pub struct FlowDriver<'a> {
    bus: &'a BusArbiter,
    module: String,
}

impl<'a> FlowDriver<'a> {
    pub fn new(bus: &'a BusArbiter, module: impl Into<String>) -> Self {
        Self {
            bus,
            module: module.into(),
        }
    }

    pub async fn set_pressure_target(&self, pascal: f32) -> Result<(), DropError> {
        self.write_f32(SET_PRESSURE_TARGET, pascal).await
    }

    pub async fn set_flow_target(&self, microliters_per_min: f32) -> Result<(), DropError> {
        self.write_f32(SET_FLOW_TARGET, microliters_per_min).await
    }

    pub async fn set_pressure_mode(&self, pressure_mode: bool) -> Result<(), DropError> {
        let reply = self
            .bus
            .with_module(&self.module, SET_CONTROL_MODE, &[pressure_mode as u8])
            .await?;
        expect_status_ok(&self.module, &reply)
    }

    pub async fn set_pid(&self, kp: f32, ki: f32, kd: f32) -> Result<(), DropError> {
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&kp.to_le_bytes());
        payload.extend_from_slice(&ki.to_le_bytes());
        payload.extend_from_slice(&kd.to_le_bytes());
        let reply = self.bus.with_module(&self.module, SET_PID_CONSTS, &payload).await?;
        expect_status_ok(&self.module, &reply)
    }

    /// Refreshes a full [`FlowState`] snapshot, used by the device cache
    /// poller (C15).
    pub async fn refresh_state(&self) -> Result<FlowState, DropError> {
        let pressure_target = self.read_f32(GET_PRESSURE_TARGET).await?;
        let pressure_actual = self.read_f32(GET_PRESSURE_ACTUAL).await?;
        let flow_target = self.read_f32(GET_FLOW_TARGET).await?;
        let flow_actual = self.read_f32(GET_FLOW_ACTUAL).await?;
        let mode_reply = self.bus.with_module(&self.module, GET_CONTROL_MODE, &[]).await?;
        expect_status_ok(&self.module, &mode_reply)?;
        let pressure_mode = *mode_reply.get(1).unwrap_or(&0) != 0;
        let pid_reply = self.bus.with_module(&self.module, GET_PID_CONSTS, &[]).await?;
        expect_status_ok(&self.module, &pid_reply)?;
        let (pid_kp, pid_ki, pid_kd) = decode_pid(&self.module, &pid_reply)?;

        Ok(FlowState {
            pressure_mode,
            pressure_target,
            pressure_actual,
            flow_target,
            flow_actual,
            pid_kp,
            pid_ki,
            pid_kd,
        })
    }

    async fn write_f32(&self, packet_type: u8, value: f32) -> Result<(), DropError> {
        let reply = self
            .bus
            .with_module(&self.module, packet_type, &value.to_le_bytes())
            .await?;
        expect_status_ok(&self.module, &reply)
    }

    async fn read_f32(&self, packet_type: u8) -> Result<f32, DropError> {
        let reply = self.bus.with_module(&self.module, packet_type, &[]).await?;
        expect_status_ok(&self.module, &reply)?;
        if reply.len() < 5 {
            return Err(DropError::Transport(TransportError::LengthOutOfRange(reply.len())));
        }
        Ok(f32::from_le_bytes(reply[1..5].try_into().unwrap()))
    }
}

fn decode_pid(module: &str, reply: &[u8]) -> Result<(f32, f32, f32), DropError> {
    if reply.len() < 13 {
        return Err(DropError::Device {
            module: module.to_string(),
            message: format!("pid reply too short: {} bytes", reply.len()),
        });
    }
    let kp = f32::from_le_bytes(reply[1..5].try_into().unwrap());
    let ki = f32::from_le_bytes(reply[5..9].try_into().unwrap());
    let kd = f32::from_le_bytes(reply[9..13].try_into().unwrap());
    Ok((kp, ki, kd))
}

fn expect_status_ok(module: &str, reply: &[u8]) -> Result<(), DropError> {
    match reply.first() {
        Some(&STATUS_OK) => Ok(()),
        Some(&code) => Err(DropError::Device {
            module: module.to_string(),
            message: format!("returned status {code}"),
        }),
        None => Err(DropError::Transport(TransportError::InvalidFraming)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{GpioBank, SimulatedLine};
    use crate::transport::SimulatedTransport;
    use std::sync::Arc;

    fn bus_with_replies(replies: &[(u8, Vec<u8>)]) -> BusArbiter {
        let mut sim = SimulatedTransport::default();
        for (code, reply) in replies {
            sim.replies.insert(*code, reply.clone());
        }
        let mut bank = GpioBank::new();
        bank.register("flow0", Arc::new(SimulatedLine::new()));
        BusArbiter::new(Box::new(sim), bank)
    }

    #[tokio::test]
    async fn test_refresh_state_decodes_all_fields() {
        let mut pressure_target_reply = vec![STATUS_OK];
        pressure_target_reply.extend_from_slice(&100.0f32.to_le_bytes());
        let mut pressure_actual_reply = vec![STATUS_OK];
        pressure_actual_reply.extend_from_slice(&98.5f32.to_le_bytes());
        let mut flow_target_reply = vec![STATUS_OK];
        flow_target_reply.extend_from_slice(&5.0f32.to_le_bytes());
        let mut flow_actual_reply = vec![STATUS_OK];
        flow_actual_reply.extend_from_slice(&4.9f32.to_le_bytes());
        let mut pid_reply = vec![STATUS_OK];
        pid_reply.extend_from_slice(&1.0f32.to_le_bytes());
        pid_reply.extend_from_slice(&0.1f32.to_le_bytes());
        pid_reply.extend_from_slice(&0.01f32.to_le_bytes());

        let bus = bus_with_replies(&[
            (GET_PRESSURE_TARGET, pressure_target_reply),
            (GET_PRESSURE_ACTUAL, pressure_actual_reply),
            (GET_FLOW_TARGET, flow_target_reply),
            (GET_FLOW_ACTUAL, flow_actual_reply),
            (GET_CONTROL_MODE, vec![STATUS_OK, 1]),
            (GET_PID_CONSTS, pid_reply),
        ]);
        let driver = FlowDriver::new(&bus, "flow0");
        let state = driver.refresh_state().await.unwrap();
        assert!(state.pressure_mode);
        assert!((state.pressure_target - 100.0).abs() < 1e-6);
        assert!((state.pid_ki - 0.1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_device_error_status_propagates() {
        let bus = bus_with_replies(&[(SET_PRESSURE_TARGET, vec![1])]);
        let driver = FlowDriver::new(&bus, "flow0");
        let result = driver.set_pressure_target(10.0).await;
        assert!(matches!(result, Err(DropError::Device { .. })));
    }
}
