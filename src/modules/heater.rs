//! Heater-module driver (C14): host-side driver mirroring a heater's
//! temperature/PID/autotune/stir device state over SPI.

use crate::error::{DropError, TransportError};
use crate::transport::BusArbiter;
use crate::types::HeaterState;

const SET_TEMP_TARGET: u8 = 2;
const GET_TEMP_TARGET: u8 = 3;
const GET_TEMP_ACTUAL: u8 = 4;
const SET_PID_CONSTS: u8 = 5;
const GET_PID_CONSTS: u8 = 6;
const SET_PID_RUNNING: u8 = 7;
const GET_PID_RUNNING: u8 = 8;
const SET_AUTOTUNE_RUN: u8 = 9;
const GET_AUTOTUNE_RUN: u8 = 10;
const GET_AUTOTUNE_STATUS: u8 = 11;
const SET_STIR_RUN: u8 = 12;
const GET_STIR_STATUS: u8 = 13;
const GET_STIR_ACTUAL_SPEED: u8 = 14;
const SET_POWER_LIMIT: u8 = 15;
const GET_POWER_LIMIT: u8 = 16;

const STATUS_OK: u8 = 0;

/// Host-side driver for one heater, addressed by its bus module name
/// (e.g. "heater0").
pub struct HeaterDriver<'a> {
    bus: &'a BusArbiter,
    module: String,
}

impl<'a> HeaterDriver<'a> {
    pub fn new(bus: &'a BusArbiter, module: impl Into<String>) -> Self {
        Self {
            bus,
            module: module.into(),
        }
    }

    pub async fn set_temp_target(&self, celsius: f32) -> Result<(), DropError> {
        self.write_f32(SET_TEMP_TARGET, celsius).await
    }

    pub async fn set_pid_running(&self, running: bool) -> Result<(), DropError> {
        self.write_bool(SET_PID_RUNNING, running).await
    }

    pub async fn set_autotune_run(&self, run: bool) -> Result<(), DropError> {
        self.write_bool(SET_AUTOTUNE_RUN, run).await
    }

    pub async fn set_stir_run(&self, speed: f32) -> Result<(), DropError> {
        self.write_f32(SET_STIR_RUN, speed).await
    }

    pub async fn set_power_limit(&self, limit: f32) -> Result<(), DropError> {
        self.write_f32(SET_POWER_LIMIT, limit).await
    }

    /// Refreshes a full [`HeaterState`] snapshot, used by the device cache
    /// poller (C15).
    pub async fn refresh_state(&self) -> Result<HeaterState, DropError> {
        let temp_target = self.read_f32(GET_TEMP_TARGET).await?;
        let temp_actual = self.read_f32(GET_TEMP_ACTUAL).await?;
        let pid_running = self.read_bool(GET_PID_RUNNING).await?;
        let autotune_running = self.read_bool(GET_AUTOTUNE_STATUS).await?;
        let stir_running = self.read_bool(GET_STIR_STATUS).await?;
        let stir_speed = self.read_f32(GET_STIR_ACTUAL_SPEED).await?;
        let power_limit = self.read_f32(GET_POWER_LIMIT).await?;

        Ok(HeaterState {
            temp_target,
            temp_actual,
            pid_running,
            autotune_running,
            stir_running,
            stir_speed,
            power_limit,
        })
    }

    async fn write_f32(&self, packet_type: u8, value: f32) -> Result<(), DropError> {
        let reply = self
            .bus
            .with_module(&self.module, packet_type, &value.to_le_bytes())
            .await?;
        expect_status_ok(&self.module, &reply)
    }

    async fn write_bool(&self, packet_type: u8, value: bool) -> Result<(), DropError> {
        let reply = self.bus.with_module(&self.module, packet_type, &[value as u8]).await?;
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

    async fn read_bool(&self, packet_type: u8) -> Result<bool, DropError> {
        let reply = self.bus.with_module(&self.module, packet_type, &[]).await?;
        expect_status_ok(&self.module, &reply)?;
        Ok(*reply.get(1).unwrap_or(&0) != 0)
    }
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
