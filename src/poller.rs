//! Device cache poller (C15): periodically refreshes the flow/heater
//! read-only state caches via GET_* packets. Never initiates writes.

use crate::error::DropError;
use crate::modules::flow::FlowDriver;
use crate::modules::heater::HeaterDriver;
use crate::transport::BusArbiter;
use crate::types::{FlowState, HeaterState};
use log::warn;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::time::interval;

/// Idle polling cadence (§4.15, §5).
const IDLE_PERIOD: Duration = Duration::from_secs(1);
/// Cadence while any device has been actively controlled recently.
const ACTIVE_PERIOD: Duration = Duration::from_millis(500);
/// A device counts as "actively controlled" if a write landed within this window.
const ACTIVE_WINDOW: Duration = Duration::from_secs(3);

/// Shared, read-mostly cache of flow/heater state, refreshed by the poll
/// loop and served to driver getters without blocking acquisition.
#[derive(Default)]
pub struct DeviceCache {
    flow: RwLock<HashMap<String, FlowState>>,
    heater: RwLock<HashMap<String, HeaterState>>,
    last_write: RwLock<HashMap<String, Instant>>,
}

impl DeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flow_state(&self, module: &str) -> Option<FlowState> {
        self.flow.read().expect("flow cache lock poisoned").get(module).copied()
    }

    pub fn heater_state(&self, module: &str) -> Option<HeaterState> {
        self.heater
            .read()
            .expect("heater cache lock poisoned")
            .get(module)
            .copied()
    }

    /// Called by driver write methods to mark a module as actively
    /// controlled, ramping the poller up to [`ACTIVE_PERIOD`].
    pub fn note_write(&self, module: &str) {
        self.last_write
            .write()
            .expect("last-write lock poisoned")
            .insert(module.to_string(), Instant::now());
    }

    fn any_active(&self) -> bool {
        let last_write = self.last_write.read().expect("last-write lock poisoned");
        last_write.values().any(|t| t.elapsed() < ACTIVE_WINDOW)
    }
}

/// Refreshes every configured flow/heater module once, writing results into
/// `cache`. Errors are logged and skip that module's cache entry rather than
/// aborting the whole poll (a single jammed module shouldn't blind the
/// poller to the rest of the bus).
pub async fn poll_once(bus: &BusArbiter, cache: &DeviceCache, flow_modules: &[String], heater_modules: &[String]) {
    for module in flow_modules {
        let driver = FlowDriver::new(bus, module.clone());
        match driver.refresh_state().await {
            Ok(state) => {
                cache.flow.write().expect("flow cache lock poisoned").insert(module.clone(), state);
            }
            Err(err) => warn!("flow poll of '{module}' failed: {err}"),
        }
    }

    for module in heater_modules {
        let driver = HeaterDriver::new(bus, module.clone());
        match driver.refresh_state().await {
            Ok(state) => {
                cache
                    .heater
                    .write()
                    .expect("heater cache lock poisoned")
                    .insert(module.clone(), state);
            }
            Err(err) => warn!("heater poll of '{module}' failed: {err}"),
        }
    }
}

/// Runs the poll loop until `shutdown` fires, alternating between the idle
/// and active cadence depending on recent write activity.
pub async fn run(
    bus: &BusArbiter,
    cache: &DeviceCache,
    flow_modules: Vec<String>,
    heater_modules: Vec<String>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), DropError> {
    loop {
        let period = if cache.any_active() { ACTIVE_PERIOD } else { IDLE_PERIOD };
        let mut ticker = interval(period);
        ticker.tick().await;

        tokio::select! {
            _ = ticker.tick() => {
                poll_once(bus, cache, &flow_modules, &heater_modules).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{GpioBank, SimulatedLine};
    use crate::transport::SimulatedTransport;
    use std::sync::Arc;

    fn bus_with_flow_replies() -> BusArbiter {
        let mut sim = SimulatedTransport::default();
        let mut f32_ok = |v: f32| {
            let mut r = vec![0u8];
            r.extend_from_slice(&v.to_le_bytes());
            r
        };
        sim.replies.insert(3, f32_ok(100.0));
        sim.replies.insert(4, f32_ok(99.0));
        sim.replies.insert(6, f32_ok(5.0));
        sim.replies.insert(7, f32_ok(4.9));
        sim.replies.insert(9, vec![0, 1]);
        let mut pid = vec![0u8];
        pid.extend_from_slice(&1.0f32.to_le_bytes());
        pid.extend_from_slice(&0.1f32.to_le_bytes());
        pid.extend_from_slice(&0.01f32.to_le_bytes());
        sim.replies.insert(11, pid);

        let mut bank = GpioBank::new();
        bank.register("flow0", Arc::new(SimulatedLine::new()));
        BusArbiter::new(Box::new(sim), bank)
    }

    #[tokio::test]
    async fn test_poll_once_populates_flow_cache() {
        let bus = bus_with_flow_replies();
        let cache = DeviceCache::new();
        poll_once(&bus, &cache, &["flow0".to_string()], &[]).await;
        let state = cache.flow_state("flow0").unwrap();
        assert!((state.pressure_target - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_active_window_marks_module_active() {
        let cache = DeviceCache::new();
        assert!(!cache.any_active());
        cache.note_write("flow0");
        assert!(cache.any_active());
    }
}
