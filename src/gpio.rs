//! GPIO output lines: per-module chip-select (C2) and the camera-clocked
//! trigger line (C5), abstracted behind one trait so the arbiter and
//! coordinator don't care whether they're driving real silicon or a test
//! double.

use crate::error::DropError;
use async_trait::async_trait;
use log::trace;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A single digital output line, addressed by BCM pin number.
#[async_trait]
pub trait OutputLine: Send + Sync {
    /// Drives the line high or low.
    async fn set(&self, high: bool) -> Result<(), DropError>;
}

/// A named collection of chip-select lines, one per SPI module, plus the
/// dedicated strobe trigger pin used in camera-clocked mode.
pub struct GpioBank {
    lines: HashMap<String, Arc<dyn OutputLine>>,
}

impl GpioBank {
    pub fn new() -> Self {
        Self {
            lines: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, line: Arc<dyn OutputLine>) {
        self.lines.insert(name.into(), line);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn OutputLine>, DropError> {
        self.lines
            .get(name)
            .cloned()
            .ok_or_else(|| DropError::Bus(format!("no GPIO line registered for '{name}'")))
    }
}

impl Default for GpioBank {
    fn default() -> Self {
        Self::new()
    }
}

/// Simulated output line (`simulated` feature and tests). Counts rising
/// edges so property tests (S4: "exactly 100 GPIO rising edges") can assert
/// on it directly.
#[derive(Default)]
pub struct SimulatedLine {
    state: std::sync::atomic::AtomicBool,
    rising_edges: AtomicU32,
}

impl SimulatedLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rising_edge_count(&self) -> u32 {
        self.rising_edges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutputLine for SimulatedLine {
    async fn set(&self, high: bool) -> Result<(), DropError> {
        let was_high = self.state.swap(high, Ordering::SeqCst);
        if high && !was_high {
            self.rising_edges.fetch_add(1, Ordering::SeqCst);
            trace!("simulated gpio rising edge");
        }
        Ok(())
    }
}

/// Raspberry Pi GPIO line (`gpio_rpi` feature), backed by `rppal`.
#[cfg(feature = "gpio_rpi")]
pub struct RppalLine {
    pin: std::sync::Mutex<rppal::gpio::OutputPin>,
}

#[cfg(feature = "gpio_rpi")]
impl RppalLine {
    pub fn open(bcm_pin: u8) -> Result<Self, DropError> {
        let gpio = rppal::gpio::Gpio::new()
            .map_err(|e| DropError::Bus(format!("failed to open gpio chip: {e}")))?;
        let pin = gpio
            .get(bcm_pin)
            .map_err(|e| DropError::Bus(format!("failed to claim BCM{bcm_pin}: {e}")))?
            .into_output();
        Ok(Self {
            pin: std::sync::Mutex::new(pin),
        })
    }
}

#[cfg(feature = "gpio_rpi")]
#[async_trait]
impl OutputLine for RppalLine {
    async fn set(&self, high: bool) -> Result<(), DropError> {
        let mut pin = self
            .pin
            .lock()
            .map_err(|_| DropError::Bus("gpio pin mutex poisoned".into()))?;
        if high {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(())
    }
}
