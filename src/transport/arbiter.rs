//! Bus arbiter (C2): serializes multiplexed access to the shared SPI bus
//! across modules that each have their own chip-select line.

use crate::error::DropError;
use crate::gpio::GpioBank;
use crate::transport::Transport;
use log::warn;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Transport-layer retry budget (§7): a `TransportError` is retried this many
/// times with [`RETRY_BACKOFF`] between attempts before being escalated to a
/// `DeviceError`.
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Owns the shared transport and the chip-select bank. `with_module` is the
/// only way to talk to a module: it serializes via a single mutex (tokio's
/// `Mutex` wakes waiters in FIFO order, bounding starvation), asserts the
/// requested chip-select, and releases it on every exit path including
/// early return from an error.
pub struct BusArbiter {
    transport: Mutex<Box<dyn Transport>>,
    gpio: GpioBank,
    /// Per-module minimum reply pause; the arbiter will not release the bus
    /// sooner than this after the last write, matching each firmware's
    /// processing time.
    reply_pauses: std::collections::HashMap<String, Duration>,
    last_write: Mutex<Option<Instant>>,
}

impl BusArbiter {
    pub fn new(transport: Box<dyn Transport>, gpio: GpioBank) -> Self {
        Self {
            transport: Mutex::new(transport),
            gpio,
            reply_pauses: std::collections::HashMap::new(),
            last_write: Mutex::new(None),
        }
    }

    pub fn set_reply_pause(&mut self, module: impl Into<String>, pause: Duration) {
        self.reply_pauses.insert(module.into(), pause);
    }

    /// Acquires exclusive access to the bus, asserts `module`'s chip-select,
    /// invokes `packet_type`/`data` against the transport, then deasserts
    /// chip-select before releasing the mutex — even if the transport call
    /// fails.
    pub async fn with_module(
        &self,
        module: &str,
        packet_type: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, DropError> {
        let mut transport = self.transport.lock().await;

        {
            let mut last = self.last_write.lock().await;
            if let Some(since) = *last {
                if let Some(pause) = self.reply_pauses.get(module) {
                    let elapsed = since.elapsed();
                    if elapsed < *pause {
                        tokio::time::sleep(*pause - elapsed).await;
                    }
                }
            }
            *last = Some(Instant::now());
        }

        let cs = self.gpio.get(module)?;
        cs.set(true).await?;

        let mut result = crate::transport::send_with_timeout(transport.as_mut(), packet_type, data).await;
        let mut attempt = 1;
        while let Err(DropError::Transport(ref transport_err)) = result {
            if attempt >= RETRY_ATTEMPTS {
                let message = format!("transport failed after {attempt} attempt(s): {transport_err}");
                cs.set(false).await?;
                return Err(DropError::Device {
                    module: module.to_string(),
                    message,
                });
            }
            warn!("'{module}' transport attempt {attempt} failed ({transport_err}); retrying");
            tokio::time::sleep(RETRY_BACKOFF).await;
            result = crate::transport::send_with_timeout(transport.as_mut(), packet_type, data).await;
            attempt += 1;
        }

        cs.set(false).await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::SimulatedLine;
    use crate::transport::SimulatedTransport;
    use std::sync::Arc as StdArc;

    fn bank() -> GpioBank {
        let mut bank = GpioBank::new();
        bank.register("strobe", StdArc::new(SimulatedLine::new()));
        bank
    }

    #[tokio::test]
    async fn test_with_module_round_trips() {
        let mut sim = SimulatedTransport::default();
        sim.replies.insert(1, vec![0]);
        let arbiter = BusArbiter::new(Box::new(sim), bank());
        let reply = arbiter.with_module("strobe", 1, &[1]).await.unwrap();
        assert_eq!(reply, vec![0]);
    }

    struct FlakyTransport {
        remaining_failures: u32,
    }

    #[async_trait::async_trait]
    impl crate::transport::Transport for FlakyTransport {
        async fn send(&mut self, _packet_type: u8, _data: &[u8]) -> Result<Vec<u8>, DropError> {
            if self.remaining_failures > 0 {
                self.remaining_failures -= 1;
                return Err(DropError::Transport(crate::error::TransportError::ChecksumMismatch));
            }
            Ok(vec![0])
        }
    }

    #[tokio::test]
    async fn test_transport_error_retried_then_succeeds() {
        let flaky = FlakyTransport { remaining_failures: 2 };
        let arbiter = BusArbiter::new(Box::new(flaky), bank());
        let reply = arbiter.with_module("strobe", 1, &[]).await.unwrap();
        assert_eq!(reply, vec![0]);
    }

    #[tokio::test]
    async fn test_transport_error_escalates_to_device_error_after_budget() {
        let flaky = FlakyTransport { remaining_failures: 10 };
        let arbiter = BusArbiter::new(Box::new(flaky), bank());
        let result = arbiter.with_module("strobe", 1, &[]).await;
        assert!(matches!(result, Err(DropError::Device { .. })));
    }

    #[tokio::test]
    async fn test_with_module_unknown_module_is_bus_error() {
        let sim = SimulatedTransport::default();
        let arbiter = BusArbiter::new(Box::new(sim), bank());
        let result = arbiter.with_module("heater9", 1, &[]).await;
        assert!(matches!(result, Err(DropError::Bus(_))));
    }

    #[tokio::test]
    async fn test_set_reply_pause_delays_next_access_to_same_module() {
        let mut sim = SimulatedTransport::default();
        sim.replies.insert(1, vec![0]);
        let mut arbiter = BusArbiter::new(Box::new(sim), bank());
        arbiter.set_reply_pause("strobe", Duration::from_millis(50));

        arbiter.with_module("strobe", 1, &[]).await.unwrap();
        let start = std::time::Instant::now();
        arbiter.with_module("strobe", 1, &[]).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_no_two_critical_sections_overlap() {
        // BusArbiter holds its transport lock for the whole with_module call;
        // two concurrent callers must observe strictly serialized access.
        let mut sim = SimulatedTransport::default();
        sim.replies.insert(1, vec![7]);
        let arbiter = StdArc::new(BusArbiter::new(Box::new(sim), bank()));

        let a = arbiter.clone();
        let b = arbiter.clone();
        let (r1, r2) = tokio::join!(
            a.with_module("strobe", 1, &[]),
            b.with_module("strobe", 1, &[])
        );
        assert_eq!(r1.unwrap(), vec![7]);
        assert_eq!(r2.unwrap(), vec![7]);
    }
}
