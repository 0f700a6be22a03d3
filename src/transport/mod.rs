//! SPI packet transport (C1) and bus arbiter (C2).

pub mod arbiter;
pub mod packet;

use crate::error::{DropError, TransportError};
use async_trait::async_trait;
use log::{debug, warn};
use std::time::Duration;
use tokio::time::timeout;

pub use arbiter::BusArbiter;

/// Per-packet timeout at the transport layer (§5): every SPI operation fails
/// after this much time without a valid reply.
pub const PACKET_TIMEOUT: Duration = Duration::from_millis(500);

/// A single request/reply exchange with one module's microcontroller.
/// Implementors perform no type-specific decoding; that's the driver's job.
#[async_trait]
pub trait Transport: Send {
    /// Sends a framed packet and waits for the module's reply, enforcing
    /// [`PACKET_TIMEOUT`]. Returns the reply payload, envelope stripped.
    async fn send(&mut self, packet_type: u8, data: &[u8]) -> Result<Vec<u8>, DropError>;
}

/// Wraps any [`Transport`] with the bus-wide [`PACKET_TIMEOUT`], so backends
/// only need to implement the happy path.
pub async fn send_with_timeout(
    transport: &mut dyn Transport,
    packet_type: u8,
    data: &[u8],
) -> Result<Vec<u8>, DropError> {
    match timeout(PACKET_TIMEOUT, transport.send(packet_type, data)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("packet type {packet_type} timed out after {PACKET_TIMEOUT:?}");
            Err(DropError::Transport(TransportError::Timeout))
        }
    }
}

/// Real SPI-bridge transport over a serial port (`instrument_serial`
/// feature). Blocking I/O is off-loaded to [`tokio::task::spawn_blocking`],
/// mirroring the teacher's serial adapter.
#[cfg(feature = "instrument_serial")]
pub struct SerialTransport {
    port: std::sync::Arc<tokio::sync::Mutex<Box<dyn serialport::SerialPort>>>,
    /// How long to wait after writing before reading the reply; module-specific.
    reply_pause: Duration,
}

#[cfg(feature = "instrument_serial")]
impl SerialTransport {
    pub fn open(device: &str, baud_rate: u32, reply_pause: Duration) -> Result<Self, DropError> {
        let port = serialport::new(device, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| DropError::Bus(format!("failed to open {device}: {e}")))?;
        Ok(Self {
            port: std::sync::Arc::new(tokio::sync::Mutex::new(port)),
            reply_pause,
        })
    }
}

#[cfg(feature = "instrument_serial")]
#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, packet_type: u8, data: &[u8]) -> Result<Vec<u8>, DropError> {
        use std::io::{Read, Write};

        let frame = packet::encode(packet_type, data)?;
        let port = self.port.clone();
        let reply_pause = self.reply_pause;

        tokio::task::spawn_blocking(move || -> Result<Vec<u8>, DropError> {
            let mut guard = port.blocking_lock();
            guard
                .write_all(&frame)
                .map_err(DropError::Io)?;
            guard.flush().map_err(DropError::Io)?;

            std::thread::sleep(reply_pause);

            let mut header = [0u8; 3];
            guard
                .read_exact(&mut header)
                .map_err(|_| DropError::Transport(TransportError::InvalidFraming))?;
            if header[0] != 0x02 {
                return Err(DropError::Transport(TransportError::InvalidFraming));
            }
            let len = header[1] as usize;
            let mut rest = vec![0u8; len + 1];
            guard
                .read_exact(&mut rest)
                .map_err(|_| DropError::Transport(TransportError::Timeout))?;

            let mut full = Vec::with_capacity(4 + len);
            full.extend_from_slice(&header);
            full.extend_from_slice(&rest);
            let decoded = packet::decode(&full)?;
            debug!("spi reply type={} len={}", decoded.packet_type, decoded.data.len());
            Ok(decoded.data)
        })
        .await
        .map_err(|e| DropError::Bus(format!("serial I/O task panicked: {e}")))?
    }
}

/// In-memory simulated transport (`simulated` feature), used in tests and
/// when `application.simulate` is set. Echoes a scripted reply per packet
/// type, or an empty status-OK payload by default.
#[derive(Default)]
pub struct SimulatedTransport {
    pub replies: std::collections::HashMap<u8, Vec<u8>>,
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn send(&mut self, packet_type: u8, _data: &[u8]) -> Result<Vec<u8>, DropError> {
        Ok(self.replies.get(&packet_type).cloned().unwrap_or_else(|| vec![0]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_transport_default_reply() {
        let mut t = SimulatedTransport::default();
        let reply = send_with_timeout(&mut t, 1, &[1]).await.unwrap();
        assert_eq!(reply, vec![0]);
    }

    #[tokio::test]
    async fn test_simulated_transport_scripted_reply() {
        let mut t = SimulatedTransport::default();
        t.replies.insert(4, vec![0, 0x10, 0x00]);
        let reply = send_with_timeout(&mut t, 4, &[]).await.unwrap();
        assert_eq!(reply, vec![0, 0x10, 0x00]);
    }
}
