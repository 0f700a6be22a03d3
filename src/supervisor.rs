//! Pipeline supervisor (C12): the single owner of a session's capture task,
//! process task, and ambient subsystems (C13-C16), and the sole point of
//! contact for hot configuration updates.
//!
//! Capture and processing run as separate tasks connected by a bounded
//! single-producer/single-consumer queue. Unlike `mpsc`'s backpressure (which
//! blocks the producer), this queue drops the *oldest* buffered frame when
//! full, per §4.12: a slow detector should see the freshest frame available
//! rather than stall image acquisition.

use crate::camera::Camera;
use crate::config::DropConfig;
use crate::detector::DetectorOrchestrator;
use crate::error::DropError;
use crate::modules::flow::FlowDriver;
use crate::modules::heater::HeaterDriver;
use crate::poller::{self, DeviceCache};
use crate::status::StatusPublisher;
use crate::transport::BusArbiter;
use crate::types::{DropletMeasurement, Frame, Roi, SessionState};
use log::{info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Bounded oldest-drop frame queue shared between the capture and process tasks.
pub struct FrameQueue {
    buffer: Mutex<VecDeque<Frame>>,
    capacity: usize,
    notify: Notify,
    dropped: std::sync::atomic::AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Pushes a frame, dropping the oldest buffered one if the queue is full.
    pub fn push(&self, frame: Frame) {
        let mut buffer = self.buffer.lock().expect("frame queue lock poisoned");
        if buffer.len() == self.capacity {
            buffer.pop_front();
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        buffer.push_back(frame);
        drop(buffer);
        self.notify.notify_one();
    }

    /// Waits for and removes the oldest buffered frame.
    pub async fn pop(&self) -> Frame {
        loop {
            {
                let mut buffer = self.buffer.lock().expect("frame queue lock poisoned");
                if let Some(frame) = buffer.pop_front() {
                    return frame;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().expect("frame queue lock poisoned").len()
    }
}

/// Owns the live configuration and ROI, swapped atomically so an in-flight
/// capture or process iteration always observes one consistent pair.
pub struct SharedState {
    config: RwLock<DropConfig>,
    roi: RwLock<Roi>,
}

impl SharedState {
    pub fn new(config: DropConfig, roi: Roi) -> Self {
        Self {
            config: RwLock::new(config),
            roi: RwLock::new(roi),
        }
    }

    pub fn config(&self) -> DropConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub fn roi(&self) -> Roi {
        *self.roi.read().expect("roi lock poisoned")
    }

    pub fn set_roi(&self, roi: Roi) {
        *self.roi.write().expect("roi lock poisoned") = roi;
    }

    /// Validates and swaps in a new configuration. The previous configuration
    /// is retained if validation fails, so a bad hot-update never lands.
    pub fn update_config(&self, candidate: DropConfig) -> Result<(), DropError> {
        candidate.validate()?;
        *self.config.write().expect("config lock poisoned") = candidate;
        Ok(())
    }
}

/// The pipeline supervisor. Constructed once per session; `run` drives the
/// session to completion or until `shutdown` fires.
pub struct Supervisor {
    pub state: Arc<SharedState>,
    pub status: Arc<StatusPublisher>,
    pub device_cache: Arc<DeviceCache>,
    detector: Arc<tokio::sync::Mutex<DetectorOrchestrator>>,
    queue: Arc<FrameQueue>,
}

impl Supervisor {
    pub fn new(config: DropConfig, roi: Roi) -> Self {
        let detector = DetectorOrchestrator::new(config.detection.clone());
        let capacity = config.application.frame_queue_capacity;
        Self {
            state: Arc::new(SharedState::new(config, roi)),
            status: Arc::new(StatusPublisher::new()),
            device_cache: Arc::new(DeviceCache::new()),
            detector: Arc::new(tokio::sync::Mutex::new(detector)),
            queue: Arc::new(FrameQueue::new(capacity)),
        }
    }

    /// Spawns the capture task: repeatedly calls `camera.capture_full()` (or
    /// `capture_roi` in software ROI mode) and enqueues each frame.
    pub fn spawn_capture_task(
        &self,
        mut camera: Box<dyn Camera>,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> JoinHandle<Result<(), DropError>> {
        let queue = self.queue.clone();
        let state = self.state.clone();
        let status = self.status.clone();
        let mut shutdown = shutdown;

        tokio::spawn(async move {
            camera.start().await?;
            status.set_state(SessionState::Running);

            loop {
                if *shutdown.borrow() {
                    break;
                }
                let roi_mode_hardware = matches!(
                    state.config().application.roi_mode,
                    crate::config::RoiMode::Hardware
                );
                let frame = if roi_mode_hardware {
                    camera.capture_roi(state.roi()).await
                } else {
                    camera.capture_full().await
                };

                match frame {
                    Ok(frame) => queue.push(frame),
                    Err(err) => {
                        warn!("capture failed: {err}");
                        status.record_error(&err);
                    }
                }

                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_millis(1)) => {}
                }
            }

            camera.stop().await?;
            camera.close().await?;
            Ok(())
        })
    }

    /// Spawns the process task: pulls frames off the queue and drives them
    /// through the detector orchestrator, marking the "detector" subsystem
    /// degraded in the status record when the orchestrator degrades.
    pub fn spawn_process_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> JoinHandle<Result<Vec<DropletMeasurement>, DropError>> {
        let queue = self.queue.clone();
        let detector = self.detector.clone();
        let status = self.status.clone();

        tokio::spawn(async move {
            let mut all_measurements = Vec::new();
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let frame = tokio::select! {
                    frame = queue.pop() => frame,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                };

                let mut guard = detector.lock().await;
                match guard.process_frame(&frame) {
                    Ok(measurements) => all_measurements.extend(measurements),
                    Err(err) => {
                        warn!("detector pipeline error: {err}");
                        status.record_error(&err);
                        status.mark_degraded("detector");
                    }
                }
                if guard.state() == crate::detector::OrchestratorState::Degraded {
                    status.mark_degraded("detector");
                } else {
                    status.clear_degraded("detector");
                }
            }
            Ok(all_measurements)
        })
    }

    /// Spawns the C15 device cache poller over the given flow/heater modules.
    pub fn spawn_poller_task(
        &self,
        bus: Arc<BusArbiter>,
        flow_modules: Vec<String>,
        heater_modules: Vec<String>,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> JoinHandle<Result<(), DropError>> {
        let cache = self.device_cache.clone();
        tokio::spawn(async move { poller::run(&bus, &cache, flow_modules, heater_modules, shutdown).await })
    }

    /// Drives a fresh flow-channel write through its driver, then marks the
    /// module active in the device cache so the poller ramps up polling.
    pub async fn set_flow_pressure(&self, bus: &BusArbiter, module: &str, pascal: f32) -> Result<(), DropError> {
        let driver = FlowDriver::new(bus, module);
        driver.set_pressure_target(pascal).await?;
        self.device_cache.note_write(module);
        Ok(())
    }

    /// Drives a fresh heater setpoint write through its driver, then marks
    /// the module active in the device cache.
    pub async fn set_heater_target(&self, bus: &BusArbiter, module: &str, celsius: f32) -> Result<(), DropError> {
        let driver = HeaterDriver::new(bus, module);
        driver.set_temp_target(celsius).await?;
        self.device_cache.note_write(module);
        Ok(())
    }

    /// Validates and hot-swaps the live configuration, propagating the new
    /// detection config into the orchestrator atomically.
    pub async fn update_config(&self, candidate: DropConfig) -> Result<(), DropError> {
        self.state.update_config(candidate.clone())?;
        self.detector.lock().await.update_config(candidate.detection);
        info!("configuration hot-updated");
        Ok(())
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.queue.dropped_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Frame;

    fn test_frame(seq: u64) -> Frame {
        Frame::new(2, 2, vec![0u8; 12], 0, seq)
    }

    #[test]
    fn test_frame_queue_drops_oldest_when_full() {
        let queue = FrameQueue::new(2);
        queue.push(test_frame(1));
        queue.push(test_frame(2));
        queue.push(test_frame(3));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_frame_queue_pop_returns_fifo_order() {
        let queue = FrameQueue::new(4);
        queue.push(test_frame(1));
        queue.push(test_frame(2));
        assert_eq!(queue.pop().await.sequence, 1);
        assert_eq!(queue.pop().await.sequence, 2);
    }

    #[test]
    fn test_shared_state_update_config_rejects_invalid() {
        let config = sample_config();
        let state = SharedState::new(config.clone(), Roi { x: 0, y: 0, w: 10, h: 10 });
        let mut bad = config;
        bad.detection.min_area_px2 = 1000.0;
        bad.detection.max_area_px2 = 10.0;
        assert!(state.update_config(bad).is_err());
        assert_eq!(state.config().detection.max_area_px2, 200_000.0);
    }

    fn sample_config() -> DropConfig {
        use crate::config::{ApplicationConfig, BusConfig, CameraBackend, CameraConfig, ControlMode, RoiConfig, RoiMode};
        use crate::types::DetectionConfig;
        use std::collections::HashMap;

        let mut pins = HashMap::new();
        pins.insert("strobe".to_string(), 8u8);

        DropConfig {
            application: ApplicationConfig {
                log_level: "info".to_string(),
                simulate: true,
                control_mode: ControlMode::StrobeClocked,
                roi_mode: RoiMode::Software,
                flow_enabled: false,
                heater_enabled: false,
                droplet_enabled: true,
                frame_queue_capacity: 2,
            },
            bus: BusConfig {
                serial_device: "/dev/null".to_string(),
                baud_rate: 115_200,
                chip_select_pins: pins,
                timeout_ms: 500,
            },
            camera: CameraConfig {
                backend: CameraBackend::Simulated,
                default_roi: RoiConfig { x: 0, y: 0, w: 64, h: 64 },
                default_frame_rate_hz: 30.0,
            },
            detection: DetectionConfig::default(),
            gpio: Default::default(),
        }
    }
}
