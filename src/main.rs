//! CLI entry point: loads configuration, installs logging, wires up the bus,
//! camera, and coordinator, and runs the supervisor until interrupted.

use clap::Parser;
use dropcore::camera::{Camera, SimulatedCamera};
use dropcore::config::{self, CameraBackend, ControlMode, DropConfig};
use dropcore::coordinator::{self, Coordinator};
use dropcore::error::DropError;
use dropcore::gpio::{GpioBank, SimulatedLine};
use dropcore::strobe::StrobeDriver;
use dropcore::supervisor::Supervisor;
use dropcore::transport::{BusArbiter, SimulatedTransport, Transport};
use dropcore::types::Roi;
use futures::future::join3;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "dropcore", about = "Strobe/camera synchronization and droplet detection core")]
struct Args {
    /// Path to the base TOML configuration file.
    #[arg(short, long, default_value = "dropcore.toml")]
    config: PathBuf,

    /// Optional named profile overlay (e.g. "bench", "production").
    #[arg(short, long)]
    profile: Option<String>,

    /// Forces the simulated camera/bus/GPIO backends regardless of config.
    #[arg(long)]
    simulate: bool,

    /// Overrides the configured log level (error, warn, info, debug, trace).
    #[arg(long)]
    log_level: Option<String>,
}

fn build_gpio_bank(config: &DropConfig, trigger_line: Arc<SimulatedLine>) -> GpioBank {
    let mut bank = GpioBank::new();
    for module in config.bus.chip_select_pins.keys() {
        bank.register(module.clone(), Arc::new(SimulatedLine::new()));
    }
    bank.register("trigger", trigger_line);
    bank
}

fn build_transport(config: &DropConfig) -> Result<Box<dyn Transport>, DropError> {
    if config.application.simulate {
        return Ok(Box::new(SimulatedTransport::default()));
    }

    #[cfg(feature = "instrument_serial")]
    {
        // The wire is shared across every chip-select module, so this is a
        // protocol-level read-after-write floor, not the per-module pause
        // the arbiter enforces via `set_reply_pause`.
        let transport = dropcore::transport::SerialTransport::open(
            &config.bus.serial_device,
            config.bus.baud_rate,
            Duration::from_millis(config::default_reply_pause_ms()),
        )?;
        return Ok(Box::new(transport));
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        Err(DropError::FeatureNotEnabled("instrument_serial".into()))
    }
}

fn build_camera(config: &DropConfig) -> Result<Box<dyn Camera>, DropError> {
    match config.camera.backend {
        CameraBackend::Simulated => Ok(Box::new(SimulatedCamera::new(
            config.camera.default_roi.w,
            config.camera.default_roi.h,
            42,
            5,
            40.0,
        ))),
        #[cfg(feature = "camera_v4l")]
        CameraBackend::PiLegacy => Ok(Box::new(dropcore::camera::pi::PiCamera::open(
            "/dev/video0",
            dropcore::camera::pi::PiCameraVariant::Legacy,
            config.camera.default_roi.w,
            config.camera.default_roi.h,
        )?)),
        #[cfg(feature = "camera_v4l")]
        CameraBackend::PiV2 => Ok(Box::new(dropcore::camera::pi::PiCamera::open(
            "/dev/video0",
            dropcore::camera::pi::PiCameraVariant::V2,
            config.camera.default_roi.w,
            config.camera.default_roi.h,
        )?)),
        #[cfg(feature = "camera_v4l")]
        CameraBackend::MachineVision => Ok(Box::new(dropcore::camera::machine_vision::MachineVisionCamera::open(
            "/dev/video0",
            config.camera.default_roi.w,
            config.camera.default_roi.h,
        )?)),
        #[cfg(not(feature = "camera_v4l"))]
        CameraBackend::PiLegacy | CameraBackend::PiV2 | CameraBackend::MachineVision => {
            Err(DropError::FeatureNotEnabled("camera_v4l".into()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), DropError> {
    let args = Args::parse();

    let mut config = DropConfig::load(&args.config, args.profile.as_deref())?;
    if args.simulate {
        config.application.simulate = true;
    }

    let log_level = args.log_level.clone().unwrap_or_else(|| config.application.log_level.clone());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!(
        "starting dropcore session at {} (control_mode={:?}, backend={:?})",
        chrono::Local::now().to_rfc3339(),
        config.application.control_mode,
        config.camera.backend
    );

    let roi = Roi {
        x: config.camera.default_roi.x,
        y: config.camera.default_roi.y,
        w: config.camera.default_roi.w,
        h: config.camera.default_roi.h,
    };

    let trigger_line = Arc::new(SimulatedLine::new());
    let gpio = build_gpio_bank(&config, trigger_line.clone());
    let transport = build_transport(&config)?;
    let mut bus = BusArbiter::new(transport, gpio);
    for module in config.bus.chip_select_pins.keys() {
        let pause_ms = config
            .bus
            .reply_pause_ms
            .get(module)
            .copied()
            .unwrap_or_else(config::default_reply_pause_ms);
        bus.set_reply_pause(module.clone(), Duration::from_millis(pause_ms));
    }
    let bus = Arc::new(bus);

    let control_mode = match config.application.control_mode {
        ControlMode::StrobeClocked => coordinator::ControlMode::StrobeClocked,
        ControlMode::CameraClocked => coordinator::ControlMode::CameraClocked,
    };
    let strobe = StrobeDriver::new(&bus);
    let mut coord = Coordinator::new(control_mode, strobe, trigger_line);
    coord.start();
    coord.arm(2_000_000, 1_500_000).await?;
    coord.enable().await?;

    let camera = build_camera(&config)?;
    let supervisor = Supervisor::new(config.clone(), roi);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let capture_handle = supervisor.spawn_capture_task(camera, shutdown_rx.clone());
    let process_handle = supervisor.spawn_process_task(shutdown_rx.clone());

    let mut flow_modules = Vec::new();
    let mut heater_modules = Vec::new();
    if config.application.flow_enabled {
        flow_modules.extend(config.bus.chip_select_pins.keys().filter(|m| m.starts_with("flow")).cloned());
    }
    if config.application.heater_enabled {
        heater_modules.extend(config.bus.chip_select_pins.keys().filter(|m| m.starts_with("heater")).cloned());
    }
    let poller_handle = supervisor.spawn_poller_task(bus.clone(), flow_modules, heater_modules, shutdown_rx.clone());

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut rx = shutdown_rx;
    let _ = rx.changed().await;

    let _ = join3(capture_handle, process_handle, poller_handle).await;
    coord.stop().await?;

    log::info!(
        "dropcore session ended with {} degraded subsystem(s), {} frames dropped",
        supervisor.status.snapshot().degraded_subsystems.len(),
        supervisor.frames_dropped(),
    );

    Ok(())
}

