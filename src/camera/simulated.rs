//! Simulated camera backend (`simulated` feature): synthesizes frames
//! containing drifting elliptical "droplets" against a noisy background.
//! Seeded with `rand_chacha` so a fixed seed and config reproduce a
//! bit-exact sequence of frames (§8.7).

use crate::camera::{Camera, FrameHook};
use crate::error::DropError;
use crate::types::{Frame, Roi};
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

/// One synthetic ellipse drifting downstream across frames.
#[derive(Clone, Copy, Debug)]
struct SyntheticDroplet {
    cx: f32,
    cy: f32,
    major: f32,
    minor: f32,
    vx: f32,
}

/// Deterministic simulated camera. Useful both for property tests and as a
/// development backend with no hardware attached.
pub struct SimulatedCamera {
    width: u32,
    height: u32,
    rng: ChaCha8Rng,
    droplets: Vec<SyntheticDroplet>,
    sequence: u64,
    running: bool,
    hook: Option<FrameHook>,
}

impl SimulatedCamera {
    pub fn new(width: u32, height: u32, seed: u64, droplet_count: usize, major_axis_px: f32) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let droplets = (0..droplet_count)
            .map(|_| SyntheticDroplet {
                cx: rng.gen_range(0.0..width as f32),
                cy: rng.gen_range(0.0..height as f32),
                major: major_axis_px,
                minor: major_axis_px * rng.gen_range(0.6..0.9),
                vx: rng.gen_range(3.0..8.0),
            })
            .collect();

        Self {
            width,
            height,
            rng,
            droplets,
            sequence: 0,
            running: false,
            hook: None,
        }
    }

    fn render(&mut self) -> Frame {
        let mut pixels = vec![20u8; (self.width * self.height * 3) as usize];

        for droplet in &mut self.droplets {
            droplet.cx += droplet.vx;
            if droplet.cx - droplet.major > self.width as f32 {
                droplet.cx = -droplet.major;
            }
        }

        let droplets = self.droplets.clone();
        for y in 0..self.height {
            for x in 0..self.width {
                for droplet in &droplets {
                    let dx = (x as f32 - droplet.cx) / (droplet.major / 2.0);
                    let dy = (y as f32 - droplet.cy) / (droplet.minor / 2.0);
                    if dx * dx + dy * dy <= 1.0 {
                        let idx = ((y * self.width + x) * 3) as usize;
                        pixels[idx] = 220;
                        pixels[idx + 1] = 220;
                        pixels[idx + 2] = 220;
                    }
                }
            }
        }

        for p in pixels.iter_mut() {
            let noise: i16 = self.rng.gen_range(-4..=4);
            *p = (*p as i16 + noise).clamp(0, 255) as u8;
        }

        let timestamp_ns = self.sequence * 33_000_000;
        let frame = Frame::new(self.height, self.width, pixels, timestamp_ns, self.sequence);
        self.sequence += 1;
        frame
    }
}

#[async_trait]
impl Camera for SimulatedCamera {
    async fn start(&mut self) -> Result<(), DropError> {
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DropError> {
        self.running = false;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DropError> {
        self.running = false;
        Ok(())
    }

    async fn capture_full(&mut self) -> Result<Frame, DropError> {
        if !self.running {
            return Err(DropError::Capture("camera not started".into()));
        }
        let frame = self.render();
        if let Some(hook) = &self.hook {
            hook(&frame);
        }
        Ok(frame)
    }

    async fn capture_roi(&mut self, roi: Roi) -> Result<Frame, DropError> {
        let frame = self.capture_full().await?;
        crate::camera::software_crop(&frame, roi)
    }

    fn set_frame_callback(&mut self, hook: Option<FrameHook>) {
        self.hook = hook;
    }

    fn list_features(&self) -> HashMap<String, bool> {
        let mut features = HashMap::new();
        features.insert("hardware_roi".to_string(), false);
        features.insert("hardware_trigger".to_string(), false);
        features
    }
}
