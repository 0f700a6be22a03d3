//! Artifact rejector (C8): suppresses static features by gating contours on
//! monotonic downstream motion against a short history of accepted centroids.

use crate::detector::segment::Candidate;
use crate::types::{FlowDirection, MotionGateConfig};
use image::GrayImage;
use std::collections::VecDeque;

/// Default number of prior frames kept in the motion-gate history (§4.8).
pub const DEFAULT_HISTORY_LEN: usize = 5;

#[derive(Clone, Copy, Debug)]
struct HistoricalCentroid {
    frame_seq: u64,
    position: (f32, f32),
}

/// Holds the rolling history of accepted centroids and, optionally, the
/// previous preprocessed frame for the frame-differencing secondary gate.
/// Rejection is otherwise a pure function of (contours, history, config).
pub struct ArtifactRejector {
    history: VecDeque<HistoricalCentroid>,
    history_len: usize,
    previous_frame: Option<GrayImage>,
    frame_diff_threshold: Option<f32>,
}

impl ArtifactRejector {
    pub fn new(history_len: usize, frame_diff_threshold: Option<f32>) -> Self {
        Self {
            history: VecDeque::with_capacity(history_len),
            history_len,
            previous_frame: None,
            frame_diff_threshold,
        }
    }

    /// Filters `candidates` down to those accepted as genuine droplets,
    /// updating the history with the accepted centroids for the next call.
    pub fn reject(
        &mut self,
        candidates: Vec<Candidate>,
        frame_seq: u64,
        gate: &MotionGateConfig,
        current_frame: Option<&GrayImage>,
    ) -> Vec<Candidate> {
        let mut accepted = Vec::new();

        for candidate in candidates {
            if self.accept(&candidate, gate) && self.passes_frame_diff(&candidate, current_frame) {
                accepted.push(candidate);
            }
        }

        for candidate in &accepted {
            self.history.push_back(HistoricalCentroid {
                frame_seq,
                position: candidate.centroid,
            });
        }
        while self.history.len() > self.history_len {
            self.history.pop_front();
        }

        if let Some(frame) = current_frame {
            self.previous_frame = Some(frame.clone());
        }

        accepted
    }

    fn accept(&self, candidate: &Candidate, gate: &MotionGateConfig) -> bool {
        let nearest = self
            .history
            .iter()
            .min_by(|a, b| distance(a.position, candidate.centroid).total_cmp(&distance(b.position, candidate.centroid)));

        let Some(nearest) = nearest else {
            // No history at all: treat as a new droplet entering the field.
            return true;
        };

        if distance(nearest.position, candidate.centroid) > gate.radius_px {
            // Nothing nearby in history: a newly entering droplet.
            return true;
        }

        let downstream_displacement = match gate.direction {
            FlowDirection::Increasing => candidate.centroid.0 - nearest.position.0,
            FlowDirection::Decreasing => nearest.position.0 - candidate.centroid.0,
        };

        downstream_displacement > gate.min_displacement_px
    }

    fn passes_frame_diff(&self, candidate: &Candidate, current_frame: Option<&GrayImage>) -> bool {
        let Some(threshold) = self.frame_diff_threshold else {
            return true;
        };
        let (Some(current), Some(previous)) = (current_frame, self.previous_frame.as_ref()) else {
            return true;
        };

        let (x, y, w, h) = candidate.bbox;
        let mut sum = 0u64;
        let mut count = 0u64;
        for yy in y..(y + h).min(current.height()) {
            for xx in x..(x + w).min(current.width()) {
                if xx < previous.width() && yy < previous.height() {
                    let a = current.get_pixel(xx, yy).0[0] as i32;
                    let b = previous.get_pixel(xx, yy).0[0] as i32;
                    sum += (a - b).unsigned_abs() as u64;
                    count += 1;
                }
            }
        }
        let mean_abs_diff = if count > 0 { sum as f32 / count as f32 } else { 0.0 };
        mean_abs_diff > threshold
    }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}
