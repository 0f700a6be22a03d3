//! Detector orchestrator (C11): drives the C6-C10 pipeline per frame,
//! tracking per-stage timing and error counters, and owns the histograms
//! consulted by `snapshot_stats`.

use crate::detector::{measure, preprocess, reject::ArtifactRejector, segment};
use crate::error::DropError;
use crate::histogram::{RollingHistogram, Summary, DEFAULT_MAXLEN};
use crate::types::{DetectionConfig, DropletMeasurement, Frame};
use image::GrayImage;
use log::{error, warn};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// How many consecutive per-stage failures transition the orchestrator to
/// [`OrchestratorState::Degraded`] (§4.11).
const CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// How many frames of per-stage timing are retained for performance reporting.
const TIMING_HISTORY_LEN: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrchestratorState {
    Running,
    Degraded,
}

/// Per-stage wall-clock durations for one processed frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct StageTiming {
    pub preprocess: Duration,
    pub segment: Duration,
    pub reject: Duration,
    pub measure: Duration,
}

struct StageFailureCounters {
    preprocess: u32,
    segment: u32,
    reject: u32,
    measure: u32,
}

impl Default for StageFailureCounters {
    fn default() -> Self {
        Self {
            preprocess: 0,
            segment: 0,
            reject: 0,
            measure: 0,
        }
    }
}

/// Drives the detection pipeline for one session: honors frame-skip,
/// executes C6-C9 in order with per-stage error isolation, and publishes
/// results into C10's rolling histograms.
pub struct DetectorOrchestrator {
    config: RwLock<DetectionConfig>,
    profiles: RwLock<HashMap<String, DetectionConfig>>,
    reference_frame: RwLock<Option<GrayImage>>,
    rejector: ArtifactRejector,
    histograms: HashMap<&'static str, RollingHistogram>,
    timings: VecDeque<StageTiming>,
    failures: StageFailureCounters,
    state: OrchestratorState,
    frames_seen: u64,
}

impl DetectorOrchestrator {
    pub fn new(config: DetectionConfig) -> Self {
        let mut histograms = HashMap::new();
        histograms.insert("major_axis", RollingHistogram::new(DEFAULT_MAXLEN));
        histograms.insert("minor_axis", RollingHistogram::new(DEFAULT_MAXLEN));
        histograms.insert("area", RollingHistogram::new(DEFAULT_MAXLEN));
        histograms.insert("equivalent_diameter", RollingHistogram::new(DEFAULT_MAXLEN));

        Self {
            config: RwLock::new(config),
            profiles: RwLock::new(HashMap::new()),
            reference_frame: RwLock::new(None),
            rejector: ArtifactRejector::new(crate::detector::reject::DEFAULT_HISTORY_LEN, None),
            histograms,
            timings: VecDeque::with_capacity(TIMING_HISTORY_LEN),
            failures: StageFailureCounters::default(),
            state: OrchestratorState::Running,
            frames_seen: 0,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Sets the static background reference frame (required when the active
    /// config's background method is `Static`).
    pub fn set_reference_frame(&self, reference: &Frame) {
        let gray = preprocess::to_grayscale(reference);
        *self.reference_frame.write().expect("reference frame lock poisoned") = Some(gray);
    }

    /// Atomically replaces the detection configuration. The detector reads a
    /// stable snapshot per frame, so an in-flight `process_frame` call always
    /// sees one consistent config.
    pub fn update_config(&self, config: DetectionConfig) {
        *self.config.write().expect("config lock poisoned") = config;
    }

    pub fn config_snapshot(&self) -> DetectionConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Registers a named detection-config profile for later recall via
    /// `load_profile`, mirroring C16's named-profile-overlay concept at
    /// runtime rather than at startup-file-load time.
    pub fn register_profile(&self, name: impl Into<String>, config: DetectionConfig) {
        self.profiles.write().expect("profile lock poisoned").insert(name.into(), config);
    }

    /// Atomically swaps in a previously registered named profile. Unlike
    /// `update_config`, the caller supplies only a name; the profile itself
    /// must already be registered.
    pub fn load_profile(&self, name: &str) -> Result<(), DropError> {
        let config = self
            .profiles
            .read()
            .expect("profile lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| DropError::Configuration(format!("unknown detection profile '{name}'")))?;
        self.update_config(config);
        Ok(())
    }

    /// Resets histograms and the motion-gate history, leaving configuration
    /// and reference frame untouched.
    pub fn reset(&mut self) {
        for histogram in self.histograms.values_mut() {
            histogram.reset();
        }
        self.rejector = ArtifactRejector::new(crate::detector::reject::DEFAULT_HISTORY_LEN, None);
        self.timings.clear();
        self.failures = StageFailureCounters::default();
        self.state = OrchestratorState::Running;
        self.frames_seen = 0;
    }

    pub fn snapshot_stats(&self) -> HashMap<&'static str, Summary> {
        self.histograms
            .iter()
            .map(|(&name, histogram)| (name, histogram.summary()))
            .collect()
    }

    pub fn timing_history(&self) -> &VecDeque<StageTiming> {
        &self.timings
    }

    /// Runs C6->C7->C8->C9 on `frame` and pushes results into C10. Honors
    /// the configured frame-skip factor. Per-stage failures are isolated:
    /// the frame is dropped and processing continues, but three consecutive
    /// failures on the same stage move the orchestrator to `Degraded`,
    /// halting further consumption until `reset()`.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<Vec<DropletMeasurement>, DropError> {
        if self.state == OrchestratorState::Degraded {
            return Err(DropError::Pipeline {
                stage: "orchestrator".into(),
                message: "orchestrator is degraded; call reset() before resuming".into(),
            });
        }

        self.frames_seen += 1;
        let config = self.config_snapshot();
        if config.frame_skip > 1 && self.frames_seen % config.frame_skip as u64 != 0 {
            return Ok(Vec::new());
        }

        let mut timing = StageTiming::default();

        let reference = self.reference_frame.read().expect("reference frame lock poisoned");
        let start = Instant::now();
        let mask = match preprocess::preprocess(frame, &config, reference.as_ref()) {
            Ok(mask) => {
                self.failures.preprocess = 0;
                mask
            }
            Err(err) => {
                drop(reference);
                return self.handle_stage_failure("preprocess", err);
            }
        };
        drop(reference);
        timing.preprocess = start.elapsed();

        let start = Instant::now();
        let candidates = segment::segment(&mask, &config);
        self.failures.segment = 0;
        timing.segment = start.elapsed();

        let start = Instant::now();
        let accepted = self
            .rejector
            .reject(candidates, frame.sequence, &config.motion_gate, Some(&mask));
        self.failures.reject = 0;
        timing.reject = start.elapsed();

        let start = Instant::now();
        let measurements: Vec<DropletMeasurement> = accepted
            .iter()
            .map(|c| measure::measure(c, frame.sequence, 0.0))
            .collect();
        self.failures.measure = 0;
        timing.measure = start.elapsed();

        for m in &measurements {
            self.histograms.get_mut("major_axis").unwrap().push(m.major_axis_px);
            self.histograms.get_mut("minor_axis").unwrap().push(m.minor_axis_px);
            self.histograms.get_mut("area").unwrap().push(m.area_px2);
            self.histograms
                .get_mut("equivalent_diameter")
                .unwrap()
                .push(m.equivalent_diameter_px);
        }

        if self.timings.len() == TIMING_HISTORY_LEN {
            self.timings.pop_front();
        }
        self.timings.push_back(timing);

        Ok(measurements)
    }

    fn handle_stage_failure(
        &mut self,
        stage: &'static str,
        err: DropError,
    ) -> Result<Vec<DropletMeasurement>, DropError> {
        let counter = match stage {
            "preprocess" => &mut self.failures.preprocess,
            "segment" => &mut self.failures.segment,
            "reject" => &mut self.failures.reject,
            _ => &mut self.failures.measure,
        };
        *counter += 1;
        warn!("{stage} stage failed ({} consecutive): {err}", *counter);

        if *counter >= CONSECUTIVE_FAILURE_LIMIT {
            error!("{stage} stage failed {CONSECUTIVE_FAILURE_LIMIT} times in a row; degrading orchestrator");
            self.state = OrchestratorState::Degraded;
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BackgroundMethod;

    fn simple_frame(value: u8) -> Frame {
        Frame::new(32, 32, vec![value; 32 * 32 * 3], 0, 0)
    }

    #[test]
    fn test_frame_skip_honored() {
        let config = DetectionConfig {
            background_method: BackgroundMethod::HighPass,
            frame_skip: 3,
            ..DetectionConfig::default()
        };
        let mut orchestrator = DetectorOrchestrator::new(config);
        let frame = simple_frame(100);
        let mut processed_count = 0;
        for seq in 1..=9u64 {
            let f = Frame { sequence: seq, ..frame.clone() };
            let result = orchestrator.process_frame(&f).unwrap();
            if seq % 3 == 0 {
                processed_count += 1;
            }
            let _ = result;
        }
        assert_eq!(processed_count, 3);
    }

    #[test]
    fn test_static_background_without_reference_degrades_after_three_failures() {
        let config = DetectionConfig {
            background_method: BackgroundMethod::Static,
            frame_skip: 1,
            ..DetectionConfig::default()
        };
        let mut orchestrator = DetectorOrchestrator::new(config);
        let frame = simple_frame(50);

        for _ in 0..3 {
            orchestrator.process_frame(&frame).unwrap();
        }
        assert_eq!(orchestrator.state(), OrchestratorState::Degraded);

        let result = orchestrator.process_frame(&frame);
        assert!(result.is_err());
    }

    #[test]
    fn test_reset_clears_degraded_state() {
        let config = DetectionConfig {
            background_method: BackgroundMethod::Static,
            frame_skip: 1,
            ..DetectionConfig::default()
        };
        let mut orchestrator = DetectorOrchestrator::new(config);
        let frame = simple_frame(50);
        for _ in 0..3 {
            orchestrator.process_frame(&frame).unwrap();
        }
        assert_eq!(orchestrator.state(), OrchestratorState::Degraded);
        orchestrator.reset();
        assert_eq!(orchestrator.state(), OrchestratorState::Running);
    }

    #[test]
    fn test_update_config_is_visible_to_next_frame() {
        let config = DetectionConfig {
            background_method: BackgroundMethod::HighPass,
            ..DetectionConfig::default()
        };
        let orchestrator = DetectorOrchestrator::new(config);
        let mut updated = orchestrator.config_snapshot();
        updated.frame_skip = 5;
        orchestrator.update_config(updated);
        assert_eq!(orchestrator.config_snapshot().frame_skip, 5);
    }

    #[test]
    fn test_load_profile_swaps_registered_config() {
        let orchestrator = DetectorOrchestrator::new(DetectionConfig::default());
        let mut high_sensitivity = orchestrator.config_snapshot();
        high_sensitivity.frame_skip = 7;
        orchestrator.register_profile("high_sensitivity", high_sensitivity);

        orchestrator.load_profile("high_sensitivity").unwrap();
        assert_eq!(orchestrator.config_snapshot().frame_skip, 7);
    }

    #[test]
    fn test_load_profile_unknown_name_is_config_error() {
        let orchestrator = DetectorOrchestrator::new(DetectionConfig::default());
        let result = orchestrator.load_profile("does_not_exist");
        assert!(matches!(result, Err(DropError::Configuration(_))));
    }
}
