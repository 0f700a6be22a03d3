//! The droplet detection pipeline (C6-C11): preprocessing, segmentation,
//! artifact rejection, measurement, and the orchestrator that drives them
//! per frame.

pub mod measure;
pub mod orchestrator;
pub mod preprocess;
pub mod reject;
pub mod segment;

pub use orchestrator::{DetectorOrchestrator, OrchestratorState, StageTiming};
