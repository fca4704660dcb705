//! Pipeline orchestration.
//!
//! Each article runs in its own background task; within a run the steps
//! are strictly sequential. The detect-optimise loop is shared by the
//! `optimize` step (URL import) and the `create` step (topic creation).

mod cancel;
mod detect_optimize;
mod orchestrator;
mod steps;

pub use cancel::CancelToken;
pub use detect_optimize::{CommitSlot, DetectOptimizeLoop, LoopConfig, LoopKind, LoopOutcome};
pub use orchestrator::{
    BatchItem, BatchOutcome, Orchestrator, OrchestratorBuilder, Priority, ProcessOptions,
};
pub use steps::Step;
