mod orchestrator;
mod plan;
mod run_log;
mod runner;
mod sequencer;
mod types;

pub use orchestrator::{run_session, run_session_reported, AlignmentResult, SessionReport};
pub use plan::{enumerate_units, ProcessingUnit};
pub use run_log::{RunLog, RunLogRow};
pub use runner::{DryRunner, ProcessRunner, StageRunner, StageStatus};
pub use sequencer::{PlannedUnit, Sequencer, UnitOutcome};
pub use types::{ProgressReporter, Stage, UnitState};
