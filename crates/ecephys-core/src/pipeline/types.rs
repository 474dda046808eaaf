use serde::{Deserialize, Serialize};

/// External processing stage, in dependency order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Preprocessing,
    Sorting,
    PostProcessing,
    Alignment,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preprocessing => write!(f, "preprocessing"),
            Self::Sorting => write!(f, "sorting"),
            Self::PostProcessing => write!(f, "postprocessing"),
            Self::Alignment => write!(f, "alignment"),
        }
    }
}

/// Lifecycle of one processing unit.
///
/// `Failed` records the stage that failed and is reachable from any
/// non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Preprocessing,
    Sorting,
    PostProcessing,
    Done,
    Failed(Stage),
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    /// State entered when `stage` starts. Alignment runs once per session
    /// and has no unit state.
    pub fn running(stage: Stage) -> Option<Self> {
        match stage {
            Stage::Preprocessing => Some(Self::Preprocessing),
            Stage::Sorting => Some(Self::Sorting),
            Stage::PostProcessing => Some(Self::PostProcessing),
            Stage::Alignment => None,
        }
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Preprocessing => write!(f, "PREPROCESSING"),
            Self::Sorting => write!(f, "SORTING"),
            Self::PostProcessing => write!(f, "POSTPROCESSING"),
            Self::Done => write!(f, "DONE"),
            Self::Failed(stage) => write!(f, "FAILED at {stage}"),
        }
    }
}

/// Progress callbacks for front-ends. Every method defaults to a no-op.
pub trait ProgressReporter: Send + Sync {
    /// A session has been planned into `units` processing units.
    fn begin_session(&self, _stem: &str, _units: usize) {}

    /// `stage` is starting for `unit`.
    fn begin_stage(&self, _unit: &str, _stage: Stage) {}

    /// `unit` reached a terminal state.
    fn finish_unit(&self, _unit: &str, _state: UnitState) {}

    fn finish_session(&self) {}
}

/// Reporter used when the caller does not supply one.
pub(super) struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}
