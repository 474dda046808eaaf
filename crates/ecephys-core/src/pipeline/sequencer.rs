use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::descriptor::{SortedOutput, StageJob};
use crate::error::{PipelineError, Result};

use super::plan::ProcessingUnit;
use super::run_log::{RunLog, RunLogRow};
use super::runner::StageRunner;
use super::types::{ProgressReporter, Stage, UnitState};

/// Pre-built jobs for one unit. A `None` stage is disabled for the session.
#[derive(Clone, Debug)]
pub struct PlannedUnit {
    pub unit: ProcessingUnit,
    pub sorting: Option<StageJob>,
    pub postprocessing: Option<StageJob>,
    /// What alignment consumes if the unit finishes.
    pub sorted: SortedOutput,
}

/// Terminal result of one unit.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitOutcome {
    pub unit: ProcessingUnit,
    pub id: String,
    pub state: UnitState,
    pub error: Option<String>,
    /// Set only when the unit is `Done`.
    pub sorted: Option<SortedOutput>,
}

impl UnitOutcome {
    pub fn is_done(&self) -> bool {
        self.state == UnitState::Done
    }
}

/// Drives units through their stages, one blocking stage at a time.
///
/// A unit advances only when every invocation of the current stage exits
/// with status zero; otherwise it fails and its later stages are skipped.
/// Siblings keep going. Preprocessing runs once per probe and its result is
/// shared by every unit of that probe.
pub struct Sequencer<'a> {
    runner: &'a dyn StageRunner,
    log: &'a RunLog,
    reporter: &'a dyn ProgressReporter,
    uuid: &'a str,
    stem: &'a str,
}

impl<'a> Sequencer<'a> {
    pub fn new(
        runner: &'a dyn StageRunner,
        log: &'a RunLog,
        reporter: &'a dyn ProgressReporter,
        uuid: &'a str,
        stem: &'a str,
    ) -> Self {
        Self {
            runner,
            log,
            reporter,
            uuid,
            stem,
        }
    }

    /// Run every invocation of `job` in order, stopping at the first failure.
    pub fn execute(&self, job: &StageJob) -> Result<()> {
        for invocation in &job.invocations {
            let failed = |status: String| PipelineError::StageExecutionFailed {
                stage: job.stage.to_string(),
                unit: job.unit.clone(),
                status: format!("{}: {status}", invocation.module),
            };
            let status = self
                .runner
                .run(invocation)
                .map_err(|e| failed(e.to_string()))?;
            if !status.is_success() {
                return Err(failed(status.to_string()));
            }
        }
        Ok(())
    }

    /// Run all planned units in order. Only run-log I/O errors are returned;
    /// stage failures end up in the outcomes.
    pub fn run(
        &self,
        plan: &[PlannedUnit],
        preprocessing: &BTreeMap<u32, StageJob>,
    ) -> Result<Vec<UnitOutcome>> {
        let mut probe_results: BTreeMap<u32, std::result::Result<(), String>> = BTreeMap::new();
        let mut outcomes = Vec::with_capacity(plan.len());
        for planned in plan {
            let outcome = self.run_unit(planned, preprocessing, &mut probe_results)?;
            self.reporter.finish_unit(&outcome.id, outcome.state);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn run_unit(
        &self,
        planned: &PlannedUnit,
        preprocessing: &BTreeMap<u32, StageJob>,
        probe_results: &mut BTreeMap<u32, std::result::Result<(), String>>,
    ) -> Result<UnitOutcome> {
        let unit = &planned.unit;
        let id = unit.id();

        if let Some(job) = preprocessing.get(&unit.probe) {
            let shared = probe_results.contains_key(&unit.probe);
            self.enter(&id, Stage::Preprocessing, shared)?;
            let result = match probe_results.get(&unit.probe) {
                Some(result) => result.clone(),
                None => {
                    let result = self.execute(job).map_err(|e| e.to_string());
                    probe_results.insert(unit.probe, result.clone());
                    result
                }
            };
            if let Err(reason) = result {
                return self.fail(planned, id, Stage::Preprocessing, reason);
            }
        }

        if let Some(job) = &planned.sorting {
            self.enter(&id, Stage::Sorting, false)?;
            let result = copy_module_input(job)
                .map_err(|e| e.to_string())
                .and_then(|_| self.execute(job).map_err(|e| e.to_string()));
            if let Err(reason) = result {
                return self.fail(planned, id, Stage::Sorting, reason);
            }
        }

        if let Some(job) = &planned.postprocessing {
            self.enter(&id, Stage::PostProcessing, false)?;
            if let Err(e) = self.execute(job) {
                return self.fail(planned, id, Stage::PostProcessing, e.to_string());
            }
        }

        self.log.append(&RunLogRow::new(
            self.uuid,
            format!("{}/{id}", self.stem),
            false,
            UnitState::Done.to_string(),
        ))?;
        info!(unit = %id, "Unit done");
        Ok(UnitOutcome {
            unit: *unit,
            id,
            state: UnitState::Done,
            error: None,
            sorted: Some(planned.sorted.clone()),
        })
    }

    fn enter(&self, id: &str, stage: Stage, shared: bool) -> Result<()> {
        self.reporter.begin_stage(id, stage);
        let state = UnitState::running(stage).ok_or_else(|| {
            PipelineError::InvalidSession(format!("{stage} is not a per-unit stage"))
        })?;
        let mut description = state.to_string();
        if shared {
            description.push_str(" (shared probe result)");
        }
        info!(unit = %id, stage = %stage, "Stage starting");
        self.log.append(&RunLogRow::new(
            self.uuid,
            format!("{}/{id}/{stage}", self.stem),
            false,
            description,
        ))
    }

    fn fail(
        &self,
        planned: &PlannedUnit,
        id: String,
        stage: Stage,
        reason: String,
    ) -> Result<UnitOutcome> {
        let state = UnitState::Failed(stage);
        warn!(unit = %id, stage = %stage, error = %reason, "Unit failed");
        self.log.append(&RunLogRow::new(
            self.uuid,
            format!("{}/{id}/{stage}", self.stem),
            true,
            format!("{state}: {reason}"),
        ))?;
        Ok(UnitOutcome {
            unit: planned.unit,
            id,
            state,
            error: Some(reason),
            sorted: None,
        })
    }
}

/// Copy the unit's module input descriptor into its probe data directory.
fn copy_module_input(job: &StageJob) -> Result<PathBuf> {
    let data_dir = &job.descriptor.directories.extracted_data_directory;
    let file_name = job
        .input_artifact
        .file_name()
        .ok_or_else(|| PipelineError::RelativePath(job.input_artifact.clone()))?;
    let target = data_dir.join(file_name);
    std::fs::create_dir_all(data_dir)?;
    std::fs::copy(&job.input_artifact, &target)?;
    Ok(target)
}
