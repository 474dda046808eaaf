use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::descriptor::{DescriptorBuilder, SessionOverrides, SortedOutput, StageJob};
use crate::error::{PipelineError, Result};
use crate::geometry::{derive_site_counts, DerivedParameters, GeometryTable};
use crate::session::{SessionConfig, SessionContext, SessionDescriptor};

use super::plan::enumerate_units;
use super::run_log::{RunLog, RunLogRow};
use super::runner::StageRunner;
use super::sequencer::{PlannedUnit, Sequencer, UnitOutcome};
use super::types::{NoOpReporter, ProgressReporter, Stage};

/// What happened to the session-wide alignment stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlignmentResult {
    Disabled,
    /// No unit finished, so there was nothing to align.
    Skipped,
    Done { units: usize },
    Failed(String),
}

impl std::fmt::Display for AlignmentResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Skipped => write!(f, "skipped"),
            Self::Done { units } => write!(f, "done over {units} units"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Result of one orchestrator run over a session.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub uuid: String,
    pub stem: String,
    pub outcomes: Vec<UnitOutcome>,
    pub alignment: AlignmentResult,
    pub run_log: PathBuf,
}

impl SessionReport {
    pub fn done_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_done()).count()
    }

    pub fn is_success(&self) -> bool {
        self.done_count() == self.outcomes.len()
            && !matches!(
                self.alignment,
                AlignmentResult::Failed(_) | AlignmentResult::Skipped
            )
    }
}

struct SessionPlan {
    derived: BTreeMap<u32, DerivedParameters>,
    preprocessing: BTreeMap<u32, StageJob>,
    units: Vec<PlannedUnit>,
}

/// Build every descriptor of the session before anything runs.
///
/// Sorting reads the output its probe's preprocessing job declares, and no
/// two units may share a sorting output directory.
fn build_plan(
    ctx: &SessionContext,
    table: &GeometryTable,
    overrides: &SessionOverrides,
) -> Result<SessionPlan> {
    let modules = &ctx.session.modules;
    let builder = DescriptorBuilder::new(ctx);
    let radii = ctx.config.radius_params();

    let mut derived = BTreeMap::new();
    for &probe in &ctx.probes {
        let probe_type = &ctx.ephys_for(probe)?.probe_type;
        derived.insert(probe, derive_site_counts(probe_type, table, &radii)?);
    }

    let units = enumerate_units(ctx)?;
    let mut preprocessing: BTreeMap<u32, StageJob> = BTreeMap::new();
    let mut outputs: BTreeMap<PathBuf, String> = BTreeMap::new();
    let mut planned = Vec::with_capacity(units.len());
    for unit in units {
        let id = unit.id();
        let params = derived[&unit.probe];
        let mut unit_overrides = overrides.for_unit(&id);
        if modules.run_catgt {
            if !preprocessing.contains_key(&unit.probe) {
                let job = builder.build(&unit, Stage::Preprocessing, &params, &unit_overrides)?;
                preprocessing.insert(unit.probe, job);
            }
            if unit_overrides.continuous_file.is_some() {
                return Err(PipelineError::ConflictingOptions(format!(
                    "{id}: continuous file override bypasses the preprocessing output"
                )));
            }
            unit_overrides.continuous_file = preprocessing
                .get(&unit.probe)
                .map(|job| job.produces.clone());
        }

        let sorting = builder.build(&unit, Stage::Sorting, &params, &unit_overrides)?;
        if let Some(other) = outputs.insert(sorting.produces.clone(), id.clone()) {
            return Err(PipelineError::ConflictingOptions(format!(
                "{other} and {id} share sorting output {}",
                sorting.produces.display()
            )));
        }
        let postprocessing = if modules.postprocessing_modules().is_empty() {
            None
        } else {
            Some(builder.build(&unit, Stage::PostProcessing, &params, &unit_overrides)?)
        };
        let sorted = SortedOutput {
            unit: id,
            probe: unit.probe,
            continuous_file: sorting.descriptor.ephys_params.ap_band_file.clone(),
            directory: sorting.produces.clone(),
        };
        planned.push(PlannedUnit {
            unit,
            sorting: modules.kilosort_helper.then_some(sorting),
            postprocessing,
            sorted,
        });
    }

    Ok(SessionPlan {
        derived,
        preprocessing,
        units: planned,
    })
}

/// Process one session end to end.
pub fn run_session(
    session: &SessionDescriptor,
    table: &GeometryTable,
    runner: &dyn StageRunner,
) -> Result<SessionReport> {
    run_session_reported(
        session,
        table,
        runner,
        &SessionOverrides::default(),
        &NoOpReporter,
    )
}

/// Process one session end to end, reporting progress.
///
/// Errors while resolving the session or building descriptors abort the run
/// before any stage starts. Stage failures are recorded per unit and in the
/// run log; they never abort sibling units.
pub fn run_session_reported(
    session: &SessionDescriptor,
    table: &GeometryTable,
    runner: &dyn StageRunner,
    overrides: &SessionOverrides,
    reporter: &dyn ProgressReporter,
) -> Result<SessionReport> {
    let config = SessionConfig::load(&session.config)?;
    let ctx = SessionContext::resolve(config, session.clone())?;
    let stem = ctx.layout.stem.clone();
    let uuid = session.uuid.clone();
    let log = RunLog::new(ctx.layout.run_log_path(&uuid));

    let plan = match build_plan(&ctx, table, overrides) {
        Ok(plan) => plan,
        Err(e) => {
            error!(session = %stem, error = %e, "Session aborted before any stage ran");
            log.append(&RunLogRow::new(&uuid, &stem, true, format!("ABORTED: {e}")))?;
            return Err(e);
        }
    };
    info!(
        session = %stem,
        units = plan.units.len(),
        preprocessing_jobs = plan.preprocessing.len(),
        "Session planned"
    );
    reporter.begin_session(&stem, plan.units.len());

    let sequencer = Sequencer::new(runner, &log, reporter, &uuid, &stem);
    let outcomes = sequencer.run(&plan.units, &plan.preprocessing)?;

    let alignment = if session.modules.run_tprime {
        align(&ctx, &plan, &outcomes, &sequencer, &log, reporter)?
    } else {
        AlignmentResult::Disabled
    };

    let done = outcomes.iter().filter(|o| o.is_done()).count();
    let failed = done < outcomes.len() || matches!(alignment, AlignmentResult::Failed(_));
    log.append(&RunLogRow::new(
        &uuid,
        &stem,
        failed,
        format!("{done}/{} units done; alignment {alignment}", outcomes.len()),
    ))?;
    info!(session = %stem, done, total = outcomes.len(), %alignment, "Session finished");
    reporter.finish_session();

    Ok(SessionReport {
        uuid,
        stem,
        outcomes,
        alignment,
        run_log: log.path().to_path_buf(),
    })
}

fn align(
    ctx: &SessionContext,
    plan: &SessionPlan,
    outcomes: &[UnitOutcome],
    sequencer: &Sequencer<'_>,
    log: &RunLog,
    reporter: &dyn ProgressReporter,
) -> Result<AlignmentResult> {
    let stem = &ctx.layout.stem;
    let uuid = &ctx.session.uuid;
    let file = format!("{stem}/{}", Stage::Alignment);

    for outcome in outcomes.iter().filter(|o| !o.is_done()) {
        log.append(&RunLogRow::new(
            uuid,
            format!("{stem}/{}/{}", outcome.id, Stage::Alignment),
            true,
            format!("omitted from alignment: {}", outcome.state),
        ))?;
    }

    let sorted: Vec<SortedOutput> = outcomes.iter().filter_map(|o| o.sorted.clone()).collect();
    let Some(first) = sorted.first() else {
        warn!(session = %stem, "No unit finished; skipping alignment");
        log.append(&RunLogRow::new(uuid, file, true, "skipped: no sorted units"))?;
        return Ok(AlignmentResult::Skipped);
    };

    reporter.begin_stage(stem, Stage::Alignment);
    let derived = plan.derived[&first.probe];
    let result = DescriptorBuilder::new(ctx)
        .build_alignment(&sorted, &derived)
        .and_then(|job| {
            log.append(&RunLogRow::new(uuid, file.as_str(), false, "ALIGNING"))?;
            sequencer.execute(&job)
        });

    match result {
        Ok(()) => {
            log.append(&RunLogRow::new(uuid, file, false, "DONE"))?;
            Ok(AlignmentResult::Done {
                units: sorted.len(),
            })
        }
        Err(e) => {
            warn!(session = %stem, error = %e, "Alignment failed");
            log.append(&RunLogRow::new(uuid, file, true, format!("FAILED: {e}")))?;
            Ok(AlignmentResult::Failed(e.to_string()))
        }
    }
}
