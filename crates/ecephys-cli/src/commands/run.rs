use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing::warn;

use ecephys_core::descriptor::SessionOverrides;
use ecephys_core::pipeline::{
    run_session_reported, DryRunner, ProcessRunner, ProgressReporter, SessionReport, Stage,
    StageRunner, UnitState,
};
use ecephys_core::session::SessionDescriptor;

use super::params::load_geometry;
use crate::summary::{print_dry_run, print_session_report};

#[derive(Args)]
pub struct RunArgs {
    /// Sessions file (TOML, one [[session]] table per recording)
    #[arg(long)]
    pub sessions: PathBuf,

    /// Build and write every descriptor but spawn nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Kill a stage module that runs longer than this many seconds
    #[arg(long)]
    pub stage_timeout: Option<u64>,

    /// Module launcher; `{module}` is replaced with the module name
    #[arg(
        long,
        default_value = "python -W ignore -m ecephys_spike_sorting.modules.{module}"
    )]
    pub launcher: String,

    /// Geometry table (TOML) replacing the built-in one
    #[arg(long)]
    pub geometry: Option<PathBuf>,
}

#[derive(Deserialize)]
struct SessionsFile {
    #[serde(rename = "session", default)]
    sessions: Vec<SessionDescriptor>,
}

/// Read a sessions file. Relative config paths resolve against its directory.
fn load_sessions(path: &Path) -> Result<Vec<SessionDescriptor>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sessions file {}", path.display()))?;
    let file: SessionsFile = toml::from_str(&contents).context("Invalid sessions file")?;
    let root = path.parent().unwrap_or(Path::new("."));
    Ok(file
        .sessions
        .into_iter()
        .map(|mut session| {
            if session.config.is_relative() {
                session.config = root.join(&session.config);
            }
            session
        })
        .collect())
}

fn process_runner(args: &RunArgs) -> Result<ProcessRunner> {
    let mut words = args.launcher.split_whitespace().map(str::to_string);
    let Some(program) = words.next() else {
        bail!("--launcher must name a program");
    };
    Ok(ProcessRunner {
        program,
        args: words.collect(),
        ..ProcessRunner::default()
    }
    .with_timeout(args.stage_timeout.map(Duration::from_secs)))
}

/// Spinner showing the unit and stage currently running.
struct SpinnerReporter {
    pb: ProgressBar,
}

impl SpinnerReporter {
    fn new() -> Result<Self> {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(120));
        Ok(Self { pb })
    }
}

impl ProgressReporter for SpinnerReporter {
    fn begin_session(&self, stem: &str, units: usize) {
        self.pb.set_message(format!("{stem}: {units} unit(s) planned"));
    }

    fn begin_stage(&self, unit: &str, stage: Stage) {
        self.pb.set_message(format!("{unit}: {stage}"));
    }

    fn finish_unit(&self, unit: &str, state: UnitState) {
        self.pb.println(format!("  {unit:<24} {state}"));
    }

    fn finish_session(&self) {
        self.pb.finish_and_clear();
    }
}

pub fn run(args: &RunArgs) -> Result<()> {
    let sessions = load_sessions(&args.sessions)?;
    if sessions.is_empty() {
        bail!("No [[session]] entries in {}", args.sessions.display());
    }
    let table = load_geometry(args.geometry.as_ref())?;

    let dry_runner = DryRunner::new();
    let process_runner = process_runner(args)?;
    let runner: &dyn StageRunner = if args.dry_run {
        &dry_runner
    } else {
        &process_runner
    };

    let mut reports: Vec<SessionReport> = Vec::new();
    let mut aborted = 0;
    for session in &sessions {
        println!("Session {} ({})", session.file, session.uuid);
        let reporter = SpinnerReporter::new()?;
        let result = run_session_reported(
            session,
            &table,
            runner,
            &SessionOverrides::default(),
            &reporter,
        );
        reporter.pb.finish_and_clear();
        match result {
            Ok(report) => {
                print_session_report(&report);
                reports.push(report);
            }
            Err(e) => {
                warn!(session = %session.file, error = %e, "Session aborted");
                eprintln!("  Session aborted: {e}");
                aborted += 1;
            }
        }
    }

    if args.dry_run {
        print_dry_run(&dry_runner.invocations());
    }

    let failed = reports.iter().filter(|r| !r.is_success()).count() + aborted;
    if failed > 0 {
        bail!("{failed} of {} session(s) did not complete", sessions.len());
    }
    Ok(())
}
