mod common;

use std::path::Path;
use std::time::Duration;

use ecephys_core::descriptor::{DescriptorOverrides, Invocation, JobDescriptor, SessionOverrides};
use ecephys_core::error::PipelineError;
use ecephys_core::geometry::{GeometrySpec, GeometryTable};
use ecephys_core::pipeline::{
    enumerate_units, run_session, run_session_reported, AlignmentResult, DryRunner, ProcessRunner,
    ProgressReporter, Stage, StageRunner, StageStatus, UnitState,
};
use ecephys_core::session::{SessionConfig, SessionContext, SessionDescriptor, SurveyLayout};

use common::{make_raw_run, write_config, RecordingRunner, NP1_META};

/// Config plus two probes recorded over gates 0 and 1, NI on the first.
fn setup(base: &Path, probes: &str) -> SessionDescriptor {
    let config = write_config(base);
    make_raw_run(base, 0, &[0, 1], &[0], Some(NP1_META));
    make_raw_run(base, 1, &[0, 1], &[0], Some(NP1_META));
    common::session(&config, "0,1", probes)
}

fn survey(shanks: u32) -> SurveyLayout {
    SurveyLayout {
        shanks,
        banks: 1,
        time_ranges: (0..shanks).map(|s| format!("[{} {}]", s * 300, (s + 1) * 300)).collect(),
    }
}

struct Silent;

impl ProgressReporter for Silent {}

fn log_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[test]
fn test_two_probes_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let session = setup(dir.path(), "0,1");
    let runner = RecordingRunner::new();

    let report = run_session(&session, &GeometryTable::default(), &runner).unwrap();

    assert_eq!(runner.count("catGT_helper"), 2);
    assert_eq!(runner.count("kilosort_helper"), 2);
    assert_eq!(runner.count("quality_metrics"), 2);
    assert_eq!(runner.count("tPrime_helper"), 1);
    assert_eq!(runner.modules().last().unwrap(), "tPrime_helper");
    assert!(report.is_success());
    assert_eq!(report.alignment, AlignmentResult::Done { units: 2 });

    let calls = runner.calls.borrow();
    let tprime = calls.iter().find(|c| c.module == "tPrime_helper").unwrap();
    let descriptor = JobDescriptor::read(&tprime.input).unwrap();
    let dirs = &descriptor.tprime_helper_params.sorted_output_directories;
    assert_eq!(dirs.len(), 2);
    assert_ne!(dirs[0], dirs[1]);

    let lines = log_lines(&report.run_log);
    assert_eq!(lines[0], "Index,File,Sort_Error,Sort_Error_Description");
    assert!(lines.last().unwrap().starts_with("0001,rec,False,\"2/2 units done"));
    assert!(lines.iter().any(|l| l == "0001,rec/imec1/sorting,False,\"SORTING\""));
}

#[test]
fn test_stage_order_per_unit() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = setup(dir.path(), "0");
    session.modules.run_tprime = false;
    let runner = RecordingRunner::new();

    run_session(&session, &GeometryTable::default(), &runner).unwrap();
    assert_eq!(
        runner.modules(),
        vec![
            "catGT_helper",
            "kilosort_helper",
            "kilosort_postprocessing",
            "noise_templates",
            "mean_waveforms",
            "quality_metrics",
            "prePhy_filters"
        ]
    );
}

#[test]
fn test_module_input_copied_next_to_sorter_output() {
    let dir = tempfile::tempdir().unwrap();
    let session = setup(dir.path(), "0");
    let report = run_session(&session, &GeometryTable::default(), &RecordingRunner::new()).unwrap();

    let sorted = report.outcomes[0].sorted.as_ref().unwrap();
    let data_dir = sorted.directory.parent().unwrap();
    assert!(data_dir.join("rec_imec0-input.json").is_file());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn test_preprocessing_failure_stops_unit() {
    let dir = tempfile::tempdir().unwrap();
    let session = setup(dir.path(), "0,1");
    let runner = RecordingRunner::new().failing("catGT_helper", "prb0");

    let report = run_session(&session, &GeometryTable::default(), &runner).unwrap();

    assert_eq!(report.outcomes[0].state, UnitState::Failed(Stage::Preprocessing));
    assert_eq!(report.outcomes[1].state, UnitState::Done);
    let calls = runner.calls.borrow();
    assert!(!calls
        .iter()
        .any(|c| c.module != "catGT_helper" && c.input.to_string_lossy().contains("rec_imec0")));
    assert_eq!(runner.count("kilosort_helper"), 1);
    assert_eq!(runner.count("tPrime_helper"), 1);
    assert!(!report.is_success());

    let lines = log_lines(&report.run_log);
    assert!(lines
        .iter()
        .any(|l| l.starts_with("0001,rec/imec0/preprocessing,True,\"FAILED at preprocessing")));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("0001,rec/imec0/alignment,True,\"omitted from alignment")));
}

#[test]
fn test_sorting_failure_skips_postprocessing() {
    let dir = tempfile::tempdir().unwrap();
    let session = setup(dir.path(), "0,1");
    let runner = RecordingRunner::new().failing("kilosort_helper", "rec_imec1-");

    let report = run_session(&session, &GeometryTable::default(), &runner).unwrap();

    assert_eq!(report.outcomes[1].state, UnitState::Failed(Stage::Sorting));
    assert!(report.outcomes[1].error.as_ref().unwrap().contains("exit status 1"));
    assert!(report.outcomes[1].sorted.is_none());
    assert_eq!(runner.count("kilosort_postprocessing"), 1);
    assert_eq!(report.alignment, AlignmentResult::Done { units: 1 });
}

#[test]
fn test_nothing_to_align() {
    let dir = tempfile::tempdir().unwrap();
    let session = setup(dir.path(), "0");
    let runner = RecordingRunner::new().failing("kilosort_helper", "rec_imec0-");

    let report = run_session(&session, &GeometryTable::default(), &runner).unwrap();
    assert_eq!(report.alignment, AlignmentResult::Skipped);
    assert_eq!(runner.count("tPrime_helper"), 0);
}

#[test]
fn test_plan_errors_abort_before_any_stage() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = setup(dir.path(), "0,1");
    session.gate_list = "5".to_string();
    let runner = RecordingRunner::new();

    let err = run_session(&session, &GeometryTable::default(), &runner).unwrap_err();
    assert!(matches!(err, PipelineError::GateFoldersNotFound { .. }));
    assert!(runner.calls.borrow().is_empty());

    let log = dir.path().join("Processed/M01/Ecephys/rec/0001_rec_log.csv");
    let lines = log_lines(&log);
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("0001,rec,True,\"ABORTED"));
}

#[test]
fn test_unknown_probe_type_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let session = setup(dir.path(), "0");
    let table = GeometryTable::from_entries(Vec::<(String, GeometrySpec)>::new());
    let runner = RecordingRunner::new();

    let err = run_session(&session, &table, &runner).unwrap_err();
    assert!(matches!(err, PipelineError::UnknownProbeType(_)));
    assert!(runner.calls.borrow().is_empty());
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

#[test]
fn test_shared_output_directory_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let session = setup(dir.path(), "0,1");
    let overrides = SessionOverrides {
        shared: DescriptorOverrides {
            kilosort_output_directory: Some(dir.path().join("forced_ks")),
            ..DescriptorOverrides::default()
        },
        ..SessionOverrides::default()
    };
    let runner = RecordingRunner::new();

    let err = run_session_reported(&session, &GeometryTable::default(), &runner, &overrides, &Silent)
        .unwrap_err();
    assert!(matches!(err, PipelineError::ConflictingOptions(ref msg) if msg.contains("imec0")));
    assert!(runner.calls.borrow().is_empty());
}

#[test]
fn test_per_unit_output_directories() {
    let dir = tempfile::tempdir().unwrap();
    let session = setup(dir.path(), "0,1");
    let mut overrides = SessionOverrides::default();
    for probe in [0, 1] {
        overrides.units.insert(
            format!("imec{probe}"),
            DescriptorOverrides {
                kilosort_output_directory: Some(dir.path().join(format!("sorted/p{probe}"))),
                ..DescriptorOverrides::default()
            },
        );
    }
    let runner = RecordingRunner::new();

    let report =
        run_session_reported(&session, &GeometryTable::default(), &runner, &overrides, &Silent)
            .unwrap();
    let dirs: Vec<_> = report
        .outcomes
        .iter()
        .map(|o| o.sorted.as_ref().unwrap().directory.clone())
        .collect();
    assert_eq!(dirs, vec![dir.path().join("sorted/p0"), dir.path().join("sorted/p1")]);

    let catgt_dest = dir.path().join("Processed/M01/Ecephys/rec");
    let catgt = runner.calls.borrow().iter().find(|c| c.module == "catGT_helper").cloned().unwrap();
    let pre = JobDescriptor::read(&catgt.input).unwrap();
    assert_eq!(pre.directories.kilosort_output_directory, catgt_dest);

    let data_dir = catgt_dest.join("catgt_rec_g0/rec_g0_imec0");
    assert!(data_dir.join("rec_imec0-input.json").is_file());
    assert!(!dir.path().join("sorted/rec_imec0-input.json").exists());
}

#[test]
fn test_continuous_override_with_preprocessing_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let session = setup(dir.path(), "0,1");
    let overrides = SessionOverrides {
        shared: DescriptorOverrides {
            continuous_file: Some(dir.path().join("x.ap.bin")),
            ..DescriptorOverrides::default()
        },
        ..SessionOverrides::default()
    };
    let runner = RecordingRunner::new();

    let err = run_session_reported(&session, &GeometryTable::default(), &runner, &overrides, &Silent)
        .unwrap_err();
    assert!(matches!(err, PipelineError::ConflictingOptions(_)));
    assert!(runner.calls.borrow().is_empty());
}

// ---------------------------------------------------------------------------
// Survey sessions and module flags
// ---------------------------------------------------------------------------

#[test]
fn test_survey_preprocesses_probe_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = setup(dir.path(), "0");
    session.survey = Some(survey(2));
    let runner = RecordingRunner::new();

    let report = run_session(&session, &GeometryTable::default(), &runner).unwrap();

    assert_eq!(runner.count("catGT_helper"), 1);
    assert_eq!(runner.count("kilosort_helper"), 2);
    let ids: Vec<&str> = report.outcomes.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["imec0shank0bank0", "imec0shank1bank0"]);
}

#[test]
fn test_survey_shared_preprocessing_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = setup(dir.path(), "0");
    session.survey = Some(survey(2));
    let runner = RecordingRunner::new().failing("catGT_helper", "prb0");

    let report = run_session(&session, &GeometryTable::default(), &runner).unwrap();

    assert_eq!(runner.count("catGT_helper"), 1);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.state == UnitState::Failed(Stage::Preprocessing)));
    assert_eq!(report.alignment, AlignmentResult::Skipped);
}

#[test]
fn test_survey_time_ranges_must_cover_segments() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = setup(dir.path(), "0");
    let mut layout = survey(2);
    layout.time_ranges.pop();
    session.survey = Some(layout);

    let config = SessionConfig::load(&session.config).unwrap();
    let ctx = SessionContext::resolve(config, session).unwrap();
    assert!(matches!(enumerate_units(&ctx), Err(PipelineError::InvalidSession(_))));
}

#[test]
fn test_oversized_survey_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = setup(dir.path(), "0");
    session.survey = Some(SurveyLayout {
        shanks: u32::MAX,
        banks: u32::MAX,
        time_ranges: vec!["[0 100]".to_string()],
    });

    let config = SessionConfig::load(&session.config).unwrap();
    let ctx = SessionContext::resolve(config, session).unwrap();
    assert!(matches!(enumerate_units(&ctx), Err(PipelineError::InvalidSession(_))));
}

#[test]
fn test_disabled_stages_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = setup(dir.path(), "0,1");
    session.modules.run_catgt = false;
    session.modules.run_tprime = false;
    session.modules.noise_templates = false;
    let runner = RecordingRunner::new();

    let report = run_session(&session, &GeometryTable::default(), &runner).unwrap();

    assert_eq!(runner.count("catGT_helper"), 0);
    assert_eq!(runner.count("noise_templates"), 0);
    assert_eq!(runner.count("kilosort_helper"), 2);
    assert_eq!(report.alignment, AlignmentResult::Disabled);
    assert!(report.is_success());
}

#[test]
fn test_run_log_header_written_once() {
    let dir = tempfile::tempdir().unwrap();
    let session = setup(dir.path(), "0");

    let first = run_session(&session, &GeometryTable::default(), &DryRunner::new()).unwrap();
    let before = log_lines(&first.run_log).len();
    let second = run_session(&session, &GeometryTable::default(), &DryRunner::new()).unwrap();
    let lines = log_lines(&second.run_log);

    assert_eq!(first.run_log, second.run_log);
    assert_eq!(lines.len(), before * 2 - 1);
    assert_eq!(lines.iter().filter(|l| l.starts_with("Index,")).count(), 1);
}

#[test]
fn test_dry_runner_records_everything() {
    let dir = tempfile::tempdir().unwrap();
    let session = setup(dir.path(), "0,1");
    let runner = DryRunner::new();

    run_session(&session, &GeometryTable::default(), &runner).unwrap();
    // 2 x (preprocessing + sorting + 5 post-processing modules) + alignment
    assert_eq!(runner.invocations().len(), 15);
}

#[test]
fn test_unit_states_per_stage() {
    assert_eq!(UnitState::running(Stage::Sorting), Some(UnitState::Sorting));
    assert_eq!(
        UnitState::running(Stage::PostProcessing),
        Some(UnitState::PostProcessing)
    );
    assert_eq!(UnitState::running(Stage::Alignment), None);
    assert!(UnitState::Failed(Stage::Alignment).is_terminal());
}

// ---------------------------------------------------------------------------
// Process runner
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn invocation() -> Invocation {
    Invocation {
        module: "probe_module".to_string(),
        input: "/tmp/in.json".into(),
        output: "/tmp/out.json".into(),
    }
}

#[cfg(unix)]
fn shell(script: &str, timeout: Option<Duration>) -> ProcessRunner {
    ProcessRunner {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string(), "{module}".to_string()],
        timeout,
        poll_interval: Duration::from_millis(20),
    }
}

#[cfg(unix)]
#[test]
fn test_process_runner_exit_status() {
    let ok = shell("exit 0", None).run(&invocation()).unwrap();
    assert_eq!(ok, StageStatus::Success);

    let failed = shell("exit 3", None).run(&invocation()).unwrap();
    assert_eq!(failed, StageStatus::Failed("exit status 3".to_string()));
}

#[cfg(unix)]
#[test]
fn test_process_runner_substitutes_module() {
    let runner = shell("test \"$0\" = probe_module", Some(Duration::from_secs(10)));
    assert!(runner.run(&invocation()).unwrap().is_success());
}

#[cfg(unix)]
#[test]
fn test_process_runner_timeout_kills_stage() {
    let limit = Duration::from_millis(300);
    let status = shell("sleep 5", Some(limit)).run(&invocation()).unwrap();
    assert_eq!(status, StageStatus::TimedOut(limit));
}

#[test]
fn test_missing_program_is_an_error() {
    let runner = ProcessRunner {
        program: "definitely-not-a-real-launcher".to_string(),
        args: Vec::new(),
        ..ProcessRunner::default()
    };
    let inv = Invocation {
        module: "m".to_string(),
        input: "/in.json".into(),
        output: "/out.json".into(),
    };
    assert!(matches!(runner.run(&inv), Err(PipelineError::Io(_))));
}
