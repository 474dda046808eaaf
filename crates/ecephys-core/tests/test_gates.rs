use ecephys_core::error::PipelineError;
use ecephys_core::gates::{discover_gate_folders, resolve_gates, resolve_trigger_range};

// ---------------------------------------------------------------------------
// Gate lists
// ---------------------------------------------------------------------------

#[test]
fn test_unsorted_gate_digits() {
    let gates = resolve_gates("0213").unwrap();
    assert_eq!(gates.indices(), &[0, 1, 2, 3]);
    assert_eq!(gates.legacy_range(), "0,3");
}

#[test]
fn test_single_gate_directive() {
    let gates = resolve_gates("5").unwrap();
    assert_eq!(gates.concat_directive(), "{5,0,0}");
    assert_eq!(gates.legacy_range(), "5,5");
}

#[test]
fn test_non_contiguous_directive() {
    let gates = resolve_gates("3, 0,1").unwrap();
    assert_eq!(gates.concat_directive(), "{0,0,0}{1,0,0}{3,0,0}");
    assert_eq!(gates.to_string(), "0,1,3");
}

#[test]
fn test_duplicate_gates_collapse() {
    let gates = resolve_gates("1,1,0").unwrap();
    assert_eq!(gates.indices(), &[0, 1]);
}

#[test]
fn test_invalid_gate_lists() {
    assert!(matches!(resolve_gates("0,a"), Err(PipelineError::InvalidGateList(_))));
    assert!(matches!(resolve_gates("0-1"), Err(PipelineError::InvalidGateList(_))));
    assert!(matches!(resolve_gates(" , "), Err(PipelineError::InvalidGateList(_))));
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

fn touch_triggers(folder: &std::path::Path, run: &str, triggers: &[u32]) {
    std::fs::create_dir_all(folder).unwrap();
    for t in triggers {
        std::fs::write(folder.join(format!("{run}_t{t}.imec0.ap.bin")), b"").unwrap();
    }
}

#[test]
fn test_literal_trigger_range_needs_no_folder() {
    let range = resolve_trigger_range("0,3", std::path::Path::new("/nonexistent"), "rec_g0", 0);
    assert_eq!(range.unwrap(), (0, 3));
}

#[test]
fn test_trigger_sentinels_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    touch_triggers(dir.path(), "rec_g0", &[2, 0, 5]);
    // A different gate in the same folder is ignored.
    std::fs::write(dir.path().join("rec_g1_t9.imec0.ap.bin"), b"").unwrap();

    assert_eq!(
        resolve_trigger_range("start,end", dir.path(), "rec", 0).unwrap(),
        (0, 5)
    );
    assert_eq!(
        resolve_trigger_range("2,end", dir.path(), "rec", 0).unwrap(),
        (2, 5)
    );
}

#[test]
fn test_trigger_sentinel_missing_folder() {
    let dir = tempfile::tempdir().unwrap();
    let err = resolve_trigger_range("start,end", &dir.path().join("missing"), "rec", 0).unwrap_err();
    assert!(matches!(err, PipelineError::ProbeFolderNotFound(_)));
}

#[test]
fn test_trigger_sentinel_empty_folder() {
    let dir = tempfile::tempdir().unwrap();
    let err = resolve_trigger_range("0,end", dir.path(), "rec", 0).unwrap_err();
    assert!(matches!(err, PipelineError::ProbeFolderNotFound(_)));
}

#[test]
fn test_malformed_trigger_spec() {
    let path = std::path::Path::new("/tmp");
    assert!(matches!(
        resolve_trigger_range("0", path, "rec", 0),
        Err(PipelineError::InvalidTriggerSpec(_))
    ));
    assert!(matches!(
        resolve_trigger_range("x,1", path, "rec", 0),
        Err(PipelineError::InvalidTriggerSpec(_))
    ));
}

// ---------------------------------------------------------------------------
// Gate folders
// ---------------------------------------------------------------------------

#[test]
fn test_discover_gate_folders_in_range() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["rec_g3", "rec_g0", "rec_g1", "rec_g7", "other_g2", "rec_g12"] {
        std::fs::create_dir(dir.path().join(name)).unwrap();
    }
    std::fs::write(dir.path().join("rec_g2"), b"not a folder").unwrap();

    let found = discover_gate_folders(dir.path(), "rec", 0, 3);
    assert_eq!(found.gates, vec![0, 1, 3]);
    assert_eq!(found.label(), "0-1-3");
    assert_eq!(found.folders[2], dir.path().join("rec_g3"));
}

#[test]
fn test_discover_gate_folders_missing_root() {
    let dir = tempfile::tempdir().unwrap();
    let found = discover_gate_folders(&dir.path().join("missing"), "rec", 0, 9);
    assert!(found.is_empty());
    assert_eq!(found.label(), "");
}
