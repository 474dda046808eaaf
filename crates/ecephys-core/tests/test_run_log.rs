use ecephys_core::pipeline::{RunLog, RunLogRow};

#[test]
fn test_header_written_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs/u1_rec_log.csv");

    RunLog::new(&path)
        .append(&RunLogRow::new("u1", "rec/imec0/sorting", false, "SORTING"))
        .unwrap();
    // A second handle on the same file appends.
    RunLog::new(&path)
        .append(&RunLogRow::new("u1", "rec/imec0/sorting", true, "FAILED at sorting: exit status 1"))
        .unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        contents,
        "Index,File,Sort_Error,Sort_Error_Description\n\
         u1,rec/imec0/sorting,False,\"SORTING\"\n\
         u1,rec/imec0/sorting,True,\"FAILED at sorting: exit status 1\"\n"
    );
}

#[test]
fn test_existing_log_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("u1_rec_log.csv");
    std::fs::write(&path, "Index,File,Sort_Error,Sort_Error_Description\nold,row,False,\"x\"\n").unwrap();

    let log = RunLog::new(&path);
    log.append(&RunLogRow::new("u1", "rec", false, "1/1 units done"))
        .unwrap();

    let lines: Vec<String> = std::fs::read_to_string(log.path())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1], "old,row,False,\"x\"");
}
