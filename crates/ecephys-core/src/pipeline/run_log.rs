use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::consts::RUN_LOG_HEADER;
use crate::error::Result;

/// One row of a session run log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunLogRow {
    /// Session UUID.
    pub index: String,
    /// `<stem>/<unit>/<stage>`, or `<stem>` for session-level rows.
    pub file: String,
    pub error: bool,
    pub description: String,
}

impl RunLogRow {
    pub fn new(index: &str, file: impl Into<String>, error: bool, description: impl Into<String>) -> Self {
        Self {
            index: index.to_string(),
            file: file.into(),
            error,
            description: description.into(),
        }
    }

    fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},\"{}\"",
            csv_field(&self.index),
            csv_field(&self.file),
            if self.error { "True" } else { "False" },
            self.description.replace('"', "\"\"")
        )
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Append-only CSV log for one session.
///
/// The file is opened, appended, flushed and closed on every row; the header
/// is written only when the file is new or empty.
#[derive(Clone, Debug)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, row: &RunLogRow) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "{RUN_LOG_HEADER}")?;
        }
        writeln!(file, "{}", row.to_csv_line())?;
        file.flush()?;
        debug!(log = %self.path.display(), file = %row.file, error = row.error, "Run log row");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_quotes_description() {
        let row = RunLogRow::new("u1", "rec/imec0/sorting", true, "exit status 1, \"bad\"");
        assert_eq!(
            row.to_csv_line(),
            "u1,rec/imec0/sorting,True,\"exit status 1, \"\"bad\"\"\""
        );
    }

    #[test]
    fn test_plain_fields_unquoted() {
        assert_eq!(csv_field("rec_g0"), "rec_g0");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
    }
}
