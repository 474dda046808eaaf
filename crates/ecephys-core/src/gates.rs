//! Gate and trigger resolution against the SpikeGLX run layout.
//!
//! Raw runs are stored as `<raw_root>/<stem>_g<G>/<stem>_g<G>_imec<P>/` with
//! one `<stem>_g<G>_t<T>.imec<P>.ap.bin` file per trigger.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Sorted, de-duplicated list of single-digit gate indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateList {
    gates: Vec<u8>,
}

impl GateList {
    pub fn indices(&self) -> &[u8] {
        &self.gates
    }

    pub fn first(&self) -> u8 {
        self.gates[0]
    }

    pub fn last(&self) -> u8 {
        self.gates[self.gates.len() - 1]
    }

    /// Contiguous `"min,max"` range used by folder discovery and older tools.
    pub fn legacy_range(&self) -> String {
        format!("{},{}", self.first(), self.last())
    }

    /// `-gtlist` directive: one `{G,0,0}` entry per gate, ascending.
    pub fn concat_directive(&self) -> String {
        self.gates.iter().map(|g| format!("{{{g},0,0}}")).collect()
    }
}

impl fmt::Display for GateList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.gates.iter().map(u8::to_string).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Parse a gate list such as `"0213"` or `"0,1"`.
///
/// Every digit is its own gate index; multi-digit indices cannot be expressed.
pub fn resolve_gates(spec: &str) -> Result<GateList> {
    let mut gates = Vec::new();
    for c in spec.chars() {
        if c == ',' || c.is_whitespace() {
            continue;
        }
        let digit = c
            .to_digit(10)
            .ok_or_else(|| PipelineError::InvalidGateList(spec.to_string()))?;
        gates.push(digit as u8);
    }
    if gates.is_empty() {
        return Err(PipelineError::InvalidGateList(spec.to_string()));
    }
    gates.sort_unstable();
    gates.dedup();
    Ok(GateList { gates })
}

/// One end of a trigger range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TriggerBound {
    Index(u32),
    Start,
    End,
}

fn parse_bound(token: &str, spec: &str) -> Result<TriggerBound> {
    match token.trim() {
        "start" => Ok(TriggerBound::Start),
        "end" => Ok(TriggerBound::End),
        other => other
            .parse()
            .map(TriggerBound::Index)
            .map_err(|_| PipelineError::InvalidTriggerSpec(spec.to_string())),
    }
}

/// Resolve a `"first,last"` trigger spec.
///
/// `start`/`end` sentinels are replaced by the lowest/highest trigger index
/// found in `probe_folder` for `<run_stem>_g<gate>`.
pub fn resolve_trigger_range(
    spec: &str,
    probe_folder: &Path,
    run_stem: &str,
    gate: u8,
) -> Result<(u32, u32)> {
    let (first, last) = spec
        .split_once(',')
        .ok_or_else(|| PipelineError::InvalidTriggerSpec(spec.to_string()))?;
    let first = parse_bound(first, spec)?;
    let last = parse_bound(last, spec)?;

    let needs_disk = [first, last]
        .iter()
        .any(|b| matches!(b, TriggerBound::Start | TriggerBound::End));
    let on_disk = if needs_disk {
        let found = triggers_on_disk(probe_folder, run_stem, gate)?;
        debug!(folder = %probe_folder.display(), triggers = ?found, "Listed trigger files");
        found
    } else {
        Vec::new()
    };

    let pick = |bound: TriggerBound| -> u32 {
        match bound {
            TriggerBound::Index(i) => i,
            TriggerBound::Start => on_disk[0],
            TriggerBound::End => on_disk[on_disk.len() - 1],
        }
    };
    Ok((pick(first), pick(last)))
}

/// Sorted trigger indices of `<run_stem>_g<gate>_t<N>.*.bin` files.
fn triggers_on_disk(probe_folder: &Path, run_stem: &str, gate: u8) -> Result<Vec<u32>> {
    let missing = || PipelineError::ProbeFolderNotFound(probe_folder.to_path_buf());
    let entries = fs::read_dir(probe_folder).map_err(|_| missing())?;

    let pattern = format!(r"^{}_g{}_t(\d+)\..*\.bin$", regex::escape(run_stem), gate);
    let re = Regex::new(&pattern).map_err(|e| PipelineError::InvalidSession(e.to_string()))?;

    let mut triggers: Vec<u32> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            re.captures(name)?.get(1)?.as_str().parse().ok()
        })
        .collect();
    if triggers.is_empty() {
        return Err(missing());
    }
    triggers.sort_unstable();
    triggers.dedup();
    Ok(triggers)
}

/// Gate folders found on disk for a contiguous gate range.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GateFolders {
    pub gates: Vec<u8>,
    pub folders: Vec<PathBuf>,
}

impl GateFolders {
    /// Dash-separated gate indices, e.g. `"0-1-3"`. Empty when nothing matched.
    pub fn label(&self) -> String {
        let parts: Vec<String> = self.gates.iter().map(u8::to_string).collect();
        parts.join("-")
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

/// Find `<stem>_g<d>` folders under `raw_root` with `first <= d <= last`.
///
/// A missing root or an empty match is not an error here; callers decide.
pub fn discover_gate_folders(raw_root: &Path, stem: &str, first: u8, last: u8) -> GateFolders {
    let prefix = format!("{stem}_g");
    let mut found: Vec<(u8, PathBuf)> = match fs::read_dir(raw_root) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name();
                let suffix = name.to_str()?.strip_prefix(&prefix)?.to_string();
                let mut chars = suffix.chars();
                let gate = chars.next()?.to_digit(10)? as u8;
                if chars.next().is_some() || gate < first || gate > last {
                    return None;
                }
                Some((gate, entry.path()))
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    found.sort();

    GateFolders {
        gates: found.iter().map(|(g, _)| *g).collect(),
        folders: found.into_iter().map(|(_, p)| p).collect(),
    }
}
