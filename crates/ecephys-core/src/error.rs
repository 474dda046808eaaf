use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unknown probe type: {0}")]
    UnknownProbeType(String),

    #[error("Radius {radius_um} um is smaller than the horizontal pitch {horizontal_pitch_um} um")]
    NegativeRadicand {
        radius_um: f64,
        horizontal_pitch_um: f64,
    },

    #[error("Unknown brain region '{region}' in {table}")]
    UnknownRegion { region: String, table: String },

    #[error("Session config is missing required key '{0}'")]
    ConfigKeyMissing(String),

    #[error("Probe folder not found or holds no trigger files: {}", .0.display())]
    ProbeFolderNotFound(PathBuf),

    #[error("Failed to create directory {}: {source}", path.display())]
    DirectoryCreateError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Conflicting options: {0}")]
    ConflictingOptions(String),

    #[error("Stage '{stage}' failed for unit {unit}: {status}")]
    StageExecutionFailed {
        stage: String,
        unit: String,
        status: String,
    },

    #[error("Invalid gate list '{0}': only single-digit gate indices are supported")]
    InvalidGateList(String),

    #[error("Invalid trigger range '{0}'")]
    InvalidTriggerSpec(String),

    #[error("No gate folders matching {stem}_g[{first}-{last}] under {}", root.display())]
    GateFoldersNotFound {
        root: PathBuf,
        stem: String,
        first: u8,
        last: u8,
    },

    #[error("Path must be absolute: {}", .0.display())]
    RelativePath(PathBuf),

    #[error("Invalid session: {0}")]
    InvalidSession(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
