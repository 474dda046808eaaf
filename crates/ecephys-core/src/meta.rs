//! SpikeGLX `.meta` sidecar parsing.
//!
//! Only the handful of keys needed to fill `ephys_params` are interpreted.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::consts::{
    DEFAULT_NUM_CHANNELS, DEFAULT_PROBE_TYPE, DEFAULT_REFERENCE_CHANNELS, DEFAULT_SAMPLE_RATE,
    DEFAULT_UV_PER_BIT,
};
use crate::error::{PipelineError, Result};

/// Acquisition parameters for one probe stream.
#[derive(Clone, Debug, PartialEq)]
pub struct EphysParams {
    pub probe_type: String,
    pub sample_rate: f64,
    pub num_channels: u32,
    pub reference_channels: Vec<u32>,
    pub uv_per_bit: f64,
    /// Whether the stream carries a geometry map (`snsGeomMap`).
    pub use_geometry: bool,
}

impl Default for EphysParams {
    fn default() -> Self {
        Self {
            probe_type: DEFAULT_PROBE_TYPE.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            num_channels: DEFAULT_NUM_CHANNELS,
            reference_channels: DEFAULT_REFERENCE_CHANNELS.to_vec(),
            uv_per_bit: DEFAULT_UV_PER_BIT,
            use_geometry: false,
        }
    }
}

/// Parsed `key=value` pairs of a `.meta` file. Leading `~` is stripped.
#[derive(Clone, Debug, Default)]
pub struct SpikeGlxMeta {
    values: HashMap<String, String>,
}

impl SpikeGlxMeta {
    pub fn open(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse(&contents))
    }

    pub fn parse(contents: &str) -> Self {
        let values = contents
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim().trim_start_matches('~').to_string(), v.trim().to_string()))
            .collect();
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn number<T: std::str::FromStr>(&self, key: &str) -> Result<T> {
        let raw = self
            .get(key)
            .ok_or_else(|| PipelineError::InvalidSession(format!("meta file lacks '{key}'")))?;
        raw.parse()
            .map_err(|_| PipelineError::InvalidSession(format!("meta key '{key}' = '{raw}'")))
    }

    /// Probe type name as used by the geometry table.
    pub fn probe_type(&self) -> String {
        match self.get("imDatPrb_type") {
            Some("0") => "NP1".to_string(),
            Some(code) => format!("NP{code}"),
            None => "3A".to_string(),
        }
    }

    /// AP gain of the first channel in the IMRO table.
    ///
    /// 1.0-style entries are `(chan bank ref apgain lfgain hpf)`; 2.0 entries
    /// carry no gain and run at a fixed 80.
    fn ap_gain(&self) -> f64 {
        let Some(table) = self.get("imroTbl") else {
            return 500.0;
        };
        let entry = table
            .split(')')
            .nth(1)
            .map(|e| e.trim_start_matches('('))
            .unwrap_or_default();
        let fields: Vec<&str> = entry.split_whitespace().collect();
        if fields.len() == 6 {
            fields[3].parse().unwrap_or(500.0)
        } else {
            80.0
        }
    }

    fn uv_per_bit(&self) -> Result<f64> {
        let range: f64 = self.number("imAiRangeMax")?;
        let max_int: f64 = match self.get("imMaxInt") {
            Some(_) => self.number("imMaxInt")?,
            None => 512.0,
        };
        Ok(1e6 * range / max_int / self.ap_gain())
    }

    pub fn ephys_params(&self) -> Result<EphysParams> {
        let probe_type = self.probe_type();
        let reference_channels = match probe_type.as_str() {
            "3A" | "NP1" | "NP1100" | "NP1300" => vec![191],
            _ => vec![127],
        };
        Ok(EphysParams {
            sample_rate: self.number("imSampRate")?,
            num_channels: self.number("nSavedChans")?,
            uv_per_bit: self.uv_per_bit()?,
            use_geometry: self.get("snsGeomMap").is_some(),
            reference_channels,
            probe_type,
        })
    }
}

/// Read ephys parameters from `meta_path`, falling back to defaults when the
/// file is absent.
pub fn read_ephys_params(meta_path: &Path) -> Result<EphysParams> {
    if !meta_path.is_file() {
        warn!(meta = %meta_path.display(), "No SpikeGLX metadata; using default ephys params");
        return Ok(EphysParams::default());
    }
    let params = SpikeGlxMeta::open(meta_path)?.ephys_params()?;
    debug!(
        probe_type = %params.probe_type,
        sample_rate = params.sample_rate,
        num_channels = params.num_channels,
        uv_per_bit = params.uv_per_bit,
        "SpikeGLX params read from meta"
    );
    Ok(params)
}
