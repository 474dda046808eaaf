use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_REGION;
use crate::error::{PipelineError, Result};

/// Which stages a session asks for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleFlags {
    #[serde(alias = "run_CatGT")]
    pub run_catgt: bool,
    #[serde(alias = "run_TPrime")]
    pub run_tprime: bool,
    pub kilosort_helper: bool,
    pub kilosort_postprocessing: bool,
    pub noise_templates: bool,
    pub mean_waveforms: bool,
    pub quality_metrics: bool,
    pub depth_estimation: bool,
    #[serde(alias = "prePhy_filters")]
    pub prephy_filters: bool,
}

impl Default for ModuleFlags {
    fn default() -> Self {
        Self {
            run_catgt: true,
            run_tprime: true,
            kilosort_helper: true,
            kilosort_postprocessing: true,
            noise_templates: true,
            mean_waveforms: true,
            quality_metrics: true,
            depth_estimation: false,
            prephy_filters: true,
        }
    }
}

impl ModuleFlags {
    /// Enabled post-processing modules, in execution order.
    pub fn postprocessing_modules(&self) -> Vec<&'static str> {
        [
            ("kilosort_postprocessing", self.kilosort_postprocessing),
            ("noise_templates", self.noise_templates),
            ("mean_waveforms", self.mean_waveforms),
            ("quality_metrics", self.quality_metrics),
            ("depth_estimation", self.depth_estimation),
            ("prePhy_filters", self.prephy_filters),
        ]
        .into_iter()
        .filter_map(|(name, enabled)| enabled.then_some(name))
        .collect()
    }
}

/// Probe-survey layout: each (shank, bank) of a probe is sorted separately
/// over its own recording segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyLayout {
    pub shanks: u32,
    pub banks: u32,
    /// Sorter time range per segment, shank-major then bank, e.g. `"[0 600]"`.
    pub time_ranges: Vec<String>,
}

impl SurveyLayout {
    /// `shanks * banks`; fails on overflow.
    pub fn segment_count(&self) -> Result<usize> {
        self.shanks
            .checked_mul(self.banks)
            .map(|n| n as usize)
            .ok_or_else(|| {
                PipelineError::InvalidSession(format!(
                    "survey layout {}x{} is too large",
                    self.shanks, self.banks
                ))
            })
    }

    /// `None` when the segment is out of range.
    pub fn time_range(&self, shank: u32, bank: u32) -> Option<&str> {
        let index = shank.checked_mul(self.banks)?.checked_add(bank)?;
        self.time_ranges.get(index as usize).map(String::as_str)
    }
}

/// One recording session to process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    #[serde(alias = "UUID")]
    pub uuid: String,
    /// `<animal folder>/<stem>_g<N>` as recorded in the session table.
    #[serde(alias = "File")]
    pub file: String,
    #[serde(alias = "Animal")]
    pub animal: String,
    /// Session config file (JSON or TOML).
    pub config: PathBuf,
    /// Processed-data directory, relative to the config's `base_dir`.
    #[serde(alias = "Preprocessed_Directory")]
    pub processed_directory: PathBuf,
    /// Probe selection, e.g. `"0"`, `"0,1"` or `"0:3"`.
    #[serde(alias = "whichprobes")]
    pub which_probes: String,
    pub gate_list: String,
    #[serde(default = "default_trigger_spec")]
    pub triggers: String,
    /// IMRO channel-map name per selected probe, in probe-list order.
    #[serde(default)]
    pub imro: Vec<String>,
    /// Brain region per selected probe; the last entry covers any remainder.
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default, alias = "Task")]
    pub task: String,
    #[serde(flatten)]
    pub modules: ModuleFlags,
    #[serde(default)]
    pub survey: Option<SurveyLayout>,
}

fn default_trigger_spec() -> String {
    "0,0".to_string()
}

impl SessionDescriptor {
    /// Recording stem: the second path component with its `_g<N>` suffix removed.
    pub fn file_stem(&self) -> Result<String> {
        let name = self.file.split('/').nth(1).unwrap_or(self.file.as_str());
        let invalid = || {
            PipelineError::InvalidSession(format!("file '{}' has no _g<N> suffix", self.file))
        };
        let (stem, gate) = name.rsplit_once("_g").ok_or_else(invalid)?;
        if stem.is_empty() || gate.len() != 1 || !gate.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        Ok(stem.to_string())
    }

    /// Selected probe indices, in order, without repeats.
    pub fn probes(&self) -> Result<Vec<u32>> {
        let invalid =
            || PipelineError::InvalidSession(format!("probe string '{}'", self.which_probes));
        let mut probes: Vec<u32> = Vec::new();
        for item in self.which_probes.split(',') {
            let item = item.trim();
            let (first, last) = match item.split_once(':') {
                Some((a, b)) => (a.trim(), b.trim()),
                None => (item, item),
            };
            let first: u32 = first.parse().map_err(|_| invalid())?;
            let last: u32 = last.parse().map_err(|_| invalid())?;
            if last < first {
                return Err(invalid());
            }
            for probe in first..=last {
                if !probes.contains(&probe) {
                    probes.push(probe);
                }
            }
        }
        Ok(probes)
    }

    pub fn region_for(&self, position: usize) -> &str {
        self.regions
            .get(position)
            .or(self.regions.last())
            .map(String::as_str)
            .unwrap_or(DEFAULT_REGION)
    }

    pub fn imro_for(&self, position: usize) -> Result<&str> {
        self.imro
            .get(position)
            .map(String::as_str)
            .ok_or_else(|| PipelineError::ConfigKeyMissing(format!("IMRO_probe{position}")))
    }
}
