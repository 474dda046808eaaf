use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::geometry::RadiusParams;

/// Keys a session config file must define. Nothing here has a default.
pub const REQUIRED_CONFIG_KEYS: &[&str] = &[
    "base_dir",
    "prefix",
    "ecephys_directory",
    "kilosort_repository",
    "npy_matlab_repository",
    "catGTPath",
    "tPrime_path",
    "cWaves_path",
    "default_ks_tmp",
    "ni_present",
    "ni_extract_string",
    "car_mode",
    "loccar_min",
    "loccar_max",
    "catGT_cmd_string",
    "ksTh_dict",
    "refPerMS_dict",
    "ks_remDup",
    "ks_saveRez",
    "ks_copy_fproc",
    "ks_templateRadius_um",
    "ks_whiteningRadius_um",
    "ks_minfr_goodchannels",
    "ks_CAR",
    "ks_nblocks",
    "ks_output_tag",
    "c_Waves_snr_um",
    "event_ex_param_str",
    "toStream_sync_params",
];

/// Per-lab session configuration: tool locations, preprocessing and sorter
/// settings, and region-keyed sorter thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub base_dir: PathBuf,
    pub prefix: String,

    pub ecephys_directory: PathBuf,
    pub kilosort_repository: PathBuf,
    pub npy_matlab_repository: PathBuf,
    #[serde(rename = "catGTPath")]
    pub catgt_path: PathBuf,
    #[serde(rename = "tPrime_path")]
    pub tprime_path: PathBuf,
    #[serde(rename = "cWaves_path")]
    pub cwaves_path: PathBuf,
    pub default_ks_tmp: PathBuf,

    pub ni_present: bool,
    pub ni_extract_string: String,

    pub car_mode: String,
    /// Inner local-CAR radius (µm).
    pub loccar_min: f64,
    /// Outer local-CAR radius (µm).
    pub loccar_max: f64,
    #[serde(rename = "catGT_cmd_string")]
    pub catgt_cmd_string: String,

    /// Sorter threshold pair per brain region, e.g. `"[10,4]"`.
    #[serde(rename = "ksTh_dict")]
    pub ks_th_dict: BTreeMap<String, String>,
    /// Refractory period (ms) per brain region.
    #[serde(rename = "refPerMS_dict")]
    pub ref_per_ms_dict: BTreeMap<String, f64>,

    #[serde(rename = "ks_remDup")]
    pub ks_rem_dup: u8,
    #[serde(rename = "ks_saveRez")]
    pub ks_save_rez: u8,
    pub ks_copy_fproc: u8,
    #[serde(rename = "ks_templateRadius_um")]
    pub ks_template_radius_um: f64,
    #[serde(rename = "ks_whiteningRadius_um")]
    pub ks_whitening_radius_um: f64,
    pub ks_minfr_goodchannels: f64,
    #[serde(rename = "ks_CAR")]
    pub ks_car: u8,
    pub ks_nblocks: u32,
    pub ks_output_tag: String,
    #[serde(
        rename = "ks_nNeighbors_sites_fix",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ks_neighbor_sites_fix: Option<u32>,

    #[serde(rename = "c_Waves_snr_um")]
    pub c_waves_snr_um: f64,
    pub event_ex_param_str: String,
    #[serde(rename = "toStream_sync_params")]
    pub to_stream_sync_params: String,
}

impl SessionConfig {
    /// Load from JSON, or TOML when the file extension is `.toml`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let value = if is_toml {
            let table: toml::Table = toml::from_str(&contents)?;
            serde_json::to_value(table)?
        } else {
            serde_json::from_str(&contents)?
        };
        Self::from_value(value)
    }

    /// Decode an already-parsed document, reporting the first missing key.
    pub fn from_value(value: Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| PipelineError::InvalidSession("config root is not a table".into()))?;
        if let Some(missing) = REQUIRED_CONFIG_KEYS
            .iter()
            .find(|key| !object.contains_key(**key))
        {
            return Err(PipelineError::ConfigKeyMissing(missing.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// `<base_dir>/Raw_Data/Neural`
    pub fn raw_data_dir(&self) -> PathBuf {
        self.base_dir.join("Raw_Data").join("Neural")
    }

    /// `<base_dir>/Raw_Data/Neural/IMRO`
    pub fn imro_dir(&self) -> PathBuf {
        self.raw_data_dir().join("IMRO")
    }

    pub fn radius_params(&self) -> RadiusParams {
        RadiusParams {
            whitening_radius_um: self.ks_whitening_radius_um,
            template_radius_um: self.ks_template_radius_um,
            car_inner_um: self.loccar_min,
            car_outer_um: self.loccar_max,
            snr_radius_um: self.c_waves_snr_um,
            neighbor_sites_override: self.ks_neighbor_sites_fix,
        }
    }

    pub fn threshold_for(&self, region: &str) -> Result<&str> {
        self.ks_th_dict
            .get(region)
            .map(String::as_str)
            .ok_or_else(|| PipelineError::UnknownRegion {
                region: region.to_string(),
                table: "ksTh_dict".to_string(),
            })
    }

    pub fn refractory_ms_for(&self, region: &str) -> Result<f64> {
        self.ref_per_ms_dict
            .get(region)
            .copied()
            .ok_or_else(|| PipelineError::UnknownRegion {
                region: region.to_string(),
                table: "refPerMS_dict".to_string(),
            })
    }

    /// A filled-in example, used by `ecephys config`.
    pub fn example(base_dir: &Path) -> Self {
        let tools = base_dir.join("tools");
        Self {
            base_dir: base_dir.to_path_buf(),
            prefix: "lab".to_string(),
            ecephys_directory: tools.join("ecephys_spike_sorting/ecephys_spike_sorting"),
            kilosort_repository: tools.join("Kilosort"),
            npy_matlab_repository: tools.join("npy-matlab"),
            catgt_path: tools.join("CatGT-linux"),
            tprime_path: tools.join("TPrime-linux"),
            cwaves_path: tools.join("C_Waves-linux"),
            default_ks_tmp: base_dir.join("Kilosort_scratch"),
            ni_present: true,
            ni_extract_string: "-xa=0,0,0,1,3,500 -xia=0,0,1,3,3,0".to_string(),
            car_mode: "gbldmx".to_string(),
            loccar_min: 40.0,
            loccar_max: 160.0,
            catgt_cmd_string: "-prb_fld -out_prb_fld -gfix=0.4,0.10,0.02".to_string(),
            ks_th_dict: [("cortex".to_string(), "[10,4]".to_string())].into(),
            ref_per_ms_dict: [("cortex".to_string(), 2.0)].into(),
            ks_rem_dup: 0,
            ks_save_rez: 1,
            ks_copy_fproc: 0,
            ks_template_radius_um: 163.0,
            ks_whitening_radius_um: 163.0,
            ks_minfr_goodchannels: 0.1,
            ks_car: 0,
            ks_nblocks: 5,
            ks_output_tag: "ks".to_string(),
            ks_neighbor_sites_fix: None,
            c_waves_snr_um: 160.0,
            event_ex_param_str: "XD=4,1,50".to_string(),
            to_stream_sync_params: "SY=0,384,6,500".to_string(),
        }
    }
}
