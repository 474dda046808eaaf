//! Serialized sections of a job descriptor.
//!
//! Key names match what the external stage modules read, so several fields
//! carry explicit `rename`s.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Directories {
    pub ecephys_directory: PathBuf,
    pub npx_directory: PathBuf,
    pub extracted_data_directory: PathBuf,
    pub kilosort_output_directory: PathBuf,
    pub kilosort_output_tmp: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommonFiles {
    pub settings_json: PathBuf,
    pub probe_json: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaveformMetrics {
    pub waveform_metrics_file: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetrics {
    pub cluster_metrics_file: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EphysSection {
    pub probe_type: String,
    pub sample_rate: f64,
    pub lfp_sample_rate: f64,
    pub bit_volts: f64,
    pub num_channels: u32,
    pub reference_channels: Vec<u32>,
    pub vertical_site_spacing: f64,
    pub ap_band_file: PathBuf,
    pub lfp_band_file: PathBuf,
    pub reorder_lfp_channels: bool,
    pub cluster_group_file_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthEstimationParams {
    pub hi_noise_thresh: f64,
    pub lo_noise_thresh: f64,
    pub save_figure: u8,
    pub figure_location: PathBuf,
    pub smoothing_amount: u32,
    pub power_thresh: f64,
    pub diff_thresh: f64,
    pub freq_range: [f64; 2],
    pub max_freq: f64,
    pub saline_range_um: [f64; 2],
    pub n_passes: u32,
    pub air_gap_um: f64,
    pub time_interval: f64,
    pub skip_s_per_pass: f64,
    pub start_time: f64,
}

/// Sorter parameters, passed through to the MATLAB config as literals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SorterParams {
    #[serde(rename = "KSver")]
    pub ks_ver: String,
    #[serde(rename = "remDup")]
    pub rem_dup: u8,
    #[serde(rename = "finalSplits")]
    pub final_splits: u8,
    #[serde(rename = "labelGood")]
    pub label_good: u8,
    #[serde(rename = "saveRez")]
    pub save_rez: u8,
    pub copy_fproc: u8,
    /// Quoted path of the whitened temp file.
    pub fproc: String,
    /// Quoted channel-map path.
    #[serde(rename = "chanMap")]
    pub chan_map: String,
    pub fshigh: f64,
    pub minfr_goodchannels: f64,
    #[serde(rename = "Th")]
    pub th: String,
    pub lam: f64,
    #[serde(rename = "AUCsplit")]
    pub auc_split: f64,
    #[serde(rename = "minFR")]
    pub min_fr: f64,
    pub momentum: String,
    #[serde(rename = "sigmaMask")]
    pub sigma_mask: f64,
    #[serde(rename = "ThPre")]
    pub th_pre: f64,
    pub gain: f64,
    #[serde(rename = "CSBseed")]
    pub csb_seed: u32,
    #[serde(rename = "LTseed")]
    pub lt_seed: u32,
    #[serde(rename = "whiteningRange")]
    pub whitening_range: u32,
    #[serde(rename = "nNeighbors")]
    pub n_neighbors: u32,
    #[serde(rename = "CAR")]
    pub car: u8,
    pub nblocks: u32,
    pub trange: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KilosortHelperParams {
    pub matlab_home_directory: PathBuf,
    pub kilosort_repository: PathBuf,
    pub npy_matlab_repository: PathBuf,
    pub kilosort_version: u32,
    #[serde(rename = "spikeGLX_data")]
    pub spikeglx_data: bool,
    pub ks_make_copy: bool,
    pub surface_channel_buffer: u32,
    pub noise_threshold: f64,
    pub kilosort2_params: SorterParams,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KsPostprocessingParams {
    pub align_avg_waveform: bool,
    pub remove_duplicates: bool,
    #[serde(rename = "cWaves_path")]
    pub cwaves_path: PathBuf,
    pub within_unit_overlap_window: f64,
    pub between_unit_overlap_window: f64,
    pub between_unit_dist_um: f64,
    pub deletion_mode: String,
    pub include_pcs: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeanWaveformParams {
    pub mean_waveforms_file: PathBuf,
    pub samples_per_spike: u32,
    pub pre_samples: u32,
    pub num_epochs: u32,
    pub spikes_per_epoch: u32,
    pub spread_threshold: f64,
    pub site_range: u32,
    #[serde(rename = "cWaves_path")]
    pub cwaves_path: PathBuf,
    #[serde(rename = "use_C_Waves")]
    pub use_c_waves: bool,
    pub snr_radius: u32,
    pub snr_radius_um: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseWaveformParams {
    pub classifier_path: PathBuf,
    pub multiprocessing_worker_count: u32,
    pub use_random_forest: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityMetricsParams {
    pub isi_threshold: f64,
    pub min_isi: f64,
    pub tbin_sec: f64,
    pub max_radius_um: f64,
    pub max_spikes_for_unit: u32,
    pub max_spikes_for_nn: u32,
    pub n_neighbors: u32,
    pub n_silhouette: u32,
    pub drift_metrics_interval_s: f64,
    pub drift_metrics_min_spikes_per_interval: u32,
    pub include_pcs: bool,
}

/// Preprocessing (stream concatenation/filtering) parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatGtParams {
    pub run_name: String,
    pub gate_string: String,
    pub probe_string: String,
    pub trigger_string: String,
    pub stream_string: String,
    pub car_mode: String,
    pub loccar_inner: u32,
    pub loccar_outer: u32,
    pub loccar_inner_um: f64,
    pub loccar_outer_um: f64,
    #[serde(rename = "maxZ_um")]
    pub max_z_um: f64,
    #[serde(rename = "useGeom")]
    pub use_geom: bool,
    #[serde(rename = "cmdStr")]
    pub cmd_str: String,
    #[serde(rename = "catGTPath")]
    pub catgt_path: PathBuf,
}

/// Cross-stream alignment parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TPrimeParams {
    #[serde(rename = "tPrime_path")]
    pub tprime_path: PathBuf,
    pub im_ex_list: String,
    pub ni_ex_list: String,
    pub sync_period: f64,
    #[serde(rename = "toStream_sync_params")]
    pub to_stream_sync_params: String,
    pub ni_sync_params: String,
    #[serde(rename = "tPrime_3A")]
    pub tprime_3a: bool,
    #[serde(rename = "toStream_path_3A")]
    pub to_stream_path_3a: String,
    #[serde(rename = "fromStream_list_3A")]
    pub from_stream_list_3a: Vec<String>,
    pub psth_ex_str: String,
    pub sort_out_tag: String,
    /// Sorter output of every unit taking part in the alignment.
    pub sorted_output_directories: Vec<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrePhyFiltersParams {
    pub snr_min: f64,
    pub halfwidth_max: f64,
    pub fr_min: f64,
    pub isi_viol_max: f64,
    pub n_viol_max: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PsthEvents {
    pub event_ex_param_str: String,
}
