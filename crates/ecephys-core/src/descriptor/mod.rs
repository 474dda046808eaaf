//! Job descriptors: the JSON documents handed to each external stage.

mod builder;
pub mod sections;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::pipeline::Stage;

pub use builder::{
    DescriptorBuilder, DescriptorInputs, DescriptorOverrides, SessionOverrides, SortedOutput,
};
use sections::{
    CatGtParams, ClusterMetrics, CommonFiles, DepthEstimationParams, Directories, EphysSection,
    KilosortHelperParams, KsPostprocessingParams, MeanWaveformParams, NoiseWaveformParams,
    PrePhyFiltersParams, PsthEvents, QualityMetricsParams, TPrimeParams, WaveformMetrics,
};

/// Full configuration bundle for one stage invocation.
///
/// Every section is present in every descriptor; each stage module reads the
/// sections it needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub directories: Directories,
    pub common_files: CommonFiles,
    pub waveform_metrics: WaveformMetrics,
    pub cluster_metrics: ClusterMetrics,
    pub ephys_params: EphysSection,
    pub depth_estimation_params: DepthEstimationParams,
    pub kilosort_helper_params: KilosortHelperParams,
    pub ks_postprocessing_params: KsPostprocessingParams,
    pub mean_waveform_params: MeanWaveformParams,
    pub noise_waveform_params: NoiseWaveformParams,
    pub quality_metrics_params: QualityMetricsParams,
    #[serde(rename = "catGT_helper_params")]
    pub catgt_helper_params: CatGtParams,
    #[serde(rename = "tPrime_helper_params")]
    pub tprime_helper_params: TPrimeParams,
    pub prephy_filters_params: PrePhyFiltersParams,
    pub psth_events: PsthEvents,
}

impl JobDescriptor {
    /// Write as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), "Wrote job descriptor");
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Every filesystem path the descriptor carries.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        let dirs = &self.directories;
        [
            &dirs.ecephys_directory,
            &dirs.npx_directory,
            &dirs.extracted_data_directory,
            &dirs.kilosort_output_directory,
            &dirs.kilosort_output_tmp,
            &self.common_files.settings_json,
            &self.common_files.probe_json,
            &self.waveform_metrics.waveform_metrics_file,
            &self.cluster_metrics.cluster_metrics_file,
            &self.ephys_params.ap_band_file,
            &self.ephys_params.lfp_band_file,
            &self.depth_estimation_params.figure_location,
            &self.kilosort_helper_params.matlab_home_directory,
            &self.kilosort_helper_params.kilosort_repository,
            &self.kilosort_helper_params.npy_matlab_repository,
            &self.ks_postprocessing_params.cwaves_path,
            &self.mean_waveform_params.mean_waveforms_file,
            &self.mean_waveform_params.cwaves_path,
            &self.noise_waveform_params.classifier_path,
            &self.catgt_helper_params.catgt_path,
            &self.tprime_helper_params.tprime_path,
        ]
        .into_iter()
        .chain(&self.tprime_helper_params.sorted_output_directories)
        .map(PathBuf::as_path)
    }
}

/// One external module run: `<module> --input_json <input> --output_json <output>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub module: String,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// A built, written descriptor plus the invocations that consume it.
#[derive(Clone, Debug)]
pub struct StageJob {
    pub stage: Stage,
    /// Unit identifier, or the session stem for session-wide stages.
    pub unit: String,
    pub descriptor: JobDescriptor,
    pub input_artifact: PathBuf,
    /// Run in order; the first failure stops the rest.
    pub invocations: Vec<Invocation>,
    /// Primary output the next stage consumes.
    pub produces: PathBuf,
}
