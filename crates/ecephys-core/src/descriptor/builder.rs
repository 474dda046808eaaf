use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::consts::{
    FULL_TIME_RANGE, KS_TMP_OVERRIDE_ENV, LFP_SAMPLE_RATE, NI_STREAM_STRING, PROBE_STREAM_STRING,
    SORTER_VERSION,
};
use crate::error::{PipelineError, Result};
use crate::geometry::DerivedParameters;
use crate::meta::EphysParams;
use crate::pipeline::{ProcessingUnit, Stage};
use crate::session::{SessionConfig, SessionContext};

use super::sections::{
    CatGtParams, ClusterMetrics, CommonFiles, DepthEstimationParams, Directories, EphysSection,
    KilosortHelperParams, KsPostprocessingParams, MeanWaveformParams, NoiseWaveformParams,
    PrePhyFiltersParams, PsthEvents, QualityMetricsParams, SorterParams, TPrimeParams,
    WaveformMetrics,
};
use super::{Invocation, JobDescriptor, StageJob};

/// Per-unit overrides for sorting and post-processing descriptors. These
/// win over every other source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DescriptorOverrides {
    pub chan_map: Option<PathBuf>,
    pub kilosort_output_directory: Option<PathBuf>,
    /// Sorter time range, e.g. `"[0 600]"`.
    pub time_range: Option<String>,
    /// Continuous-data input; defaults to the previous stage's output.
    pub continuous_file: Option<PathBuf>,
    /// Classify noise units with the precomputed classifier.
    pub use_random_forest: Option<bool>,
    /// Classify noise units by rule instead of a classifier.
    pub use_rule_based: Option<bool>,
    pub make_copy: Option<bool>,
}

impl DescriptorOverrides {
    /// Layer `other` on top; its set fields win.
    pub fn merge(&mut self, other: &Self) {
        self.chan_map = other.chan_map.clone().or(self.chan_map.take());
        self.kilosort_output_directory = other
            .kilosort_output_directory
            .clone()
            .or(self.kilosort_output_directory.take());
        self.time_range = other.time_range.clone().or(self.time_range.take());
        self.continuous_file = other.continuous_file.clone().or(self.continuous_file.take());
        self.use_random_forest = other.use_random_forest.or(self.use_random_forest);
        self.use_rule_based = other.use_rule_based.or(self.use_rule_based);
        self.make_copy = other.make_copy.or(self.make_copy);
    }
}

/// Overrides for a whole session: `shared` applies to every unit, then the
/// entry keyed by unit id (`imec0`, `imec1shank0bank2`) on top.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionOverrides {
    pub shared: DescriptorOverrides,
    pub units: BTreeMap<String, DescriptorOverrides>,
}

impl SessionOverrides {
    pub fn for_unit(&self, id: &str) -> DescriptorOverrides {
        let mut merged = self.shared.clone();
        if let Some(unit) = self.units.get(id) {
            merged.merge(unit);
        }
        merged
    }
}

/// Sorted output of a finished unit, as consumed by alignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortedOutput {
    pub unit: String,
    pub probe: u32,
    pub continuous_file: PathBuf,
    pub directory: PathBuf,
}

/// Flat set of knobs a descriptor is rendered from.
///
/// `Default` carries the stage modules' standard values. Layers are applied
/// in order: geometry, session config, region lookups, then overrides.
/// Required paths stay `None` until a layer fills them.
#[derive(Clone, Debug, PartialEq)]
pub struct DescriptorInputs {
    pub ecephys_directory: Option<PathBuf>,
    pub npx_directory: Option<PathBuf>,
    pub extracted_data_directory: Option<PathBuf>,
    pub kilosort_output_directory: Option<PathBuf>,
    pub kilosort_output_tmp: Option<PathBuf>,
    pub kilosort_repository: Option<PathBuf>,
    pub npy_matlab_repository: Option<PathBuf>,
    pub catgt_path: Option<PathBuf>,
    pub tprime_path: Option<PathBuf>,
    pub cwaves_path: Option<PathBuf>,
    pub continuous_file: Option<PathBuf>,
    pub chan_map: Option<PathBuf>,

    pub ephys: EphysParams,
    pub derived: DerivedParameters,

    pub run_name: String,
    pub gate_string: String,
    pub trigger_string: String,
    pub probe_string: String,
    pub stream_string: String,
    pub car_mode: String,
    pub loccar_inner_um: f64,
    pub loccar_outer_um: f64,
    pub max_z_um: f64,
    pub cmd_string: String,

    pub ks_make_copy: bool,
    pub noise_threshold: f64,
    pub surface_channel_buffer: u32,
    pub rem_dup: u8,
    pub final_splits: u8,
    pub label_good: u8,
    pub save_rez: u8,
    pub copy_fproc: u8,
    pub minfr_goodchannels: f64,
    pub threshold: String,
    pub csb_seed: u32,
    pub lt_seed: u32,
    pub nblocks: u32,
    pub car: u8,
    pub time_range: String,

    pub include_pcs: bool,
    pub spread_threshold: f64,
    pub site_range: u32,
    pub snr_radius_um: f64,
    pub isi_threshold: f64,
    pub use_random_forest: bool,
    pub use_rule_based: bool,
    pub save_depth_figure: u8,
    pub snr_min: f64,
    pub halfwidth_max: f64,
    pub fr_min: f64,
    pub isi_viol_max: f64,
    pub n_viol_max: u32,

    pub im_ex_list: String,
    pub ni_ex_list: String,
    pub sync_period: f64,
    pub to_stream_sync_params: String,
    pub ni_sync_params: String,
    pub psth_ex_str: String,
    pub sort_out_tag: String,
    pub sorted_output_directories: Vec<PathBuf>,
}

impl Default for DescriptorInputs {
    fn default() -> Self {
        Self {
            ecephys_directory: None,
            npx_directory: None,
            extracted_data_directory: None,
            kilosort_output_directory: None,
            kilosort_output_tmp: None,
            kilosort_repository: None,
            npy_matlab_repository: None,
            catgt_path: None,
            tprime_path: None,
            cwaves_path: None,
            continuous_file: None,
            chan_map: None,
            ephys: EphysParams::default(),
            derived: DerivedParameters {
                car_inner_sites: 2,
                car_outer_sites: 8,
                whitening_range: 32,
                neighbor_sites: 32,
                snr_radius_sites: 8,
            },
            run_name: String::new(),
            gate_string: "0".to_string(),
            trigger_string: "0,0".to_string(),
            probe_string: "0".to_string(),
            stream_string: PROBE_STREAM_STRING.to_string(),
            car_mode: "gbldmx".to_string(),
            loccar_inner_um: 40.0,
            loccar_outer_um: 160.0,
            max_z_um: -1.0,
            cmd_string: "-prb_fld -out_prb_fld -gfix=0.4,0.10,0.02".to_string(),
            ks_make_copy: false,
            noise_threshold: 20.0,
            surface_channel_buffer: 15,
            rem_dup: 0,
            final_splits: 1,
            label_good: 1,
            save_rez: 1,
            copy_fproc: 0,
            minfr_goodchannels: 0.1,
            threshold: "[10,4]".to_string(),
            csb_seed: 1,
            lt_seed: 1,
            nblocks: 5,
            car: 1,
            time_range: FULL_TIME_RANGE.to_string(),
            include_pcs: false,
            spread_threshold: 0.12,
            site_range: 16,
            snr_radius_um: 160.0,
            isi_threshold: 0.0015,
            use_random_forest: true,
            use_rule_based: false,
            save_depth_figure: 0,
            snr_min: 1.0,
            halfwidth_max: 0.3,
            fr_min: 0.05,
            isi_viol_max: 0.2,
            n_viol_max: 1,
            im_ex_list: String::new(),
            ni_ex_list: String::new(),
            sync_period: 1.0,
            to_stream_sync_params: "SY=0,384,6,500".to_string(),
            ni_sync_params: String::new(),
            psth_ex_str: String::new(),
            sort_out_tag: "ks".to_string(),
            sorted_output_directories: Vec::new(),
        }
    }
}

impl DescriptorInputs {
    pub fn apply_geometry(&mut self, derived: &DerivedParameters) {
        self.derived = *derived;
    }

    pub fn apply_config(&mut self, config: &SessionConfig) {
        self.ecephys_directory = Some(config.ecephys_directory.clone());
        self.kilosort_repository = Some(config.kilosort_repository.clone());
        self.npy_matlab_repository = Some(config.npy_matlab_repository.clone());
        self.catgt_path = Some(config.catgt_path.clone());
        self.tprime_path = Some(config.tprime_path.clone());
        self.cwaves_path = Some(config.cwaves_path.clone());
        self.kilosort_output_tmp = Some(
            std::env::var_os(KS_TMP_OVERRIDE_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| config.default_ks_tmp.clone()),
        );

        self.car_mode = config.car_mode.clone();
        self.loccar_inner_um = config.loccar_min;
        self.loccar_outer_um = config.loccar_max;

        self.rem_dup = config.ks_rem_dup;
        self.save_rez = config.ks_save_rez;
        self.copy_fproc = config.ks_copy_fproc;
        self.minfr_goodchannels = config.ks_minfr_goodchannels;
        self.car = config.ks_car;
        self.nblocks = config.ks_nblocks;

        self.snr_radius_um = config.c_waves_snr_um;
        self.to_stream_sync_params = config.to_stream_sync_params.clone();
        self.psth_ex_str = config.event_ex_param_str.clone();
        self.sort_out_tag = config.ks_output_tag.clone();
    }

    /// Region-keyed sorter threshold and refractory period.
    pub fn apply_region(&mut self, config: &SessionConfig, region: &str) -> Result<()> {
        self.threshold = config.threshold_for(region)?.to_string();
        self.isi_threshold = config.refractory_ms_for(region)? / 1000.0;
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &DescriptorOverrides) {
        if let Some(path) = &overrides.chan_map {
            self.chan_map = Some(path.clone());
        }
        if let Some(path) = &overrides.kilosort_output_directory {
            self.kilosort_output_directory = Some(path.clone());
        }
        if let Some(range) = &overrides.time_range {
            self.time_range = range.clone();
        }
        if let Some(path) = &overrides.continuous_file {
            self.continuous_file = Some(path.clone());
        }
        if let Some(flag) = overrides.use_random_forest {
            self.use_random_forest = flag;
        }
        if let Some(flag) = overrides.use_rule_based {
            self.use_rule_based = flag;
        }
        if let Some(flag) = overrides.make_copy {
            self.ks_make_copy = flag;
        }
    }

    /// Render the descriptor. Fails on an unset path or conflicting options.
    pub fn render(&self) -> Result<JobDescriptor> {
        if self.use_random_forest && self.use_rule_based {
            return Err(PipelineError::ConflictingOptions(
                "precomputed classifier and rule-based classification are both enabled".into(),
            ));
        }

        let ecephys_directory = required(&self.ecephys_directory, "ecephys_directory")?;
        let npx_directory = required(&self.npx_directory, "npx_directory")?;
        let extracted = required(&self.extracted_data_directory, "extracted_data_directory")?;
        let ks_output = required(&self.kilosort_output_directory, "kilosort_output_directory")?;
        let ks_tmp = required(&self.kilosort_output_tmp, "kilosort_output_tmp")?;
        let continuous_file = required(&self.continuous_file, "continuous_file")?;
        let cwaves_path = required(&self.cwaves_path, "cWaves_path")?;
        let chan_map = self
            .chan_map
            .as_deref()
            .map(quoted)
            .unwrap_or_default();

        Ok(JobDescriptor {
            directories: Directories {
                ecephys_directory: ecephys_directory.clone(),
                npx_directory: npx_directory.clone(),
                extracted_data_directory: extracted.clone(),
                kilosort_output_directory: ks_output.clone(),
                kilosort_output_tmp: ks_tmp.clone(),
            },
            common_files: CommonFiles {
                settings_json: npx_directory.clone(),
                probe_json: extracted.join("probe_json.json"),
            },
            waveform_metrics: WaveformMetrics {
                waveform_metrics_file: ks_output.join("waveform_metrics.csv"),
            },
            cluster_metrics: ClusterMetrics {
                cluster_metrics_file: ks_output.join("metrics.csv"),
            },
            ephys_params: EphysSection {
                probe_type: self.ephys.probe_type.clone(),
                sample_rate: self.ephys.sample_rate,
                lfp_sample_rate: LFP_SAMPLE_RATE,
                bit_volts: self.ephys.uv_per_bit,
                num_channels: self.ephys.num_channels,
                reference_channels: self.ephys.reference_channels.clone(),
                vertical_site_spacing: 10e-6,
                ap_band_file: continuous_file.clone(),
                lfp_band_file: lfp_band_file(continuous_file),
                reorder_lfp_channels: false,
                cluster_group_file_name: "cluster_group.tsv".to_string(),
            },
            depth_estimation_params: DepthEstimationParams {
                hi_noise_thresh: 50.0,
                lo_noise_thresh: 3.0,
                save_figure: self.save_depth_figure,
                figure_location: extracted.join("probe_depth.png"),
                smoothing_amount: 5,
                power_thresh: 2.5,
                diff_thresh: -0.06,
                freq_range: [0.0, 10.0],
                max_freq: 150.0,
                saline_range_um: [3700.0, 3800.0],
                n_passes: 10,
                air_gap_um: 1000.0,
                time_interval: 5.0,
                skip_s_per_pass: 10.0,
                start_time: 10.0,
            },
            kilosort_helper_params: KilosortHelperParams {
                matlab_home_directory: ks_tmp.clone(),
                kilosort_repository: required(&self.kilosort_repository, "kilosort_repository")?
                    .clone(),
                npy_matlab_repository: required(
                    &self.npy_matlab_repository,
                    "npy_matlab_repository",
                )?
                .clone(),
                kilosort_version: 2,
                spikeglx_data: true,
                ks_make_copy: self.ks_make_copy,
                surface_channel_buffer: self.surface_channel_buffer,
                noise_threshold: self.noise_threshold,
                kilosort2_params: SorterParams {
                    ks_ver: SORTER_VERSION.to_string(),
                    rem_dup: self.rem_dup,
                    final_splits: self.final_splits,
                    label_good: self.label_good,
                    save_rez: self.save_rez,
                    copy_fproc: self.copy_fproc,
                    fproc: quoted(&ks_tmp.join("temp_wh.dat")),
                    chan_map,
                    fshigh: 150.0,
                    minfr_goodchannels: self.minfr_goodchannels,
                    th: self.threshold.clone(),
                    lam: 10.0,
                    auc_split: 0.9,
                    min_fr: 0.01,
                    momentum: "[20 400]".to_string(),
                    sigma_mask: 30.0,
                    th_pre: 8.0,
                    gain: self.ephys.uv_per_bit,
                    csb_seed: self.csb_seed,
                    lt_seed: self.lt_seed,
                    whitening_range: self.derived.whitening_range,
                    n_neighbors: self.derived.neighbor_sites,
                    car: self.car,
                    nblocks: self.nblocks,
                    trange: self.time_range.clone(),
                },
            },
            ks_postprocessing_params: KsPostprocessingParams {
                align_avg_waveform: false,
                remove_duplicates: true,
                cwaves_path: cwaves_path.clone(),
                within_unit_overlap_window: 0.00017,
                between_unit_overlap_window: 0.00041,
                between_unit_dist_um: 66.0,
                deletion_mode: "lowAmpCluster".to_string(),
                include_pcs: self.include_pcs,
            },
            mean_waveform_params: MeanWaveformParams {
                mean_waveforms_file: ks_output.join("mean_waveforms.npy"),
                samples_per_spike: 82,
                pre_samples: 20,
                num_epochs: 1,
                spikes_per_epoch: 1000,
                spread_threshold: self.spread_threshold,
                site_range: self.site_range,
                cwaves_path: cwaves_path.clone(),
                use_c_waves: true,
                snr_radius: self.derived.snr_radius_sites,
                snr_radius_um: self.snr_radius_um,
            },
            noise_waveform_params: NoiseWaveformParams {
                classifier_path: ecephys_directory
                    .join("modules")
                    .join("noise_templates")
                    .join("rf_classifier.pkl"),
                multiprocessing_worker_count: 10,
                use_random_forest: self.use_random_forest,
            },
            quality_metrics_params: QualityMetricsParams {
                isi_threshold: self.isi_threshold,
                min_isi: 0.000166,
                tbin_sec: 0.001,
                max_radius_um: 68.0,
                max_spikes_for_unit: 500,
                max_spikes_for_nn: 10000,
                n_neighbors: 4,
                n_silhouette: 10000,
                drift_metrics_interval_s: 51.0,
                drift_metrics_min_spikes_per_interval: 10,
                include_pcs: self.include_pcs,
            },
            catgt_helper_params: CatGtParams {
                run_name: self.run_name.clone(),
                gate_string: self.gate_string.clone(),
                probe_string: self.probe_string.clone(),
                trigger_string: self.trigger_string.clone(),
                stream_string: self.stream_string.clone(),
                car_mode: self.car_mode.clone(),
                loccar_inner: self.derived.car_inner_sites,
                loccar_outer: self.derived.car_outer_sites,
                loccar_inner_um: self.loccar_inner_um,
                loccar_outer_um: self.loccar_outer_um,
                max_z_um: self.max_z_um,
                use_geom: self.ephys.use_geometry,
                cmd_str: self.cmd_string.clone(),
                catgt_path: required(&self.catgt_path, "catGTPath")?.clone(),
            },
            tprime_helper_params: TPrimeParams {
                tprime_path: required(&self.tprime_path, "tPrime_path")?.clone(),
                im_ex_list: self.im_ex_list.clone(),
                ni_ex_list: self.ni_ex_list.clone(),
                sync_period: self.sync_period,
                to_stream_sync_params: self.to_stream_sync_params.clone(),
                ni_sync_params: self.ni_sync_params.clone(),
                tprime_3a: false,
                to_stream_path_3a: " ".to_string(),
                from_stream_list_3a: Vec::new(),
                psth_ex_str: self.psth_ex_str.clone(),
                sort_out_tag: self.sort_out_tag.clone(),
                sorted_output_directories: self.sorted_output_directories.clone(),
            },
            prephy_filters_params: PrePhyFiltersParams {
                snr_min: self.snr_min,
                halfwidth_max: self.halfwidth_max,
                fr_min: self.fr_min,
                isi_viol_max: self.isi_viol_max,
                n_viol_max: self.n_viol_max,
            },
            psth_events: PsthEvents {
                event_ex_param_str: self.psth_ex_str.clone(),
            },
        })
    }
}

fn required<'a>(value: &'a Option<PathBuf>, name: &str) -> Result<&'a PathBuf> {
    value
        .as_ref()
        .ok_or_else(|| PipelineError::InvalidSession(format!("descriptor field '{name}' is unset")))
}

/// MATLAB-literal path: single-quoted, forward slashes.
fn quoted(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\\', "/"))
}

fn lfp_band_file(ap_file: &Path) -> PathBuf {
    PathBuf::from(ap_file.to_string_lossy().replace(".ap.bin", ".lf.bin"))
}

/// Builds and writes stage descriptors for one resolved session.
pub struct DescriptorBuilder<'a> {
    ctx: &'a SessionContext,
}

impl<'a> DescriptorBuilder<'a> {
    pub fn new(ctx: &'a SessionContext) -> Self {
        Self { ctx }
    }

    /// Build the descriptor for `unit` at `stage`, write it to its input
    /// artifact and return the job.
    ///
    /// Preprocessing jobs are per probe: shanks and banks of one probe get
    /// the same job, and `overrides` do not apply to them. Alignment is
    /// session-wide; use [`Self::build_alignment`].
    pub fn build(
        &self,
        unit: &ProcessingUnit,
        stage: Stage,
        derived: &DerivedParameters,
        overrides: &DescriptorOverrides,
    ) -> Result<StageJob> {
        match stage {
            Stage::Preprocessing => self.build_preprocessing(unit.probe, derived),
            Stage::Sorting | Stage::PostProcessing => {
                self.build_sorting(unit, stage, derived, overrides)
            }
            Stage::Alignment => Err(PipelineError::InvalidSession(
                "alignment is built once per session from sorted outputs".into(),
            )),
        }
    }

    /// Alignment over the sorted output of every finished unit.
    pub fn build_alignment(
        &self,
        sorted: &[SortedOutput],
        derived: &DerivedParameters,
    ) -> Result<StageJob> {
        let Some(first) = sorted.first() else {
            return Err(PipelineError::InvalidSession(
                "no sorted output to align".into(),
            ));
        };
        let config = &self.ctx.config;
        let layout = &self.ctx.layout;

        let mut inputs = self.base_inputs(first.probe, derived)?;
        inputs.continuous_file = Some(first.continuous_file.clone());
        inputs.extracted_data_directory = Some(layout.catgt_dest.clone());
        inputs.kilosort_output_directory = Some(first.directory.clone());
        inputs.run_name = layout.stem.clone();
        inputs.gate_string = layout.gates.legacy_range();
        inputs.trigger_string = self.ctx.trigger_string();
        inputs.probe_string = self.ctx.session.which_probes.clone();
        inputs.ni_ex_list = config.ni_extract_string.clone();
        inputs.sorted_output_directories = sorted.iter().map(|s| s.directory.clone()).collect();

        let (input, output) = layout.alignment_artifacts();
        self.finish(
            inputs,
            Stage::Alignment,
            layout.stem.clone(),
            input.clone(),
            vec![Invocation {
                module: "tPrime_helper".to_string(),
                input,
                output,
            }],
            layout.catgt_dest.clone(),
            vec![layout.catgt_dest.clone()],
        )
    }

    fn base_inputs(&self, probe: u32, derived: &DerivedParameters) -> Result<DescriptorInputs> {
        let mut inputs = DescriptorInputs::default();
        inputs.apply_geometry(derived);
        inputs.apply_config(&self.ctx.config);
        inputs.ephys = self.ctx.ephys_for(probe)?.clone();
        inputs.npx_directory = Some(self.ctx.layout.npx_directory.clone());
        Ok(inputs)
    }

    fn position(&self, probe: u32) -> Result<usize> {
        self.ctx
            .probe_position(probe)
            .ok_or_else(|| PipelineError::InvalidSession(format!("probe {probe} not selected")))
    }

    fn build_preprocessing(&self, probe: u32, derived: &DerivedParameters) -> Result<StageJob> {
        let config = &self.ctx.config;
        let layout = &self.ctx.layout;
        let carries_ni = config.ni_present && self.position(probe)? == 0;

        let mut inputs = self.base_inputs(probe, derived)?;
        inputs.continuous_file = Some(layout.raw_ap_file(probe, self.ctx.first_trigger));
        inputs.extracted_data_directory = Some(layout.catgt_dest.clone());
        inputs.kilosort_output_directory = Some(layout.catgt_dest.clone());
        inputs.run_name = layout.stem.clone();
        inputs.gate_string = layout.gates.legacy_range();
        inputs.trigger_string = self.ctx.trigger_string();
        inputs.probe_string = probe.to_string();
        let extract = if carries_ni {
            inputs.stream_string = NI_STREAM_STRING.to_string();
            config.ni_extract_string.as_str()
        } else {
            inputs.stream_string = PROBE_STREAM_STRING.to_string();
            ""
        };
        inputs.cmd_string = format!(
            "{} -gtlist={} {}",
            config.catgt_cmd_string,
            layout.gates.concat_directive(),
            extract
        )
        .trim_end()
        .to_string();

        let (input, output) = layout.preprocessing_artifacts(probe);
        self.finish(
            inputs,
            Stage::Preprocessing,
            format!("imec{probe}"),
            input.clone(),
            vec![Invocation {
                module: "catGT_helper".to_string(),
                input,
                output,
            }],
            layout.catgt_output_file(probe),
            vec![layout.catgt_dest.clone()],
        )
    }

    fn build_sorting(
        &self,
        unit: &ProcessingUnit,
        stage: Stage,
        derived: &DerivedParameters,
        overrides: &DescriptorOverrides,
    ) -> Result<StageJob> {
        let config = &self.ctx.config;
        let session = &self.ctx.session;
        let layout = &self.ctx.layout;
        let position = self.position(unit.probe)?;
        let data_dir = layout.probe_data_dir(unit.probe);
        let session_id = unit.session_id(&layout.stem);

        let mut inputs = self.base_inputs(unit.probe, derived)?;
        inputs.apply_region(config, session.region_for(position))?;
        inputs.continuous_file = Some(layout.catgt_output_file(unit.probe));
        inputs.extracted_data_directory = Some(data_dir.clone());
        inputs.kilosort_output_directory = Some(data_dir.join(unit.output_dir_name()));
        inputs.run_name = session_id.clone();
        inputs.gate_string = layout.gates.legacy_range();
        inputs.trigger_string = self.ctx.trigger_string();
        inputs.probe_string = session.which_probes.clone();
        inputs.ks_make_copy = true;
        inputs.use_random_forest = false;
        inputs.halfwidth_max = 0.35;
        match (&session.survey, unit.survey) {
            (Some(survey), true) => {
                let range = survey.time_range(unit.shank, unit.bank).ok_or_else(|| {
                    PipelineError::InvalidSession(format!(
                        "no survey time range for shank {} bank {}",
                        unit.shank, unit.bank
                    ))
                })?;
                inputs.time_range = range.to_string();
                inputs.chan_map = Some(
                    layout
                        .imro_dir
                        .join(format!("shank{}bank{}.mat", unit.shank, unit.bank)),
                );
            }
            _ => {
                let imro = session.imro_for(position)?;
                inputs.time_range = FULL_TIME_RANGE.to_string();
                inputs.chan_map = Some(layout.imro_dir.join(format!("{imro}.mat")));
            }
        }
        inputs.apply_overrides(overrides);

        let input = layout.catgt_dest.join(format!("{session_id}-input.json"));
        let modules = match stage {
            Stage::Sorting => vec!["kilosort_helper"],
            _ => session.modules.postprocessing_modules(),
        };
        let invocations = modules
            .into_iter()
            .map(|module| Invocation {
                module: module.to_string(),
                input: input.clone(),
                output: layout
                    .catgt_dest
                    .join(format!("{session_id}-{module}-output.json")),
            })
            .collect();
        let produces = inputs
            .kilosort_output_directory
            .clone()
            .unwrap_or_else(|| data_dir.join(unit.output_dir_name()));

        self.finish(
            inputs,
            stage,
            unit.id(),
            input,
            invocations,
            produces.clone(),
            vec![layout.catgt_dest.clone(), produces],
        )
    }

    /// Validate, create output directories and write the descriptor.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        inputs: DescriptorInputs,
        stage: Stage,
        unit: String,
        input_artifact: PathBuf,
        invocations: Vec<Invocation>,
        produces: PathBuf,
        output_dirs: Vec<PathBuf>,
    ) -> Result<StageJob> {
        let layout = &self.ctx.layout;
        if layout.gate_label.is_empty() {
            return Err(PipelineError::GateFoldersNotFound {
                root: layout.npx_directory.clone(),
                stem: layout.stem.clone(),
                first: layout.gates.first(),
                last: layout.gates.last(),
            });
        }

        let descriptor = inputs.render()?;
        let artifacts = invocations
            .iter()
            .flat_map(|inv| [inv.input.as_path(), inv.output.as_path()]);
        let chan_map = inputs.chan_map.iter().map(PathBuf::as_path);
        for path in descriptor
            .paths()
            .chain(artifacts)
            .chain(chan_map)
            .chain([input_artifact.as_path(), produces.as_path()])
        {
            if !path.is_absolute() {
                return Err(PipelineError::RelativePath(path.to_path_buf()));
            }
        }

        for dir in &output_dirs {
            std::fs::create_dir_all(dir).map_err(|source| PipelineError::DirectoryCreateError {
                path: dir.clone(),
                source,
            })?;
        }

        descriptor.write(&input_artifact)?;
        info!(
            stage = %stage,
            unit = %unit,
            input = %input_artifact.display(),
            "Built job descriptor"
        );
        debug!(invocations = invocations.len(), produces = %produces.display());

        Ok(StageJob {
            stage,
            unit,
            descriptor,
            input_artifact,
            invocations,
            produces,
        })
    }
}
