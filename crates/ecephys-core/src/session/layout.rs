use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::Result;
use crate::gates::{discover_gate_folders, resolve_gates, GateList};

use super::config::SessionConfig;
use super::descriptor::SessionDescriptor;

/// Resolved on-disk locations for one session.
///
/// Processed output follows
/// `<processed_root>/<animal>/Ecephys/<stem>/catgt_<stem>_g<G>/<stem>_g<G>_imec<P>/`
/// where `G` is the first gate of the session's gate list.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionLayout {
    pub stem: String,
    pub gates: GateList,
    /// Gate folders found on disk, dash-separated. Empty when none matched.
    pub gate_label: String,
    /// Raw recordings for this animal.
    pub npx_directory: PathBuf,
    pub processed_root: PathBuf,
    /// Destination of the concatenated streams and of every descriptor.
    pub catgt_dest: PathBuf,
    pub imro_dir: PathBuf,
}

impl SessionLayout {
    pub fn resolve(config: &SessionConfig, session: &SessionDescriptor) -> Result<Self> {
        let stem = session.file_stem()?;
        let gates = resolve_gates(&session.gate_list)?;
        let npx_directory = config.raw_data_dir().join(&session.animal);
        let processed_root = config.base_dir.join(&session.processed_directory);
        let catgt_dest = processed_root
            .join(&session.animal)
            .join("Ecephys")
            .join(&stem);

        let folders = discover_gate_folders(&npx_directory, &stem, gates.first(), gates.last());
        if folders.is_empty() {
            warn!(
                raw = %npx_directory.display(),
                range = %gates.legacy_range(),
                "No gate folders found on disk"
            );
        } else {
            debug!(gates = %folders.label(), "Concatenating gate indices");
        }

        Ok(Self {
            gate_label: folders.label(),
            imro_dir: config.imro_dir(),
            stem,
            gates,
            npx_directory,
            processed_root,
            catgt_dest,
        })
    }

    /// `<stem>_g<first gate>`
    pub fn run_name(&self) -> String {
        format!("{}_g{}", self.stem, self.gates.first())
    }

    pub fn raw_run_dir(&self) -> PathBuf {
        self.npx_directory.join(self.run_name())
    }

    pub fn raw_probe_folder(&self, probe: u32) -> PathBuf {
        self.raw_run_dir()
            .join(format!("{}_imec{probe}", self.run_name()))
    }

    pub fn raw_ap_file(&self, probe: u32, trigger: u32) -> PathBuf {
        self.raw_probe_folder(probe)
            .join(format!("{}_t{trigger}.imec{probe}.ap.bin", self.run_name()))
    }

    pub fn raw_meta_file(&self, probe: u32, trigger: u32) -> PathBuf {
        self.raw_probe_folder(probe)
            .join(format!("{}_t{trigger}.imec{probe}.ap.meta", self.run_name()))
    }

    pub fn catgt_run_dir(&self) -> PathBuf {
        self.catgt_dest.join(format!("catgt_{}", self.run_name()))
    }

    /// Concatenated-stream directory for one probe; sorter output lives below it.
    pub fn probe_data_dir(&self, probe: u32) -> PathBuf {
        self.catgt_run_dir()
            .join(format!("{}_imec{probe}", self.run_name()))
    }

    /// Concatenated AP-band file written by the preprocessing stage.
    pub fn catgt_output_file(&self, probe: u32) -> PathBuf {
        self.probe_data_dir(probe)
            .join(format!("{}_tcat.imec{probe}.ap.bin", self.run_name()))
    }

    /// Input/output artifact paths of the probe's preprocessing stage.
    pub fn preprocessing_artifacts(&self, probe: u32) -> (PathBuf, PathBuf) {
        let base = format!("{}_g{}_prb{probe}_CatGT", self.stem, self.gate_label);
        (
            self.catgt_dest.join(format!("{base}-input.json")),
            self.catgt_dest.join(format!("{base}-output.json")),
        )
    }

    /// Input/output artifact paths of the session's alignment stage.
    pub fn alignment_artifacts(&self) -> (PathBuf, PathBuf) {
        let base = format!("{}_g{}_TPrime", self.stem, self.gate_label);
        (
            self.catgt_dest.join(format!("{base}-input.json")),
            self.catgt_dest.join(format!("{base}-output.json")),
        )
    }

    pub fn run_log_path(&self, uuid: &str) -> PathBuf {
        self.catgt_dest.join(format!("{uuid}_{}_log.csv", self.stem))
    }
}
