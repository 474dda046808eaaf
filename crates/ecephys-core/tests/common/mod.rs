#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use ecephys_core::descriptor::Invocation;
use ecephys_core::error::Result;
use ecephys_core::pipeline::{StageRunner, StageStatus};
use ecephys_core::session::{ModuleFlags, SessionConfig, SessionDescriptor};

pub const ANIMAL: &str = "M01";
pub const STEM: &str = "rec";

/// SpikeGLX metadata of a 1.0 probe at AP gain 500.
pub const NP1_META: &str = "\
imDatPrb_type=0
imSampRate=30000.0
nSavedChans=385
imAiRangeMax=0.6
imMaxInt=512
~imroTbl=(0,384)(0 0 0 500 250 1)(1 0 0 500 250 1)
~snsGeomMap=(NP1000,1,0,70)(0:27:0:1)
";

/// Write the example session config under `base` and return its path.
pub fn write_config(base: &Path) -> PathBuf {
    write_config_with(base, |_| {})
}

pub fn write_config_with(base: &Path, edit: impl FnOnce(&mut SessionConfig)) -> PathBuf {
    let mut config = SessionConfig::example(base);
    edit(&mut config);
    let path = base.join("config.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

/// Raw folder of one gate: `<base>/Raw_Data/Neural/<animal>/<stem>_g<gate>`.
pub fn raw_run_dir(base: &Path, gate: u8) -> PathBuf {
    base.join("Raw_Data")
        .join("Neural")
        .join(ANIMAL)
        .join(format!("{STEM}_g{gate}"))
}

/// Lay out empty AP files (and optional metadata) for `probes` and `triggers`.
pub fn make_raw_run(base: &Path, gate: u8, probes: &[u32], triggers: &[u32], meta: Option<&str>) {
    let run = format!("{STEM}_g{gate}");
    for &probe in probes {
        let folder = raw_run_dir(base, gate).join(format!("{run}_imec{probe}"));
        std::fs::create_dir_all(&folder).unwrap();
        for &trigger in triggers {
            let stem = format!("{run}_t{trigger}.imec{probe}");
            std::fs::write(folder.join(format!("{stem}.ap.bin")), b"").unwrap();
            if let Some(meta) = meta {
                std::fs::write(folder.join(format!("{stem}.ap.meta")), meta).unwrap();
            }
        }
    }
}

pub fn session(config: &Path, gate_list: &str, probes: &str) -> SessionDescriptor {
    SessionDescriptor {
        uuid: "0001".to_string(),
        file: format!("{ANIMAL}/{STEM}_g0"),
        animal: ANIMAL.to_string(),
        config: config.to_path_buf(),
        processed_directory: PathBuf::from("Processed"),
        which_probes: probes.to_string(),
        gate_list: gate_list.to_string(),
        triggers: "0,0".to_string(),
        imro: vec!["imro_a".to_string(), "imro_b".to_string()],
        regions: vec!["cortex".to_string()],
        task: String::new(),
        modules: ModuleFlags::default(),
        survey: None,
    }
}

/// Records invocations; fails any whose module and input path match a rule.
#[derive(Default)]
pub struct RecordingRunner {
    pub calls: RefCell<Vec<Invocation>>,
    failures: Vec<(String, String)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `module` when its input artifact path contains `needle`.
    pub fn failing(mut self, module: &str, needle: &str) -> Self {
        self.failures.push((module.to_string(), needle.to_string()));
        self
    }

    pub fn modules(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.module.clone()).collect()
    }

    pub fn count(&self, module: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.module == module).count()
    }
}

impl StageRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> Result<StageStatus> {
        self.calls.borrow_mut().push(invocation.clone());
        let input = invocation.input.to_string_lossy();
        let fails = self
            .failures
            .iter()
            .any(|(module, needle)| *module == invocation.module && input.contains(needle.as_str()));
        if fails {
            Ok(StageStatus::Failed("exit status 1".to_string()))
        } else {
            Ok(StageStatus::Success)
        }
    }
}
