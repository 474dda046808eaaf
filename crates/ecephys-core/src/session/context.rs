use std::collections::BTreeMap;

use tracing::info;

use crate::error::{PipelineError, Result};
use crate::gates::resolve_trigger_range;
use crate::meta::{read_ephys_params, EphysParams};

use super::config::SessionConfig;
use super::descriptor::SessionDescriptor;
use super::layout::SessionLayout;

/// Everything resolved about a session before any descriptor is built.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub config: SessionConfig,
    pub session: SessionDescriptor,
    pub layout: SessionLayout,
    /// Selected probes in processing order.
    pub probes: Vec<u32>,
    pub first_trigger: u32,
    pub last_trigger: u32,
    ephys: BTreeMap<u32, EphysParams>,
}

impl SessionContext {
    /// Bind `session` to its directories, gates, triggers and per-probe
    /// acquisition parameters.
    pub fn resolve(config: SessionConfig, session: SessionDescriptor) -> Result<Self> {
        let layout = SessionLayout::resolve(&config, &session)?;
        let probes = session.probes()?;
        let Some(&first_probe) = probes.first() else {
            return Err(PipelineError::InvalidSession("no probes selected".into()));
        };

        // Survey runs keep every probe's triggers in the run folder itself.
        let trigger_folder = if session.survey.is_some() {
            layout.raw_run_dir()
        } else {
            layout.raw_probe_folder(first_probe)
        };
        let (first_trigger, last_trigger) = resolve_trigger_range(
            &session.triggers,
            &trigger_folder,
            &layout.stem,
            layout.gates.first(),
        )?;

        let mut ephys = BTreeMap::new();
        for &probe in &probes {
            let meta = layout.raw_meta_file(probe, first_trigger);
            ephys.insert(probe, read_ephys_params(&meta)?);
        }

        info!(
            stem = %layout.stem,
            gates = %layout.gates,
            triggers = %format!("{first_trigger},{last_trigger}"),
            probes = ?probes,
            "Resolved session"
        );

        Ok(Self {
            config,
            session,
            layout,
            probes,
            first_trigger,
            last_trigger,
            ephys,
        })
    }

    pub fn ephys_for(&self, probe: u32) -> Result<&EphysParams> {
        self.ephys
            .get(&probe)
            .ok_or_else(|| PipelineError::InvalidSession(format!("probe {probe} not selected")))
    }

    /// Position of `probe` in the selection (0 for the first probe).
    pub fn probe_position(&self, probe: u32) -> Option<usize> {
        self.probes.iter().position(|&p| p == probe)
    }

    pub fn trigger_string(&self) -> String {
        format!("{},{}", self.first_trigger, self.last_trigger)
    }
}
