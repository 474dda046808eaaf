use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::session::SessionContext;

/// One (probe, shank, bank) combination to sort.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProcessingUnit {
    pub probe: u32,
    /// Position of the probe in the session's probe selection.
    pub position: usize,
    pub shank: u32,
    pub bank: u32,
    /// Part of a probe survey; shank and bank are meaningful.
    pub survey: bool,
}

impl ProcessingUnit {
    pub fn standard(probe: u32, position: usize) -> Self {
        Self {
            probe,
            position,
            shank: 0,
            bank: 0,
            survey: false,
        }
    }

    /// `imec<p>` or, in a survey, `imec<p>shank<s>bank<b>`.
    pub fn id(&self) -> String {
        if self.survey {
            format!("imec{}shank{}bank{}", self.probe, self.shank, self.bank)
        } else {
            format!("imec{}", self.probe)
        }
    }

    /// Sorter output directory name, unique per unit within a session.
    pub fn output_dir_name(&self) -> String {
        format!("{}_ks", self.id())
    }

    pub fn session_id(&self, stem: &str) -> String {
        format!("{stem}_{}", self.id())
    }
}

/// Units of a session in processing order: probes in selection order, then
/// shank-major, bank-minor for survey sessions.
pub fn enumerate_units(ctx: &SessionContext) -> Result<Vec<ProcessingUnit>> {
    let Some(survey) = &ctx.session.survey else {
        return Ok(ctx
            .probes
            .iter()
            .enumerate()
            .map(|(position, &probe)| ProcessingUnit::standard(probe, position))
            .collect());
    };

    if survey.shanks == 0 || survey.banks == 0 {
        return Err(PipelineError::InvalidSession(format!(
            "survey layout {}x{} has no segments",
            survey.shanks, survey.banks
        )));
    }
    let segments = survey.segment_count()?;
    if survey.time_ranges.len() != segments {
        return Err(PipelineError::InvalidSession(format!(
            "survey declares {segments} segments but {} time ranges",
            survey.time_ranges.len()
        )));
    }

    let mut units = Vec::with_capacity(ctx.probes.len() * segments);
    for (position, &probe) in ctx.probes.iter().enumerate() {
        for shank in 0..survey.shanks {
            for bank in 0..survey.banks {
                units.push(ProcessingUnit {
                    probe,
                    position,
                    shank,
                    bank,
                    survey: true,
                });
            }
        }
    }
    debug!(units = units.len(), "Enumerated survey units");
    Ok(units)
}
