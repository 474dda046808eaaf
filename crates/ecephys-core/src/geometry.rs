//! Probe geometry lookup and site-count derivation.
//!
//! Sorter and preprocessing parameters are specified by the user as physical
//! radii (µm). The tools themselves want site counts, which depend on the
//! site pitch and column layout of each probe type.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consts::{MAX_NEIGHBOR_SITES, MAX_WHITENING_SITES};
use crate::error::{PipelineError, Result};

/// Site layout constants for one probe type.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometrySpec {
    /// Vertical distance between site rows (µm).
    pub vertical_pitch_um: f64,
    /// Horizontal distance between site columns (µm).
    pub horizontal_pitch_um: f64,
    /// Number of site columns.
    pub columns: u32,
}

impl GeometrySpec {
    pub const fn new(vertical_pitch_um: f64, horizontal_pitch_um: f64, columns: u32) -> Self {
        Self {
            vertical_pitch_um,
            horizontal_pitch_um,
            columns,
        }
    }
}

/// Read-only probe-type → geometry table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeometryTable {
    entries: BTreeMap<String, GeometrySpec>,
}

impl Default for GeometryTable {
    fn default() -> Self {
        let entries = [
            ("3A", GeometrySpec::new(20.0, 32.0, 2)),
            ("NP1", GeometrySpec::new(20.0, 32.0, 2)),
            ("NP21", GeometrySpec::new(15.0, 32.0, 2)),
            ("NP24", GeometrySpec::new(15.0, 32.0, 2)),
            ("NP1100", GeometrySpec::new(6.0, 6.0, 8)),
            ("NP1300", GeometrySpec::new(20.0, 48.0, 2)),
            ("NP2013", GeometrySpec::new(15.0, 32.0, 2)),
        ]
        .into_iter()
        .map(|(name, spec)| (name.to_string(), spec))
        .collect();
        Self { entries }
    }
}

impl GeometryTable {
    pub fn from_entries(entries: impl IntoIterator<Item = (String, GeometrySpec)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Load a table from a TOML file of `[PROBE_TYPE]` sections.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn get(&self, probe_type: &str) -> Result<&GeometrySpec> {
        self.entries
            .get(probe_type)
            .ok_or_else(|| PipelineError::UnknownProbeType(probe_type.to_string()))
    }

    pub fn probe_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Physical radii the site counts are derived from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RadiusParams {
    pub whitening_radius_um: f64,
    pub template_radius_um: f64,
    /// Inner local-CAR radius. Must not exceed `car_outer_um`.
    pub car_inner_um: f64,
    pub car_outer_um: f64,
    pub snr_radius_um: f64,
    /// Forces the template neighbor count for non-standard site patterns.
    #[serde(default)]
    pub neighbor_sites_override: Option<u32>,
}

impl Default for RadiusParams {
    fn default() -> Self {
        Self {
            whitening_radius_um: 163.0,
            template_radius_um: 163.0,
            car_inner_um: 40.0,
            car_outer_um: 160.0,
            snr_radius_um: 160.0,
            neighbor_sites_override: None,
        }
    }
}

/// Site counts handed to the preprocessing and sorting stages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedParameters {
    pub car_inner_sites: u32,
    pub car_outer_sites: u32,
    pub whitening_range: u32,
    pub neighbor_sites: u32,
    pub snr_radius_sites: u32,
}

/// Derive every site count for `probe_type`.
///
/// For a 1.0 probe a 163 µm radius covers 32 sites.
pub fn derive_site_counts(
    probe_type: &str,
    table: &GeometryTable,
    radii: &RadiusParams,
) -> Result<DerivedParameters> {
    let geometry = table.get(probe_type)?;

    let car_inner_sites = radius_to_rows(radii.car_inner_um, geometry);
    let car_outer_sites = radius_to_rows(radii.car_outer_um, geometry);

    let whitening_range =
        sites_within_radius(radii.whitening_radius_um, geometry)?.min(MAX_WHITENING_SITES);

    let neighbor_sites = match radii.neighbor_sites_override {
        Some(fixed) if fixed > 0 => fixed,
        _ => sites_within_radius(radii.template_radius_um, geometry)?,
    }
    .min(MAX_NEIGHBOR_SITES);

    let snr_radius_sites = radius_to_rows(radii.snr_radius_um, geometry);

    Ok(DerivedParameters {
        car_inner_sites,
        car_outer_sites,
        whitening_range,
        neighbor_sites,
        snr_radius_sites,
    })
}

/// Number of site rows spanned by `radius_um`.
fn radius_to_rows(radius_um: f64, geometry: &GeometrySpec) -> u32 {
    round_to_sites(radius_um / geometry.vertical_pitch_um)
}

/// Sites inside a disc of `radius_um`, counting both sides of the center row
/// across all columns.
fn sites_within_radius(radius_um: f64, geometry: &GeometrySpec) -> Result<u32> {
    let radicand = radius_um.powi(2) - geometry.horizontal_pitch_um.powi(2);
    if radicand < 0.0 {
        return Err(PipelineError::NegativeRadicand {
            radius_um,
            horizontal_pitch_um: geometry.horizontal_pitch_um,
        });
    }
    let rows = radicand.sqrt() / geometry.vertical_pitch_um;
    Ok(round_to_sites(2.0 * rows * geometry.columns as f64))
}

/// Half-to-even rounding, saturating at zero for non-finite or negative input.
fn round_to_sites(value: f64) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    value.round_ties_even().min(u32::MAX as f64) as u32
}
