use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use ecephys_core::geometry::{derive_site_counts, GeometryTable, RadiusParams};
use ecephys_core::session::SessionConfig;

use crate::summary::print_derived_params;

#[derive(Args)]
pub struct ParamsArgs {
    /// Probe type, e.g. NP1, NP21, NP1100
    #[arg(long, default_value = "NP1")]
    pub probe_type: String,

    /// Session config to take the radii from; built-in radii otherwise
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Geometry table (TOML) replacing the built-in one
    #[arg(long)]
    pub geometry: Option<PathBuf>,
}

pub fn run(args: &ParamsArgs) -> Result<()> {
    let table = load_geometry(args.geometry.as_ref())?;
    let radii = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load session config {}", path.display()))?
            .radius_params(),
        None => RadiusParams::default(),
    };

    let spec = table.get(&args.probe_type)?;
    let derived = derive_site_counts(&args.probe_type, &table, &radii)?;
    print_derived_params(&args.probe_type, spec, &radii, &derived);

    Ok(())
}

pub fn load_geometry(path: Option<&PathBuf>) -> Result<GeometryTable> {
    match path {
        Some(path) => GeometryTable::load(path)
            .with_context(|| format!("Failed to load geometry table {}", path.display())),
        None => Ok(GeometryTable::default()),
    }
}
