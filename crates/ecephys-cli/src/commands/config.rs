use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use ecephys_core::session::SessionConfig;

#[derive(Args)]
pub struct ConfigArgs {
    /// Write config to a file instead of stdout (TOML when it ends in .toml)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Data root written into the template
    #[arg(long, default_value = "/data")]
    pub base_dir: PathBuf,
}

/// Print or save a filled-in session config.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let config = SessionConfig::example(&args.base_dir);
    let as_toml = args
        .output
        .as_ref()
        .is_some_and(|path| path.extension().is_some_and(|ext| ext == "toml"));
    let text = if as_toml {
        toml::to_string_pretty(&config)?
    } else {
        serde_json::to_string_pretty(&config)? + "\n"
    };

    if let Some(ref path) = args.output {
        std::fs::write(path, &text)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        println!("Template config saved to {}", path.display());
    } else {
        print!("{}", text);
    }

    Ok(())
}
