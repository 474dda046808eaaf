mod commands;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ecephys", about = "Multi-probe electrophysiology pipeline orchestrator")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every session listed in a sessions file
    Run(commands::run::RunArgs),
    /// Show the site counts derived for a probe type
    Params(commands::params::ParamsArgs),
    /// Show how a gate list is resolved
    Gates(commands::gates::GatesArgs),
    /// Print or save a template session config
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Params(args) => commands::params::run(args),
        Commands::Gates(args) => commands::gates::run(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
