use anyhow::Result;
use clap::Args;
use ecephys_core::gates::resolve_gates;

#[derive(Args)]
pub struct GatesArgs {
    /// Gate list, e.g. "0,1,3" or "0213"
    pub gate_list: String,
}

pub fn run(args: &GatesArgs) -> Result<()> {
    let gates = resolve_gates(&args.gate_list)?;

    println!("Gates:       {gates}");
    println!("Range:       {}", gates.legacy_range());
    println!("Directive:   -gtlist={}", gates.concat_directive());

    Ok(())
}
