use console::Style;
use ecephys_core::descriptor::Invocation;
use ecephys_core::geometry::{DerivedParameters, GeometrySpec, RadiusParams};
use ecephys_core::pipeline::{AlignmentResult, SessionReport, UnitState};

struct Styles {
    title: Style,
    label: Style,
    value: Style,
    ok: Style,
    failed: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            ok: Style::new().green(),
            failed: Style::new().red().bold(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_session_report(report: &SessionReport) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to(&report.stem));
    println!(
        "  {:<14}{}",
        s.label.apply_to("Units"),
        s.value
            .apply_to(format!("{}/{} done", report.done_count(), report.outcomes.len()))
    );
    for outcome in &report.outcomes {
        let state = match outcome.state {
            UnitState::Done => s.ok.apply_to(outcome.state.to_string()),
            _ => s.failed.apply_to(outcome.state.to_string()),
        };
        println!("    {:<24}{}", outcome.id, state);
        if let Some(ref error) = outcome.error {
            println!("    {:<24}{}", "", s.label.apply_to(error));
        }
    }

    let alignment = match &report.alignment {
        AlignmentResult::Done { .. } => s.ok.apply_to(report.alignment.to_string()),
        AlignmentResult::Disabled => s.disabled.apply_to(report.alignment.to_string()),
        _ => s.failed.apply_to(report.alignment.to_string()),
    };
    println!("  {:<14}{}", s.label.apply_to("Alignment"), alignment);
    println!(
        "  {:<14}{}",
        s.label.apply_to("Run log"),
        s.path.apply_to(report.run_log.display())
    );
    println!();
}

pub fn print_derived_params(
    probe_type: &str,
    spec: &GeometrySpec,
    radii: &RadiusParams,
    derived: &DerivedParameters,
) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to(format!("Probe {probe_type}")));
    println!(
        "  {:<20}{}",
        s.label.apply_to("Pitch (v/h)"),
        s.value.apply_to(format!(
            "{} / {} um, {} columns",
            spec.vertical_pitch_um, spec.horizontal_pitch_um, spec.columns
        ))
    );
    let rows = [
        ("CAR inner", radii.car_inner_um, derived.car_inner_sites),
        ("CAR outer", radii.car_outer_um, derived.car_outer_sites),
        ("Whitening range", radii.whitening_radius_um, derived.whitening_range),
        ("Neighbors", radii.template_radius_um, derived.neighbor_sites),
        ("SNR radius", radii.snr_radius_um, derived.snr_radius_sites),
    ];
    for (label, radius, sites) in rows {
        println!(
            "  {:<20}{} {}",
            s.label.apply_to(label),
            s.value.apply_to(format!("{sites:>4} sites")),
            s.label.apply_to(format!("({radius} um)"))
        );
    }
    if let Some(fixed) = radii.neighbor_sites_override {
        println!(
            "  {:<20}{}",
            s.label.apply_to("Neighbor override"),
            s.disabled.apply_to(fixed)
        );
    }
    println!();
}

pub fn print_dry_run(invocations: &[Invocation]) {
    let s = Styles::new();

    println!("  {}", s.title.apply_to("Dry run"));
    for invocation in invocations {
        println!(
            "    {:<26}{}",
            s.value.apply_to(&invocation.module),
            s.path.apply_to(invocation.input.display())
        );
    }
    println!(
        "  {:<14}{}",
        s.label.apply_to("Invocations"),
        s.value.apply_to(invocations.len())
    );
}
