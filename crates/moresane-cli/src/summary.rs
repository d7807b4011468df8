use console::Style;

use moresane_core::deconv::DeconvConfig;

use crate::commands::run::RunArgs;

struct Styles {
    title: Style,
    label: Style,
    value: Style,
    method: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_run_summary(config: &DeconvConfig, args: &RunArgs) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("MORESANE Deconvolution"));
    println!("  {}", s.title.apply_to("\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}"));
    println!();

    println!(
        "  {:<16}{}",
        s.label.apply_to("Dirty map"),
        s.path.apply_to(args.dirty.display())
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("PSF"),
        s.path.apply_to(args.psf.display())
    );
    if let Some(mask) = &args.mask {
        println!(
            "  {:<16}{}",
            s.label.apply_to("Mask"),
            s.path.apply_to(mask.display())
        );
    }
    println!();

    let run_mode = if args.single_run {
        "single run".to_string()
    } else {
        format!("by scale ({}..{})", args.start_scale, args.stop_scale)
    };
    println!("  {:<16}{}", s.label.apply_to("Mode"), s.method.apply_to(run_mode));
    println!(
        "  {:<16}{} / {}",
        s.label.apply_to("Backends"),
        s.method.apply_to(config.conv_mode),
        s.method.apply_to(config.decom_mode)
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Sigma level"),
        s.value.apply_to(config.sigma_level)
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Loop gain"),
        s.value.apply_to(config.loop_gain)
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Tolerance"),
        s.value.apply_to(config.tolerance)
    );
    println!(
        "  {:<16}{} major / {} minor",
        s.label.apply_to("Iteration caps"),
        s.value.apply_to(config.major_loop_miter),
        s.value.apply_to(config.minor_loop_miter)
    );
    if config.enforce_positivity {
        println!(
            "  {:<16}{}",
            s.label.apply_to("Positivity"),
            s.method.apply_to("enforced")
        );
    }
    if config.edge_suppression || config.edge_offset > 0 {
        println!(
            "  {:<16}{} (offset {})",
            s.label.apply_to("Edge handling"),
            s.method.apply_to("suppressed"),
            s.value.apply_to(config.edge_offset)
        );
    }
    println!();
}
