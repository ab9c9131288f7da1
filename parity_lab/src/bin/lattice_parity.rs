use std::{env, path::PathBuf};

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use hyperspace_core::{metrics::checksum, AcceleratorSettings, PARITY_TOLERANCE};
use parity_lab::{
    case_io::{export_case_sets_to_json, import_case_sets_from_json, CaseSet},
    cpu::{generate_lattice_cases, lattice_stress_cases, references, Scalar},
    wgpu_lattice_runner::LatticeRunner,
};

struct CliOptions {
    count: usize,
    seed: u64,
    tolerance: Scalar,
    input_json: Option<PathBuf>,
    export_json: Option<PathBuf>,
    model_path: Option<PathBuf>,
    skip_dispatch: bool,
    allow_software: bool,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let options = parse_options()?;

    let case_sets = if let Some(ref path) = options.input_json {
        println!("Loading parity case sets from {}", path.display());
        import_case_sets_from_json(path)?
    } else {
        println!(
            "Generating parity cases (random count={}, seed=0x{:X})",
            options.count, options.seed
        );
        build_case_sets(options.count, options.seed)
    };

    if let Some(ref path) = options.export_json {
        export_case_sets_to_json(&case_sets, path)?;
        println!(
            "Exported {} case sets ({}) to {}",
            case_sets.len(),
            case_sets
                .iter()
                .map(|set| set.label.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            path.display()
        );
    }

    if options.skip_dispatch {
        for set in &case_sets {
            println!(
                "Set '{}': {} cases, reference checksum {:.6}",
                set.label,
                set.cases.len(),
                checksum(&references(&set.cases))
            );
        }
        println!("Skip-dispatch flag set; exiting after case preparation.");
        return Ok(());
    }

    let settings = AcceleratorSettings {
        requested: true,
        model_path: options.model_path.clone(),
        ..Default::default()
    };
    let runner = LatticeRunner::new(&settings, options.allow_software)?;

    let mut failed = Vec::new();
    for set in &case_sets {
        println!("Running lattice set '{}' ({} cases)", set.label, set.cases.len());
        let report = runner.compare_cases(&set.cases)?;
        println!(
            "  max |sdf| error : {:.3e}\n  mean |sdf| error: {:.3e}",
            report.max_abs_error, report.mean_abs_error
        );
        if !report.within(options.tolerance) {
            if let Some(idx) = report.worst_index {
                let case = &set.cases[idx];
                println!(
                    "  worst case #{idx}: position={:?}, dims={:?}, cpu={}",
                    case.position.to_array(),
                    case.dims,
                    case.reference()
                );
            }
            if report.length_mismatch {
                println!("  output length differs from the {} inputs", set.cases.len());
            }
            failed.push(set.label.clone());
        }
    }

    if !failed.is_empty() {
        bail!(
            "GPU results diverged beyond tolerance {} in: {}",
            options.tolerance,
            failed.join(", ")
        );
    }
    Ok(())
}

fn parse_options() -> Result<CliOptions> {
    let mut opts = CliOptions {
        count: 1024,
        seed: 0xA11CE,
        tolerance: PARITY_TOLERANCE,
        input_json: None,
        export_json: None,
        model_path: None,
        skip_dispatch: false,
        allow_software: false,
    };

    for arg in env::args().skip(1) {
        if let Some(value) = arg.strip_prefix("--count=") {
            opts.count = value.parse().context("invalid --count value")?;
        } else if let Some(value) = arg.strip_prefix("--seed=") {
            opts.seed = parse_seed(value).context("invalid --seed value")?;
        } else if let Some(value) = arg.strip_prefix("--tolerance=") {
            opts.tolerance = value.parse().context("invalid --tolerance value")?;
        } else if let Some(value) = arg.strip_prefix("--cases-json=") {
            opts.input_json = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--export-json=") {
            opts.export_json = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--model=") {
            opts.model_path = Some(PathBuf::from(value));
        } else if arg == "--skip-dispatch" {
            opts.skip_dispatch = true;
        } else if arg == "--allow-software" {
            opts.allow_software = true;
        } else {
            bail!("unrecognized argument: {arg}");
        }
    }

    Ok(opts)
}

fn build_case_sets(count: usize, seed: u64) -> Vec<CaseSet> {
    vec![
        CaseSet::new(
            format!("lattice_random_0x{seed:X}"),
            generate_lattice_cases(count, seed),
        ),
        CaseSet::new("stress_edges", lattice_stress_cases()),
    ]
}

fn parse_seed(value: &str) -> Result<u64> {
    if let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).context("expected hex literal")
    } else {
        value.parse().context("expected integer seed")
    }
}
