//! Command-line fly-through driver for the hyperspace lattice SDF engine.
//!
//! Reads a batch of positions, evaluates it for one or more frames while the
//! lattice periods drift by `dim_step_size`, and prints one JSON response per
//! frame.

use std::{env, fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use hyperspace_core::{BatchEvaluator, DimsPair, EngineSettings, SdfRequest, SdfResponse};
use tracer::init_tracing;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "config.json";

struct CliOptions {
    config: PathBuf,
    request: Option<PathBuf>,
    positions: Vec<[f32; 3]>,
    dims: Option<[f32; 2]>,
    frames: u32,
    status: bool,
}

fn main() -> Result<()> {
    init_tracing();

    let options = parse_options(env::args().skip(1))?;
    let settings = EngineSettings::load_or_default(&options.config);
    let evaluator = hyperspace_gpu::evaluator(&settings.accelerator_settings());
    info!(
        capability = ?evaluator.capability(),
        backend = evaluator.backend_label(),
        "evaluator ready"
    );

    if options.status && options.request.is_none() && options.dims.is_none() {
        println!("{}", serde_json::to_string(&evaluator.status())?);
        return Ok(());
    }

    let request = build_request(&options)?;
    for response in fly_through(&evaluator, &request, options.frames, settings.dim_step_size)? {
        println!("{}", serde_json::to_string(&response)?);
    }

    if options.status {
        println!("{}", serde_json::to_string(&evaluator.status())?);
    }
    Ok(())
}

fn parse_options<I>(args: I) -> Result<CliOptions>
where
    I: IntoIterator<Item = String>,
{
    let mut opts = CliOptions {
        config: PathBuf::from(DEFAULT_CONFIG_PATH),
        request: None,
        positions: Vec::new(),
        dims: None,
        frames: 1,
        status: false,
    };

    for arg in args {
        if let Some(value) = arg.strip_prefix("--config=") {
            opts.config = PathBuf::from(value);
        } else if let Some(value) = arg.strip_prefix("--request=") {
            opts.request = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--positions=") {
            opts.positions = parse_positions(value).context("invalid --positions value")?;
        } else if let Some(value) = arg.strip_prefix("--dims=") {
            opts.dims = Some(parse_dims(value).context("invalid --dims value")?);
        } else if let Some(value) = arg.strip_prefix("--frames=") {
            opts.frames = value.parse().context("invalid --frames value")?;
        } else if arg == "--status" {
            opts.status = true;
        } else {
            bail!("unrecognized argument: {arg}");
        }
    }

    if opts.frames == 0 {
        bail!("--frames must be at least 1");
    }
    Ok(opts)
}

fn build_request(options: &CliOptions) -> Result<SdfRequest> {
    if let Some(ref path) = options.request {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read request {}", path.display()))?;
        return serde_json::from_str(&text)
            .with_context(|| format!("invalid request JSON in {}", path.display()));
    }
    let Some(dims) = options.dims else {
        bail!("either --request=PATH or --dims=a,b is required");
    };
    Ok(SdfRequest {
        positions: options.positions.clone(),
        dims,
    })
}

/// Evaluates `frames` frames, advancing both periods by `step` after each one.
fn fly_through(
    evaluator: &BatchEvaluator,
    request: &SdfRequest,
    frames: u32,
    step: f32,
) -> Result<Vec<SdfResponse>> {
    let mut dims = DimsPair::new(request.dims).context("rejected lattice periods")?;
    let mut responses = Vec::with_capacity(frames as usize);
    for frame in 0..frames {
        if frame > 0 {
            dims = dims
                .advanced(step)
                .with_context(|| format!("lattice periods degenerate at frame {frame}"))?;
        }
        let sdf_values = evaluator.evaluate_validated(&request.positions, dims);
        responses.push(SdfResponse { sdf_values });
    }
    Ok(responses)
}

fn parse_positions(value: &str) -> Result<Vec<[f32; 3]>> {
    value
        .split(';')
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| {
            let parts = parse_floats(chunk)?;
            match parts.as_slice() {
                [x, y, z] => Ok([*x, *y, *z]),
                _ => bail!("expected x,y,z, found '{chunk}'"),
            }
        })
        .collect()
}

fn parse_dims(value: &str) -> Result<[f32; 2]> {
    match parse_floats(value)?.as_slice() {
        [a, b] => Ok([*a, *b]),
        _ => bail!("expected two comma-separated periods, found '{value}'"),
    }
}

fn parse_floats(value: &str) -> Result<Vec<f32>> {
    value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("invalid number '{part}'"))
        })
        .collect()
}

mod tracer {
    use tracing_subscriber::EnvFilter;

    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }
}
