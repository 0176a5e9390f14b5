use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use opticam_core::differential::{differential, RelativeLightCurve};
use opticam_core::frame::{CameraId, SourceId};
use opticam_core::pipeline::config::{PhotometryMethod, ReductionConfig};
use opticam_core::pipeline::{reduce, CancelToken, ReductionOutput};
use opticam_core::sim::{simulate, SimulationConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::progress::BarReporter;
use crate::summary::{print_config_summary, print_differential, print_run_summary};

#[derive(Args)]
pub struct SimulateArgs {
    /// Reduction config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Synthetic observation config file (TOML)
    #[arg(long)]
    pub scene: Option<PathBuf>,

    /// Override the simulation seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the number of science frames per camera
    #[arg(long)]
    pub frames: Option<usize>,

    /// Worker threads (0 = all cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Measure with PSF fitting of this radius instead of apertures
    #[arg(long)]
    pub psf: Option<f64>,

    /// Camera for differential photometry
    #[arg(long, default_value = "1")]
    pub camera: u8,

    /// Target source id for differential photometry
    #[arg(long, requires = "comparison")]
    pub target: Option<u32>,

    /// Comparison source ids for differential photometry
    #[arg(long, value_delimiter = ',')]
    pub comparison: Vec<u32>,

    /// Write the reduction output as JSON
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    reduction: &'a ReductionOutput,
    differential: Option<&'a RelativeLightCurve>,
}

fn load_toml<T: DeserializeOwned + Default>(path: Option<&Path>, what: &str) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {what} config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("Invalid {what} config {}", path.display()))
}

pub fn run(args: &SimulateArgs) -> Result<()> {
    let mut scene: SimulationConfig = load_toml(args.scene.as_deref(), "simulation")?;
    if let Some(seed) = args.seed {
        scene.seed = seed;
    }
    if let Some(frames) = args.frames {
        scene.science_frames = frames;
    }

    let mut config: ReductionConfig = load_toml(args.config.as_deref(), "reduction")?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(fit_radius) = args.psf {
        config.photometry.method = PhotometryMethod::Psf { fit_radius };
    }
    config.validate().context("Invalid reduction config")?;

    let synthetic = simulate(&scene).context("Failed to generate synthetic observation")?;
    let observation = &synthetic.observation;
    print_config_summary(&config, observation.cameras.len(), observation.science_frame_count());

    let reporter = Arc::new(BarReporter::new());
    let output = reduce(observation, &config, &CancelToken::new(), reporter)
        .context("Reduction failed")?;
    print_run_summary(&output);

    let relative = match args.target {
        Some(target) => {
            let camera = CameraId(args.camera);
            let Some(target_curve) = output.light_curve(camera, SourceId(target)) else {
                bail!("No light curve for {camera} S{target}");
            };
            let comparisons = args
                .comparison
                .iter()
                .map(|&id| {
                    output
                        .light_curve(camera, SourceId(id))
                        .with_context(|| format!("No light curve for {camera} S{id}"))
                })
                .collect::<Result<Vec<_>>>()?;
            let curve = differential(target_curve, &comparisons)?;
            print_differential(&curve);
            Some(curve)
        }
        None => None,
    };

    if let Some(ref path) = args.output {
        let json = serde_json::to_string_pretty(&JsonOutput {
            reduction: &output,
            differential: relative.as_ref(),
        })?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write output to {}", path.display()))?;
        println!("Output saved to {}", path.display());
    }

    Ok(())
}
