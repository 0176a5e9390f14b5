use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use opticam_core::pipeline::config::ReductionConfig;
use opticam_core::sim::SimulationConfig;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum ConfigKind {
    /// Reduction settings
    #[default]
    Reduction,
    /// Synthetic observation settings
    Simulation,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Which configuration to print
    #[arg(value_enum, default_value = "reduction")]
    pub kind: ConfigKind,

    /// Write config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save a full default config as TOML.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let toml_str = match args.kind {
        ConfigKind::Reduction => toml::to_string_pretty(&ReductionConfig::default())?,
        ConfigKind::Simulation => toml::to_string_pretty(&SimulationConfig::default())?,
    };

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        println!("Default config saved to {}", path.display());
    } else {
        print!("{}", toml_str);
    }

    Ok(())
}
