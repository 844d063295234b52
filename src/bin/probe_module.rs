//! probe_module: load a DSP module the way a host would and exercise it
//!
//! Prints the module's descriptor as JSON, then renders a few blocks at the
//! chosen precision with every input held at its default value and reports
//! the peak and RMS level of each output channel.

use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use ugen_bridge::host::{HostConfig, HostEnvironment, UnitDefinition, install_host_callbacks};
use ugen_bridge::module::registry;
use ugen_bridge::sdk::sine::Sine;
use ugen_bridge::{ModuleResolver, ModuleTable, Sample, StaticLoader};

#[derive(Parser)]
#[command(name = "probe_module")]
#[command(about = "Load a DSP module library and render test blocks")]
#[command(version)]
struct Cli {
    /// Module name (e.g. "sine") or path to a module library
    module: String,

    /// Host configuration file (RON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra directory to search for module libraries (repeatable)
    #[arg(short = 'L', long = "search-path")]
    search_paths: Vec<PathBuf>,

    /// Sample precision used for initialize and perform
    #[arg(short, long, default_value = "64")]
    precision: PrecisionArg,

    /// Number of blocks to render
    #[arg(short = 'n', long, default_value = "16")]
    blocks: usize,

    /// Block size in samples (overrides the config)
    #[arg(short, long)]
    block_size: Option<usize>,

    /// Sample rate in Hz (overrides the config)
    #[arg(short, long)]
    sample_rate: Option<f64>,

    /// Use the sine module linked into this binary instead of a library
    #[arg(long)]
    builtin: bool,

    /// Print the output levels as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PrecisionArg {
    #[value(name = "32")]
    Single,
    #[value(name = "64")]
    Double,
}

#[derive(Debug, Serialize)]
struct ChannelLevel {
    channel: String,
    peak: f64,
    rms: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default(),
    };
    for path in cli.search_paths.iter().rev() {
        config.search_paths.insert(0, path.clone());
    }
    if let Some(block_size) = cli.block_size {
        config.block_size = block_size;
    }
    if let Some(sample_rate) = cli.sample_rate {
        config.sample_rate = sample_rate;
    }
    config.validate()?;

    let definition = if cli.builtin {
        HostEnvironment::set(config.sample_rate, config.block_size);
        install_host_callbacks(registry::global())?;
        let loader = StaticLoader::new().with_module(cli.module.as_str(), ModuleTable::of::<Sine>());
        UnitDefinition::with_resolver(&ModuleResolver::new(loader), &cli.module, &config)
    } else {
        UnitDefinition::load(&config, &cli.module)
    };

    let Some(module) = definition.module() else {
        tracing::warn!("Module '{}' unavailable, units would output silence", cli.module);
        return Ok(());
    };

    println!("{}", serde_json::to_string_pretty(module.descriptor())?);
    if let Some(path) = module.path() {
        tracing::info!("Loaded from {}", path.display());
    }

    let levels = match cli.precision {
        PrecisionArg::Single => render::<f32>(&definition, cli.blocks),
        PrecisionArg::Double => render::<f64>(&definition, cli.blocks),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&levels)?);
    } else {
        for level in &levels {
            println!(
                "{:>12}  peak {:>8.5}  rms {:>8.5}",
                level.channel, level.peak, level.rms
            );
        }
    }

    Ok(())
}

/// Run `blocks` blocks through one unit and measure each output channel
fn render<S: Sample>(definition: &UnitDefinition, blocks: usize) -> Vec<ChannelLevel> {
    let Some(module) = definition.module() else {
        return Vec::new();
    };
    let descriptor = module.descriptor();
    let block_size = definition.block_size();

    let input_buffers: Vec<Vec<S>> = descriptor
        .defaults()
        .into_iter()
        .map(|value| vec![num_traits::cast(value).unwrap_or(S::ZERO); block_size])
        .collect();
    let inputs: Vec<&[S]> = input_buffers.iter().map(Vec::as_slice).collect();

    let mut output_buffers = vec![vec![S::ZERO; block_size]; descriptor.num_outputs()];
    let mut peaks = vec![0.0f64; descriptor.num_outputs()];
    let mut sums = vec![0.0f64; descriptor.num_outputs()];

    let mut unit = definition.construct::<S>(&inputs, descriptor.num_outputs());
    if let Some(err) = unit.failure() {
        tracing::warn!("Unit degraded to silence: {}", err);
    }

    for _ in 0..blocks {
        let mut outputs: Vec<&mut [S]> =
            output_buffers.iter_mut().map(Vec::as_mut_slice).collect();
        unit.process(&inputs, &mut outputs, block_size);

        for (channel, buffer) in output_buffers.iter().enumerate() {
            for sample in buffer {
                let value = sample.to_f64().unwrap_or(0.0);
                peaks[channel] = peaks[channel].max(value.abs());
                sums[channel] += value * value;
            }
        }
    }

    tracing::debug!("Rendered {} block(s) in state {:?}", blocks, unit.state());

    let total = (blocks * block_size).max(1) as f64;
    descriptor
        .outputs
        .iter()
        .zip(peaks.into_iter().zip(sums))
        .map(|(channel, (peak, sum))| ChannelLevel {
            channel: channel.clone(),
            peak,
            rms: (sum / total).sqrt(),
        })
        .collect()
}
