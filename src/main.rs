use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use tracing::info;

use deepred::config::DeepRedConfig;
use deepred::{data, results};

/// Extracts a rule graph from recorded network activations.
#[derive(Debug, Parser)]
#[command(name = "deepred")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON file holding every layer: {"layers": [[[..], ..], ..]}, input first.
    #[arg(long, conflicts_with = "layer", required_unless_present = "layer")]
    activations: Option<PathBuf>,

    /// Headerless CSV file of one layer. Repeat in order, input first and output last.
    #[arg(long)]
    layer: Vec<PathBuf>,

    /// JSON run configuration. Defaults are used for missing keys.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured verbosity (0-3).
    #[arg(short, long)]
    verbose: Option<u8>,

    /// Overrides the configured output directory.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Keep the graph of every step and every sub-tree table in the diagnostics.
    #[arg(long)]
    save_process: bool,

    /// Start from the output-unit decision list instead of a fitted tree.
    #[arg(long)]
    no_build_first: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DeepRedConfig::from_json_file(path)?,
        None => DeepRedConfig::default(),
    };
    if let Some(verbose) = cli.verbose {
        config.verbose = verbose;
    }
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    config.save_process |= cli.save_process;
    config.build_first &= !cli.no_build_first;
    config.validate()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level())
        .with_target(false)
        .init();

    let layers = match &cli.activations {
        Some(path) => data::load_activations_json(path)?,
        None => data::load_layers_csv(&cli.layer)?,
    };
    info!(
        layers = layers.len(),
        samples = layers.first().map_or(0, |l| l.nrows()),
        "activations loaded"
    );

    let start = Instant::now();
    let extraction = deepred::deepred(&layers, &config)?;
    info!("extraction finished in {:.3}s", start.elapsed().as_secs_f64());

    results::write_run(&extraction, &config.output_dir)?;
    results::print_summary_table(&extraction);
    Ok(())
}
