use clap::Parser;
use cv_select::{pipeline, BoxError, Config};
use std::path::PathBuf;
use tracing::{debug, info, instrument};

#[derive(Parser, Debug)]
#[command(name = "cv_select")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cross-validated regression model selection")]
struct Cli {
    /// TOML run configuration
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Overrides `output_dir` from the config
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

#[instrument]
fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }

    let level = if cli.verbose || config.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();
    debug!(?config, "Config loaded successfully");

    let report = pipeline::run(&config)?;
    let written = report.write(&config.output_dir)?;

    info!(
        family = %report.promotion.family,
        params = %report.evaluation.params,
        metric = %report.evaluation.metric,
        holdout = report.evaluation.metric_value,
        beats_baseline = report.promotion.beats_baseline,
        files = written.len(),
        "Model selection complete"
    );
    Ok(())
}
