//! lendscore — command-line front end for the wallet credit-scoring pipeline.
//!
//! `score` rates every wallet in a ledger with the committed artifacts and is
//! the default when no subcommand is given; `retrain` fits new artifacts,
//! commits them and rates the training wallets.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use lendscore_core::types::CreditScore;
use lendscore_features::RawRecord;
use lendscore_pipeline::{
    load_ledger, write_csv, write_explain_json, FsArtifactStore, Pipeline, PipelineConfig,
    PipelineOutcome, PipelineRequest, RetrainRequest, ScoreOutcome, ScoreRequest, ScoreSummary,
};

/// Credit scores for DeFi lending wallets.
#[derive(Parser, Debug)]
#[command(
    name = "lendscore",
    version,
    about = "Credit scores for DeFi lending wallets",
    subcommand_negates_reqs = true
)]
struct Cli {
    /// TOML configuration file (LENDSCORE__* environment variables override it).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Artifact store directory (overrides the configured one).
    #[arg(long, global = true)]
    artifact_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Arguments of the default `score` command.
    #[command(flatten)]
    score: ScoreArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score every wallet in a ledger with the committed artifacts.
    Score(ScoreArgs),
    /// Fit and commit new artifacts, then score the training wallets.
    Retrain(RetrainArgs),
}

#[derive(Args, Debug)]
struct ScoreArgs {
    /// JSON ledger (array of transaction records).
    #[arg(short, long, required = true)]
    input: Option<PathBuf>,

    /// CSV report path (default: stdout).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write a JSON report with bands and per-feature attributions.
    #[arg(long)]
    explain: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RetrainArgs {
    /// JSON ledger of existing training data.
    #[arg(short, long)]
    input: PathBuf,

    /// Additional JSON ledgers merged into the training data.
    #[arg(long)]
    extra: Vec<PathBuf>,

    /// CSV report of the training wallets' new scores (default: stdout).
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format);

    let mut config =
        PipelineConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(dir) = cli.artifact_dir {
        config.artifact_dir = dir;
    }
    info!("lendscore v{}", env!("CARGO_PKG_VERSION"));
    info!("artifact_dir: {:?}", config.artifact_dir);

    let pipeline = Pipeline::from_config(config);
    match cli.command.unwrap_or(Commands::Score(cli.score)) {
        Commands::Score(args) => score(&pipeline, args),
        Commands::Retrain(args) => retrain(&pipeline, args),
    }
}

fn score(pipeline: &Pipeline<FsArtifactStore>, args: ScoreArgs) -> Result<()> {
    let input = args.input.context("--input is required")?;
    let records = read_ledger(&input)?;
    let outcome = pipeline
        .run(PipelineRequest::Score(ScoreRequest {
            records,
            explain: args.explain.is_some(),
        }))
        .context("Scoring failed")?;
    let PipelineOutcome::Scored(outcome) = outcome else {
        anyhow::bail!("Pipeline returned a retrain outcome for a score request");
    };

    report(&outcome, args.output.as_deref())?;
    if let Some(path) = &args.explain {
        let file = create(path)?;
        write_explain_json(BufWriter::new(file), &outcome.scores)
            .with_context(|| format!("Failed to write explain report: {}", path.display()))?;
        info!("explain report written to {}", path.display());
    }
    Ok(())
}

fn retrain(pipeline: &Pipeline<FsArtifactStore>, args: RetrainArgs) -> Result<()> {
    let records = read_ledger(&args.input)?;
    let mut additional = Vec::new();
    for path in &args.extra {
        additional.extend(read_ledger(path)?);
    }

    let outcome = pipeline
        .run(PipelineRequest::Retrain(RetrainRequest {
            records,
            additional,
        }))
        .context("Retraining failed")?;
    let PipelineOutcome::Retrained(outcome) = outcome else {
        anyhow::bail!("Pipeline returned a score outcome for a retrain request");
    };
    info!(
        version = %outcome.version,
        training_wallets = outcome.training_wallets,
        "new artifacts are live"
    );
    pipeline.prune_artifacts();

    report(&outcome.scores, args.output.as_deref())
}

fn read_ledger(path: &Path) -> Result<Vec<RawRecord>> {
    load_ledger(path).with_context(|| format!("Failed to read ledger: {}", path.display()))
}

/// Log the run's tallies and summary, then write the CSV report.
fn report(outcome: &ScoreOutcome, output: Option<&Path>) -> Result<()> {
    info!(
        accepted = outcome.accepted,
        rejected = outcome.rejected,
        skipped = outcome.skipped.len(),
        "run complete"
    );
    for (kind, count) in &outcome.rejections {
        info!(kind, count, "rejected records");
    }
    if let Some(summary) = ScoreSummary::from_scores(&outcome.scores) {
        summary.log();
    }
    write_scores(&outcome.scores, output)
}

fn write_scores(scores: &[CreditScore], output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let file = create(path)?;
            write_csv(BufWriter::new(file), scores)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            info!("{} scores written to {}", scores.len(), path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            write_csv(&mut lock, scores).context("Failed to write report to stdout")?;
            lock.flush()?;
        }
    }
    Ok(())
}

fn create(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    File::create(path).with_context(|| format!("Failed to create file: {}", path.display()))
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Logs go to stderr so the CSV report can be piped from stdout. Pass
/// `format = "json"` for structured JSON output; any other value gives
/// human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_level(true),
            )
            .init();
    }
}
