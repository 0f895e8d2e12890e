use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use farm_baseline::batch::{BatchOptions, BatchProcessor, BatchSummary};
use farm_baseline::farm::FarmLoader;
use farm_baseline::invoker::ComputationInvoker;
use farm_baseline::report::{FarmReport, ReportWriter, DEFAULT_OUTPUT_DIR};
use farm_baseline::{
    cancellation, AnalysisOptions, AnalysisSelection, BaselineConfig, BaselineEngine,
    BaselineError, CancelToken, ComputationKind, EstimationMethod, FarmAnalysis,
};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "farm-baseline", version, about = "Farm NDVI, EUDR deforestation and carbon baselines")]
struct Cli {
    /// Only log errors.
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log progress.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyse one farm file.
    Analyze(AnalyzeArgs),
    /// Analyse every farm file in a directory.
    Batch(BatchArgs),
    /// Check the external computation is provisioned.
    CheckEnv,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("only").args(["ndvi_only", "deforestation_only", "carbon_only"])))]
struct AnalyzeArgs {
    /// Farm JSON/GeoJSON file.
    file: PathBuf,

    #[arg(long)]
    ndvi_only: bool,

    #[arg(long)]
    deforestation_only: bool,

    #[arg(long)]
    carbon_only: bool,

    #[command(flatten)]
    window: WindowArgs,

    /// Report path (default: data/farms/output/<stem>_analysis.json).
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct BatchArgs {
    /// Directory holding farm files.
    input_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Default: <output-dir>/summary.csv
    #[arg(long)]
    summary_csv: Option<PathBuf>,

    /// Default: <output-dir>/summary.json
    #[arg(long)]
    summary_json: Option<PathBuf>,

    #[command(flatten)]
    window: WindowArgs,

    /// Keep going after a farm fails.
    #[arg(long)]
    continue_on_error: bool,
}

#[derive(Debug, Args)]
struct WindowArgs {
    /// NDVI window start (YYYY-MM-DD).
    #[arg(long)]
    start_date: Option<String>,

    /// NDVI window end (YYYY-MM-DD).
    #[arg(long)]
    end_date: Option<String>,

    /// Carbon method: satellite, field or hybrid.
    #[arg(long)]
    method: Option<EstimationMethod>,
}

impl WindowArgs {
    fn options(&self, selection: AnalysisSelection) -> AnalysisOptions {
        AnalysisOptions {
            selection,
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            method: self.method,
        }
    }
}

impl AnalyzeArgs {
    fn selection(&self) -> AnalysisSelection {
        if self.ndvi_only {
            AnalysisSelection::NdviOnly
        } else if self.deforestation_only {
            AnalysisSelection::DeforestationOnly
        } else if self.carbon_only {
            AnalysisSelection::CarbonOnly
        } else {
            AnalysisSelection::All
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let config = BaselineConfig::load().context("failed to load configuration")?;

    match cli.command {
        Command::Analyze(args) => analyze(config, args).await,
        Command::Batch(args) => batch(config, args).await,
        Command::CheckEnv => check_env(config),
    }
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "info"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("FARM_BASELINE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

/// Ctrl-C cancels in-flight computations instead of waiting for timeouts.
fn cancel_on_ctrl_c() -> CancelToken {
    let (handle, token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            handle.cancel();
        }
    });
    token
}

async fn analyze(config: BaselineConfig, args: AnalyzeArgs) -> anyhow::Result<()> {
    let farm = FarmLoader::load(&args.file)
        .with_context(|| format!("failed to load farm from {}", args.file.display()))?;
    let engine = BaselineEngine::from_config(config);
    let options = args.window.options(args.selection());

    println!("Farm: {} ({})", farm.name, farm.farm_id);
    println!("Area: {:.2} ha", farm.boundary.area_hectares());

    let cancel = cancel_on_ctrl_c();
    let analysis = engine.analyze_farm(&farm, &options, &cancel).await;
    print_analysis(&analysis);

    let output = args.output.unwrap_or_else(|| {
        ReportWriter::report_path(Path::new(DEFAULT_OUTPUT_DIR), &args.file)
    });
    let report = FarmReport::new(&farm, analysis);
    ReportWriter::write_json(&output, &report)
        .with_context(|| format!("failed to write report to {}", output.display()))?;
    println!("Report saved to {}", output.display());

    Ok(())
}

fn print_analysis(analysis: &FarmAnalysis) {
    if let Some(ndvi) = analysis.ndvi.as_ref().and_then(|o| o.completed()) {
        println!(
            "NDVI: mean {:.3}, median {:.3}, range {:.3} - {:.3}",
            ndvi.mean, ndvi.median, ndvi.min, ndvi.max
        );
    }
    if let Some(d) = analysis.deforestation.as_ref().and_then(|o| o.completed()) {
        let status = if d.compliant { "COMPLIANT" } else { "NOT COMPLIANT" };
        println!(
            "EUDR: {} ({:.2}% loss, {:.2} of {:.2} ha)",
            status, d.deforestation_percent, d.area_lost_ha, d.initial_forest_ha
        );
    }
    if let Some(c) = analysis.carbon.as_ref().and_then(|o| o.completed()) {
        println!(
            "Carbon: {:.2} tCO2e ({} method, {:?} confidence{})",
            c.baseline_carbon_tco2e,
            c.methodology,
            c.confidence,
            if c.degraded { ", local approximation" } else { "" }
        );
    }
    for (name, failure) in analysis.failures() {
        println!("{} failed [{}]: {}", name, failure.code, failure.message);
    }
}

async fn batch(config: BaselineConfig, args: BatchArgs) -> anyhow::Result<()> {
    let options = BatchOptions {
        analysis: args.window.options(AnalysisSelection::All),
        output_dir: args.output_dir.clone(),
        continue_on_error: args.continue_on_error,
        concurrency: config.batch.concurrency,
        show_progress: true,
    };
    let engine = BaselineEngine::from_config(config);

    let cancel = cancel_on_ctrl_c();
    let summary = BatchProcessor::new(&engine)
        .run(&args.input_dir, &options, &cancel)
        .await
        .with_context(|| format!("batch over {} failed", args.input_dir.display()))?;

    print_summary(&summary);

    let csv_path = args
        .summary_csv
        .unwrap_or_else(|| args.output_dir.join("summary.csv"));
    let json_path = args
        .summary_json
        .unwrap_or_else(|| args.output_dir.join("summary.json"));
    summary
        .write(Some(&json_path), Some(&csv_path))
        .context("failed to write batch summary")?;
    println!("Summary saved to {} and {}", json_path.display(), csv_path.display());

    if summary.failed > 0 && !args.continue_on_error {
        anyhow::bail!("batch stopped after a failing farm");
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "{:<28} {:<24} {:>10} {:>7} {:>6} {:>12}",
        "File", "Name", "Area (ha)", "NDVI", "EUDR", "tCO2e"
    );
    for row in &summary.results {
        let dash = || "-".to_string();
        println!(
            "{:<28} {:<24} {:>10} {:>7} {:>6} {:>12}",
            row.filename,
            row.name.clone().unwrap_or_else(dash),
            row.area_ha.map(|a| format!("{:.2}", a)).unwrap_or_else(dash),
            row.ndvi.map(|n| format!("{:.3}", n)).unwrap_or_else(dash),
            row.eudr_compliant
                .map(|c| if c { "OK" } else { "FAIL" }.to_string())
                .unwrap_or_else(dash),
            row.carbon_tco2e.map(|c| format!("{:.2}", c)).unwrap_or_else(dash),
        );
    }
    println!(
        "{} processed, {} succeeded, {} failed, {} skipped",
        summary.processed, summary.succeeded, summary.failed, summary.skipped
    );
}

fn check_env(config: BaselineConfig) -> anyhow::Result<()> {
    let invoker = ComputationInvoker::new(config.computation);

    let mut missing = 0;
    for kind in [
        ComputationKind::Vegetation,
        ComputationKind::Deforestation,
        ComputationKind::CarbonBaseline,
    ] {
        match invoker.check_environment(kind) {
            Ok(env) => println!(
                "{:<16} ok  {} {}",
                kind.to_string(),
                env.interpreter.display(),
                env.script.display()
            ),
            Err(err) => {
                missing += 1;
                let detail = match &err {
                    BaselineError::EnvironmentNotConfigured { detail } => {
                        detail.clone()
                    }
                    other => other.to_string(),
                };
                println!("{:<16} MISSING  {}", kind.to_string(), detail);
            }
        }
    }
    println!("Worker threads available: {}", num_cpus::get());

    if missing > 0 {
        anyhow::bail!("{} computation(s) not provisioned", missing);
    }
    Ok(())
}
