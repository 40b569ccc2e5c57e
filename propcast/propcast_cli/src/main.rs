use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use propcast_pricing::{
    dataset::write_jsonl, BundleOrigin, ErrorPayload, JsonModelStore, ModelOrchestrator,
    ModelOrigin, ModelStore, PredictionRequest, PricePredictor, PricingConfig, PricingError,
    PricingTelemetry, SyntheticDataset,
};
use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;
use tokio::runtime::Runtime;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "propcast", version, about = "Property price prediction pipeline")]
struct Cli {
    /// Emit debug-level pipeline events.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Predicts the price and yearly projection for one request.
    Predict {
        /// JSON request file.
        #[arg(long)]
        input: PathBuf,
        /// Overrides the request's projection horizon.
        #[arg(long)]
        years: Option<u32>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Retrains the bundle and persists it.
    Train {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Prints metadata for the persisted bundle.
    Inspect {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Writes a synthetic training dataset as JSON lines.
    Synth {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 200)]
        samples: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BundleSummary {
    id: Uuid,
    created_at: DateTime<Utc>,
    origin: &'static str,
    price_model: &'static str,
    growth_model: Option<&'static str>,
    fallback_growth_rate: f64,
    columns: Vec<String>,
    report: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Predict {
            input,
            years,
            config,
        } => return predict(&input, years, config, cli.verbose),
        Commands::Train { config } => train(config, cli.verbose),
        Commands::Inspect { config } => inspect(config),
        Commands::Synth { out, samples, seed } => synth(&out, samples, seed),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<PricingConfig> {
    match path {
        Some(path) => PricingConfig::load(&path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => Ok(PricingConfig::default()),
    }
}

fn telemetry(config: &PricingConfig, verbose: bool) -> Result<PricingTelemetry> {
    let level = if verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    PricingTelemetry::builder("propcast")
        .settings(&config.logging)
        .min_level(level)
        .build()
}

fn predict(
    input: &Path,
    years: Option<u32>,
    config: Option<PathBuf>,
    verbose: bool,
) -> ExitCode {
    match run_predict(input, years, config, verbose) {
        Ok(body) => {
            println!("{body}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            let payload = ErrorPayload::from(&err);
            match serde_json::to_string_pretty(&payload) {
                Ok(body) => println!("{body}"),
                Err(_) => println!("{}", json!({ "error": payload.error })),
            }
            ExitCode::FAILURE
        }
    }
}

fn run_predict(
    input: &Path,
    years: Option<u32>,
    config: Option<PathBuf>,
    verbose: bool,
) -> Result<String, PricingError> {
    let raw = fs::read_to_string(input).map_err(|err| {
        PricingError::InvalidInput(format!("reading {}: {err}", input.display()))
    })?;
    let mut request: PredictionRequest = serde_json::from_str(&raw)
        .map_err(|err| PricingError::InvalidInput(format!("parsing request: {err}")))?;
    if let Some(years) = years {
        request.years = years;
    }

    let setup = || -> Result<(Runtime, PricePredictor)> {
        let config = load_config(config)?;
        let telemetry = telemetry(&config, verbose)?;
        let runtime = Runtime::new().context("starting runtime")?;
        let predictor = PricePredictor::builder()
            .config(config)
            .telemetry(telemetry)
            .build()?;
        Ok((runtime, predictor))
    };
    let (runtime, predictor) =
        setup().map_err(|err| PricingError::Config(format!("{err:#}")))?;

    let result = runtime.block_on(predictor.predict_request(&request))?;
    serde_json::to_string_pretty(&result)
        .map_err(|err| PricingError::Internal(format!("serialising result: {err}")))
}

fn train(config: Option<PathBuf>, verbose: bool) -> Result<()> {
    let config = load_config(config)?;
    let telemetry = telemetry(&config, verbose)?;
    let orchestrator = ModelOrchestrator::from_config(&config).with_telemetry(Some(telemetry));
    let outcome = orchestrator.retrain();
    let trail: Vec<String> = outcome.trail.iter().map(ToString::to_string).collect();

    match outcome.bundle.report() {
        Some(report) => println!("{}", report.summary()),
        None => println!("[pricing] bundle {} has no training report", outcome.bundle.id()),
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "bundleId": outcome.bundle.id(),
            "origin": outcome.origin,
            "trail": trail,
            "persisted": outcome.persisted,
            "store": orchestrator.store().describe(),
        }))?
    );
    anyhow::ensure!(
        outcome.origin != ModelOrigin::Fallback,
        "training failed; the fallback bundle was not persisted"
    );
    anyhow::ensure!(
        outcome.persisted,
        "bundle trained but could not be persisted to {}",
        config.model.path.display()
    );
    Ok(())
}

fn inspect(config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let store = JsonModelStore::new(&config.model.path);
    let bundle = store
        .load()
        .with_context(|| format!("loading bundle from {}", store.describe()))?;
    let origin = match bundle.origin() {
        BundleOrigin::Trained => "trained",
        BundleOrigin::Fallback => "fallback",
    };
    let summary = BundleSummary {
        id: bundle.id(),
        created_at: bundle.created_at(),
        origin,
        price_model: bundle.price_model().name(),
        growth_model: bundle.growth_model().map(|model| model.name()),
        fallback_growth_rate: bundle.fallback_growth_rate(),
        columns: bundle.encoder().columns().to_vec(),
        report: bundle.report().map(|report| report.summary()),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn synth(out: &Path, samples: usize, seed: u64) -> Result<()> {
    anyhow::ensure!(samples > 0, "--samples must be positive");
    let records = SyntheticDataset::new(samples, seed).generate();
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    write_jsonl(out, &records).with_context(|| format!("writing {}", out.display()))?;
    println!("wrote {} records to {}", records.len(), out.display());
    Ok(())
}
