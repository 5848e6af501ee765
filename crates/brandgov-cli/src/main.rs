use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use brandgov_contracts::brand::{CompressedDigitalTwin, RawGuideline};
use brandgov_contracts::events::EventWriter;
use brandgov_contracts::jobs::{GenerationRequest, JobStatus};
use brandgov_contracts::store::{keys, load, JsonFileStore, ObjectStore};
use brandgov_engine::compressor::Compressor;
use brandgov_engine::ingest::ingest;
use brandgov_engine::pipeline::{job_status, request_cancel};
use brandgov_engine::{BrandPipeline, PipelineConfig};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "brandgov", version, about = "Brand-governed image generation pipeline")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Directory holding the store, events, artifacts and normalized logos.
    #[arg(long, global = true, env = "BRANDGOV_WORK_DIR", default_value = ".brandgov")]
    work_dir: PathBuf,
    /// Optional JSON config file; environment variables override it.
    #[arg(long, global = true, env = "BRANDGOV_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    reasoning_model: Option<String>,
    #[arg(long, global = true)]
    vision_model: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Map, compress and store a brand's raw guideline payload.
    Ingest(IngestArgs),
    /// Print the stored digital twin for a brand.
    Twin(BrandArgs),
    /// Submit a generation job and wait for it to finish.
    Generate(GenerateArgs),
    Status(JobArgs),
    Cancel(JobArgs),
}

#[derive(Debug, Parser)]
struct IngestArgs {
    #[arg(long)]
    brand: String,
    #[arg(long)]
    input: PathBuf,
}

#[derive(Debug, Parser)]
struct BrandArgs {
    #[arg(long)]
    brand: String,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    brand: String,
    #[arg(long)]
    prompt: String,
    /// Logo file to pass as a reference image. Repeatable.
    #[arg(long = "logo")]
    logos: Vec<PathBuf>,
}

#[derive(Debug, Parser)]
struct JobArgs {
    #[arg(long)]
    job: String,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("brandgov error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.global)?;
    match cli.command {
        Command::Ingest(args) => run_ingest(&cli.global, &config, args),
        Command::Twin(args) => run_twin(&cli.global, args),
        Command::Generate(args) => run_generate(&cli.global, config, args),
        Command::Status(args) => run_status(&cli.global, args),
        Command::Cancel(args) => run_cancel(&cli.global, args),
    }
}

fn load_config(global: &GlobalArgs) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(global.config.as_deref())?;
    if let Some(model) = global.reasoning_model.as_ref() {
        config.reasoning_model = model.trim().to_string();
    }
    if let Some(model) = global.vision_model.as_ref() {
        config.vision_model = model.trim().to_string();
    }
    config.validate()?;
    Ok(config)
}

fn open_store(work_dir: &Path) -> Result<Arc<dyn ObjectStore>> {
    fs::create_dir_all(work_dir)
        .with_context(|| format!("failed to create {}", work_dir.display()))?;
    Ok(Arc::new(JsonFileStore::new(work_dir.join("store.json"))))
}

fn run_ingest(global: &GlobalArgs, config: &PipelineConfig, args: IngestArgs) -> Result<i32> {
    let raw_text = fs::read_to_string(&args.input)
        .with_context(|| format!("failed reading {}", args.input.display()))?;
    let raw: RawGuideline = serde_json::from_str(&raw_text)
        .with_context(|| format!("invalid guideline payload {}", args.input.display()))?;

    let store = open_store(&global.work_dir)?;
    let events = EventWriter::new(
        global.work_dir.join("events.jsonl"),
        format!("ingest-{}", args.brand.trim()),
    );
    let report = ingest(
        store.as_ref(),
        &Compressor::new(config.twin_budget.clone()),
        Some(&events),
        &args.brand,
        raw,
    )?;
    print_json(&serde_json::to_value(&report)?)?;
    Ok(0)
}

fn run_twin(global: &GlobalArgs, args: BrandArgs) -> Result<i32> {
    let store = open_store(&global.work_dir)?;
    let twin: Option<CompressedDigitalTwin> = load(store.as_ref(), &keys::twin(args.brand.trim()))?;
    let Some(twin) = twin else {
        bail!("brand '{}' has not been ingested", args.brand.trim());
    };
    print_json(&json!({
        "brand_id": args.brand.trim(),
        "estimated_tokens": twin.estimate_tokens(),
        "twin": twin,
    }))?;
    Ok(0)
}

fn run_generate(global: &GlobalArgs, config: PipelineConfig, args: GenerateArgs) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(generate(global, config, args))
}

async fn generate(global: &GlobalArgs, config: PipelineConfig, args: GenerateArgs) -> Result<i32> {
    let store = open_store(&global.work_dir)?;
    let pipeline = BrandPipeline::new(config, store, &global.work_dir)?;
    let mut request = GenerationRequest::new(args.brand, args.prompt);
    request.logos = args.logos;

    let submitted = pipeline.submit(request)?;
    print_json(&serde_json::to_value(&submitted.ticket)?)?;
    info!(job_id = %submitted.ticket.job_id, "waiting for job");
    let job = submitted.wait().await?;
    print_json(&serde_json::to_value(job.view())?)?;

    if let Some(err) = job.error.as_deref() {
        eprintln!("job {}: {err}", job.job_id);
    }
    Ok(exit_code(job.status))
}

/// Process exit code for a finished job: 0 when completed, 2 when a human
/// must review it, 1 for everything else.
fn exit_code(status: JobStatus) -> i32 {
    match status {
        JobStatus::Completed => 0,
        JobStatus::NeedsReview => 2,
        _ => 1,
    }
}

fn run_status(global: &GlobalArgs, args: JobArgs) -> Result<i32> {
    let store = open_store(&global.work_dir)?;
    let Some(view) = job_status(store.as_ref(), &args.job)? else {
        bail!("job '{}' not found", args.job);
    };
    print_json(&serde_json::to_value(view)?)?;
    Ok(0)
}

fn run_cancel(global: &GlobalArgs, args: JobArgs) -> Result<i32> {
    let store = open_store(&global.work_dir)?;
    let requested = request_cancel(store.as_ref(), &args.job)?;
    print_json(&json!({
        "job_id": args.job,
        "cancel_requested": requested,
    }))?;
    Ok(if requested { 0 } else { 1 })
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
