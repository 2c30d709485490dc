use anyhow::{bail, Context, Result};
use bundlesync::{
    fetch_progress_bar, load_manifest, reconcile, run_workflow, BundleLayout, FetchConfig,
    FetchPipeline, FetchTask, HttpFetcher, ProcessRunner, ToolCommand, WorkflowConfig,
    DEFAULT_WORKERS,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bundlesync")]
#[command(about = "Fetch resource bundles and verify patched trees against the reference", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the resources listed in one or more manifests
    Fetch(FetchArgs),
    /// Compare two directory trees file by file
    Verify(VerifyArgs),
    /// Run the whole workflow: fetch, diff, patch, verify
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct TransportArgs {
    /// Number of concurrent downloads
    #[arg(short, long, default_value_t = DEFAULT_WORKERS, value_parser = parse_workers)]
    workers: usize,

    /// Per-request timeout (e.g. "30s", "2m")
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    timeout: Duration,
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Base URL that each digest is appended to
    #[arg(long)]
    base_url: String,

    /// Manifest file (repeatable, paired with --dest in order)
    #[arg(long = "manifest", required = true)]
    manifests: Vec<PathBuf>,

    /// Destination directory (repeatable, paired with --manifest in order)
    #[arg(long = "dest", required = true)]
    dests: Vec<PathBuf>,

    #[command(flatten)]
    transport: TransportArgs,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Reference tree
    left: PathBuf,

    /// Candidate tree
    right: PathBuf,

    /// Print the results as JSON instead of a text report
    #[arg(long)]
    json: bool,

    /// Name used for the left tree in the report
    #[arg(long, default_value = "left")]
    left_label: String,

    /// Name used for the right tree in the report
    #[arg(long, default_value = "right")]
    right_label: String,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Working directory holding the manifests, v1/, v2/, diff/ and patched/
    #[arg(long, default_value = "testdata")]
    root: PathBuf,

    /// Base URL that each digest is appended to
    #[arg(long, required_unless_present = "skip_download")]
    base_url: Option<String>,

    /// Manifest of the old version (default: <root>/old.csv)
    #[arg(long)]
    old_manifest: Option<PathBuf>,

    /// Manifest of the new version (default: <root>/new.csv)
    #[arg(long)]
    new_manifest: Option<PathBuf>,

    /// Diff tool, invoked as `<tool> <old> <new> <diff>`
    #[arg(long)]
    diff_tool: PathBuf,

    /// Patch tool, invoked as `<tool> <old> <diff> <patched>`
    #[arg(long)]
    patch_tool: PathBuf,

    /// Optional build command run before diffing
    #[arg(long)]
    build_tool: Option<PathBuf>,

    /// Argument passed to the build command (repeatable)
    #[arg(long = "build-arg", allow_hyphen_values = true)]
    build_args: Vec<String>,

    /// Skip downloading and reuse the existing v1/ and v2/ trees
    #[arg(long)]
    skip_download: bool,

    /// Run every stage without pausing for confirmation
    #[arg(long)]
    auto: bool,

    #[command(flatten)]
    transport: TransportArgs,
}

fn parse_workers(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(workers) => Ok(workers),
        Err(e) => Err(e.to_string()),
    }
}

fn fetch_config(base_url: String, transport: &TransportArgs) -> FetchConfig {
    let mut config = FetchConfig::new(base_url);
    config.workers = transport.workers;
    config.timeout = transport.timeout;
    config
}

/// Returns whether the command passed.
async fn fetch(args: FetchArgs) -> Result<bool> {
    if args.manifests.len() != args.dests.len() {
        bail!(
            "--manifest was given {} time(s) but --dest {} time(s); they must pair up",
            args.manifests.len(),
            args.dests.len()
        );
    }

    let config = fetch_config(args.base_url, &args.transport);
    let mut tasks = Vec::new();
    for (manifest, dest) in args.manifests.iter().zip(&args.dests) {
        let entries = load_manifest(manifest)
            .with_context(|| format!("failed to load manifest {}", manifest.display()))?;
        info!("{}: {} files -> {}", manifest.display(), entries.len(), dest.display());
        tasks.extend(entries.into_iter().map(|entry| FetchTask::new(entry, dest)));
    }
    info!("Workers: {}", config.workers);

    let fetcher = HttpFetcher::new(&config).context("failed to build HTTP client")?;
    let pipeline = FetchPipeline::new(fetcher, config.workers).with_progress(fetch_progress_bar());
    let report = pipeline.run(tasks).await?;

    println!("Done: {}", report.summary);
    Ok(true)
}

async fn verify(args: VerifyArgs) -> Result<bool> {
    let VerifyArgs {
        left,
        right,
        json,
        left_label,
        right_label,
    } = args;

    let reconciliation = tokio::task::spawn_blocking(move || reconcile(&left, &right))
        .await
        .context("reconciliation task failed")??;

    if json {
        println!("{}", reconciliation.to_json()?);
    } else {
        print!("{}", reconciliation.render(&left_label, &right_label));
    }
    Ok(reconciliation.passed())
}

async fn run(args: RunArgs) -> Result<bool> {
    let layout = BundleLayout::new(&args.root);
    let fetch = fetch_config(args.base_url.unwrap_or_default(), &args.transport);

    let mut config = WorkflowConfig::new(
        layout,
        fetch,
        ToolCommand::new("diff", &args.diff_tool),
        ToolCommand::new("patch", &args.patch_tool),
    );
    if let Some(manifest) = args.old_manifest {
        config.old_manifest = manifest;
    }
    if let Some(manifest) = args.new_manifest {
        config.new_manifest = manifest;
    }
    if let Some(build_tool) = &args.build_tool {
        config.build = Some(ToolCommand::new("build", build_tool).with_args(args.build_args));
    }
    config.skip_download = args.skip_download;
    config.auto = args.auto;

    let fetcher = HttpFetcher::new(&config.fetch).context("failed to build HTTP client")?;
    let report = run_workflow(&config, fetcher, &ProcessRunner).await?;

    print!("{}", report.reconciliation.render("v2", "patched"));
    if report.passed() {
        println!("\n✅ Verification passed!");
    } else {
        println!("\n❌ Verification failed!");
    }
    Ok(report.passed())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bundlesync={}", log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let outcome = match cli.command {
        Command::Fetch(args) => fetch(args).await,
        Command::Verify(args) => verify(args).await,
        Command::Run(args) => run(args).await,
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(2);
        }
    }
}
