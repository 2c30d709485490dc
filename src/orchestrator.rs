//! End-to-end validation workflow.
//!
//! Fetches the old and new bundles, runs the external diff and patch tools,
//! then reconciles the patched tree against the new bundle.

use crate::download::Fetcher;
use crate::error::SyncError;
use crate::manifest::load_manifest;
use crate::pipeline::FetchPipeline;
use crate::tools::{ensure_success, ToolCommand, ToolRunner};
use crate::types::{BundleLayout, FetchConfig, FetchSummary, FetchTask, Stage};
use crate::verify::{reconcile, Reconciliation};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Everything one workflow run needs.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub layout: BundleLayout,
    pub old_manifest: PathBuf,
    pub new_manifest: PathBuf,
    pub fetch: FetchConfig,
    /// Optional step that produces the diff and patch tools.
    pub build: Option<ToolCommand>,
    pub diff: ToolCommand,
    pub patch: ToolCommand,
    /// Reuse whatever is already under `v1/` and `v2/`.
    pub skip_download: bool,
    /// Never pause for the operator between stages.
    pub auto: bool,
}

impl WorkflowConfig {
    /// Config with the manifests at their default place under `layout`.
    pub fn new(layout: BundleLayout, fetch: FetchConfig, diff: ToolCommand, patch: ToolCommand) -> Self {
        Self {
            old_manifest: layout.old_manifest(),
            new_manifest: layout.new_manifest(),
            layout,
            fetch,
            build: None,
            diff,
            patch,
            skip_download: false,
            auto: false,
        }
    }

    /// Stages this configuration will run, in order.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = Vec::with_capacity(5);
        if !self.skip_download {
            stages.push(Stage::Fetch);
        }
        if self.build.is_some() {
            stages.push(Stage::Build);
        }
        stages.extend([Stage::Diff, Stage::Patch, Stage::Verify]);
        stages
    }
}

/// Result of a workflow run that reached the verify stage.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    /// `None` when downloading was skipped.
    pub fetch: Option<FetchSummary>,
    pub reconciliation: Reconciliation,
}

impl WorkflowReport {
    pub fn passed(&self) -> bool {
        self.reconciliation.passed()
    }
}

/// Runs the workflow end to end.
///
/// This is the main entry point for validating a diff/patch toolchain. It
/// performs the following steps:
///
/// 1. Fetches both manifest versions into `v1/` and `v2/` as one batch
///    (unless `skip_download` is set)
/// 2. Runs the optional build command
/// 3. Runs the diff tool on `v1/`, `v2/` and `diff/`
/// 4. Runs the patch tool on `v1/`, `diff/` and `patched/`
/// 5. Reconciles `v2/` against `patched/`
///
/// Fetch failures do not stop the run; they show up as differences in the
/// final reconciliation. A tool that exits unsuccessfully aborts the
/// remaining stages.
///
/// # Arguments
///
/// * `config` - Layout, manifests, tools and stage switches
/// * `fetcher` - Transport used for the fetch stage
/// * `runner` - Runs the external build, diff and patch tools
///
/// # Returns
///
/// A [`WorkflowReport`] holding the fetch summary (if fetching ran) and the
/// reconciliation, or an error if a stage could not complete.
pub async fn run_workflow<F, R>(
    config: &WorkflowConfig,
    fetcher: F,
    runner: &R,
) -> Result<WorkflowReport, SyncError>
where
    F: Fetcher + 'static,
    R: ToolRunner + ?Sized,
{
    let layout = &config.layout;
    let stages = StageTracker::new(config.stages(), config.auto);

    let mut fetch = None;
    if !config.skip_download {
        let started = stages.begin(Stage::Fetch);
        fetch = Some(fetch_bundles(config, fetcher).await?);
        stages.finish(Stage::Fetch, started).await?;
    }

    if let Some(build) = &config.build {
        let started = stages.begin(Stage::Build);
        run_tool(runner, build, &[]).await?;
        stages.finish(Stage::Build, started).await?;
    }

    let started = stages.begin(Stage::Diff);
    run_tool(runner, &config.diff, &[layout.v1(), layout.v2(), layout.diff()]).await?;
    stages.finish(Stage::Diff, started).await?;

    let started = stages.begin(Stage::Patch);
    run_tool(runner, &config.patch, &[layout.v1(), layout.diff(), layout.patched()]).await?;
    stages.finish(Stage::Patch, started).await?;

    let started = stages.begin(Stage::Verify);
    let (reference, candidate) = (layout.v2(), layout.patched());
    let reconciliation = tokio::task::spawn_blocking(move || reconcile(&reference, &candidate))
        .await
        .map_err(|e| io::Error::other(format!("Task join error: {}", e)))??;
    stages.finish(Stage::Verify, started).await?;

    Ok(WorkflowReport {
        fetch,
        reconciliation,
    })
}

/// Downloads the old bundle into `v1/` and the new one into `v2/` as a single batch.
async fn fetch_bundles<F: Fetcher + 'static>(
    config: &WorkflowConfig,
    fetcher: F,
) -> Result<FetchSummary, SyncError> {
    let layout = &config.layout;
    let old_entries = load_manifest(&config.old_manifest)?;
    let new_entries = load_manifest(&config.new_manifest)?;

    info!("Old version: {} files -> {}", old_entries.len(), layout.v1().display());
    info!("New version: {} files -> {}", new_entries.len(), layout.v2().display());
    info!("Workers: {}", config.fetch.workers);

    let old_root = layout.v1();
    let new_root = layout.v2();
    let tasks: Vec<FetchTask> = old_entries
        .into_iter()
        .map(|entry| FetchTask::new(entry, &old_root))
        .chain(new_entries.into_iter().map(|entry| FetchTask::new(entry, &new_root)))
        .collect();

    let pipeline = FetchPipeline::new(fetcher, config.fetch.workers).with_progress(fetch_progress_bar());
    let report = pipeline.run(tasks).await?;

    if report.summary.failed > 0 {
        warn!(
            "{} resource(s) failed to download, verification will report them as missing",
            report.summary.failed
        );
    }
    Ok(report.summary)
}

async fn run_tool<R: ToolRunner + ?Sized>(
    runner: &R,
    tool: &ToolCommand,
    dirs: &[PathBuf],
) -> Result<(), SyncError> {
    let code = runner.run(tool, dirs).await?;
    ensure_success(tool, code)
}

/// Progress bar used for the fetch stage.
pub fn fetch_progress_bar() -> ProgressBar {
    let progress_bar = ProgressBar::new(0);
    match ProgressStyle::default_bar().template(
        "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed, ETA {eta_precise}",
    ) {
        Ok(style) => progress_bar.set_style(style.progress_chars("█▓▒░ ")),
        Err(e) => warn!("Falling back to the default progress style: {}", e),
    }
    progress_bar
}

/// Stage banners, timings and the pauses between stages.
struct StageTracker {
    plan: Vec<Stage>,
    auto: bool,
}

impl StageTracker {
    fn new(plan: Vec<Stage>, auto: bool) -> Self {
        // Nobody can press Enter on a pipe.
        let auto = auto || !atty::is(atty::Stream::Stdin);
        Self { plan, auto }
    }

    fn position(&self, stage: Stage) -> usize {
        self.plan.iter().position(|s| *s == stage).unwrap_or(0)
    }

    fn begin(&self, stage: Stage) -> Instant {
        info!("{}", "=".repeat(60));
        info!("  [{}/{}] {}", self.position(stage) + 1, self.plan.len(), stage);
        info!("{}", "=".repeat(60));
        Instant::now()
    }

    async fn finish(&self, stage: Stage, started: Instant) -> Result<(), SyncError> {
        let elapsed = Duration::from_millis(started.elapsed().as_millis() as u64);
        info!("✅ {} finished in {}", stage, humantime::format_duration(elapsed));

        let next = self.plan.get(self.position(stage) + 1).copied();
        match next {
            Some(next) if !self.auto => wait_for_operator(next).await,
            _ => Ok(()),
        }
    }
}

async fn wait_for_operator(next: Stage) -> Result<(), SyncError> {
    let prompt = format!("Done. Next: {}. Press Enter to continue...", next);
    tokio::task::spawn_blocking(move || {
        let mut stderr = io::stderr();
        write!(stderr, "{} ", prompt)?;
        stderr.flush()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line).map(|_| ())
    })
    .await
    .map_err(|e| io::Error::other(format!("Task join error: {}", e)))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(skip_download: bool, build: bool) -> WorkflowConfig {
        let mut config = WorkflowConfig::new(
            BundleLayout::new("/data"),
            FetchConfig::new("http://localhost/"),
            ToolCommand::new("diff", "diff-tool"),
            ToolCommand::new("patch", "patch-tool"),
        );
        config.skip_download = skip_download;
        if build {
            config.build = Some(ToolCommand::new("build", "make"));
        }
        config
    }

    #[test]
    fn full_plan_runs_every_stage() {
        assert_eq!(
            config(false, true).stages(),
            vec![Stage::Fetch, Stage::Build, Stage::Diff, Stage::Patch, Stage::Verify]
        );
    }

    #[test]
    fn skipping_download_drops_fetch_stage() {
        assert_eq!(
            config(true, false).stages(),
            vec![Stage::Diff, Stage::Patch, Stage::Verify]
        );
    }

    #[test]
    fn default_manifests_live_under_root() {
        let config = config(false, false);
        assert_eq!(config.old_manifest, PathBuf::from("/data/old.csv"));
        assert_eq!(config.new_manifest, PathBuf::from("/data/new.csv"));
    }
}
