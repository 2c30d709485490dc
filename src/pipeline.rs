//! Bounded-concurrency fetch pipeline.
//!
//! Every task produces exactly one [`FetchOutcome`]. Workers never touch the
//! aggregate counters: they send their outcome over a channel and the
//! collecting routine is the only place that updates the summary.

use crate::download::Fetcher;
use crate::error::SyncError;
use crate::types::{FetchOutcome, FetchReport, FetchStatus, FetchTask, ManifestEntry};
use indicatif::ProgressBar;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Runs fetch tasks on a fixed number of concurrent workers.
pub struct FetchPipeline<F> {
    fetcher: Arc<F>,
    workers: usize,
    progress: ProgressBar,
}

impl<F: Fetcher + 'static> FetchPipeline<F> {
    /// Creates a pipeline with `workers` concurrent fetches (at least one).
    pub fn new(fetcher: F, workers: usize) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            workers: workers.max(1),
            progress: ProgressBar::hidden(),
        }
    }

    /// Reports progress on `progress`; its length is set by each run.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fetches every entry under `destination_root`.
    ///
    /// # Arguments
    ///
    /// * `entries` - Manifest rows to fetch
    /// * `destination_root` - Directory the entry names are resolved against
    ///
    /// # Returns
    ///
    /// See [`FetchPipeline::run`].
    pub async fn fetch(
        &self,
        entries: &[ManifestEntry],
        destination_root: &Path,
    ) -> Result<FetchReport, SyncError> {
        let tasks = entries
            .iter()
            .cloned()
            .map(|entry| FetchTask::new(entry, destination_root))
            .collect();
        self.run(tasks).await
    }

    /// Runs a batch of tasks and collects one outcome per task, in completion order.
    ///
    /// Every destination root is created before any task starts. At most
    /// `workers` tasks fetch at once; each one skips a file that already
    /// exists, otherwise downloads it next to its final path and renames it
    /// into place.
    ///
    /// # Arguments
    ///
    /// * `tasks` - Fetch tasks, possibly spanning several destination roots
    ///
    /// # Returns
    ///
    /// A [`FetchReport`] with exactly one outcome per task. Fails only when a
    /// destination root cannot be created; individual task failures are
    /// reported as [`FetchStatus::Failed`] outcomes.
    pub async fn run(&self, tasks: Vec<FetchTask>) -> Result<FetchReport, SyncError> {
        prepare_roots(&tasks).await?;

        let total = tasks.len();
        self.progress.set_length(total as u64);
        self.progress
            .set_message(format!("📦 Fetching {} resources", total));

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let (tx, mut rx) = mpsc::channel::<FetchOutcome>(total.max(1));
        let mut handles = Vec::with_capacity(total);

        for (index, task) in tasks.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let fetcher = Arc::clone(&self.fetcher);
            let tx = tx.clone();
            let name = task.entry.name.clone();

            let handle = tokio::spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => fetch_one(fetcher.as_ref(), &task, index).await,
                    Err(e) => FetchOutcome::failed(task.entry.name.clone(), e.to_string()),
                };
                // The collector outlives every worker, so the send cannot fail.
                let _ = tx.send(outcome).await;
            });
            handles.push((name, handle));
        }
        drop(tx);

        let mut report = FetchReport::default();
        while let Some(outcome) = rx.recv().await {
            self.record(&mut report, outcome);
        }

        // A worker that panicked never sent its outcome.
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                self.record(
                    &mut report,
                    FetchOutcome::failed(name, format!("worker aborted: {}", e)),
                );
            }
        }

        self.progress
            .finish_with_message(format!("✅ {}", report.summary));
        info!("Fetch complete: {}", report.summary);
        Ok(report)
    }

    fn record(&self, report: &mut FetchReport, outcome: FetchOutcome) {
        report.summary.record(outcome.status);
        match outcome.status {
            FetchStatus::Failed => self
                .progress
                .suspend(|| error!("✗ {}: {}", outcome.name, outcome.detail)),
            FetchStatus::Skipped => debug!("Skipped {} (already present)", outcome.name),
            FetchStatus::Downloaded => debug!("Downloaded {} ({})", outcome.name, outcome.detail),
        }
        self.progress.set_message(format!("| {}", outcome.name));
        self.progress.inc(1);
        report.outcomes.push(outcome);
    }
}

/// Creates every distinct destination root up front and clears temporary
/// files an interrupted earlier run left inside them.
async fn prepare_roots(tasks: &[FetchTask]) -> Result<(), SyncError> {
    let roots: BTreeSet<&Path> = tasks
        .iter()
        .map(|task| task.destination_root.as_path())
        .collect();

    for root in roots {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| SyncError::DestinationUnwritable {
                path: root.to_path_buf(),
                source,
            })?;

        let sweep_root = root.to_path_buf();
        match tokio::task::spawn_blocking(move || remove_stale_parts(&sweep_root)).await {
            Ok(0) => {}
            Ok(removed) => warn!(
                "Removed {} interrupted download(s) under {}",
                removed,
                root.display()
            ),
            Err(e) => warn!("Stale download sweep of {} aborted: {}", root.display(), e),
        }
    }
    Ok(())
}

/// Deletes `<file>.<index>.part` files under `root`, returning how many went.
fn remove_stale_parts(root: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        if !entry.file_type().is_file() || !is_part_file(entry.path()) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("Removed stale {}", entry.path().display());
                removed += 1;
            }
            Err(e) => warn!("Could not remove stale {}: {}", entry.path().display(), e),
        }
    }
    removed
}

fn is_part_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    let Some((stem, index)) = name
        .strip_suffix(".part")
        .and_then(|rest| rest.rsplit_once('.'))
    else {
        return false;
    };
    !stem.is_empty() && !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())
}

async fn fetch_one<F: Fetcher + ?Sized>(fetcher: &F, task: &FetchTask, index: usize) -> FetchOutcome {
    let name = task.entry.name.clone();
    let file_path = task.file_path();

    // Existing files are trusted as-is and never overwritten.
    if tokio::fs::metadata(&file_path).await.is_ok() {
        return FetchOutcome::skipped(name);
    }

    match download_into_place(fetcher, task, &file_path, index).await {
        Ok(bytes) => FetchOutcome::downloaded(name, bytes),
        Err(e) => FetchOutcome::failed(name, e.to_string()),
    }
}

/// Downloads to a sibling temporary file and renames it over `file_path`.
async fn download_into_place<F: Fetcher + ?Sized>(
    fetcher: &F,
    task: &FetchTask,
    file_path: &Path,
    index: usize,
) -> Result<u64, SyncError> {
    if let Some(parent) = file_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let part_path = part_path_for(file_path, index);
    let result: Result<u64, SyncError> = async {
        let bytes = fetcher.fetch_to(&task.entry.digest, &part_path).await?;
        tokio::fs::rename(&part_path, file_path).await?;
        Ok(bytes)
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&part_path).await;
    }
    result
}

/// Temporary path unique per task, so duplicate names never share one.
fn part_path_for(file_path: &Path, index: usize) -> PathBuf {
    let mut file_name = file_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    file_name.push(format!(".{}.part", index));
    file_path.with_file_name(file_name)
}
