//! Data structures for bundle sync operations.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of concurrent fetch workers.
pub const DEFAULT_WORKERS: usize = 8;

/// Default per-request timeout for a single resource fetch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One row of a manifest: a named resource and the locator of its remote blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path of the resource relative to the destination root.
    pub name: String,
    /// Size recorded in the manifest, when it reads as a byte count.
    /// Informational only, never checked.
    pub expected_size: Option<u64>,
    /// Content-addressed key of the remote blob.
    pub digest: String,
}

/// A single unit of fetch work: one entry bound to the root it lands under.
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub entry: ManifestEntry,
    pub destination_root: PathBuf,
}

impl FetchTask {
    pub fn new(entry: ManifestEntry, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            entry,
            destination_root: destination_root.into(),
        }
    }

    /// Local path the resource is written to.
    pub fn file_path(&self) -> PathBuf {
        self.destination_root.join(&self.entry.name)
    }
}

/// Result of running one fetch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// The destination file already existed; nothing was transferred.
    Skipped,
    /// The resource was downloaded and written.
    Downloaded,
    /// Directory creation, transfer or write failed.
    Failed,
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchStatus::Skipped => "skipped",
            FetchStatus::Downloaded => "downloaded",
            FetchStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Outcome record produced exactly once per fetch task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchOutcome {
    pub name: String,
    pub status: FetchStatus,
    pub detail: String,
}

impl FetchOutcome {
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: FetchStatus::Skipped,
            detail: "already present".to_string(),
        }
    }

    pub fn downloaded(name: impl Into<String>, bytes: u64) -> Self {
        Self {
            name: name.into(),
            status: FetchStatus::Downloaded,
            detail: format!("{} bytes", bytes),
        }
    }

    pub fn failed(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: FetchStatus::Failed,
            detail: detail.into(),
        }
    }
}

/// Aggregate counts over a fetch batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl FetchSummary {
    pub fn record(&mut self, status: FetchStatus) {
        match status {
            FetchStatus::Skipped => self.skipped += 1,
            FetchStatus::Downloaded => self.downloaded += 1,
            FetchStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.downloaded + self.skipped + self.failed
    }
}

impl fmt::Display for FetchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} downloaded, {} skipped, {} failed",
            self.downloaded, self.skipped, self.failed
        )
    }
}

/// Outcomes of a fetch batch, in completion order, plus their counts.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub outcomes: Vec<FetchOutcome>,
    pub summary: FetchSummary,
}

/// Configuration for fetching resources.
///
/// # Example
///
/// ```
/// use bundlesync::FetchConfig;
///
/// let config = FetchConfig::new("https://cdn.example.com/resource/");
/// assert_eq!(config.workers, 8);
/// ```
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Prefix that a digest is appended to in order to form the resource URL.
    pub base_url: String,
    /// Maximum number of concurrent fetches (default: 8).
    pub workers: usize,
    /// Per-request timeout covering connect and body transfer (default: 30s).
    pub timeout: Duration,
}

impl FetchConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// On-disk layout of one validation run.
#[derive(Debug, Clone)]
pub struct BundleLayout {
    root: PathBuf,
}

impl BundleLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Old bundle version.
    pub fn v1(&self) -> PathBuf {
        self.root.join("v1")
    }

    /// New bundle version, the reference tree.
    pub fn v2(&self) -> PathBuf {
        self.root.join("v2")
    }

    pub fn diff(&self) -> PathBuf {
        self.root.join("diff")
    }

    pub fn patched(&self) -> PathBuf {
        self.root.join("patched")
    }

    pub fn old_manifest(&self) -> PathBuf {
        self.root.join("old.csv")
    }

    pub fn new_manifest(&self) -> PathBuf {
        self.root.join("new.csv")
    }
}

/// Stages of the end-to-end validation workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Download both bundle versions.
    Fetch,
    /// Build the external tools.
    Build,
    /// Produce diff artifacts from old and new.
    Diff,
    /// Apply the diff artifacts to old.
    Patch,
    /// Reconcile the patched tree against new.
    Verify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Fetch => "Fetch bundles",
            Stage::Build => "Build tools",
            Stage::Diff => "Generate diff",
            Stage::Patch => "Apply patch",
            Stage::Verify => "Verify result",
        };
        f.write_str(label)
    }
}
