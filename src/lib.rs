//! BundleSync - fetch versioned resource bundles and verify patched trees
//!
//! This library downloads two versions of a resource bundle described by
//! manifests, hands them to external diff/patch tools, and checks
//! byte-for-byte that the patched tree equals the new version.
//!
//! # Features
//!
//! - **Bounded Concurrency**: Fetch many resources on a fixed-size worker pool
//! - **Idempotent Fetches**: Files already on disk are skipped, so reruns are cheap
//! - **Failure Isolation**: One failed resource never affects the others
//! - **Tree Reconciliation**: Path-by-path, hash-by-hash comparison of two trees
//!
//! # Example
//!
//! ```no_run
//! use bundlesync::{load_manifest, reconcile, FetchConfig, FetchPipeline, HttpFetcher};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FetchConfig::new("https://cdn.example.com/resource/");
//! let entries = load_manifest(Path::new("testdata/new.csv"))?;
//!
//! let pipeline = FetchPipeline::new(HttpFetcher::new(&config)?, config.workers);
//! let report = pipeline.fetch(&entries, Path::new("testdata/v2")).await?;
//! println!("{}", report.summary);
//!
//! let reconciliation = reconcile(Path::new("testdata/v2"), Path::new("testdata/patched"))?;
//! assert!(reconciliation.passed());
//! # Ok(())
//! # }
//! ```

mod download;
mod error;
mod manifest;
mod orchestrator;
mod pipeline;
mod tools;
mod types;
mod verify;
mod walk;

pub use download::{Fetcher, HttpFetcher};
pub use error::SyncError;
pub use manifest::{duplicate_names, load_manifest, parse_manifest};
pub use orchestrator::{fetch_progress_bar, run_workflow, WorkflowConfig, WorkflowReport};
pub use pipeline::FetchPipeline;
pub use tools::{ensure_success, ProcessRunner, ToolCommand, ToolRunner};
pub use types::{
    BundleLayout, FetchConfig, FetchOutcome, FetchReport, FetchStatus, FetchSummary, FetchTask,
    ManifestEntry, Stage, DEFAULT_TIMEOUT, DEFAULT_WORKERS,
};
pub use verify::{
    file_digest, reconcile, MatchStatus, ReconcileSummary, Reconciliation, ReconciliationResult,
};
pub use walk::{display_path, list_files};
