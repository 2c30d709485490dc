//! End-to-end workflow with in-memory transport and fake diff/patch tools.

use async_trait::async_trait;
use bundlesync::{
    list_files, run_workflow, BundleLayout, FetchConfig, Fetcher, MatchStatus, SyncError,
    ToolCommand, ToolRunner, WorkflowConfig,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// Serves blobs from memory.
struct MemoryFetcher {
    blobs: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch_to(&self, digest: &str, path: &Path) -> Result<u64, SyncError> {
        match self.blobs.get(digest) {
            Some(bytes) => {
                tokio::fs::write(path, bytes).await?;
                Ok(bytes.len() as u64)
            }
            None => Err(SyncError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no blob for {}", digest),
            ))),
        }
    }
}

/// Fake toolchain: "patch" reproduces the new tree, optionally corrupting one file.
#[derive(Default)]
struct FakeTools {
    calls: Mutex<Vec<(String, Vec<PathBuf>)>>,
    fail: Option<&'static str>,
    corrupt: Option<&'static str>,
    reference: PathBuf,
}

impl FakeTools {
    fn new(reference: PathBuf) -> Self {
        Self {
            reference,
            ..Self::default()
        }
    }

    fn called(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl ToolRunner for FakeTools {
    async fn run(&self, tool: &ToolCommand, dirs: &[PathBuf]) -> Result<Option<i32>, SyncError> {
        self.calls
            .lock()
            .unwrap()
            .push((tool.name.clone(), dirs.to_vec()));

        if self.fail == Some(tool.name.as_str()) {
            return Ok(Some(1));
        }
        match tool.name.as_str() {
            "diff" => {
                std::fs::create_dir_all(&dirs[2])?;
                std::fs::write(dirs[2].join("manifest.json"), b"{}")?;
            }
            "patch" => {
                let output = &dirs[2];
                for relative in list_files(&self.reference)? {
                    let target = output.join(&relative);
                    std::fs::create_dir_all(target.parent().unwrap())?;
                    if self.corrupt.map(Path::new) == Some(relative.as_path()) {
                        std::fs::write(&target, b"corrupted")?;
                    } else {
                        std::fs::copy(self.reference.join(&relative), &target)?;
                    }
                }
            }
            _ => {}
        }
        Ok(Some(0))
    }
}

fn write(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn workflow(root: &Path) -> WorkflowConfig {
    let mut config = WorkflowConfig::new(
        BundleLayout::new(root),
        FetchConfig::new("memory://"),
        ToolCommand::new("diff", "diff-tool"),
        ToolCommand::new("patch", "patch-tool"),
    );
    config.auto = true;
    config
}

fn seeded_root() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("v1"), "ui/atlas.bundle", b"old atlas");
    write(&dir.path().join("v1"), "sound.bundle", b"same");
    write(&dir.path().join("v2"), "ui/atlas.bundle", b"new atlas");
    write(&dir.path().join("v2"), "sound.bundle", b"same");
    write(&dir.path().join("v2"), "added.bundle", b"fresh");
    dir
}

fn no_blobs() -> MemoryFetcher {
    MemoryFetcher {
        blobs: HashMap::new(),
    }
}

#[tokio::test]
async fn faithful_patch_passes_verification() {
    let root = seeded_root();
    let layout = BundleLayout::new(root.path());
    let mut config = workflow(root.path());
    config.skip_download = true;
    let tools = FakeTools::new(layout.v2());

    let report = run_workflow(&config, no_blobs(), &tools).await.unwrap();

    assert!(report.passed());
    assert!(report.fetch.is_none());
    assert_eq!(report.reconciliation.summary().matched, 3);

    let calls = tools.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "diff");
    assert_eq!(calls[0].1, vec![layout.v1(), layout.v2(), layout.diff()]);
    assert_eq!(calls[1].0, "patch");
    assert_eq!(calls[1].1, vec![layout.v1(), layout.diff(), layout.patched()]);
}

#[tokio::test]
async fn corrupted_patch_fails_verification() {
    let root = seeded_root();
    let layout = BundleLayout::new(root.path());
    let mut config = workflow(root.path());
    config.skip_download = true;
    let mut tools = FakeTools::new(layout.v2());
    tools.corrupt = Some("ui/atlas.bundle");

    let report = run_workflow(&config, no_blobs(), &tools).await.unwrap();

    assert!(!report.passed());
    let mismatches: Vec<_> = report
        .reconciliation
        .with_status(MatchStatus::Mismatch)
        .map(|result| result.relative_path.as_str())
        .collect();
    assert_eq!(mismatches, vec!["ui/atlas.bundle"]);
}

#[tokio::test]
async fn failing_tool_aborts_remaining_stages() {
    let root = seeded_root();
    let mut config = workflow(root.path());
    config.skip_download = true;
    let mut tools = FakeTools::new(BundleLayout::new(root.path()).v2());
    tools.fail = Some("diff");

    let err = run_workflow(&config, no_blobs(), &tools).await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::ToolFailed { ref tool, code: Some(1) } if tool == "diff"
    ));
    assert_eq!(tools.called(), vec!["diff".to_string()]);
}

#[tokio::test]
async fn build_runs_before_diff_when_configured() {
    let root = seeded_root();
    let mut config = workflow(root.path());
    config.skip_download = true;
    config.build = Some(ToolCommand::new("build", "make").with_args(["tools"]));
    let tools = FakeTools::new(BundleLayout::new(root.path()).v2());

    run_workflow(&config, no_blobs(), &tools).await.unwrap();

    assert_eq!(
        tools.called(),
        vec!["build".to_string(), "diff".to_string(), "patch".to_string()]
    );
}

#[tokio::test]
async fn fetches_both_versions_before_diffing() {
    let root = TempDir::new().unwrap();
    write(root.path(), "old.csv", b"a.bundle,3,h-old-a\nb.bundle,1,h-b\n");
    write(root.path(), "new.csv", b"a.bundle,3,h-new-a\nb.bundle,1,h-b\nc.bundle,2,h-c\n");
    let fetcher = MemoryFetcher {
        blobs: [
            ("h-old-a", &b"old"[..]),
            ("h-new-a", &b"new"[..]),
            ("h-b", &b"b"[..]),
            ("h-c", &b"cc"[..]),
        ]
        .into_iter()
        .map(|(digest, bytes)| (digest.to_string(), bytes.to_vec()))
        .collect(),
    };
    let layout = BundleLayout::new(root.path());
    let config = workflow(root.path());
    let tools = FakeTools::new(layout.v2());

    let report = run_workflow(&config, fetcher, &tools).await.unwrap();

    let fetch = report.fetch.unwrap();
    assert_eq!(fetch.downloaded, 5);
    assert_eq!(fetch.failed, 0);
    assert_eq!(std::fs::read(layout.v1().join("a.bundle")).unwrap(), b"old");
    assert_eq!(std::fs::read(layout.v2().join("a.bundle")).unwrap(), b"new");
    assert!(report.passed());
}

#[tokio::test]
async fn failed_download_surfaces_as_one_sided_path() {
    let root = TempDir::new().unwrap();
    write(root.path(), "old.csv", b"a.bundle,3,h-a\n");
    write(root.path(), "new.csv", b"a.bundle,3,h-a\nlost.bundle,4,h-lost\n");
    let fetcher = MemoryFetcher {
        blobs: HashMap::from([("h-a".to_string(), b"aaa".to_vec())]),
    };
    let layout = BundleLayout::new(root.path());
    let config = workflow(root.path());
    let tools = FakeTools::new(layout.v2());
    // The real patch output has the file the download lost.
    write(&layout.patched(), "lost.bundle", b"real");

    let report = run_workflow(&config, fetcher, &tools).await.unwrap();

    assert_eq!(report.fetch.unwrap().failed, 1);
    assert!(!report.passed());
    let right_only: Vec<_> = report
        .reconciliation
        .with_status(MatchStatus::RightOnly)
        .map(|result| result.relative_path.as_str())
        .collect();
    assert_eq!(right_only, vec!["lost.bundle"]);
}
