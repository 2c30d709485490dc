//! Tree reconciliation.
//!
//! Compares two directory trees path by path and content hash by content hash.
//! Reconciliation only reads, so running it again over unchanged trees
//! reproduces the same results.

use crate::error::SyncError;
use crate::walk::{display_path, list_files};
use md5::{Digest, Md5};
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Classification of one relative path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Present on both sides with identical content.
    Match,
    /// Present on both sides with different content.
    Mismatch,
    /// Present only in the left tree.
    LeftOnly,
    /// Present only in the right tree.
    RightOnly,
}

/// Comparison result for one relative path.
///
/// Sizes are filled in for every side the path exists on. Digests are only
/// computed when the path exists on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub relative_path: String,
    pub status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_size: Option<u64>,
}

impl ReconciliationResult {
    fn left_only(relative_path: &str, size: u64) -> Self {
        Self {
            relative_path: relative_path.to_string(),
            status: MatchStatus::LeftOnly,
            left_digest: None,
            right_digest: None,
            left_size: Some(size),
            right_size: None,
        }
    }

    fn right_only(relative_path: &str, size: u64) -> Self {
        Self {
            relative_path: relative_path.to_string(),
            status: MatchStatus::RightOnly,
            left_digest: None,
            right_digest: None,
            left_size: None,
            right_size: Some(size),
        }
    }
}

/// Counts per [`MatchStatus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub matched: usize,
    pub mismatched: usize,
    pub left_only: usize,
    pub right_only: usize,
}

/// Outcome of reconciling two trees, ordered by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub results: Vec<ReconciliationResult>,
}

impl Reconciliation {
    pub fn summary(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        for result in &self.results {
            match result.status {
                MatchStatus::Match => summary.matched += 1,
                MatchStatus::Mismatch => summary.mismatched += 1,
                MatchStatus::LeftOnly => summary.left_only += 1,
                MatchStatus::RightOnly => summary.right_only += 1,
            }
        }
        summary
    }

    /// True when there are no mismatches and no one-sided paths.
    pub fn passed(&self) -> bool {
        self.results
            .iter()
            .all(|result| result.status == MatchStatus::Match)
    }

    pub fn with_status(&self, status: MatchStatus) -> impl Iterator<Item = &ReconciliationResult> {
        self.results
            .iter()
            .filter(move |result| result.status == status)
    }

    /// Human-readable report: mismatches, then one-sided paths, then a summary line.
    pub fn render(&self, left_label: &str, right_label: &str) -> String {
        let mut out = String::new();
        let width = left_label.len().max(right_label.len()) + 1;

        for result in self.with_status(MatchStatus::Mismatch) {
            let _ = writeln!(out, "  MISMATCH: {}", result.relative_path);
            let _ = writeln!(
                out,
                "    {:<width$} {} ({} bytes)",
                format!("{}:", left_label),
                result.left_digest.as_deref().unwrap_or("-"),
                result.left_size.unwrap_or_default(),
                width = width
            );
            let _ = writeln!(
                out,
                "    {:<width$} {} ({} bytes)",
                format!("{}:", right_label),
                result.right_digest.as_deref().unwrap_or("-"),
                result.right_size.unwrap_or_default(),
                width = width
            );
        }

        for (status, label) in [
            (MatchStatus::LeftOnly, left_label),
            (MatchStatus::RightOnly, right_label),
        ] {
            let paths: Vec<&str> = self
                .with_status(status)
                .map(|result| result.relative_path.as_str())
                .collect();
            if paths.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n  Only in {} ({}):", label, paths.len());
            for path in paths {
                let _ = writeln!(out, "    {}", path);
            }
        }

        let summary = self.summary();
        let _ = writeln!(
            out,
            "\nResult: {} matched, {} mismatched, {} only in {}, {} only in {}",
            summary.matched,
            summary.mismatched,
            summary.left_only,
            left_label,
            summary.right_only,
            right_label
        );
        out
    }

    /// Pretty-printed JSON of every result.
    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Computes the MD5 of a file as lowercase hex.
///
/// The file is read in chunks so large bundles are never held in memory.
pub fn file_digest(path: &Path) -> Result<String, SyncError> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Reconciles the tree under `left` against the tree under `right`.
///
/// Every relative path in the union of both trees yields exactly one result.
/// Files present on both sides are hashed and compared. A missing root is an
/// empty tree, so comparing against it reports every path of the other side
/// as one-sided rather than failing.
///
/// # Arguments
///
/// * `left` - Root of the reference tree
/// * `right` - Root of the candidate tree
///
/// # Returns
///
/// The results ordered by relative path, or an error if a listed file
/// cannot be read.
pub fn reconcile(left: &Path, right: &Path) -> Result<Reconciliation, SyncError> {
    let left_paths = list_files(left)?;
    let right_paths = list_files(right)?;
    info!(
        "Reconciling {} ({} files) against {} ({} files)",
        left.display(),
        left_paths.len(),
        right.display(),
        right_paths.len()
    );

    let mut results = Vec::with_capacity(left_paths.len().max(right_paths.len()));
    for relative_path in left_paths.union(&right_paths) {
        let result = match (
            left_paths.contains(relative_path),
            right_paths.contains(relative_path),
        ) {
            (true, false) => ReconciliationResult::left_only(
                &display_path(relative_path),
                std::fs::metadata(left.join(relative_path))?.len(),
            ),
            (false, true) => ReconciliationResult::right_only(
                &display_path(relative_path),
                std::fs::metadata(right.join(relative_path))?.len(),
            ),
            _ => compare_file(left, right, relative_path)?,
        };
        debug!("{:?}: {}", result.status, result.relative_path);
        results.push(result);
    }
    // Path order compares component by component; reports sort on the rendered text.
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let reconciliation = Reconciliation { results };
    let summary = reconciliation.summary();
    info!(
        "Reconciliation: {} matched, {} mismatched, {} left-only, {} right-only",
        summary.matched, summary.mismatched, summary.left_only, summary.right_only
    );
    Ok(reconciliation)
}

fn compare_file(
    left: &Path,
    right: &Path,
    relative_path: &Path,
) -> Result<ReconciliationResult, SyncError> {
    let left_file = left.join(relative_path);
    let right_file = right.join(relative_path);

    let left_digest = file_digest(&left_file)?;
    let right_digest = file_digest(&right_file)?;
    let left_size = std::fs::metadata(&left_file)?.len();
    let right_size = std::fs::metadata(&right_file)?.len();

    let status = if left_digest == right_digest {
        MatchStatus::Match
    } else {
        MatchStatus::Mismatch
    };

    Ok(ReconciliationResult {
        relative_path: display_path(relative_path),
        status,
        left_digest: Some(left_digest),
        right_digest: Some(right_digest),
        left_size: Some(left_size),
        right_size: Some(right_size),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn tree(files: &[(&str, &[u8])]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (relative, contents) in files {
            let path = dir.path().join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        dir
    }

    fn paths_with(reconciliation: &Reconciliation, status: MatchStatus) -> BTreeSet<String> {
        reconciliation
            .with_status(status)
            .map(|result| result.relative_path.clone())
            .collect()
    }

    #[test]
    fn digest_of_known_content() {
        let dir = tree(&[("hello", b"hello\n")]);
        assert_eq!(
            file_digest(&dir.path().join("hello")).unwrap(),
            "b1946ac92492d2347c6235b4d2611184"
        );
    }

    #[test]
    fn identical_trees_match() {
        let left = tree(&[("x", b"AAAA")]);
        let right = tree(&[("x", b"AAAA")]);

        let reconciliation = reconcile(left.path(), right.path()).unwrap();

        assert_eq!(reconciliation.results.len(), 1);
        assert_eq!(reconciliation.results[0].status, MatchStatus::Match);
        assert!(reconciliation.passed());
    }

    #[test]
    fn differing_content_is_a_mismatch_with_detail() {
        let left = tree(&[("x", b"AAAA")]);
        let right = tree(&[("x", b"BBBB")]);

        let reconciliation = reconcile(left.path(), right.path()).unwrap();

        assert_eq!(reconciliation.results.len(), 1);
        let result = &reconciliation.results[0];
        assert_eq!(result.status, MatchStatus::Mismatch);
        assert_eq!(result.left_size, Some(4));
        assert_eq!(result.right_size, Some(4));
        assert_ne!(result.left_digest, result.right_digest);
        assert!(!reconciliation.passed());
    }

    #[test]
    fn path_missing_on_right_is_left_only() {
        let left = tree(&[("y", b"Z")]);
        let right = tree(&[]);

        let reconciliation = reconcile(left.path(), right.path()).unwrap();

        assert_eq!(reconciliation.results.len(), 1);
        let result = &reconciliation.results[0];
        assert_eq!(result.status, MatchStatus::LeftOnly);
        assert_eq!(result.left_digest, None);
        assert_eq!(result.left_size, Some(1));
        assert_eq!(result.right_size, None);
        assert!(!reconciliation.passed());
    }

    #[test]
    fn missing_root_makes_everything_one_sided() {
        let left = tree(&[("a", b"1"), ("b/c", b"2")]);
        let absent = left.path().join("does-not-exist");

        let reconciliation = reconcile(&absent, left.path()).unwrap();

        assert_eq!(reconciliation.summary().right_only, 2);
        assert_eq!(reconciliation.summary().left_only, 0);
        assert!(!reconciliation.passed());
    }

    #[test]
    fn results_are_ordered_and_cover_the_union_once() {
        let left = tree(&[("b", b"1"), ("a/z", b"2"), ("shared", b"s")]);
        let right = tree(&[("c", b"3"), ("a/z", b"2"), ("shared", b"t")]);

        let reconciliation = reconcile(left.path(), right.path()).unwrap();

        let paths: Vec<&str> = reconciliation
            .results
            .iter()
            .map(|result| result.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["a/z", "b", "c", "shared"]);
        assert_eq!(
            reconciliation.summary(),
            ReconcileSummary {
                matched: 1,
                mismatched: 1,
                left_only: 1,
                right_only: 1,
            }
        );
    }

    #[test]
    fn swapping_sides_swaps_one_sided_labels() {
        let a = tree(&[("same", b"1"), ("diff", b"left"), ("only-a", b"a")]);
        let b = tree(&[("same", b"1"), ("diff", b"right"), ("only-b", b"b")]);

        let forward = reconcile(a.path(), b.path()).unwrap();
        let backward = reconcile(b.path(), a.path()).unwrap();

        assert_eq!(
            paths_with(&forward, MatchStatus::Mismatch),
            paths_with(&backward, MatchStatus::Mismatch)
        );
        assert_eq!(
            paths_with(&forward, MatchStatus::LeftOnly),
            paths_with(&backward, MatchStatus::RightOnly)
        );
        assert_eq!(
            paths_with(&forward, MatchStatus::RightOnly),
            paths_with(&backward, MatchStatus::LeftOnly)
        );
        assert_eq!(forward.passed(), backward.passed());
    }

    #[test]
    fn rerunning_reproduces_identical_results() {
        let left = tree(&[("x", b"AAAA"), ("y", b"B")]);
        let right = tree(&[("x", b"AAAB"), ("z", b"C")]);

        let first = reconcile(left.path(), right.path()).unwrap();
        let second = reconcile(left.path(), right.path()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn report_lists_mismatches_before_one_sided_paths() {
        let left = tree(&[("m", b"AAAA"), ("l", b"x")]);
        let right = tree(&[("m", b"BBBBBB"), ("r", b"y")]);

        let reconciliation = reconcile(left.path(), right.path()).unwrap();
        let report = reconciliation.render("v2", "patched");

        let mismatch_at = report.find("MISMATCH: m").unwrap();
        let left_only_at = report.find("Only in v2 (1):").unwrap();
        let right_only_at = report.find("Only in patched (1):").unwrap();
        assert!(mismatch_at < left_only_at && left_only_at < right_only_at);
        assert!(report.contains("(6 bytes)"));
        assert!(report
            .trim_end()
            .ends_with("Result: 0 matched, 1 mismatched, 1 only in v2, 1 only in patched"));
    }

    #[test]
    fn report_serializes_to_json() {
        let left = tree(&[("y", b"Z")]);
        let right = tree(&[]);

        let reconciliation = reconcile(left.path(), right.path()).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&reconciliation.to_json().unwrap()).unwrap();

        assert_eq!(json["results"][0]["relative_path"], "y");
        assert_eq!(json["results"][0]["status"], "left_only");
        assert!(json["results"][0].get("left_digest").is_none());
        assert!(json["results"][0].get("right_size").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_are_reconciled_individually() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let left = TempDir::new().unwrap();
        let right = TempDir::new().unwrap();
        std::fs::write(left.path().join(OsStr::from_bytes(b"\xffa.bin")), b"1").unwrap();
        std::fs::write(left.path().join(OsStr::from_bytes(b"\xfea.bin")), b"2").unwrap();
        std::fs::write(right.path().join(OsStr::from_bytes(b"\xffa.bin")), b"1").unwrap();

        let reconciliation = reconcile(left.path(), right.path()).unwrap();

        assert_eq!(reconciliation.results.len(), 2);
        assert_eq!(
            reconciliation.summary(),
            ReconcileSummary {
                matched: 1,
                mismatched: 0,
                left_only: 1,
                right_only: 0,
            }
        );
        let only_left: Vec<_> = reconciliation.with_status(MatchStatus::LeftOnly).collect();
        assert_eq!(only_left[0].left_size, Some(1));
    }
}
