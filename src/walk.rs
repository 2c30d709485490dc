//! Directory tree listing.

use crate::error::SyncError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Lists every regular file under `root` as a path relative to `root`.
///
/// Paths keep their raw file names, so names that are not valid UTF-8 can
/// still be joined back onto a root. Use [`display_path`] for reporting.
///
/// Symbolic links are not followed and are not listed, nor are special files.
/// A root that does not exist yields an empty set. Entries below the root that
/// cannot be read are logged and left out.
pub fn list_files(root: &Path) -> Result<BTreeSet<PathBuf>, SyncError> {
    let mut files = BTreeSet::new();

    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            warn!("{} is not a directory, treating it as empty", root.display());
            return Ok(files);
        }
        Err(_) => return Ok(files),
    }

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.insert(relative.to_path_buf());
        }
    }

    Ok(files)
}

/// Renders a relative path with `/` separators on every platform.
///
/// Non-UTF-8 name bytes are replaced, so the result is for display only.
pub fn display_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
