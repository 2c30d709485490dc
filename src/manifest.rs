//! Manifest loading.
//!
//! A manifest is a headerless comma-separated file where each row reads
//! `name,size,digest`. The size is informational and a row is kept even when
//! it does not parse. Rows without a name or digest are skipped.

use crate::error::SyncError;
use crate::types::ManifestEntry;
use std::collections::{BTreeSet, HashSet};
use std::io;
use std::path::{Component, Path};
use tracing::{debug, info, warn};

/// Loads a manifest file.
///
/// A missing file is treated as an empty manifest so that a version with no
/// published resources degrades to an empty fetch batch.
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>, SyncError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("Manifest {} not found, treating it as empty", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let entries = parse_manifest(&text);
    info!("Loaded {} entries from {}", entries.len(), path.display());

    let duplicates = duplicate_names(&entries);
    if !duplicates.is_empty() {
        warn!(
            "Manifest {} lists {} name(s) more than once, the last download to finish wins: {:?}",
            path.display(),
            duplicates.len(),
            duplicates
        );
    }

    Ok(entries)
}

/// Decodes manifest rows, preserving their order.
pub fn parse_manifest(text: &str) -> Vec<ManifestEntry> {
    let mut entries = Vec::new();
    let mut skipped = 0usize;

    for (index, line) in text.lines().enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            continue;
        }
        match decode_row(line) {
            Some(entry) => entries.push(entry),
            None => {
                skipped += 1;
                debug!("Skipping malformed manifest row {}: {:?}", index + 1, line);
            }
        }
    }

    if skipped > 0 {
        debug!("Skipped {} malformed manifest row(s)", skipped);
    }
    entries
}

/// Names that appear in more than one entry.
pub fn duplicate_names(entries: &[ManifestEntry]) -> BTreeSet<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut duplicates = BTreeSet::new();
    for entry in entries {
        if !seen.insert(entry.name.as_str()) {
            duplicates.insert(entry.name.clone());
        }
    }
    duplicates
}

fn decode_row(line: &str) -> Option<ManifestEntry> {
    let fields = split_fields(line);
    if fields.len() < 3 {
        return None;
    }

    let name = fields[0].trim();
    let size = fields[1].trim();
    let digest = fields[2].trim();

    if name.is_empty() || digest.is_empty() || !is_relative_within_root(name) {
        return None;
    }
    let expected_size = size.parse::<u64>().ok();
    if expected_size.is_none() {
        debug!("Manifest size {:?} for {} is not a byte count", size, name);
    }

    Some(ManifestEntry {
        name: name.to_string(),
        expected_size,
        digest: digest.to_string(),
    })
}

/// Splits one row on commas, honouring double-quoted fields and `""` escapes.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.trim().is_empty() => {
                current.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// True when joining `name` onto a root cannot leave that root.
fn is_relative_within_root(name: &str) -> bool {
    Path::new(name)
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
