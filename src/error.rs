//! Error types for bundle sync operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while fetching, walking or reconciling bundles.
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// HTTP request error during download (timeout, connection failure, non-2xx status).
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization error while rendering a reconciliation report.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// Directory traversal error below an existing root.
    #[error(transparent)]
    WalkError(#[from] walkdir::Error),

    /// A destination root could not be created, so nothing in its batch can run.
    #[error("Destination root {path} is not writable: {source}")]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An external tool could not be started.
    #[error("Failed to start {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    /// An external tool exited unsuccessfully.
    #[error("{tool} failed with {}", exit_description(.code))]
    ToolFailed { tool: String, code: Option<i32> },
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
