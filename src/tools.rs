//! External diff/patch tools.
//!
//! The tools are opaque: they read and write directory trees and signal
//! success through their exit code.

use crate::error::SyncError;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::info;

/// An external program plus the arguments that precede the directory arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Short name used in logs and errors.
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Runs external tools.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Runs `tool` with its fixed arguments followed by `dirs`.
    ///
    /// Returns the exit code, or `None` when the process ended without one.
    async fn run(&self, tool: &ToolCommand, dirs: &[PathBuf]) -> Result<Option<i32>, SyncError>;
}

/// Runs tools as child processes that share this process's stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, tool: &ToolCommand, dirs: &[PathBuf]) -> Result<Option<i32>, SyncError> {
        let rendered: Vec<String> = dirs.iter().map(|dir| dir.display().to_string()).collect();
        info!("> {} {}", tool, rendered.join(" "));

        let status = Command::new(&tool.program)
            .args(&tool.args)
            .args(dirs)
            .status()
            .await
            .map_err(|source| SyncError::ToolSpawn {
                tool: tool.name.clone(),
                source,
            })?;

        Ok(status.code())
    }
}

/// Turns an unsuccessful exit into [`SyncError::ToolFailed`].
pub fn ensure_success(tool: &ToolCommand, code: Option<i32>) -> Result<(), SyncError> {
    match code {
        Some(0) => Ok(()),
        code => Err(SyncError::ToolFailed {
            tool: tool.name.clone(),
            code,
        }),
    }
}
