//! Command/result exchange with the R listener.
//!
//! One command is outstanding at a time. Results are matched to commands by id;
//! a result whose id is absent or `"*"` answers whichever command is outstanding.

mod mailbox;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rbridge_core::PackageSource;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use mailbox::MailboxChannel;

/// Result id that matches any outstanding command.
pub const WILDCARD_ID: &str = "*";

/// Work the listener performs, serialized as the `action` tag of `command.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CommandAction {
    /// Run whatever the editor currently has active.
    RunCurrent,
    RunCode {
        code: String,
    },
    RunFile {
        path: PathBuf,
    },
    RenderDocument {
        path: PathBuf,
    },
    InstallPackages {
        packages: Vec<String>,
        source: PackageSource,
    },
    /// Ask for the names of installed packages, one per output line.
    ListInstalled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    #[serde(flatten)]
    pub action: CommandAction,
    pub submitted_at: DateTime<Utc>,
}

impl Command {
    pub fn new(action: CommandAction) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action,
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Error,
    Rejected,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_success(self) -> bool {
        self == Self::Completed
    }
}

/// Contents of `result.json` as written by the listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionResponse {
    /// Whether this result is the answer to `command_id`.
    pub fn answers(&self, command_id: &str) -> bool {
        match self.id.as_deref() {
            None | Some(WILDCARD_ID) => true,
            Some(id) => id == command_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no listener is attached to mailbox {mailbox}")]
    ListenerUnavailable { mailbox: String },
    #[error("command {command_id} is still waiting for its result")]
    CommandOutstanding { command_id: String },
    #[error("no result for command {command_id} within {}ms", timeout.as_millis())]
    Timeout {
        command_id: String,
        timeout: Duration,
    },
    #[error("mailbox I/O failed at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Transport between the CLI and the listener living in the R session.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable location used in diagnostics.
    fn location(&self) -> String;

    fn is_listener_alive(&self) -> bool;

    /// Publishes a command for the listener.
    ///
    /// Fails when no listener is alive or a previous command is still awaiting its result.
    async fn submit(&self, command: &Command) -> Result<(), ChannelError>;

    /// Waits until a result answering `command_id` appears, consuming it.
    async fn await_result(
        &self,
        command_id: &str,
        timeout: Duration,
    ) -> Result<ExecutionResponse, ChannelError>;
}

#[cfg(test)]
#[path = "../tests/channel.rs"]
mod tests;
