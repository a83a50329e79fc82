use std::time::Duration;

use thiserror::Error;

use crate::channel::ChannelError;
use crate::types::BlockedPackage;

/// Failures surfaced to the user by `run`, `install` and `check`.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(
        "no R listener is running for mailbox {mailbox}; start the listener in your R session and retry"
    )]
    ListenerUnavailable { mailbox: String },
    #[error("source file not found: {path}")]
    SourceFileNotFound { path: String },
    #[error("execution rejected: {reason}")]
    ExecutionRejected { reason: String },
    #[error(
        "no result from the R session after {}s; it may still be running command {command_id}",
        timeout.as_secs()
    )]
    ChannelTimeout {
        command_id: String,
        timeout: Duration,
    },
    #[error("installation blocked: {}", describe_blocked(blocked))]
    InstallationBlocked { blocked: Vec<BlockedPackage> },
    #[error("installation cancelled: {reason}")]
    InstallationCancelled { reason: String },
    #[error("unsupported package source '{requested}' (supported: {supported})")]
    UnsupportedSource {
        requested: String,
        supported: String,
    },
    #[error(transparent)]
    Channel(ChannelError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ChannelError> for BridgeError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::ListenerUnavailable { mailbox } => Self::ListenerUnavailable { mailbox },
            ChannelError::Timeout {
                command_id,
                timeout,
            } => Self::ChannelTimeout {
                command_id,
                timeout,
            },
            other => Self::Channel(other),
        }
    }
}

fn describe_blocked(blocked: &[BlockedPackage]) -> String {
    blocked
        .iter()
        .map(|entry| {
            if entry.errors.is_empty() {
                format!("{} ({})", entry.package, entry.safety_level)
            } else {
                format!(
                    "{} ({}): {}",
                    entry.package,
                    entry.safety_level,
                    entry.errors.join("; ")
                )
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
