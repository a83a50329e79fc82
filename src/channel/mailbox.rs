use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use super::{Channel, ChannelError, Command, ExecutionResponse};

pub const LOCK_FILE: &str = "listener.lock";
pub const COMMAND_FILE: &str = "command.json";
pub const RESULT_FILE: &str = "result.json";
const COMMAND_STAGING_FILE: &str = "command.json.tmp";
/// Deadline used when `now + timeout` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// File-based channel: the listener owns `listener.lock`, the CLI writes
/// `command.json` and the listener answers through `result.json`.
pub struct MailboxChannel {
    dir: PathBuf,
    poll_interval: Duration,
    outstanding: Mutex<Option<String>>,
}

impl MailboxChannel {
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            outstanding: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn outstanding_id(&self) -> Option<String> {
        self.outstanding
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn set_outstanding(&self, value: Option<String>) {
        match self.outstanding.lock() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    fn clear_outstanding_if(&self, command_id: &str) {
        if self.outstanding_id().as_deref() == Some(command_id) {
            self.set_outstanding(None);
        }
    }

    fn write_command(&self, command: &Command) -> Result<(), ChannelError> {
        let payload = serde_json::to_vec_pretty(command)?;
        let staging = self.dir.join(COMMAND_STAGING_FILE);
        let target = self.dir.join(COMMAND_FILE);
        fs::write(&staging, payload).map_err(|source| io_error(&staging, source))?;
        // The listener must never observe a partially written command.
        fs::rename(&staging, &target).map_err(|source| io_error(&target, source))
    }

    /// Reads and consumes `result.json` if it answers `command_id`.
    fn take_result(&self, command_id: &str) -> Result<Option<ExecutionResponse>, ChannelError> {
        let path = self.dir.join(RESULT_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(&path, source)),
        };

        let response: ExecutionResponse = match serde_json::from_str(&raw) {
            Ok(response) => response,
            Err(err) => {
                // Usually a write still in progress; try again on the next poll.
                debug!(path = %path.display(), error = %err, "result file not parseable yet");
                return Ok(None);
            }
        };

        if !response.answers(command_id) {
            debug!(
                expected = command_id,
                found = response.id.as_deref().unwrap_or_default(),
                "ignoring result for a different command"
            );
            return Ok(None);
        }

        remove_if_present(&path)?;
        self.retire_command(command_id)?;
        Ok(Some(response))
    }

    /// Deletes `command.json` once it has been answered, unless it was replaced by another command.
    fn retire_command(&self, command_id: &str) -> Result<(), ChannelError> {
        let path = self.dir.join(COMMAND_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(io_error(&path, source)),
        };
        match serde_json::from_str::<Command>(&raw) {
            Ok(command) if command.id == command_id => remove_if_present(&path),
            Ok(_) => Ok(()),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "leaving unreadable command file in place");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Channel for MailboxChannel {
    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    fn is_listener_alive(&self) -> bool {
        self.dir.join(LOCK_FILE).exists()
    }

    async fn submit(&self, command: &Command) -> Result<(), ChannelError> {
        if !self.is_listener_alive() {
            return Err(ChannelError::ListenerUnavailable {
                mailbox: self.location(),
            });
        }
        if let Some(command_id) = self.outstanding_id() {
            return Err(ChannelError::CommandOutstanding { command_id });
        }

        remove_if_present(&self.dir.join(RESULT_FILE))?;
        self.write_command(command)?;
        self.set_outstanding(Some(command.id.clone()));
        debug!(command_id = %command.id, mailbox = %self.dir.display(), "command submitted");
        Ok(())
    }

    async fn await_result(
        &self,
        command_id: &str,
        timeout: Duration,
    ) -> Result<ExecutionResponse, ChannelError> {
        let started = Instant::now();
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        loop {
            if let Some(response) = self.take_result(command_id)? {
                self.clear_outstanding_if(command_id);
                return Ok(response);
            }

            let now = Instant::now();
            if now >= deadline {
                self.clear_outstanding_if(command_id);
                warn!(
                    command_id,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "no result before deadline"
                );
                return Err(ChannelError::Timeout {
                    command_id: command_id.to_string(),
                    timeout,
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

fn remove_if_present(path: &Path) -> Result<(), ChannelError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(io_error(path, source)),
    }
}

fn io_error(path: &Path, source: io::Error) -> ChannelError {
    ChannelError::Io {
        path: path.display().to_string(),
        source,
    }
}
