//! Fakes shared by unit tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rbridge_core::{FetchError, MetadataFetcher, PackageMetadata, PackageSource};

use crate::channel::{Channel, ChannelError, Command, ExecutionResponse, ExecutionStatus};
use crate::confirm::{ConfirmationRequest, Confirmer};

pub fn unique_temp_path(file_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    std::env::temp_dir().join(format!("rbridge-{nanos}-{file_name}"))
}

/// Metadata that passes every check under the default policy.
pub fn healthy_package(name: &str) -> PackageMetadata {
    let mut metadata = PackageMetadata::new(name, PackageSource::Cran);
    metadata.version = Some("1.2.0".to_string());
    metadata.maintainer = Some("Jane Doe <jane@example.org>".to_string());
    metadata.license = Some("MIT + file LICENSE".to_string());
    metadata.dependencies = vec!["rlang".to_string(), "vctrs".to_string()];
    metadata.published = Some(Utc::now() - ChronoDuration::days(1200));
    metadata.last_updated = Some(Utc::now() - ChronoDuration::days(12));
    metadata.monthly_downloads = 250_000;
    metadata
}

pub struct FakeFetcher {
    source: PackageSource,
    packages: HashMap<String, PackageMetadata>,
    downloads: HashMap<String, u64>,
    fail_downloads: bool,
    outage: bool,
    metadata_calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(source: PackageSource) -> Self {
        Self {
            source,
            packages: HashMap::new(),
            downloads: HashMap::new(),
            fail_downloads: false,
            outage: false,
            metadata_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_package(mut self, metadata: PackageMetadata) -> Self {
        self.packages.insert(metadata.name.clone(), metadata);
        self
    }

    pub fn with_downloads(mut self, package: &str, count: u64) -> Self {
        self.downloads.insert(package.to_string(), count);
        self
    }

    pub fn with_failing_downloads(mut self) -> Self {
        self.fail_downloads = true;
        self
    }

    /// Every metadata request fails with a transport error.
    pub fn unreachable(mut self) -> Self {
        self.outage = true;
        self
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataFetcher for FakeFetcher {
    fn source(&self) -> PackageSource {
        self.source
    }

    async fn fetch_metadata(&self, package: &str) -> Result<PackageMetadata, FetchError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.outage {
            return Err(FetchError::Transport {
                message: "connection refused".to_string(),
            });
        }
        self.packages
            .get(package)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                registry: self.source,
                package: package.to_string(),
            })
    }

    async fn fetch_monthly_downloads(&self, package: &str) -> Result<Option<u64>, FetchError> {
        if self.fail_downloads {
            return Err(FetchError::Transport {
                message: "download statistics offline".to_string(),
            });
        }
        Ok(self.downloads.get(package).copied())
    }
}

type Responder = Box<dyn Fn(&Command) -> Result<ExecutionResponse, ChannelError> + Send + Sync>;

/// In-memory channel whose listener answers through a closure.
pub struct FakeChannel {
    alive: AtomicBool,
    submitted: Mutex<Vec<Command>>,
    responder: Responder,
}

impl FakeChannel {
    pub fn new(
        responder: impl Fn(&Command) -> Result<ExecutionResponse, ChannelError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            alive: AtomicBool::new(true),
            submitted: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    /// Listener that completes every command with `output`.
    pub fn completing(output: &str) -> Self {
        let output = output.to_string();
        Self::new(move |command| Ok(completed(command, &output)))
    }

    pub fn dead() -> Self {
        let channel = Self::completing("");
        channel.alive.store(false, Ordering::SeqCst);
        channel
    }

    pub fn submitted(&self) -> Vec<Command> {
        self.submitted.lock().expect("submitted lock").clone()
    }
}

pub fn completed(command: &Command, output: &str) -> ExecutionResponse {
    ExecutionResponse {
        id: Some(command.id.clone()),
        status: ExecutionStatus::Completed,
        output: Some(output.to_string()),
        error: None,
        duration_ms: Some(3),
    }
}

#[async_trait]
impl Channel for FakeChannel {
    fn location(&self) -> String {
        "memory://fake".to_string()
    }

    fn is_listener_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn submit(&self, command: &Command) -> Result<(), ChannelError> {
        if !self.is_listener_alive() {
            return Err(ChannelError::ListenerUnavailable {
                mailbox: self.location(),
            });
        }
        self.submitted
            .lock()
            .expect("submitted lock")
            .push(command.clone());
        Ok(())
    }

    async fn await_result(
        &self,
        command_id: &str,
        timeout: Duration,
    ) -> Result<ExecutionResponse, ChannelError> {
        let command = self
            .submitted()
            .into_iter()
            .find(|command| command.id == command_id)
            .ok_or_else(|| ChannelError::Timeout {
                command_id: command_id.to_string(),
                timeout,
            })?;
        (self.responder)(&command)
    }
}

/// Confirmer with a fixed answer that records every prompt.
pub struct ScriptedConfirmer {
    answer: bool,
    requests: Mutex<Vec<ConfirmationRequest>>,
}

impl ScriptedConfirmer {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ConfirmationRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm(&self, request: &ConfirmationRequest) -> bool {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.answer
    }
}
