//! Orchestrates `run`, `install` and `check` requests against the R listener.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rbridge_core::{PackageSafetyReport, PackageSource};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::audit_log::{AuditLogger, AuditRecord};
use crate::cache::ReportCache;
use crate::channel::{Channel, Command, CommandAction, ExecutionResponse, MailboxChannel};
use crate::config::RbridgeConfig;
use crate::confirm::{ConfirmationRequest, Confirmer, TerminalConfirmer};
use crate::error::BridgeError;
use crate::registries::FetcherCatalog;
use crate::types::{BlockedPackage, ExecutionOutcome, InstallOutcome, InstallStatus};
use crate::validator::SafetyValidator;

const DOCUMENT_SUFFIXES: &[&str] = &[".rmd", ".qmd", ".rmarkdown"];
const SCRIPT_SUFFIXES: &[&str] = &[".r"];
const LIST_INSTALLED_TIMEOUT: Duration = Duration::from_secs(15);
const AUDIT_LOG_FAILURE_CONTEXT: &str = "failed to append audit log record";

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Skip the confirmation prompt.
    pub assume_yes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub assume_yes: bool,
    pub skip_safety_checks: bool,
    /// Source key; the configured default applies when absent.
    pub source: Option<String>,
}

/// What a `run` input resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    CurrentBuffer,
    Code(String),
    Script(PathBuf),
    Document(PathBuf),
}

impl RunTarget {
    /// Classifies raw input. File-backed targets must exist.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SourceFileNotFound`] when a script or document path is missing.
    pub fn classify(input: Option<&str>) -> Result<Self, BridgeError> {
        let Some(input) = input.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(Self::CurrentBuffer);
        };

        if input.contains('\n') {
            return Ok(Self::Code(input.to_string()));
        }
        let lowered = input.to_ascii_lowercase();
        if has_suffix(&lowered, DOCUMENT_SUFFIXES) {
            return resolve_file(input).map(Self::Document);
        }
        if has_suffix(&lowered, SCRIPT_SUFFIXES) {
            return resolve_file(input).map(Self::Script);
        }
        Ok(Self::Code(input.to_string()))
    }

    fn confirmation_details(&self) -> Vec<String> {
        match self {
            Self::CurrentBuffer => Vec::new(),
            Self::Code(code) => code.lines().map(ToOwned::to_owned).collect(),
            Self::Script(path) => vec![format!("source file: {}", path.display())],
            Self::Document(path) => vec![format!("render document: {}", path.display())],
        }
    }

    fn into_action(self) -> CommandAction {
        match self {
            Self::CurrentBuffer => CommandAction::RunCurrent,
            Self::Code(code) => CommandAction::RunCode { code },
            Self::Script(path) => CommandAction::RunFile { path },
            Self::Document(path) => CommandAction::RenderDocument { path },
        }
    }
}

/// Core runtime service shared by every CLI subcommand.
#[derive(Clone)]
pub struct BridgeService {
    config: Arc<RbridgeConfig>,
    channel: Arc<dyn Channel>,
    validator: Arc<SafetyValidator>,
    confirmer: Arc<dyn Confirmer>,
    audit_logger: Arc<AuditLogger>,
}

impl BridgeService {
    /// Wires the mailbox channel, registry fetchers, on-disk cache and audit log.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache or audit log cannot be opened.
    pub fn new(config: RbridgeConfig) -> anyhow::Result<Self> {
        let channel = MailboxChannel::new(config.mailbox_dir(), config.poll_interval());
        let cache = ReportCache::open(config.cache.ttl_minutes)?;
        let validator = SafetyValidator::new(
            FetcherCatalog::register_default(config.fetch_timeout()),
            config.check_policy(),
            config.policy_fingerprint()?,
            Some(Arc::new(cache)),
        );
        let audit_logger = AuditLogger::open()?;
        Ok(Self::with_parts(
            config,
            Arc::new(channel),
            validator,
            Arc::new(TerminalConfirmer),
            audit_logger,
        ))
    }

    pub fn with_parts(
        config: RbridgeConfig,
        channel: Arc<dyn Channel>,
        validator: SafetyValidator,
        confirmer: Arc<dyn Confirmer>,
        audit_logger: AuditLogger,
    ) -> Self {
        Self {
            config: Arc::new(config),
            channel,
            validator: Arc::new(validator),
            confirmer,
            audit_logger: Arc::new(audit_logger),
        }
    }

    /// Runs code, a script, a document or the active editor buffer in the R session.
    ///
    /// # Errors
    ///
    /// Fails on a missing source file, a declined confirmation, a dead listener
    /// or when no result arrives in time.
    pub async fn run(
        &self,
        input: Option<&str>,
        options: RunOptions,
    ) -> Result<ExecutionOutcome, BridgeError> {
        let target = RunTarget::classify(input)?;

        if !options.assume_yes && target != RunTarget::CurrentBuffer {
            let request = ConfirmationRequest {
                prompt: "Run this in the R session?".to_string(),
                details: target.confirmation_details(),
            };
            if !self.confirmer.confirm(&request) {
                return Err(BridgeError::ExecutionRejected {
                    reason: "declined at confirmation prompt".to_string(),
                });
            }
        }

        self.ensure_listener()?;
        let command = Command::new(target.into_action());
        let response = self.dispatch(&command, self.config.run_timeout()).await?;
        info!(command_id = %command.id, status = ?response.status, "run finished");
        Ok(ExecutionOutcome::from_response(&command.id, response))
    }

    /// Validates and installs `packages` as one batch.
    ///
    /// # Errors
    ///
    /// Fails when any package is blocked, confirmation is declined, the listener is
    /// down or the install command times out.
    pub async fn install(
        &self,
        packages: &[String],
        options: InstallOptions,
    ) -> Result<InstallOutcome, BridgeError> {
        let source = self.resolve_source(options.source.as_deref())?;
        let requested = dedupe(packages);

        let run_checks = self.config.safety.enabled && !options.skip_safety_checks;
        let reports = if run_checks {
            self.validate_all(&requested, source).await?
        } else {
            let reason = if options.skip_safety_checks {
                "safety checks skipped on request"
            } else {
                "safety checks disabled in configuration"
            };
            for package in &requested {
                self.log_audit(AuditRecord::checks_skipped(package, source, reason))?;
            }
            Vec::new()
        };

        let blocked = reports
            .iter()
            .filter(|report| !report.allow_installation)
            .map(BlockedPackage::from_report)
            .collect::<Vec<_>>();
        if !blocked.is_empty() {
            return Err(BridgeError::InstallationBlocked { blocked });
        }

        let flagged = reports
            .iter()
            .filter(|report| report.safety_level.requires_confirmation())
            .collect::<Vec<_>>();
        if !flagged.is_empty() && !options.assume_yes {
            let request = ConfirmationRequest {
                prompt: "Install despite these findings?".to_string(),
                details: confirmation_details(&flagged),
            };
            if !self.confirmer.confirm(&request) {
                return Err(BridgeError::InstallationCancelled {
                    reason: "declined at confirmation prompt".to_string(),
                });
            }
        }

        self.ensure_listener()?;

        let installed = self.installed_packages().await;
        let (already_installed, pending): (Vec<String>, Vec<String>) = requested
            .iter()
            .cloned()
            .partition(|package| installed.contains(&installed_name(package, source)));

        if pending.is_empty() {
            info!("all requested packages are already installed");
            return Ok(InstallOutcome {
                status: InstallStatus::Completed,
                requested,
                submitted: Vec::new(),
                already_installed,
                reports,
                output: None,
                error: None,
            });
        }

        let command = Command::new(CommandAction::InstallPackages {
            packages: pending.clone(),
            source,
        });
        let response = self
            .dispatch(&command, self.config.install_timeout())
            .await?;
        let status = InstallStatus::from_execution(response.status);
        for package in &pending {
            self.log_audit(AuditRecord::install_result(package, source, status))?;
        }
        info!(command_id = %command.id, ?status, packages = pending.len(), "install finished");

        Ok(InstallOutcome {
            status,
            requested,
            submitted: pending,
            already_installed,
            reports,
            output: response.output,
            error: response.error,
        })
    }

    /// Produces a safety report without installing anything.
    pub async fn check(
        &self,
        package: &str,
        source: Option<&str>,
    ) -> Result<PackageSafetyReport, BridgeError> {
        let source = self.resolve_source(source)?;
        self.validator.validate(package, source).await
    }

    fn resolve_source(&self, raw: Option<&str>) -> Result<PackageSource, BridgeError> {
        let Some(raw) = raw else {
            return Ok(self.config.safety.default_source);
        };
        PackageSource::from_key(raw).ok_or_else(|| BridgeError::UnsupportedSource {
            requested: raw.to_string(),
            supported: [PackageSource::Cran, PackageSource::Github]
                .map(PackageSource::key)
                .join(", "),
        })
    }

    fn ensure_listener(&self) -> Result<(), BridgeError> {
        if self.channel.is_listener_alive() {
            return Ok(());
        }
        Err(BridgeError::ListenerUnavailable {
            mailbox: self.channel.location(),
        })
    }

    async fn dispatch(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<ExecutionResponse, BridgeError> {
        self.channel.submit(command).await?;
        debug!(command_id = %command.id, "waiting for listener");
        Ok(self.channel.await_result(&command.id, timeout).await?)
    }

    async fn validate_all(
        &self,
        packages: &[String],
        source: PackageSource,
    ) -> Result<Vec<PackageSafetyReport>, BridgeError> {
        let mut tasks = JoinSet::new();
        for (index, package) in packages.iter().enumerate() {
            let validator = Arc::clone(&self.validator);
            let package = package.clone();
            tasks.spawn(async move { (index, validator.validate(&package, source).await) });
        }

        let mut reports = Vec::with_capacity(packages.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.context("safety validation task failed")?;
            reports.push((index, result?));
        }
        reports.sort_by_key(|(index, _)| *index);

        let reports = reports
            .into_iter()
            .map(|(_, report)| report)
            .collect::<Vec<_>>();
        for report in &reports {
            self.log_audit(AuditRecord::safety_decision(report))?;
        }
        Ok(reports)
    }

    /// Names of packages already present in the R library. Failure is non-fatal.
    async fn installed_packages(&self) -> HashSet<String> {
        let command = Command::new(CommandAction::ListInstalled);
        match self.dispatch(&command, LIST_INSTALLED_TIMEOUT).await {
            Ok(response) if response.status.is_success() => {
                parse_package_list(response.output.as_deref().unwrap_or_default())
            }
            Ok(response) => {
                warn!(status = ?response.status, "listing installed packages failed; sending all");
                HashSet::new()
            }
            Err(err) => {
                warn!(error = %err, "listing installed packages failed; sending all");
                HashSet::new()
            }
        }
    }

    fn log_audit(&self, record: AuditRecord) -> Result<(), BridgeError> {
        self.audit_logger
            .log(record)
            .context(AUDIT_LOG_FAILURE_CONTEXT)
            .map_err(BridgeError::from)
    }
}

fn has_suffix(lowered: &str, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|suffix| lowered.ends_with(suffix))
}

fn resolve_file(input: &str) -> Result<PathBuf, BridgeError> {
    let path = Path::new(input);
    if !path.is_file() {
        return Err(BridgeError::SourceFileNotFound {
            path: input.to_string(),
        });
    }
    std::path::absolute(path)
        .with_context(|| format!("failed to resolve {input}"))
        .map_err(BridgeError::from)
}

fn dedupe(packages: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    packages
        .iter()
        .map(|package| package.trim())
        .filter(|package| !package.is_empty())
        .filter(|package| seen.insert(package.to_string()))
        .map(ToOwned::to_owned)
        .collect()
}

/// Library name a request installs under. GitHub requests are `owner/repo`.
fn installed_name(package: &str, source: PackageSource) -> String {
    match source {
        PackageSource::Cran => package.to_string(),
        PackageSource::Github => package
            .rsplit('/')
            .next()
            .unwrap_or(package)
            .to_string(),
    }
}

fn parse_package_list(output: &str) -> HashSet<String> {
    output
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .map(|name| name.trim_matches(|ch: char| ch == '"' || ch == '\''))
        .filter(|name| !name.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn confirmation_details(reports: &[&PackageSafetyReport]) -> Vec<String> {
    let mut details = Vec::new();
    for report in reports {
        details.push(format!("{} ({})", report.package, report.safety_level));
        details.extend(report.warnings.iter().map(|warning| format!("  - {warning}")));
    }
    details
}

#[cfg(test)]
#[path = "tests/service.rs"]
mod tests;
