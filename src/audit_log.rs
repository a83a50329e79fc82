//! Append-only JSON-lines log of install decisions.

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use rbridge_core::{PackageSafetyReport, PackageSource, SafetyLevel};
use serde::Serialize;

use crate::config::data_dir;
use crate::types::InstallStatus;

pub struct AuditLogger {
    file: Mutex<File>,
}

#[derive(Debug, Serialize)]
pub struct AuditRecord {
    timestamp: String,
    event: AuditEvent,
    package: String,
    source: PackageSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    safety_level: Option<SafetyLevel>,
    allow: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<InstallStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    SafetyDecision,
    ChecksSkipped,
    InstallResult,
}

impl AuditLogger {
    /// Opens the default audit log, honoring `RBRIDGE_AUDIT_LOG_PATH`.
    pub fn open() -> anyhow::Result<Self> {
        Self::at_path(&audit_log_path())
    }

    pub fn at_path(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn log(&self, record: AuditRecord) -> anyhow::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("audit log mutex poisoned"))?;
        let json = serde_json::to_string(&record)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }
}

impl AuditRecord {
    /// Verdict of the safety pipeline for one requested package.
    pub fn safety_decision(report: &PackageSafetyReport) -> Self {
        let reasons = report
            .errors
            .iter()
            .chain(report.warnings.iter())
            .cloned()
            .collect();
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: AuditEvent::SafetyDecision,
            package: report.package.clone(),
            source: report.source,
            safety_level: Some(report.safety_level),
            allow: report.allow_installation,
            reasons,
            status: None,
        }
    }

    pub fn checks_skipped(package: &str, source: PackageSource, reason: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: AuditEvent::ChecksSkipped,
            package: package.to_string(),
            source,
            safety_level: None,
            allow: true,
            reasons: vec![reason.to_string()],
            status: None,
        }
    }

    pub fn install_result(package: &str, source: PackageSource, status: InstallStatus) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: AuditEvent::InstallResult,
            package: package.to_string(),
            source,
            safety_level: None,
            allow: true,
            reasons: Vec::new(),
            status: Some(status),
        }
    }
}

fn audit_log_path() -> PathBuf {
    if let Some(explicit) = env::var_os("RBRIDGE_AUDIT_LOG_PATH") {
        return PathBuf::from(explicit);
    }

    data_dir().join("audit.log")
}

#[cfg(test)]
#[path = "tests/audit_log.rs"]
mod tests;
