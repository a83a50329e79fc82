use rbridge_core::{PackageSafetyReport, SafetyLevel};
use serde::{Deserialize, Serialize};

use crate::channel::{ExecutionResponse, ExecutionStatus};

/// Lifecycle of a package installation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Pending,
    Checking,
    Installing,
    Completed,
    Partial,
    Error,
    Rejected,
    Timeout,
}

impl InstallStatus {
    /// Maps the listener's answer to an install command onto the install vocabulary.
    pub fn from_execution(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Completed => Self::Completed,
            ExecutionStatus::Error | ExecutionStatus::Rejected | ExecutionStatus::Timeout => {
                Self::Error
            }
            ExecutionStatus::Pending | ExecutionStatus::Running => Self::Partial,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Completed
    }
}

/// What a `run` request produced in the R session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub command_id: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionOutcome {
    pub fn from_response(command_id: &str, response: ExecutionResponse) -> Self {
        Self {
            command_id: command_id.to_string(),
            status: response.status,
            output: response.output,
            error: response.error,
            duration_ms: response.duration_ms,
        }
    }
}

/// Result of an `install` request, including the safety reports that gated it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallOutcome {
    pub status: InstallStatus,
    pub requested: Vec<String>,
    /// Packages sent to the listener.
    pub submitted: Vec<String>,
    pub already_installed: Vec<String>,
    pub reports: Vec<PackageSafetyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A package whose report refused installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedPackage {
    pub package: String,
    pub safety_level: SafetyLevel,
    pub errors: Vec<String>,
}

impl BlockedPackage {
    pub fn from_report(report: &PackageSafetyReport) -> Self {
        Self {
            package: report.package.clone(),
            safety_level: report.safety_level,
            errors: report.errors.clone(),
        }
    }
}
