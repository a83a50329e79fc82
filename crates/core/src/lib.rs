use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub type CheckId = &'static str;
pub type CheckFactory = fn() -> Box<dyn Check>;

pub const DEFAULT_STALE_AFTER_DAYS: i64 = 730;
pub const DEFAULT_MAX_DEPENDENCIES: usize = 20;
pub const DEFAULT_MIN_MONTHLY_DOWNLOADS: u64 = 100;
pub const DEFAULT_MIN_STARS: u64 = 10;
pub const DEFAULT_YOUNG_PACKAGE_DAYS: i64 = 30;
pub const DEFAULT_ACCEPTED_LICENSES: &[&str] = &[
    "GPL",
    "LGPL",
    "AGPL",
    "MIT",
    "BSD",
    "Apache",
    "MPL",
    "Artistic",
    "CC0",
    "Unlimited",
];
pub const DEFAULT_RESTRICTED_LICENSES: &[&str] =
    &["CC BY-NC", "non-commercial", "noncommercial", "ACM"];
pub const DEFAULT_TRUSTED_MAINTAINERS: &[&str] = &["R Core Team", "Posit", "RStudio"];

/// Backend a package is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageSource {
    Cran,
    Github,
}

impl PackageSource {
    pub fn key(self) -> &'static str {
        match self {
            Self::Cran => "cran",
            Self::Github => "github",
        }
    }

    pub fn from_key(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cran" => Some(Self::Cran),
            "github" | "gh" => Some(Self::Github),
            _ => None,
        }
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Registry descriptor normalized across backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub source: PackageSource,
    pub version: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub maintainer: Option<String>,
    pub license: Option<String>,
    pub dependencies: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub repository_url: Option<String>,
    pub monthly_downloads: u64,
    pub stars: Option<u64>,
    pub archived: bool,
}

impl PackageMetadata {
    pub fn new(name: impl Into<String>, source: PackageSource) -> Self {
        Self {
            name: name.into(),
            source,
            version: None,
            title: None,
            description: None,
            maintainer: None,
            license: None,
            dependencies: Vec::new(),
            published: None,
            last_updated: None,
            repository_url: None,
            monthly_downloads: 0,
            stars: None,
            archived: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckCategory {
    RegistryStatus,
    Maintenance,
    DependencyFootprint,
    CommunityTrust,
    Blacklist,
    License,
}

impl CheckCategory {
    pub fn recommendation(self, package: &str) -> String {
        match self {
            Self::Blacklist => {
                format!("Do not install {package}; pick a vetted alternative instead")
            }
            Self::RegistryStatus => {
                format!("Look for a maintained replacement for {package} on the registry")
            }
            Self::Maintenance => {
                format!("Confirm who maintains {package} before depending on it")
            }
            Self::DependencyFootprint => {
                format!("Review the dependency tree of {package} or choose a lighter package")
            }
            Self::CommunityTrust => {
                format!("Review the source of {package} before installing; adoption is low")
            }
            Self::License => {
                format!("Confirm the license of {package} is compatible with your project")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Verdict of one safety check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub name: String,
    pub category: CheckCategory,
    pub passed: bool,
    pub severity: CheckSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl SafetyCheck {
    pub fn pass(name: &str, category: CheckCategory, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            category,
            passed: true,
            severity: CheckSeverity::Info,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn fail(
        name: &str,
        category: CheckCategory,
        severity: CheckSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            category,
            passed: false,
            severity,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    fn failed_at(&self, severity: CheckSeverity) -> bool {
        !self.passed && self.severity == severity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Warning,
    Risky,
    Dangerous,
    Blocked,
}

impl SafetyLevel {
    /// Highest failing severity wins; check order is irrelevant.
    pub fn from_checks(checks: &[SafetyCheck]) -> Self {
        let failed_at = |severity| checks.iter().any(|check| check.failed_at(severity));

        if failed_at(CheckSeverity::Critical) {
            Self::Blocked
        } else if failed_at(CheckSeverity::Error) {
            Self::Dangerous
        } else if failed_at(CheckSeverity::Warning) {
            Self::Risky
        } else if checks.iter().all(|check| check.passed) {
            Self::Safe
        } else {
            Self::Warning
        }
    }

    pub fn requires_confirmation(self) -> bool {
        matches!(self, Self::Risky | Self::Dangerous)
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Safe => "safe",
            Self::Warning => "warning",
            Self::Risky => "risky",
            Self::Dangerous => "dangerous",
            Self::Blocked => "blocked",
        };
        f.write_str(label)
    }
}

/// Aggregate verdict for one package. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSafetyReport {
    pub package: String,
    pub source: PackageSource,
    pub safety_level: SafetyLevel,
    pub checks: Vec<SafetyCheck>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub recommendations: Vec<String>,
    pub allow_installation: bool,
}

impl PackageSafetyReport {
    pub fn from_checks(package: &str, source: PackageSource, checks: Vec<SafetyCheck>) -> Self {
        let safety_level = SafetyLevel::from_checks(&checks);
        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        let mut recommendations = Vec::new();

        for check in checks.iter().filter(|check| !check.passed) {
            match check.severity {
                CheckSeverity::Critical => errors.push(check.message.clone()),
                CheckSeverity::Error | CheckSeverity::Warning => {
                    warnings.push(check.message.clone())
                }
                CheckSeverity::Info => {}
            }
            let recommendation = check.category.recommendation(package);
            if !recommendations.contains(&recommendation) {
                recommendations.push(recommendation);
            }
        }

        let allow_installation = safety_level != SafetyLevel::Blocked && errors.is_empty();
        Self {
            package: package.to_string(),
            source,
            safety_level,
            checks,
            warnings,
            errors,
            recommendations,
            allow_installation,
        }
    }

    /// Fail-closed report used when metadata could not be retrieved.
    pub fn incomplete(package: &str, source: PackageSource, reason: &str) -> Self {
        Self {
            package: package.to_string(),
            source,
            safety_level: SafetyLevel::Risky,
            checks: Vec::new(),
            warnings: Vec::new(),
            errors: vec![format!(
                "safety validation for {package} was incomplete: {reason}"
            )],
            recommendations: vec![format!(
                "Retry once {} is reachable, or install {package} manually after review",
                source.key()
            )],
            allow_installation: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlacklistPolicy {
    pub packages: Vec<String>,
    pub patterns: Vec<String>,
    pub maintainers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CheckPolicy {
    pub blacklist: BlacklistPolicy,
    pub stale_after_days: i64,
    pub max_dependencies: usize,
    pub min_monthly_downloads: u64,
    pub min_stars: u64,
    pub young_package_days: i64,
    pub accepted_licenses: Vec<String>,
    pub restricted_licenses: Vec<String>,
    pub trusted_maintainers: Vec<String>,
}

impl Default for CheckPolicy {
    fn default() -> Self {
        Self {
            blacklist: BlacklistPolicy::default(),
            stale_after_days: DEFAULT_STALE_AFTER_DAYS,
            max_dependencies: DEFAULT_MAX_DEPENDENCIES,
            min_monthly_downloads: DEFAULT_MIN_MONTHLY_DOWNLOADS,
            min_stars: DEFAULT_MIN_STARS,
            young_package_days: DEFAULT_YOUNG_PACKAGE_DAYS,
            accepted_licenses: to_strings(DEFAULT_ACCEPTED_LICENSES),
            restricted_licenses: to_strings(DEFAULT_RESTRICTED_LICENSES),
            trusted_maintainers: to_strings(DEFAULT_TRUSTED_MAINTAINERS),
        }
    }
}

pub fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

pub struct CheckContext<'a> {
    pub package_name: &'a str,
    pub metadata: &'a PackageMetadata,
    pub policy: &'a CheckPolicy,
    pub now: DateTime<Utc>,
}

/// One entry of the fixed safety battery. Implementations never fail; every
/// outcome is expressed as a [`SafetyCheck`].
pub trait Check: Send + Sync {
    fn id(&self) -> CheckId;
    fn category(&self) -> CheckCategory;
    fn run(&self, context: &CheckContext<'_>) -> SafetyCheck;
}

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("package '{package}' was not found on {registry}")]
    NotFound {
        registry: PackageSource,
        package: String,
    },
    #[error("invalid package identifier '{identifier}': {message}")]
    InvalidIdentifier { identifier: String, message: String },
    #[error("registry request failed: {message}")]
    Transport { message: String },
    #[error("registry returned invalid data: {message}")]
    InvalidResponse { message: String },
}

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    fn source(&self) -> PackageSource;
    async fn fetch_metadata(&self, package: &str) -> Result<PackageMetadata, FetchError>;
    async fn fetch_monthly_downloads(&self, _package: &str) -> Result<Option<u64>, FetchError> {
        Ok(None)
    }
}

#[derive(Clone, Copy)]
pub struct FetcherDefinition {
    pub source: PackageSource,
    pub create_fetcher: fn(Duration) -> Arc<dyn MetadataFetcher>,
}
