//! Configuration loading and merge logic for `rbridge`.
//!
//! Global config and project-local config are merged with project values taking precedence.

mod overlay;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use rbridge_core::{
    BlacklistPolicy, CheckPolicy, DEFAULT_ACCEPTED_LICENSES, DEFAULT_MAX_DEPENDENCIES,
    DEFAULT_MIN_MONTHLY_DOWNLOADS, DEFAULT_MIN_STARS, DEFAULT_RESTRICTED_LICENSES,
    DEFAULT_STALE_AFTER_DAYS, DEFAULT_TRUSTED_MAINTAINERS, DEFAULT_YOUNG_PACKAGE_DAYS,
    PackageSource, to_strings,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use self::overlay::ConfigOverlay;

/// Default interval between mailbox polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
/// Default wait for the result of a `run` command.
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 30;
/// Default wait for the result of an install command.
pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 600;
/// Default per-request registry timeout.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
/// Default cache TTL in minutes.
pub const DEFAULT_CACHE_TTL_MINUTES: u64 = 30;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RbridgeConfig {
    /// Mailbox location and channel timing.
    pub bridge: BridgeConfig,
    /// Safety pipeline switches.
    pub safety: SafetyConfig,
    /// Blacklisted package names, glob patterns and maintainers.
    pub blacklist: BlacklistConfig,
    /// Numeric thresholds used by the safety checks.
    pub thresholds: ThresholdsConfig,
    /// Accepted and restricted license terms.
    pub license: LicenseConfig,
    /// Maintainer trust settings.
    pub maintenance: MaintenanceConfig,
    /// Report cache configuration.
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Directory shared with the R listener. `RBRIDGE_MAILBOX_DIR` wins over this value.
    pub mailbox_dir: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub run_timeout_secs: u64,
    pub install_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// When false, installs skip the safety pipeline entirely.
    pub enabled: bool,
    pub default_source: PackageSource,
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BlacklistConfig {
    pub packages: Vec<String>,
    /// Glob patterns matched case-insensitively against package names.
    pub patterns: Vec<String>,
    pub maintainers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub stale_after_days: i64,
    pub max_dependencies: usize,
    pub min_monthly_downloads: u64,
    pub min_stars: u64,
    pub young_package_days: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LicenseConfig {
    pub accepted: Vec<String>,
    pub restricted: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub trusted_maintainers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache entry TTL in minutes.
    pub ttl_minutes: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mailbox_dir: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            run_timeout_secs: DEFAULT_RUN_TIMEOUT_SECS,
            install_timeout_secs: DEFAULT_INSTALL_TIMEOUT_SECS,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_source: PackageSource::Cran,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            stale_after_days: DEFAULT_STALE_AFTER_DAYS,
            max_dependencies: DEFAULT_MAX_DEPENDENCIES,
            min_monthly_downloads: DEFAULT_MIN_MONTHLY_DOWNLOADS,
            min_stars: DEFAULT_MIN_STARS,
            young_package_days: DEFAULT_YOUNG_PACKAGE_DAYS,
        }
    }
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            accepted: to_strings(DEFAULT_ACCEPTED_LICENSES),
            restricted: to_strings(DEFAULT_RESTRICTED_LICENSES),
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            trusted_maintainers: to_strings(DEFAULT_TRUSTED_MAINTAINERS),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: DEFAULT_CACHE_TTL_MINUTES,
        }
    }
}

impl RbridgeConfig {
    /// Loads global and project configuration files.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing config file cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with_paths(global_config_path(), project_config_path())
    }

    pub(crate) fn load_with_paths(
        global: Option<PathBuf>,
        project: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(path) = global {
            config.merge_from_path(&path)?;
        }
        if let Some(path) = project {
            config.merge_from_path(&path)?;
        }
        Ok(config)
    }

    /// Resolves the mailbox directory shared with the listener.
    pub fn mailbox_dir(&self) -> PathBuf {
        if let Some(explicit) = env::var_os("RBRIDGE_MAILBOX_DIR") {
            return PathBuf::from(explicit);
        }
        if let Some(configured) = self.bridge.mailbox_dir.as_ref() {
            return configured.clone();
        }
        data_dir().join("mailbox")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.bridge.poll_interval_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge.run_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge.install_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.safety.fetch_timeout_secs)
    }

    /// Projects the check-relevant settings into the policy consumed by checks.
    pub fn check_policy(&self) -> CheckPolicy {
        CheckPolicy {
            blacklist: BlacklistPolicy {
                packages: self.blacklist.packages.clone(),
                patterns: self.blacklist.patterns.clone(),
                maintainers: self.blacklist.maintainers.clone(),
            },
            stale_after_days: self.thresholds.stale_after_days,
            max_dependencies: self.thresholds.max_dependencies,
            min_monthly_downloads: self.thresholds.min_monthly_downloads,
            min_stars: self.thresholds.min_stars,
            young_package_days: self.thresholds.young_package_days,
            accepted_licenses: self.license.accepted.clone(),
            restricted_licenses: self.license.restricted.clone(),
            trusted_maintainers: self.maintenance.trusted_maintainers.clone(),
        }
    }

    /// SHA-256 over every setting that can change a safety report.
    pub fn policy_fingerprint(&self) -> anyhow::Result<String> {
        let encoded = serde_json::to_vec(&(
            &self.blacklist,
            &self.thresholds,
            &self.license,
            &self.maintenance,
        ))
        .context("failed to encode check policy")?;
        Ok(format!("{:x}", Sha256::digest(&encoded)))
    }

    fn merge_from_path(&mut self, path: &Path) -> anyhow::Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        let overlay: ConfigOverlay = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file at {}", path.display()))?;
        self.apply_overlay(overlay);
        Ok(())
    }

    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        if let Some(value) = overlay.bridge {
            if let Some(dir) = value.mailbox_dir {
                self.bridge.mailbox_dir = Some(dir);
            }
            if let Some(interval) = value.poll_interval_ms {
                self.bridge.poll_interval_ms =
                    sanitize_positive_u64(interval, DEFAULT_POLL_INTERVAL_MS);
            }
            if let Some(timeout) = value.run_timeout_secs {
                self.bridge.run_timeout_secs =
                    sanitize_positive_u64(timeout, DEFAULT_RUN_TIMEOUT_SECS);
            }
            if let Some(timeout) = value.install_timeout_secs {
                self.bridge.install_timeout_secs =
                    sanitize_positive_u64(timeout, DEFAULT_INSTALL_TIMEOUT_SECS);
            }
        }
        if let Some(value) = overlay.safety {
            if let Some(enabled) = value.enabled {
                self.safety.enabled = enabled;
            }
            if let Some(source) = value.default_source {
                self.safety.default_source = source;
            }
            if let Some(timeout) = value.fetch_timeout_secs {
                self.safety.fetch_timeout_secs =
                    sanitize_positive_u64(timeout, DEFAULT_FETCH_TIMEOUT_SECS);
            }
        }
        if let Some(value) = overlay.blacklist {
            append_unique(&mut self.blacklist.packages, value.packages);
            append_unique(&mut self.blacklist.patterns, value.patterns);
            append_unique(&mut self.blacklist.maintainers, value.maintainers);
        }
        if let Some(value) = overlay.thresholds {
            if let Some(days) = value.stale_after_days {
                self.thresholds.stale_after_days =
                    sanitize_positive_i64(days, DEFAULT_STALE_AFTER_DAYS);
            }
            if let Some(max) = value.max_dependencies {
                self.thresholds.max_dependencies = if max == 0 {
                    DEFAULT_MAX_DEPENDENCIES
                } else {
                    max
                };
            }
            if let Some(min) = value.min_monthly_downloads {
                self.thresholds.min_monthly_downloads = min;
            }
            if let Some(min) = value.min_stars {
                self.thresholds.min_stars = min;
            }
            if let Some(days) = value.young_package_days {
                self.thresholds.young_package_days =
                    sanitize_positive_i64(days, DEFAULT_YOUNG_PACKAGE_DAYS);
            }
        }
        if let Some(value) = overlay.license {
            append_unique(&mut self.license.accepted, value.accepted.unwrap_or_default());
            append_unique(
                &mut self.license.restricted,
                value.restricted.unwrap_or_default(),
            );
        }
        if let Some(value) = overlay.maintenance {
            append_unique(
                &mut self.maintenance.trusted_maintainers,
                value.trusted_maintainers.unwrap_or_default(),
            );
        }
        if let Some(value) = overlay.cache
            && let Some(ttl_minutes) = value.ttl_minutes
        {
            self.cache.ttl_minutes = sanitize_positive_u64(ttl_minutes, DEFAULT_CACHE_TTL_MINUTES);
        }
    }
}

/// Base directory for mutable rbridge state (mailbox, cache, audit log).
pub fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("rbridge")
}

pub fn home_dir() -> PathBuf {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn global_config_path() -> Option<PathBuf> {
    if let Some(explicit) = env::var_os("RBRIDGE_CONFIG_PATH") {
        return Some(PathBuf::from(explicit));
    }

    Some(home_dir().join(".config").join("rbridge").join("config.toml"))
}

fn project_config_path() -> Option<PathBuf> {
    if let Some(explicit) = env::var_os("RBRIDGE_PROJECT_CONFIG_PATH") {
        return Some(PathBuf::from(explicit));
    }

    let cwd = env::current_dir().ok()?;
    Some(cwd.join(".rbridge.toml"))
}

fn append_unique(target: &mut Vec<String>, values: Vec<String>) {
    for value in values {
        if !target.iter().any(|existing| existing == &value) {
            target.push(value);
        }
    }
}

fn sanitize_positive_u64(value: u64, fallback: u64) -> u64 {
    if value == 0 { fallback } else { value }
}

fn sanitize_positive_i64(value: i64, fallback: i64) -> i64 {
    if value <= 0 { fallback } else { value }
}

#[cfg(test)]
#[path = "../tests/config.rs"]
mod tests;
