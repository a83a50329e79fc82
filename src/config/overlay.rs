use std::path::PathBuf;

use rbridge_core::PackageSource;
use serde::Deserialize;

use super::BlacklistConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ConfigOverlay {
    pub bridge: Option<BridgeOverlay>,
    pub safety: Option<SafetyOverlay>,
    pub blacklist: Option<BlacklistConfig>,
    pub thresholds: Option<ThresholdsOverlay>,
    pub license: Option<LicenseOverlay>,
    pub maintenance: Option<MaintenanceOverlay>,
    pub cache: Option<CacheOverlay>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(super) struct BridgeOverlay {
    pub mailbox_dir: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
    pub run_timeout_secs: Option<u64>,
    pub install_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(super) struct SafetyOverlay {
    pub enabled: Option<bool>,
    pub default_source: Option<PackageSource>,
    pub fetch_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(super) struct ThresholdsOverlay {
    pub stale_after_days: Option<i64>,
    pub max_dependencies: Option<usize>,
    pub min_monthly_downloads: Option<u64>,
    pub min_stars: Option<u64>,
    pub young_package_days: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(super) struct LicenseOverlay {
    pub accepted: Option<Vec<String>>,
    pub restricted: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(super) struct MaintenanceOverlay {
    pub trusted_maintainers: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(super) struct CacheOverlay {
    pub ttl_minutes: Option<u64>,
}
