//! Safety validation pipeline for a single package.
//!
//! Order: blacklist fast path, cached report, metadata fetch, download enrichment,
//! fixed check battery. A failed fetch yields a fail-closed report instead of an error.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rbridge_core::{Check, CheckContext, CheckPolicy, PackageSafetyReport, PackageSource};
use tracing::{debug, info, warn};

use crate::cache::ReportCache;
use crate::error::BridgeError;
use crate::registries::FetcherCatalog;

pub struct SafetyValidator {
    fetchers: FetcherCatalog,
    checks: Vec<Box<dyn Check>>,
    policy: CheckPolicy,
    fingerprint: String,
    cache: Option<Arc<ReportCache>>,
}

impl SafetyValidator {
    /// `fingerprint` must change whenever `policy` does; it partitions cached reports.
    pub fn new(
        fetchers: FetcherCatalog,
        policy: CheckPolicy,
        fingerprint: impl Into<String>,
        cache: Option<Arc<ReportCache>>,
    ) -> Self {
        Self {
            fetchers,
            checks: instantiate_checks(),
            policy,
            fingerprint: fingerprint.into(),
            cache,
        }
    }

    /// Ids of the check battery in execution order.
    #[cfg(test)]
    pub fn check_ids(&self) -> Vec<&'static str> {
        self.checks.iter().map(|check| check.id()).collect()
    }

    /// Produces the safety report for `package` on `source`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnsupportedSource`] when no fetcher serves `source`.
    /// Registry failures never surface as errors; they produce an incomplete report.
    pub async fn validate(
        &self,
        package: &str,
        source: PackageSource,
    ) -> Result<PackageSafetyReport, BridgeError> {
        let package = package.trim();

        if let Some(check) = rbridge_check_blacklist::check_name(package, &self.policy.blacklist) {
            info!(package, %source, "package is blacklisted; skipping registry lookup");
            return Ok(PackageSafetyReport::from_checks(package, source, vec![check]));
        }

        let Some(fetcher) = self.fetchers.fetcher(source) else {
            return Err(BridgeError::UnsupportedSource {
                requested: source.key().to_string(),
                supported: self.fetchers.source_keys().join(", "),
            });
        };

        if let Some(report) = self.cached_report(package, source) {
            debug!(package, %source, "using cached safety report");
            return Ok(report);
        }

        let mut metadata = match fetcher.fetch_metadata(package).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(package, %source, error = %err, "metadata fetch failed");
                return Ok(PackageSafetyReport::incomplete(
                    package,
                    source,
                    &err.to_string(),
                ));
            }
        };

        if metadata.monthly_downloads == 0 {
            match fetcher.fetch_monthly_downloads(package).await {
                Ok(Some(count)) => metadata.monthly_downloads = count,
                Ok(None) => {}
                Err(err) => {
                    warn!(package, %source, error = %err, "download statistics unavailable");
                }
            }
        }

        let context = CheckContext {
            package_name: package,
            metadata: &metadata,
            policy: &self.policy,
            now: Utc::now(),
        };
        let checks = self
            .checks
            .iter()
            .map(|check| {
                let verdict = check.run(&context);
                debug!(
                    package,
                    check = check.id(),
                    category = ?check.category(),
                    passed = verdict.passed,
                    "check finished"
                );
                verdict
            })
            .collect();
        let report = PackageSafetyReport::from_checks(package, source, checks);
        info!(
            package,
            %source,
            level = %report.safety_level,
            allow = report.allow_installation,
            "safety validation finished"
        );

        if let Some(cache) = self.cache.as_ref()
            && let Err(err) = cache.put_report(&self.fingerprint, &report)
        {
            warn!(package, error = %err, "failed to cache safety report");
        }

        Ok(report)
    }

    fn cached_report(&self, package: &str, source: PackageSource) -> Option<PackageSafetyReport> {
        let cache = self.cache.as_ref()?;
        match cache.get_report(&self.fingerprint, source, package) {
            Ok(report) => report,
            Err(err) => {
                warn!(package, error = %err, "ignoring unreadable cache entry");
                None
            }
        }
    }
}

fn instantiate_checks() -> Vec<Box<dyn Check>> {
    let mut seen = HashSet::new();
    crate::app_check_factories()
        .into_iter()
        .map(|factory| factory())
        .filter(|check| {
            let fresh = seen.insert(check.id());
            if !fresh {
                warn!(check = check.id(), "duplicate check registration ignored");
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/validator.rs"]
mod tests;
