//! SQLite-backed cache for package safety reports.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, anyhow};
use rbridge_core::{PackageSafetyReport, PackageSource};
use rusqlite::{Connection, OptionalExtension, params};

use crate::config::home_dir;

/// Report store keyed by policy fingerprint, source and package name.
pub struct ReportCache {
    conn: Mutex<Connection>,
    ttl: Duration,
}

impl ReportCache {
    /// Opens the on-disk cache database, creating its directory and schema on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created, the database cannot
    /// be opened, or schema initialization fails.
    pub fn open(ttl_minutes: u64) -> anyhow::Result<Self> {
        let db_path = cache_db_path();
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create cache directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(&db_path)
            .with_context(|| format!("failed to open report cache at {}", db_path.display()))?;
        Self::from_connection(conn, ttl_minutes)
    }

    #[cfg(test)]
    pub fn in_memory(ttl_minutes: u64) -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory report cache")?;
        Self::from_connection(conn, ttl_minutes)
    }

    fn from_connection(conn: Connection, ttl_minutes: u64) -> anyhow::Result<Self> {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS safety_reports (
  cache_key TEXT PRIMARY KEY,
  report TEXT NOT NULL,
  expires_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_safety_reports_expires_at ON safety_reports (expires_at);
"#,
        )
        .context("failed to initialize report cache schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            ttl: Duration::from_secs(ttl_minutes.max(1) * 60),
        })
    }

    /// Returns a live report, deleting it instead when it has expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored report no longer decodes.
    pub fn get_report(
        &self,
        fingerprint: &str,
        source: PackageSource,
        package: &str,
    ) -> anyhow::Result<Option<PackageSafetyReport>> {
        let key = report_key(fingerprint, source, package);
        let Some(raw) = self.get(&key)? else {
            return Ok(None);
        };
        let report = serde_json::from_str(&raw)
            .with_context(|| format!("cached report for {key} is not decodable"))?;
        Ok(Some(report))
    }

    /// Stores a report with a fresh expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, clock math or the SQLite write fails.
    pub fn put_report(&self, fingerprint: &str, report: &PackageSafetyReport) -> anyhow::Result<()> {
        let key = report_key(fingerprint, report.source, &report.package);
        let raw = serde_json::to_string(report).context("failed to encode safety report")?;
        self.set(&key, &raw)
    }

    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = unix_now()?;
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("report cache mutex poisoned"))?;

        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT report, expires_at FROM safety_reports WHERE cache_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("failed to query report cache")?;

        let Some((value, expires_at)) = row else {
            return Ok(None);
        };

        if expires_at <= now {
            conn.execute(
                "DELETE FROM safety_reports WHERE cache_key = ?1",
                params![key],
            )
            .context("failed to delete expired report")?;
            return Ok(None);
        }

        Ok(Some(value))
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let now = unix_now()?;
        let ttl_seconds =
            i64::try_from(self.ttl.as_secs()).context("cache ttl seconds exceeds i64 range")?;
        let expires_at = now
            .checked_add(ttl_seconds)
            .ok_or_else(|| anyhow!("cache expiry timestamp overflow"))?;
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("report cache mutex poisoned"))?;

        conn.execute(
            r#"
INSERT INTO safety_reports (cache_key, report, expires_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(cache_key) DO UPDATE SET
  report = excluded.report,
  expires_at = excluded.expires_at
"#,
            params![key, value, expires_at],
        )
        .context("failed to upsert cached report")?;

        Ok(())
    }
}

/// Package names are case-sensitive on CRAN (`MASS` is not `mass`), so the key keeps the case.
fn report_key(fingerprint: &str, source: PackageSource, package: &str) -> String {
    format!("report:{fingerprint}:{}:{package}", source.key())
}

fn cache_db_path() -> PathBuf {
    if let Some(explicit) = env::var_os("RBRIDGE_CACHE_DB_PATH") {
        return PathBuf::from(explicit);
    }

    home_dir().join(".cache").join("rbridge").join("reports.db")
}

fn unix_now() -> anyhow::Result<i64> {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before unix epoch")?;
    i64::try_from(since_epoch.as_secs()).context("unix timestamp exceeds i64 range")
}
