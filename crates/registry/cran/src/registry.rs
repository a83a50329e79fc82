use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use rbridge_core::{FetchError, MetadataFetcher, PackageMetadata, PackageSource};
use rbridge_registry_http::{build_client, get_json};

const DEFAULT_CRAN_API_BASE_URL: &str = "https://crandb.r-pkg.org";
const DEFAULT_CRAN_DOWNLOADS_API_BASE_URL: &str =
    "https://cranlogs.r-pkg.org/downloads/total/last-month";

#[derive(Clone)]
pub struct CranFetcher {
    http: Client,
    package_api_base_url: String,
    downloads_api_base_url: String,
}

impl CranFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: build_client(timeout),
            package_api_base_url: env::var("RBRIDGE_CRAN_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_CRAN_API_BASE_URL.to_string()),
            downloads_api_base_url: env::var("RBRIDGE_CRAN_DOWNLOADS_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_CRAN_DOWNLOADS_API_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl MetadataFetcher for CranFetcher {
    fn source(&self) -> PackageSource {
        PackageSource::Cran
    }

    async fn fetch_metadata(&self, package: &str) -> Result<PackageMetadata, FetchError> {
        validate_package_name(package)?;
        let url = format!(
            "{}/{}/all",
            self.package_api_base_url.trim_end_matches('/'),
            package
        );
        let Some(body) = get_json::<CrandbPackageResponse>(&self.http, &url, "CRAN package API")
            .await?
        else {
            return Err(FetchError::NotFound {
                registry: PackageSource::Cran,
                package: package.to_string(),
            });
        };

        let latest = body
            .latest
            .as_ref()
            .filter(|version| !version.trim().is_empty())
            .cloned()
            .ok_or_else(|| FetchError::InvalidResponse {
                message: format!("CRAN package API: missing latest version for {package}"),
            })?;
        let description = body.versions.get(&latest);

        let published = body.timeline.values().filter_map(|raw| parse_timestamp(raw)).min();
        let last_updated = body
            .timeline
            .get(&latest)
            .and_then(|raw| parse_timestamp(raw))
            .or_else(|| {
                description
                    .and_then(|desc| desc.publication.as_deref())
                    .and_then(parse_timestamp)
            });

        let name = body.name.unwrap_or_else(|| package.to_string());
        let mut metadata = PackageMetadata::new(name, PackageSource::Cran);
        metadata.version = Some(latest.clone());
        metadata.published = published;
        metadata.last_updated = last_updated;
        metadata.archived = body.archived;

        if let Some(desc) = description {
            metadata.title = desc.title.clone();
            metadata.description = desc.description.clone();
            metadata.maintainer = desc.maintainer.clone();
            metadata.license = desc.license.clone();
            metadata.dependencies = collect_dependencies(desc);
            metadata.repository_url = desc.url.as_deref().and_then(first_url);
        }

        Ok(metadata)
    }

    async fn fetch_monthly_downloads(&self, package: &str) -> Result<Option<u64>, FetchError> {
        validate_package_name(package)?;
        let url = format!(
            "{}/{}",
            self.downloads_api_base_url.trim_end_matches('/'),
            package
        );
        let Some(rows) =
            get_json::<Vec<CranlogsRow>>(&self.http, &url, "CRAN downloads API").await?
        else {
            return Ok(None);
        };

        Ok(rows
            .into_iter()
            .find(|row| row.package.as_deref().is_none_or(|name| name == package))
            .map(|row| row.downloads))
    }
}

/// CRAN names are ASCII letters, digits and dots, start with a letter, and
/// do not end with a dot.
fn validate_package_name(package: &str) -> Result<(), FetchError> {
    let valid = package.len() >= 2
        && package.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && !package.ends_with('.')
        && package.chars().all(|c| c.is_ascii_alphanumeric() || c == '.');
    if valid {
        return Ok(());
    }

    Err(FetchError::InvalidIdentifier {
        identifier: package.to_string(),
        message: "CRAN package names contain only letters, digits and '.'".to_string(),
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(value) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(value.with_timezone(&Utc));
    }

    // DESCRIPTION style: "2023-11-17 16:50:02 UTC"
    let without_zone = trimmed.trim_end_matches(" UTC");
    NaiveDateTime::parse_from_str(without_zone, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|value| value.and_utc())
}

fn collect_dependencies(desc: &CrandbDescription) -> Vec<String> {
    let mut names = Vec::new();
    for field in [&desc.depends, &desc.imports, &desc.linking_to] {
        for name in field.keys() {
            if name != "R" && !names.contains(name) {
                names.push(name.clone());
            }
        }
    }
    names
}

fn first_url(raw: &str) -> Option<String> {
    raw.split([',', ' ', '\n'])
        .map(str::trim)
        .find(|candidate| candidate.starts_with("http"))
        .map(ToOwned::to_owned)
}

#[derive(Debug, Deserialize)]
struct CrandbPackageResponse {
    name: Option<String>,
    latest: Option<String>,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    timeline: BTreeMap<String, String>,
    #[serde(default)]
    versions: BTreeMap<String, CrandbDescription>,
}

#[derive(Debug, Deserialize)]
struct CrandbDescription {
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Description")]
    description: Option<String>,
    #[serde(rename = "Maintainer")]
    maintainer: Option<String>,
    #[serde(rename = "License")]
    license: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(rename = "Date/Publication")]
    publication: Option<String>,
    #[serde(rename = "Depends", default)]
    depends: BTreeMap<String, String>,
    #[serde(rename = "Imports", default)]
    imports: BTreeMap<String, String>,
    #[serde(rename = "LinkingTo", default)]
    linking_to: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CranlogsRow {
    #[serde(default)]
    downloads: u64,
    package: Option<String>,
}
