use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use rbridge_core::{FetchError, MetadataFetcher, PackageMetadata, PackageSource};
use rbridge_registry_http::{build_authorized_client, get_json, get_text};

const DEFAULT_GITHUB_API_BASE_URL: &str = "https://api.github.com";
const DEFAULT_GITHUB_RAW_BASE_URL: &str = "https://raw.githubusercontent.com";
const DEPENDENCY_FIELDS: &[&str] = &["Depends", "Imports", "LinkingTo"];

/// Fetches repository metadata for `owner/repo` identifiers.
#[derive(Clone)]
pub struct GithubFetcher {
    http: Client,
    api_base_url: String,
    raw_base_url: String,
}

impl GithubFetcher {
    pub fn new(timeout: Duration) -> Self {
        let token = env::var("GITHUB_TOKEN").ok();
        Self {
            http: build_authorized_client(timeout, token.as_deref()),
            api_base_url: env::var("RBRIDGE_GITHUB_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GITHUB_API_BASE_URL.to_string()),
            raw_base_url: env::var("RBRIDGE_GITHUB_RAW_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GITHUB_RAW_BASE_URL.to_string()),
        }
    }

    async fn fetch_description(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<BTreeMap<String, String>>, FetchError> {
        let url = format!(
            "{}/{owner}/{repo}/{branch}/DESCRIPTION",
            self.raw_base_url.trim_end_matches('/')
        );
        let raw = get_text(&self.http, &url, "GitHub DESCRIPTION file").await?;
        Ok(raw.as_deref().map(parse_dcf))
    }
}

#[async_trait]
impl MetadataFetcher for GithubFetcher {
    fn source(&self) -> PackageSource {
        PackageSource::Github
    }

    async fn fetch_metadata(&self, package: &str) -> Result<PackageMetadata, FetchError> {
        let (owner, repo) = split_identifier(package)?;
        let url = format!(
            "{}/repos/{owner}/{repo}",
            self.api_base_url.trim_end_matches('/')
        );
        let Some(body) = get_json::<GithubRepoResponse>(&self.http, &url, "GitHub repos API").await?
        else {
            return Err(FetchError::NotFound {
                registry: PackageSource::Github,
                package: package.to_string(),
            });
        };

        let branch = body.default_branch.as_deref().unwrap_or("HEAD");
        // A missing DESCRIPTION only degrades the report; the repository itself exists.
        let description = match self.fetch_description(owner, repo, branch).await {
            Ok(description) => description.unwrap_or_default(),
            Err(err) => {
                tracing::warn!("unable to read DESCRIPTION for {package}: {err}");
                BTreeMap::new()
            }
        };

        let mut metadata = PackageMetadata::new(
            description
                .get("Package")
                .cloned()
                .unwrap_or_else(|| body.name.clone()),
            PackageSource::Github,
        );
        metadata.version = description.get("Version").cloned();
        metadata.title = description.get("Title").cloned();
        metadata.description = body
            .description
            .clone()
            .or_else(|| description.get("Description").cloned());
        metadata.maintainer = description
            .get("Maintainer")
            .cloned()
            .or_else(|| body.owner.as_ref().map(|owner| owner.login.clone()));
        metadata.license = description.get("License").cloned().or_else(|| {
            body.license
                .as_ref()
                .and_then(|license| license.spdx_id.clone())
                .filter(|spdx| spdx != "NOASSERTION")
        });
        metadata.dependencies = dependencies_from_description(&description);
        metadata.published = body.created_at;
        metadata.last_updated = body.pushed_at.or(body.updated_at);
        metadata.repository_url = body.html_url.clone();
        metadata.stars = Some(body.stargazers_count);
        metadata.archived = body.archived;

        Ok(metadata)
    }
}

fn split_identifier(package: &str) -> Result<(&str, &str), FetchError> {
    let invalid = |message: &str| FetchError::InvalidIdentifier {
        identifier: package.to_string(),
        message: message.to_string(),
    };

    let (owner, repo) = package
        .trim()
        .split_once('/')
        .ok_or_else(|| invalid("expected 'owner/repo'"))?;
    let is_segment = |segment: &str| {
        !segment.is_empty()
            && segment != "."
            && segment != ".."
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if !is_segment(owner) || !is_segment(repo) {
        return Err(invalid("owner and repo may only contain letters, digits, '-', '_' and '.'"));
    }

    Ok((owner, repo))
}

/// Parses Debian control format as used by R DESCRIPTION files.
/// Continuation lines start with whitespace and are joined with a space.
fn parse_dcf(raw: &str) -> BTreeMap<String, String> {
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with([' ', '\t']) {
            if let Some(key) = current.as_ref()
                && let Some(value) = fields.get_mut(key)
            {
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_string();
            fields.insert(key.clone(), value.trim().to_string());
            current = Some(key);
        }
    }

    fields
}

fn dependencies_from_description(description: &BTreeMap<String, String>) -> Vec<String> {
    let mut names = Vec::new();
    for field in DEPENDENCY_FIELDS {
        let Some(raw) = description.get(*field) else {
            continue;
        };
        for entry in raw.split(',') {
            // Strip version constraints such as "rlang (>= 1.0.0)".
            let name = entry.split('(').next().unwrap_or_default().trim();
            if name.is_empty() || name == "R" {
                continue;
            }
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

#[derive(Debug, Deserialize)]
struct GithubRepoResponse {
    name: String,
    description: Option<String>,
    html_url: Option<String>,
    default_branch: Option<String>,
    owner: Option<GithubOwner>,
    license: Option<GithubLicense>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct GithubOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GithubLicense {
    spdx_id: Option<String>,
}
