//! Metadata fetcher catalog keyed by package source.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rbridge_core::{FetcherDefinition, MetadataFetcher, PackageSource};

/// Runtime fetcher catalog built from app-registered definitions.
#[derive(Clone, Default)]
pub struct FetcherCatalog {
    fetchers: BTreeMap<PackageSource, Arc<dyn MetadataFetcher>>,
}

impl FetcherCatalog {
    /// Builds the catalog wired into this application build.
    pub fn register_default(timeout: Duration) -> Self {
        Self::from_definitions(&crate::app_fetcher_definitions(), timeout)
    }

    pub fn from_definitions(definitions: &[FetcherDefinition], timeout: Duration) -> Self {
        Self::from_fetchers(
            definitions
                .iter()
                .map(|definition| (definition.create_fetcher)(timeout)),
        )
    }

    /// Later fetchers replace earlier ones for the same source.
    pub fn from_fetchers(fetchers: impl IntoIterator<Item = Arc<dyn MetadataFetcher>>) -> Self {
        Self {
            fetchers: fetchers
                .into_iter()
                .map(|fetcher| (fetcher.source(), fetcher))
                .collect(),
        }
    }

    pub fn fetcher(&self, source: PackageSource) -> Option<&Arc<dyn MetadataFetcher>> {
        self.fetchers.get(&source)
    }

    /// Registered source keys in stable order.
    pub fn source_keys(&self) -> Vec<&'static str> {
        self.fetchers.keys().map(|source| source.key()).collect()
    }
}
