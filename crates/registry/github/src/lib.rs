mod registry;

use std::sync::Arc;
use std::time::Duration;

use rbridge_core::{FetcherDefinition, MetadataFetcher, PackageSource};
pub use registry::GithubFetcher;

pub fn fetcher_definition() -> FetcherDefinition {
    FetcherDefinition {
        source: PackageSource::Github,
        create_fetcher,
    }
}

fn create_fetcher(timeout: Duration) -> Arc<dyn MetadataFetcher> {
    Arc::new(GithubFetcher::new(timeout))
}
