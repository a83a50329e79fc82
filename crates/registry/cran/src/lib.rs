mod registry;

use std::sync::Arc;
use std::time::Duration;

use rbridge_core::{FetcherDefinition, MetadataFetcher, PackageSource};
pub use registry::CranFetcher;

pub fn fetcher_definition() -> FetcherDefinition {
    FetcherDefinition {
        source: PackageSource::Cran,
        create_fetcher,
    }
}

fn create_fetcher(timeout: Duration) -> Arc<dyn MetadataFetcher> {
    Arc::new(CranFetcher::new(timeout))
}
