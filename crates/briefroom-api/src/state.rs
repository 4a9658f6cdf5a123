//! Shared application state.

use std::sync::Arc;

use briefroom_core::{DocumentStore, FileSearchClient, JobLedger, StoreCatalog};
use briefroom_jobs::{JobScheduler, RunConfig, StatusReporter};

/// State handed to every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: JobScheduler,
    pub reporter: StatusReporter,
    pub catalog: Arc<dyn StoreCatalog>,
    pub search: Arc<dyn FileSearchClient>,
    pub admin_token: Arc<str>,
}

impl AppState {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        catalog: Arc<dyn StoreCatalog>,
        storage: Arc<dyn DocumentStore>,
        search: Arc<dyn FileSearchClient>,
        config: RunConfig,
        admin_token: impl Into<Arc<str>>,
    ) -> Self {
        let scheduler = JobScheduler::new(
            Arc::clone(&ledger),
            Arc::clone(&catalog),
            storage,
            Arc::clone(&search),
            config,
        );
        Self {
            scheduler,
            reporter: StatusReporter::new(ledger),
            catalog,
            search,
            admin_token: admin_token.into(),
        }
    }
}
