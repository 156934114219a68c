use std::sync::Arc;

use alertwatch_common::FileConfig;
use alertwatch_store::{PgAlertStore, PgAuditLog, PgIngestState};
use sqlx::PgPool;
use typed_builder::TypedBuilder;

use crate::notify::NotifyBackend;
use crate::reports::Reports;
use crate::review::ReviewService;
use crate::scheduling::coordinator::Coordinator;
use crate::scout::Scout;
use crate::traits::{AlertSource, AlertStore, AuditLog, IngestState};

/// Shared dependency container for the pipeline.
///
/// Holds the long-lived collaborators behind their trait seams, so the same
/// wiring serves production (Postgres, GOV.UK, Teams) and tests (mocks).
#[derive(Clone, TypedBuilder)]
pub struct ScoutDeps {
    pub source: Arc<dyn AlertSource>,
    pub store: Arc<dyn AlertStore>,
    pub audit: Arc<dyn AuditLog>,
    pub state: Arc<dyn IngestState>,
    pub backend: Arc<dyn NotifyBackend>,
    #[builder(default)]
    pub config: FileConfig,
}

impl ScoutDeps {
    /// Production wiring over one Postgres pool.
    pub fn from_pool(
        pool: PgPool,
        source: Arc<dyn AlertSource>,
        backend: Arc<dyn NotifyBackend>,
        config: FileConfig,
    ) -> Self {
        Self::builder()
            .source(source)
            .store(Arc::new(PgAlertStore::new(pool.clone())))
            .audit(Arc::new(PgAuditLog::new(pool.clone())))
            .state(Arc::new(PgIngestState::new(pool)))
            .backend(backend)
            .config(config)
            .build()
    }

    pub fn scout(&self) -> Scout {
        Scout::new(self)
    }

    pub fn reports(&self) -> Reports {
        Reports::new(self.store.clone(), self.backend.clone())
    }

    pub fn reviews(&self) -> ReviewService {
        ReviewService::new(self.store.clone(), self.audit.clone())
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(Arc::new(self.scout()), self.state.clone())
    }
}
