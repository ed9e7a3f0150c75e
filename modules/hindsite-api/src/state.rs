use std::sync::Arc;

use hindsite_jobs::JobStore;
use hindsite_sources::SourceRouter;
use hindsite_store::{PersistenceFacade, Store};
use hindsite_sync::{ConsistencyValidator, DualWriteSynchronizer};

pub struct AppState {
    pub store: Store,
    pub facade: PersistenceFacade,
    pub jobs: JobStore,
    pub router: Arc<SourceRouter>,
    pub synchronizer: Arc<DualWriteSynchronizer>,
    pub validator: Arc<ConsistencyValidator>,
}
