//! Transactional store: models, the persistence facade with its outbox
//! co-commits, status transition enforcement, and the read-side queries.

pub mod facade;
pub mod models;
pub mod outbox;
pub mod store;
pub mod transitions;

pub use facade::{
    page_payload, scrape_page_payload, AnalyticalApply, PersistenceFacade, StoreError, SyncPolicy,
};
pub use models::{
    ChangeLogRow, DeadLetterRow, IntentRow, PageRow, ProjectRow, ScrapePageRow, SearchEventRow,
    SessionRow, TargetRow,
};
pub use outbox::{IntentInsert, OutboxStore};
pub use store::{PageCursor, ScrapePageQuery, Store};
pub use transitions::{check as check_transition, is_legal as is_legal_transition, InvalidTransition};
