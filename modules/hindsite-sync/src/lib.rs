//! Dual-write plane: analytical store writer, the dual-write synchronizer
//! over the outbox, the CDC reconciliation bridge, and the consistency
//! validator.

pub mod analytical;
pub mod cdc;
pub mod dws;
pub mod search;
pub mod validator;

pub use analytical::{AnalyticalStore, ApplyOutcome, MONITORED_TABLES};
pub use cdc::{CdcBridge, CdcConfig};
pub use dws::{DualWriteSynchronizer, DwsConfig, DwsStatus};
pub use search::{LogSink, SearchIndexPump, SearchPumpConfig, SearchSink};
pub use validator::{
    ConsistencyValidator, Discrepancy, DiscrepancyKind, ValidationReport, ValidatorConfig,
    REPAIR_JOB_TYPE,
};
