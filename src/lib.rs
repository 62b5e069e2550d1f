#![doc(test(attr(deny(warnings))))]

//! Budget Engine turns a ledger of money movements into materialized recurring
//! transactions, live mini-budget forecasts, and deduplicated spending alerts.

pub mod config;
pub mod core;
pub mod errors;
pub mod ledger;
pub mod storage;
pub mod utils;

use std::sync::Once;

pub use crate::core::{
    BudgetEngine, Clock, DailyReport, EngineEvent, EventKind, FixedClock, Observer,
    RecordingObserver, RefreshReport, SystemClock, TracingObserver,
};
pub use config::{ConfigManager, EngineConfig};
pub use errors::{EngineError, EngineResult, StoreError};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore, WriteCommand};

static INIT_TRACING: Once = Once::new();

/// Initializes global tracing and emits a startup info log.
pub fn init() {
    INIT_TRACING.call_once(|| {
        utils::init_tracing();
        tracing::info!("Budget Engine tracing initialized.");
    });
}
