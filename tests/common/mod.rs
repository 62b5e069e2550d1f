#![allow(dead_code)]

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use budget_engine::{
    errors::StoreError,
    ledger::{transaction::start_of_day, LedgerStore, MemoryLedger, MonthKey, Transaction},
    BudgetEngine, EngineConfig, FixedClock, JsonFileStore, KeyValueStore, MemoryStore,
    RecordingObserver,
};
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use tempfile::TempDir;
use uuid::Uuid;

/// Holds TempDir guards so temporary folders live for the duration of the test run.
static TEST_DIRS: Lazy<Mutex<Vec<TempDir>>> = Lazy::new(|| Mutex::new(Vec::new()));

pub fn temp_base() -> PathBuf {
    let temp = TempDir::new().expect("create temp dir");
    let base = temp.path().to_path_buf();
    TEST_DIRS.lock().expect("lock temp dir registry").push(temp);
    base
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn month(y: i32, m: u32) -> MonthKey {
    MonthKey::new(y, m).expect("valid month")
}

pub fn on(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    start_of_day(date(y, m, d))
}

/// Collaborators shared between engine instances opened over the same store.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub observer: Arc<RecordingObserver>,
}

impl Harness {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(FixedClock::at(today, 9)),
            observer: Arc::new(RecordingObserver::new()),
        }
    }

    pub fn open<L: LedgerStore>(&self, ledger: L) -> BudgetEngine<L> {
        BudgetEngine::open_with(
            self.store.clone(),
            ledger,
            EngineConfig::default(),
            self.clock.clone(),
            self.observer.clone(),
        )
        .expect("open engine")
    }

    pub fn engine(&self) -> BudgetEngine<MemoryLedger> {
        self.open(MemoryLedger::new())
    }

    pub fn set_today(&self, today: NaiveDate, hour: u32) {
        let time = today.and_hms_opt(hour, 0, 0).expect("valid hour");
        self.clock.set(DateTime::from_naive_utc_and_offset(time, Utc));
    }
}

/// File-backed engine over a fresh temp directory.
pub fn file_engine(
    today: NaiveDate,
) -> (BudgetEngine<MemoryLedger>, Arc<JsonFileStore>, Arc<FixedClock>) {
    let store = Arc::new(JsonFileStore::new(temp_base().join("store")).expect("json store"));
    let clock = Arc::new(FixedClock::at(today, 9));
    let engine = BudgetEngine::open_with(
        store.clone() as Arc<dyn KeyValueStore>,
        MemoryLedger::new(),
        EngineConfig::default(),
        clock.clone(),
        Arc::new(RecordingObserver::new()),
    )
    .expect("open engine");
    (engine, store, clock)
}

/// Ledger that rejects appends for chosen recurring definitions, or all appends.
#[derive(Debug, Default)]
pub struct FlakyLedger {
    pub inner: MemoryLedger,
    pub reject_recurring: HashSet<Uuid>,
    pub reject_all: bool,
}

impl FlakyLedger {
    pub fn rejecting(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            reject_recurring: ids.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl LedgerStore for FlakyLedger {
    fn transactions_for_month(&self, month: MonthKey) -> Vec<Transaction> {
        self.inner.transactions_for_month(month)
    }

    fn append_transaction(&mut self, transaction: Transaction) -> Result<(), StoreError> {
        let rejected = self.reject_all
            || transaction
                .recurring_id
                .map(|id| self.reject_recurring.contains(&id))
                .unwrap_or(false);
        if rejected {
            return Err(StoreError::Unavailable("ledger write rejected".into()));
        }
        self.inner.append_transaction(transaction)
    }

    fn drain_changed_months(&mut self) -> Vec<MonthKey> {
        self.inner.drain_changed_months()
    }
}
