//! Key-value persistence contracts plus the replayable write command used for retries.

pub mod json_backend;
pub mod memory;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    errors::{EngineError, EngineResult, StoreError},
    ledger::{LedgerStore, Transaction},
};

pub use json_backend::JsonFileStore;
pub use memory::MemoryStore;

/// Storage keys owned by the engine components.
pub mod keys {
    pub const RECURRING_DEFINITIONS: &str = "recurring_transactions";
    pub const RECURRING_LAST_RUN: &str = "recurring_last_run";
    pub const MINI_BUDGETS: &str = "mini_budgets";
    pub const MINI_BUDGET_STATES: &str = "mini_budget_states";
    pub const MINI_BUDGET_CARRIED: &str = "mini_budget_carried";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const NOTIFICATION_STATE: &str = "notification_state";
}

/// Abstraction over textual key-value backends. Both calls may fail; retrying is the
/// caller's decision.
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn save(&self, key: &str, value: &Value) -> Result<(), StoreError>;
}

/// Loads and deserializes the value stored under `key`.
pub fn load_typed<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.load(key)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serializes and saves `value`. A backend failure is returned as
/// [`EngineError::Persistence`] carrying the exact write for replay.
pub fn save_typed<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> EngineResult<()> {
    let value = serde_json::to_value(value).map_err(StoreError::from)?;
    WriteCommand::Save {
        key: key.to_string(),
        value,
    }
    .execute(store)
}

/// A decided write that can be replayed without re-deriving the state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteCommand {
    Save { key: String, value: Value },
    Append { transaction: Transaction },
}

impl WriteCommand {
    pub fn target(&self) -> &str {
        match self {
            WriteCommand::Save { key, .. } => key,
            WriteCommand::Append { .. } => "ledger",
        }
    }

    /// Replays the write against the provided collaborators.
    pub fn replay(
        &self,
        store: &dyn KeyValueStore,
        ledger: &mut dyn LedgerStore,
    ) -> Result<(), StoreError> {
        match self {
            WriteCommand::Save { key, value } => store.save(key, value),
            WriteCommand::Append { transaction } => ledger.append_transaction(transaction.clone()),
        }
    }

    fn execute(self, store: &dyn KeyValueStore) -> EngineResult<()> {
        let result = match &self {
            WriteCommand::Save { key, value } => store.save(key, value),
            WriteCommand::Append { .. } => Err(StoreError::Unavailable(
                "ledger appends require a ledger store".into(),
            )),
        };
        result.map_err(|err| EngineError::persistence(err, self))
    }
}
