use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use super::{month::MonthKey, transaction::Transaction};
use crate::errors::{EngineError, StoreError};

/// Contract of the ledger that owns transactions grouped by calendar month.
///
/// Mutations record the affected month keys; the engine drains them to decide which months
/// to recompute.
pub trait LedgerStore: Send {
    /// Transactions of `month` in no guaranteed order.
    fn transactions_for_month(&self, month: MonthKey) -> Vec<Transaction>;
    fn append_transaction(&mut self, transaction: Transaction) -> Result<(), StoreError>;
    /// Returns and clears the months changed since the previous call.
    fn drain_changed_months(&mut self) -> Vec<MonthKey>;
}

/// In-memory ledger bucketed by month.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    months: BTreeMap<MonthKey, Vec<Transaction>>,
    changed: BTreeSet<MonthKey>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transaction(&mut self, transaction: Transaction) -> Uuid {
        let id = transaction.id;
        let month = transaction.month();
        self.months.entry(month).or_default().push(transaction);
        self.changed.insert(month);
        id
    }

    pub fn transaction(&self, id: Uuid) -> Option<&Transaction> {
        self.months.values().flatten().find(|txn| txn.id == id)
    }

    /// Applies `mutator` to the transaction, re-bucketing it if its timestamp moved months.
    pub fn update_transaction<F>(&mut self, id: Uuid, mutator: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut Transaction),
    {
        let mut txn = self
            .take(id)
            .ok_or_else(|| EngineError::not_found("transaction", id))?;
        mutator(&mut txn);
        self.add_transaction(txn);
        Ok(())
    }

    pub fn remove_transaction(&mut self, id: Uuid) -> Result<Transaction, EngineError> {
        self.take(id)
            .ok_or_else(|| EngineError::not_found("transaction", id))
    }

    pub fn transaction_count(&self, month: MonthKey) -> usize {
        self.months.get(&month).map(Vec::len).unwrap_or(0)
    }

    pub fn months(&self) -> impl Iterator<Item = &MonthKey> {
        self.months.keys()
    }

    fn take(&mut self, id: Uuid) -> Option<Transaction> {
        for (month, txns) in self.months.iter_mut() {
            if let Some(index) = txns.iter().position(|txn| txn.id == id) {
                self.changed.insert(*month);
                return Some(txns.remove(index));
            }
        }
        None
    }
}

impl LedgerStore for MemoryLedger {
    fn transactions_for_month(&self, month: MonthKey) -> Vec<Transaction> {
        self.months.get(&month).cloned().unwrap_or_default()
    }

    fn append_transaction(&mut self, transaction: Transaction) -> Result<(), StoreError> {
        self.add_transaction(transaction);
        Ok(())
    }

    fn drain_changed_months(&mut self) -> Vec<MonthKey> {
        std::mem::take(&mut self.changed).into_iter().collect()
    }
}
