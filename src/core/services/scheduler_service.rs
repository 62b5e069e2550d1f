//! Recurring definition maintenance and the once-per-day materialization pass.

use std::{collections::HashMap, sync::Arc};

use chrono::{Duration, NaiveDate};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::SchedulerConfig,
    core::{
        clock::Clock,
        observer::{EngineEvent, EventKind, Observer},
    },
    errors::{EngineError, EngineResult},
    ledger::{
        LedgerStore, MonthKey, RecurringDefinition, RecurringDraft, RecurringStatus,
        RecurringUpdate, Transaction, UpcomingTransaction,
    },
    storage::{keys, load_typed, save_typed, KeyValueStore},
};

use super::report_failure;

/// Outcome of one scheduler pass.
#[derive(Debug, Default)]
pub struct SchedulerReport {
    /// True when the day gate stopped the pass.
    pub skipped: bool,
    pub materialized: Vec<Transaction>,
    pub completed: Vec<Uuid>,
    /// Per-definition failures that did not stop the pass.
    pub failures: Vec<EngineError>,
}

impl SchedulerReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Months that received a materialized transaction.
    pub fn changed_months(&self) -> Vec<MonthKey> {
        let mut months: Vec<MonthKey> = self.materialized.iter().map(Transaction::month).collect();
        months.sort();
        months.dedup();
        months
    }
}

/// Decided appends waiting for the definitions batch to reach the store.
#[derive(Debug)]
struct PendingBatch {
    day: NaiveDate,
    appends: Vec<Transaction>,
    rollback: HashMap<Uuid, RecurringDefinition>,
    completed: Vec<Uuid>,
}

pub struct RecurringScheduler {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn Observer>,
    config: SchedulerConfig,
    definitions: Vec<RecurringDefinition>,
    last_run: Option<NaiveDate>,
    pending: Option<PendingBatch>,
}

impl RecurringScheduler {
    /// Loads definitions and the day gate from the store.
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn Observer>,
        config: SchedulerConfig,
    ) -> EngineResult<Self> {
        let definitions =
            load_typed::<Vec<RecurringDefinition>>(store.as_ref(), keys::RECURRING_DEFINITIONS)?
                .unwrap_or_default();
        let last_run = load_typed::<NaiveDate>(store.as_ref(), keys::RECURRING_LAST_RUN)?;
        debug!(
            definitions = definitions.len(),
            last_run = ?last_run,
            "recurring scheduler loaded"
        );
        Ok(Self {
            store,
            clock,
            observer,
            config,
            definitions,
            last_run,
            pending: None,
        })
    }

    pub fn definitions(&self) -> &[RecurringDefinition] {
        &self.definitions
    }

    pub fn definition(&self, id: Uuid) -> Option<&RecurringDefinition> {
        self.definitions.iter().find(|def| def.id == id)
    }

    pub fn last_run(&self) -> Option<NaiveDate> {
        self.last_run
    }

    /// True while a decided batch still waits for its definitions write.
    pub fn has_pending_batch(&self) -> bool {
        self.pending.is_some()
    }

    pub fn create(&mut self, draft: RecurringDraft) -> EngineResult<RecurringDefinition> {
        let definition = RecurringDefinition::from_draft(draft, self.clock.now())?;
        self.definitions.push(definition.clone());
        self.persist_definitions()?;
        Ok(definition)
    }

    pub fn update(&mut self, id: Uuid, update: RecurringUpdate) -> EngineResult<RecurringDefinition> {
        let index = self.index_of(id)?;
        let updated = update.apply(&self.definitions[index], self.clock.now())?;
        self.definitions[index] = updated.clone();
        self.persist_definitions()?;
        Ok(updated)
    }

    pub fn pause(&mut self, id: Uuid) -> EngineResult<RecurringDefinition> {
        self.transition(id, RecurringStatus::Active, RecurringStatus::Paused)
    }

    pub fn resume(&mut self, id: Uuid) -> EngineResult<RecurringDefinition> {
        self.transition(id, RecurringStatus::Paused, RecurringStatus::Active)
    }

    pub fn delete(&mut self, id: Uuid) -> EngineResult<RecurringDefinition> {
        let index = self.index_of(id)?;
        let removed = self.definitions.remove(index);
        if let Some(batch) = self.pending.as_mut() {
            batch.appends.retain(|txn| txn.recurring_id != Some(id));
            batch.rollback.remove(&id);
        }
        self.persist_definitions()?;
        Ok(removed)
    }

    /// Active, non-expired definitions whose next occurrence falls within the horizon,
    /// earliest first.
    pub fn upcoming(&self) -> Vec<UpcomingTransaction> {
        let today = self.clock.today();
        let horizon = today + Duration::days(self.config.upcoming_horizon_days);
        let mut upcoming: Vec<UpcomingTransaction> = self
            .definitions
            .iter()
            .filter(|def| def.is_active() && !def.is_expired(today))
            .filter_map(|def| {
                let date = def.next_occurrence(today);
                (date >= today && date <= horizon)
                    .then(|| UpcomingTransaction::from_definition(def, date))
            })
            .collect();
        upcoming.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.name.cmp(&b.name)));
        upcoming
    }

    /// Runs the materialization pass at most once per calendar day.
    ///
    /// A batch whose definitions write failed earlier is flushed instead of deciding anew.
    pub fn run_daily(&mut self, ledger: &mut dyn LedgerStore) -> EngineResult<SchedulerReport> {
        if self.pending.is_some() {
            self.persist_definitions()?;
            return Ok(self.finish_batch(ledger));
        }

        let today = self.clock.today();
        if self.last_run == Some(today) {
            debug!(%today, "recurring pass already ran today");
            self.observer.on_event(
                &EngineEvent::new(EventKind::SchedulerPassSkipped).with("date", today),
            );
            return Ok(SchedulerReport::skipped());
        }

        self.pending = Some(self.decide(today));
        self.persist_definitions()?;
        Ok(self.finish_batch(ledger))
    }

    /// Completes a pending batch after its definitions write was replayed elsewhere.
    pub fn resume_pending(&mut self, ledger: &mut dyn LedgerStore) -> Option<SchedulerReport> {
        self.pending.as_ref()?;
        Some(self.finish_batch(ledger))
    }

    fn decide(&mut self, today: NaiveDate) -> PendingBatch {
        let now = self.clock.now();
        let mut batch = PendingBatch {
            day: today,
            appends: Vec::new(),
            rollback: HashMap::new(),
            completed: Vec::new(),
        };

        for def in self.definitions.iter_mut() {
            if !def.is_active() {
                continue;
            }
            if def.is_expired(today) {
                def.status = RecurringStatus::Completed;
                def.updated_at = now;
                batch.completed.push(def.id);
                continue;
            }
            if def.next_due_date > today {
                continue;
            }

            batch.rollback.insert(def.id, def.clone());
            let txn = def.materialize();
            let following = def.following_due_date();
            if def.end_date.map(|end| following > end).unwrap_or(false) {
                def.status = RecurringStatus::Completed;
                batch.completed.push(def.id);
            } else {
                def.next_due_date = following;
            }
            def.updated_at = now;
            batch.appends.push(txn);
        }

        debug!(
            %today,
            due = batch.appends.len(),
            completed = batch.completed.len(),
            "recurring pass decided"
        );
        batch
    }

    fn finish_batch(&mut self, ledger: &mut dyn LedgerStore) -> SchedulerReport {
        let mut report = SchedulerReport::default();
        let Some(batch) = self.pending.take() else {
            return report;
        };

        let mut reverted = false;
        for txn in batch.appends {
            let definition_id = txn.recurring_id;
            match ledger.append_transaction(txn.clone()) {
                Ok(()) => {
                    info!(
                        recurring_id = ?definition_id,
                        amount = txn.amount,
                        date = %txn.date(),
                        "materialized recurring transaction"
                    );
                    self.observer.on_event(
                        &EngineEvent::new(EventKind::TransactionMaterialized)
                            .with("transaction_id", txn.id)
                            .with("date", txn.date())
                            .with("amount", txn.amount),
                    );
                    report.materialized.push(txn);
                }
                Err(err) => {
                    let error = EngineError::from(err);
                    report_failure(self.observer.as_ref(), &error);
                    report.failures.push(error);
                    if let Some(snapshot) = definition_id.and_then(|id| batch.rollback.get(&id)) {
                        if let Some(def) = self.definitions.iter_mut().find(|d| d.id == snapshot.id)
                        {
                            *def = snapshot.clone();
                            reverted = true;
                        }
                    }
                }
            }
        }

        if reverted {
            if let Err(err) = self.persist_definitions() {
                report.failures.push(err);
            }
        }

        for id in &batch.completed {
            let still_completed = self
                .definition(*id)
                .map(|def| def.status == RecurringStatus::Completed)
                .unwrap_or(false);
            if still_completed {
                self.observer.on_event(
                    &EngineEvent::new(EventKind::RecurringCompleted).with("recurring_id", id),
                );
                report.completed.push(*id);
            }
        }

        self.last_run = Some(batch.day);
        if let Err(err) = save_typed(self.store.as_ref(), keys::RECURRING_LAST_RUN, &batch.day) {
            report_failure(self.observer.as_ref(), &err);
            report.failures.push(err);
        }
        report
    }

    fn transition(
        &mut self,
        id: Uuid,
        from: RecurringStatus,
        to: RecurringStatus,
    ) -> EngineResult<RecurringDefinition> {
        let index = self.index_of(id)?;
        let def = &mut self.definitions[index];
        if def.status != from {
            return Err(EngineError::InvalidTransition(format!(
                "recurring `{}` is {:?}, expected {:?}",
                def.name, def.status, from
            )));
        }
        def.status = to;
        def.updated_at = self.clock.now();
        let updated = def.clone();
        self.persist_definitions()?;
        Ok(updated)
    }

    fn index_of(&self, id: Uuid) -> EngineResult<usize> {
        self.definitions
            .iter()
            .position(|def| def.id == id)
            .ok_or_else(|| EngineError::not_found("recurring transaction", id))
    }

    fn persist_definitions(&self) -> EngineResult<()> {
        save_typed(
            self.store.as_ref(),
            keys::RECURRING_DEFINITIONS,
            &self.definitions,
        )
        .map_err(|err| {
            report_failure(self.observer.as_ref(), &err);
            err
        })
    }
}
