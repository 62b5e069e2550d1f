//! Facade wiring the scheduler, forecast, and notification components to one ledger.

use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::{ConfigManager, EngineConfig},
    errors::{EngineError, EngineResult},
    ledger::{
        LedgerStore, MiniBudget, MiniBudgetDraft, MiniBudgetMonthlyState, MiniBudgetUpdate,
        MonthKey, MonthTotals, Notification, RecurringDefinition, RecurringDraft,
        RecurringUpdate, Transaction, UpcomingTransaction,
    },
    storage::{keys, JsonFileStore, KeyValueStore, WriteCommand},
};

use super::{
    clock::{Clock, SystemClock},
    observer::{EngineEvent, EventKind, Observer, TracingObserver},
    services::{
        report_failure, ForecastEngine, NotificationEngine, RecurringScheduler, SchedulerReport,
    },
};

/// Outcome of draining the dirty-month queue.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub recomputed: Vec<MonthKey>,
    pub raised: Vec<Notification>,
    /// Failures that were reported to the observer without stopping the refresh.
    pub failures: Vec<EngineError>,
}

/// Scheduler pass followed by the refresh it triggered.
#[derive(Debug, Default)]
pub struct DailyReport {
    pub scheduler: SchedulerReport,
    pub refresh: RefreshReport,
}

pub struct BudgetEngine<L: LedgerStore> {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn Observer>,
    ledger: L,
    scheduler: RecurringScheduler,
    forecast: ForecastEngine,
    notifications: NotificationEngine,
    focused: MonthKey,
    /// Calendar month seen by the previous daily run.
    calendar_month: Option<MonthKey>,
}

impl<L: LedgerStore> BudgetEngine<L> {
    /// Opens the engine against `store` with the system clock and tracing observer.
    pub fn open(store: Arc<dyn KeyValueStore>, ledger: L, config: EngineConfig) -> EngineResult<Self> {
        Self::open_with(
            store,
            ledger,
            config,
            Arc::new(SystemClock),
            Arc::new(TracingObserver),
        )
    }

    /// Opens a file-backed engine beneath `base`, reading `config/engine.json` when present.
    pub fn open_at(base: PathBuf, ledger: L) -> EngineResult<Self> {
        let manager = ConfigManager::with_base_dir(base)?;
        Self::open_with_manager(&manager, ledger)
    }

    /// Opens a file-backed engine in the default data directory.
    pub fn open_default(ledger: L) -> EngineResult<Self> {
        let manager = ConfigManager::new()?;
        Self::open_with_manager(&manager, ledger)
    }

    fn open_with_manager(manager: &ConfigManager, ledger: L) -> EngineResult<Self> {
        let config = manager.load()?;
        let store = JsonFileStore::new(manager.store_dir())?;
        Self::open(Arc::new(store), ledger, config)
    }

    pub fn open_with(
        store: Arc<dyn KeyValueStore>,
        ledger: L,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn Observer>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let scheduler = RecurringScheduler::load(
            store.clone(),
            clock.clone(),
            observer.clone(),
            config.scheduler,
        )?;
        let forecast = ForecastEngine::load(
            store.clone(),
            clock.clone(),
            observer.clone(),
            config.forecast,
        )?;
        let notifications = NotificationEngine::load(
            store.clone(),
            clock.clone(),
            observer.clone(),
            config.alerts,
        )?;
        let focused = MonthKey::of(clock.today());
        info!(%focused, "budget engine opened");
        Ok(Self {
            store,
            clock,
            observer,
            ledger,
            scheduler,
            forecast,
            notifications,
            focused,
            calendar_month: None,
        })
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Direct ledger access. Mutations are picked up by the next [`BudgetEngine::refresh`].
    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn scheduler(&self) -> &RecurringScheduler {
        &self.scheduler
    }

    pub fn forecast(&self) -> &ForecastEngine {
        &self.forecast
    }

    pub fn notifications(&self) -> &NotificationEngine {
        &self.notifications
    }

    pub fn focused_month(&self) -> MonthKey {
        self.focused
    }

    /// Runs the once-per-day scheduler pass, then refreshes derived state.
    ///
    /// The first run after opening, and any run in a new calendar month, enters today's month:
    /// budgets are carried forward into it, and a focus left on the previous month follows
    /// the calendar.
    pub fn run_daily(&mut self) -> EngineResult<DailyReport> {
        let scheduler = self.scheduler.run_daily(&mut self.ledger)?;
        let mut failures = Vec::new();
        let current = MonthKey::of(self.clock.today());
        if self.calendar_month != Some(current) {
            let previous = self.calendar_month.replace(current);
            if let Some(previous) = previous {
                info!(from = %previous, to = %current, "calendar entered a new month");
                if self.focused == previous {
                    self.set_focus(current);
                }
            }
            if let Err(err) = self.forecast.carry_forward(current) {
                failures.push(err);
            }
        }
        let mut refresh = self.refresh();
        failures.append(&mut refresh.failures);
        refresh.failures = failures;
        Ok(DailyReport { scheduler, refresh })
    }

    /// Moves the focus to `month`, carrying budgets forward when it has none, then refreshes.
    pub fn focus_month(&mut self, month: MonthKey) -> RefreshReport {
        let mut failures = Vec::new();
        self.set_focus(month);
        if let Err(err) = self.forecast.carry_forward(month) {
            failures.push(err);
        }
        self.forecast.mark_dirty(month);
        let mut report = self.refresh();
        failures.append(&mut report.failures);
        report.failures = failures;
        report
    }

    fn set_focus(&mut self, month: MonthKey) {
        if month != self.focused {
            debug!(from = %self.focused, to = %month, "focus changed");
            self.notifications.reset_checked();
            self.focused = month;
        }
    }

    /// Recomputes every month changed in the ledger or in budget definitions, plus the months
    /// made stale by a new day, then evaluates the alert rules for the focused month.
    pub fn refresh(&mut self) -> RefreshReport {
        let mut report = RefreshReport::default();
        self.forecast.mark_day_change();
        let mut months: BTreeSet<MonthKey> = self.ledger.drain_changed_months().into_iter().collect();
        months.extend(self.forecast.take_dirty());

        for month in months {
            let transactions = self.ledger.transactions_for_month(month);
            if let Err(err) = self.forecast.recompute_month(month, &transactions) {
                report.failures.push(err);
            }
            report.recomputed.push(month);
        }

        let transactions = self.ledger.transactions_for_month(self.focused);
        let states = self.forecast.budget_states(self.focused, &transactions);
        let budget_states: Vec<(&MiniBudget, &MiniBudgetMonthlyState)> = states
            .iter()
            .map(|(budget, state)| (*budget, &**state))
            .collect();
        let evaluation = self
            .notifications
            .evaluate(self.focused, &transactions, &budget_states);
        report.raised = evaluation.raised;
        report.failures.extend(evaluation.failures);
        report
    }

    /// Appends a transaction to the ledger. A failed append carries the transaction for replay.
    pub fn append_transaction(&mut self, transaction: Transaction) -> EngineResult<()> {
        self.ledger
            .append_transaction(transaction.clone())
            .map_err(|err| {
                let error = EngineError::persistence(err, WriteCommand::Append { transaction });
                report_failure(self.observer.as_ref(), &error);
                error
            })
    }

    pub fn month_totals(&self, month: MonthKey) -> MonthTotals {
        MonthTotals::from_transactions(&self.ledger.transactions_for_month(month))
    }

    pub fn notify_goal_completed(&mut self, goal: &str) -> EngineResult<Option<Notification>> {
        self.notifications.notify_goal_completed(goal)
    }

    /// Replays a write that previously failed. A replayed definitions batch also completes
    /// the scheduler pass that was waiting on it.
    pub fn retry(&mut self, command: WriteCommand) -> EngineResult<()> {
        command
            .replay(self.store.as_ref(), &mut self.ledger)
            .map_err(|err| {
                let error = EngineError::persistence(err, command.clone());
                report_failure(self.observer.as_ref(), &error);
                error
            })?;
        self.observer.on_event(
            &EngineEvent::new(EventKind::RetrySucceeded).with("key", command.target()),
        );
        if command.target() == keys::RECURRING_DEFINITIONS {
            if let Some(report) = self.scheduler.resume_pending(&mut self.ledger) {
                debug!(
                    materialized = report.materialized.len(),
                    "resumed pending recurring batch"
                );
            }
        }
        Ok(())
    }

    pub fn upcoming(&self) -> Vec<UpcomingTransaction> {
        self.scheduler.upcoming()
    }

    pub fn recurring(&self) -> &[RecurringDefinition] {
        self.scheduler.definitions()
    }

    pub fn create_recurring(&mut self, draft: RecurringDraft) -> EngineResult<RecurringDefinition> {
        self.scheduler.create(draft)
    }

    pub fn update_recurring(
        &mut self,
        id: Uuid,
        update: RecurringUpdate,
    ) -> EngineResult<RecurringDefinition> {
        self.scheduler.update(id, update)
    }

    pub fn pause_recurring(&mut self, id: Uuid) -> EngineResult<RecurringDefinition> {
        self.scheduler.pause(id)
    }

    pub fn resume_recurring(&mut self, id: Uuid) -> EngineResult<RecurringDefinition> {
        self.scheduler.resume(id)
    }

    pub fn delete_recurring(&mut self, id: Uuid) -> EngineResult<RecurringDefinition> {
        self.scheduler.delete(id)
    }

    pub fn budgets_for_month(&self, month: MonthKey) -> Vec<&MiniBudget> {
        self.forecast.budgets_for_month(month)
    }

    pub fn budget_state(&self, budget_id: Uuid, month: MonthKey) -> Option<&MiniBudgetMonthlyState> {
        self.forecast.state_for(budget_id, month)
    }

    pub fn create_budget(&mut self, draft: MiniBudgetDraft) -> EngineResult<MiniBudget> {
        self.forecast.create(draft)
    }

    pub fn update_budget(&mut self, id: Uuid, update: MiniBudgetUpdate) -> EngineResult<MiniBudget> {
        self.forecast.update(id, update)
    }

    /// Archives a budget and drops its alert tracking.
    pub fn archive_budget(&mut self, id: Uuid) -> EngineResult<MiniBudget> {
        let archived = self.forecast.archive(id)?;
        self.notifications.forget_budget(archived.id)?;
        Ok(archived)
    }

    /// Deletes a budget and drops its alert tracking.
    pub fn delete_budget(&mut self, id: Uuid) -> EngineResult<MiniBudget> {
        let removed = self.forecast.delete(id)?;
        self.notifications.forget_budget(removed.id)?;
        Ok(removed)
    }

    pub fn inbox(&self) -> Vec<&Notification> {
        self.notifications.notifications()
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.unread_count()
    }

    pub fn mark_read(&mut self, id: Uuid) -> EngineResult<()> {
        self.notifications.mark_read(id)
    }

    pub fn mark_all_read(&mut self) -> EngineResult<usize> {
        self.notifications.mark_all_read()
    }

    pub fn delete_notification(&mut self, id: Uuid) -> EngineResult<Notification> {
        self.notifications.delete(id)
    }

    pub fn clear_month(&mut self, month: MonthKey) -> EngineResult<usize> {
        self.notifications.clear_month(month)
    }

    pub fn today(&self) -> chrono::NaiveDate {
        self.clock.today()
    }
}
