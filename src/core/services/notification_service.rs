//! Rule evaluation over month totals and mini-budget states, plus the notification inbox.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::AlertConfig,
    core::{
        clock::Clock,
        observer::{EngineEvent, EventKind, Observer},
    },
    errors::{EngineError, EngineResult},
    ledger::{
        notification::format_amount, BudgetClassification, MiniBudget, MiniBudgetMonthlyState,
        MonthKey, MonthTotals, Notification, NotificationKind, Transaction,
    },
    storage::{keys, load_typed, save_typed, KeyValueStore},
};

use super::report_failure;

/// Most recent spike alert of a month.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SpikeAnchor {
    at: DateTime<Utc>,
    amount: f64,
    transaction_id: Uuid,
}

/// Deduplication memory persisted beside the inbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AlertMemory {
    #[serde(default)]
    fired: BTreeSet<String>,
    /// Last seen classification per `"{budgetId}-{month}"`.
    #[serde(default)]
    budget_states: BTreeMap<String, BudgetClassification>,
    #[serde(default)]
    spike_anchors: BTreeMap<String, SpikeAnchor>,
}

fn month_key(kind: NotificationKind, month: MonthKey) -> String {
    format!("{}:{}", kind.tag(), month)
}

fn spike_key(transaction_id: Uuid) -> String {
    format!("{}:{}", NotificationKind::LargeExpenseSpike.tag(), transaction_id)
}

fn goal_key(goal: &str) -> String {
    format!("{}:{}", NotificationKind::GoalCompleted.tag(), goal)
}

fn percent(ratio: f64) -> String {
    format!("{}", (ratio * 100.0).round())
}

/// Outcome of one rule pass.
#[derive(Debug, Default)]
pub struct EvaluationReport {
    pub raised: Vec<Notification>,
    pub failures: Vec<EngineError>,
}

pub struct NotificationEngine {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn Observer>,
    config: AlertConfig,
    inbox: Vec<Notification>,
    memory: AlertMemory,
    checked: HashMap<MonthKey, HashSet<Uuid>>,
}

impl NotificationEngine {
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn Observer>,
        config: AlertConfig,
    ) -> EngineResult<Self> {
        let inbox = load_typed::<Vec<Notification>>(store.as_ref(), keys::NOTIFICATIONS)?
            .unwrap_or_default();
        let memory = load_typed::<AlertMemory>(store.as_ref(), keys::NOTIFICATION_STATE)?
            .unwrap_or_default();
        debug!(
            notifications = inbox.len(),
            fired = memory.fired.len(),
            "notification engine loaded"
        );
        Ok(Self {
            store,
            clock,
            observer,
            config,
            inbox,
            memory,
            checked: HashMap::new(),
        })
    }

    /// Forgets which expenses were already examined for spikes.
    pub fn reset_checked(&mut self) {
        self.checked.clear();
    }

    pub fn is_checked(&self, month: MonthKey, transaction_id: Uuid) -> bool {
        self.checked
            .get(&month)
            .map(|ids| ids.contains(&transaction_id))
            .unwrap_or(false)
    }

    /// Runs the rule set for `month` and returns the notifications raised by this pass.
    pub fn evaluate(
        &mut self,
        month: MonthKey,
        transactions: &[Transaction],
        budgets: &[(&MiniBudget, &MiniBudgetMonthlyState)],
    ) -> EvaluationReport {
        let now = self.clock.now();
        let today = self.clock.today();
        let totals = MonthTotals::from_transactions(transactions);
        let income = totals.income;
        let is_current = MonthKey::of(today) == month;
        let day = today.day();
        let mut raised = Vec::new();
        let mut memory_changed = self.prune_spike_anchors(now);

        if is_current
            && day <= self.config.first_week_last_day
            && income > 0.0
            && totals.expenses > income * self.config.first_week_expense_ratio
        {
            let params = BTreeMap::from([
                ("expenses".to_string(), format_amount(totals.expenses)),
                (
                    "threshold_percent".to_string(),
                    percent(self.config.first_week_expense_ratio),
                ),
            ]);
            raised.extend(self.fire_once(
                NotificationKind::HighFirstWeekSpending,
                month,
                params,
                now,
            ));
        }

        if totals.has_activity() && totals.remaining <= 0.0 {
            let params =
                BTreeMap::from([("remaining".to_string(), format_amount(totals.remaining))]);
            raised.extend(self.fire_once(NotificationKind::NegativeBalance, month, params, now));
        }

        if is_current
            && day < self.config.mid_month_day
            && income > 0.0
            && totals.remaining < income * self.config.mid_month_remaining_ratio
        {
            let params = BTreeMap::from([
                ("remaining".to_string(), format_amount(totals.remaining)),
                (
                    "threshold_percent".to_string(),
                    percent(self.config.mid_month_remaining_ratio),
                ),
            ]);
            raised.extend(self.fire_once(
                NotificationKind::MidMonthOverspending,
                month,
                params,
                now,
            ));
        }

        if let Some(note) = self.check_spike(month, transactions, income, now) {
            memory_changed = true;
            raised.push(note);
        }

        if income > 0.0
            && totals.remaining > 0.0
            && totals.remaining < income * self.config.low_balance_ratio
        {
            let params = BTreeMap::from([
                ("remaining".to_string(), format_amount(totals.remaining)),
                (
                    "threshold_percent".to_string(),
                    percent(self.config.low_balance_ratio),
                ),
            ]);
            raised.extend(self.fire_once(NotificationKind::LowBalance, month, params, now));
        }

        for (budget, state) in budgets {
            let cache_key = state.cache_key();
            let previous = self
                .memory
                .budget_states
                .get(&cache_key)
                .copied()
                .unwrap_or(BudgetClassification::Ok);
            if previous == state.state {
                continue;
            }
            self.memory.budget_states.insert(cache_key, state.state);
            memory_changed = true;

            let kind = match state.state {
                BudgetClassification::Over => NotificationKind::MiniBudgetOver,
                BudgetClassification::Warning => NotificationKind::MiniBudgetWarning,
                BudgetClassification::Ok => continue,
            };
            let params = BTreeMap::from([
                ("budget".to_string(), budget.name.clone()),
                ("spent".to_string(), format_amount(state.spent)),
                ("limit".to_string(), format_amount(state.limit)),
                ("forecast".to_string(), format_amount(state.forecast)),
                ("budget_id".to_string(), budget.id.to_string()),
            ]);
            raised.push(self.raise(kind, Some(month), params, now));
        }

        let mut report = EvaluationReport {
            raised,
            failures: Vec::new(),
        };
        if !report.raised.is_empty() || memory_changed {
            report.failures = self.persist_all();
        }
        debug!(%month, raised = report.raised.len(), "notification rules evaluated");
        report
    }

    /// Raises the goal-completed alert the first time `goal` completes.
    pub fn notify_goal_completed(&mut self, goal: &str) -> EngineResult<Option<Notification>> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(EngineError::Validation("goal name must not be empty".into()));
        }
        if !self.memory.fired.insert(goal_key(goal)) {
            return Ok(None);
        }
        let params = BTreeMap::from([("goal".to_string(), goal.to_string())]);
        let note = self.raise(NotificationKind::GoalCompleted, None, params, self.clock.now());
        match self.persist_all().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(Some(note)),
        }
    }

    /// Drops the last-seen classifications of `budget_id`. Called when the budget is archived
    /// or deleted.
    pub fn forget_budget(&mut self, budget_id: Uuid) -> EngineResult<()> {
        let prefix = format!("{budget_id}-");
        let before = self.memory.budget_states.len();
        self.memory
            .budget_states
            .retain(|key, _| !key.starts_with(&prefix));
        if self.memory.budget_states.len() == before {
            return Ok(());
        }
        debug!(budget = %budget_id, "budget alert tracking dropped");
        self.persist_memory()
    }

    /// Inbox entries, newest first.
    pub fn notifications(&self) -> Vec<&Notification> {
        let mut notes: Vec<&Notification> = self.inbox.iter().collect();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notes
    }

    pub fn notification(&self, id: Uuid) -> Option<&Notification> {
        self.inbox.iter().find(|note| note.id == id)
    }

    pub fn unread_count(&self) -> usize {
        self.inbox.iter().filter(|note| !note.read).count()
    }

    pub fn mark_read(&mut self, id: Uuid) -> EngineResult<()> {
        let note = self
            .inbox
            .iter_mut()
            .find(|note| note.id == id)
            .ok_or_else(|| EngineError::not_found("notification", id))?;
        if note.read {
            return Ok(());
        }
        note.read = true;
        self.persist_inbox()
    }

    /// Returns how many entries changed.
    pub fn mark_all_read(&mut self) -> EngineResult<usize> {
        let mut changed = 0;
        for note in self.inbox.iter_mut().filter(|note| !note.read) {
            note.read = true;
            changed += 1;
        }
        if changed > 0 {
            self.persist_inbox()?;
        }
        Ok(changed)
    }

    pub fn delete(&mut self, id: Uuid) -> EngineResult<Notification> {
        let index = self
            .inbox
            .iter()
            .position(|note| note.id == id)
            .ok_or_else(|| EngineError::not_found("notification", id))?;
        let removed = self.inbox.remove(index);
        self.persist_inbox()?;
        Ok(removed)
    }

    /// Removes every entry owned by `month`. Deduplication memory is kept, so cleared
    /// alerts do not come back.
    pub fn clear_month(&mut self, month: MonthKey) -> EngineResult<usize> {
        let before = self.inbox.len();
        self.inbox.retain(|note| note.month != Some(month));
        let removed = before - self.inbox.len();
        if removed > 0 {
            self.persist_inbox()?;
        }
        Ok(removed)
    }

    fn fire_once(
        &mut self,
        kind: NotificationKind,
        month: MonthKey,
        params: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Option<Notification> {
        if !self.memory.fired.insert(month_key(kind, month)) {
            return None;
        }
        Some(self.raise(kind, Some(month), params, now))
    }

    /// Examines the month's unchecked expenses and alerts on the largest one above the
    /// income share, unless a smaller-or-equal spike fired within the suppression window.
    fn check_spike(
        &mut self,
        month: MonthKey,
        transactions: &[Transaction],
        income: f64,
        now: DateTime<Utc>,
    ) -> Option<Notification> {
        let checked = self.checked.entry(month).or_default();
        let mut candidates: Vec<&Transaction> = transactions
            .iter()
            .filter(|txn| txn.is_expense() && !checked.contains(&txn.id))
            .collect();
        for txn in &candidates {
            checked.insert(txn.id);
        }
        if income <= 0.0 {
            return None;
        }

        let threshold = income * self.config.spike_income_ratio;
        candidates.retain(|txn| {
            txn.amount > threshold && !self.memory.fired.contains(&spike_key(txn.id))
        });
        let largest = candidates
            .into_iter()
            .max_by(|a, b| a.amount.total_cmp(&b.amount))?;

        let anchor_key = month.to_string();
        let window = Duration::minutes(self.config.spike_window_minutes);
        if let Some(anchor) = self.memory.spike_anchors.get(&anchor_key) {
            if now - anchor.at < window && largest.amount <= anchor.amount {
                debug!(
                    %month,
                    transaction = %largest.id,
                    "large expense suppressed by the spike window"
                );
                return None;
            }
        }

        self.memory.fired.insert(spike_key(largest.id));
        self.memory.spike_anchors.insert(
            anchor_key,
            SpikeAnchor {
                at: now,
                amount: largest.amount,
                transaction_id: largest.id,
            },
        );
        let params = BTreeMap::from([
            ("amount".to_string(), format_amount(largest.amount)),
            (
                "threshold_percent".to_string(),
                percent(self.config.spike_income_ratio),
            ),
            ("transaction_id".to_string(), largest.id.to_string()),
        ]);
        Some(self.raise(
            NotificationKind::LargeExpenseSpike,
            Some(month),
            params,
            now,
        ))
    }

    /// Removes spike anchors whose suppression window has elapsed. Returns whether any went.
    fn prune_spike_anchors(&mut self, now: DateTime<Utc>) -> bool {
        let window = Duration::minutes(self.config.spike_window_minutes);
        let before = self.memory.spike_anchors.len();
        self.memory
            .spike_anchors
            .retain(|_, anchor| now - anchor.at < window);
        self.memory.spike_anchors.len() != before
    }

    fn raise(
        &mut self,
        kind: NotificationKind,
        month: Option<MonthKey>,
        params: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Notification {
        let note = Notification::new(kind, month, params, now);
        info!(kind = %kind, month = ?month.map(|m| m.to_string()), "notification raised");
        self.observer.on_event(
            &EngineEvent::new(EventKind::NotificationRaised)
                .with("type", kind)
                .with("notification_id", note.id),
        );
        self.inbox.push(note.clone());
        note
    }

    fn persist_all(&self) -> Vec<EngineError> {
        let mut failures = Vec::new();
        if let Err(err) = self.persist_inbox() {
            failures.push(err);
        }
        if let Err(err) = self.persist_memory() {
            failures.push(err);
        }
        failures
    }

    fn persist_memory(&self) -> EngineResult<()> {
        save_typed(self.store.as_ref(), keys::NOTIFICATION_STATE, &self.memory).map_err(|err| {
            report_failure(self.observer.as_ref(), &err);
            err
        })
    }

    fn persist_inbox(&self) -> EngineResult<()> {
        save_typed(self.store.as_ref(), keys::NOTIFICATIONS, &self.inbox).map_err(|err| {
            report_failure(self.observer.as_ref(), &err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{clock::FixedClock, observer::RecordingObserver},
        ledger::transaction::start_of_day,
        storage::MemoryStore,
    };
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn engine(today: NaiveDate) -> (NotificationEngine, Arc<FixedClock>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::at(today, 10));
        let engine = NotificationEngine::load(
            store.clone(),
            clock.clone(),
            Arc::new(RecordingObserver::new()),
            AlertConfig::default(),
        )
        .unwrap();
        (engine, clock, store)
    }

    fn kinds(report: &EvaluationReport) -> Vec<NotificationKind> {
        report.raised.iter().map(|note| note.kind).collect()
    }

    #[test]
    fn negative_balance_fires_once_per_month() {
        let (mut engine, _, _) = engine(date(2025, 6, 20));
        let month = MonthKey::new(2025, 6).unwrap();
        let at = start_of_day(date(2025, 6, 2));
        let txns = vec![
            Transaction::income(100.0, at),
            Transaction::expense(100.0, "Rent", at),
        ];
        let first = engine.evaluate(month, &txns, &[]);
        assert!(kinds(&first).contains(&NotificationKind::NegativeBalance));
        let second = engine.evaluate(month, &txns, &[]);
        assert!(second.raised.is_empty());
    }

    #[test]
    fn empty_month_is_not_exhausted() {
        let (mut engine, _, _) = engine(date(2025, 6, 20));
        let report = engine.evaluate(MonthKey::new(2025, 6).unwrap(), &[], &[]);
        assert!(report.raised.is_empty());
    }

    #[test]
    fn day_rules_only_apply_to_the_current_month() {
        let (mut engine, _, _) = engine(date(2025, 6, 3));
        let at = start_of_day(date(2025, 5, 2));
        let txns = vec![
            Transaction::income(1000.0, at),
            Transaction::expense(150.0, "Food", at),
            Transaction::expense(150.0, "Food", at),
            Transaction::expense(150.0, "Food", at),
        ];
        let report = engine.evaluate(MonthKey::new(2025, 5).unwrap(), &txns, &[]);
        assert!(!kinds(&report).contains(&NotificationKind::HighFirstWeekSpending));
        assert!(!kinds(&report).contains(&NotificationKind::MidMonthOverspending));
    }

    #[test]
    fn low_balance_requires_positive_remaining() {
        let (mut engine, _, _) = engine(date(2025, 6, 25));
        let at = start_of_day(date(2025, 6, 2));
        let txns = vec![
            Transaction::income(1000.0, at),
            Transaction::expense(190.0, "Rent", at),
            Transaction::expense(190.0, "Rent", at),
            Transaction::expense(190.0, "Rent", at),
            Transaction::expense(190.0, "Rent", at),
            Transaction::expense(150.0, "Food", at),
        ];
        let report = engine.evaluate(MonthKey::new(2025, 6).unwrap(), &txns, &[]);
        assert_eq!(kinds(&report), vec![NotificationKind::LowBalance]);
    }

    #[test]
    fn goal_completion_fires_once_ever() {
        let (mut engine, _, _) = engine(date(2025, 6, 25));
        assert!(engine.notify_goal_completed("Vacation").unwrap().is_some());
        assert!(engine.notify_goal_completed("Vacation").unwrap().is_none());
        assert!(engine.notify_goal_completed(" ").is_err());
    }

    #[test]
    fn forgetting_a_budget_drops_its_tracked_state() {
        let (mut engine, clock, store) = engine(date(2025, 6, 10));
        let month = MonthKey::new(2025, 6).unwrap();
        let budget = MiniBudget::from_draft(
            crate::ledger::MiniBudgetDraft::new("Dining", month, 100.0, ["Dining"]),
            clock.now(),
        )
        .unwrap();
        let txns = vec![Transaction::expense(100.0, "Dining", start_of_day(date(2025, 6, 2)))];
        let state = MiniBudgetMonthlyState::compute(
            &budget,
            &txns,
            date(2025, 6, 10),
            &crate::config::ForecastConfig::default(),
        );
        let report = engine.evaluate(month, &txns, &[(&budget, &state)]);
        assert!(kinds(&report).contains(&NotificationKind::MiniBudgetOver));
        assert_eq!(engine.memory.budget_states.len(), 1);

        engine.forget_budget(budget.id).unwrap();
        assert!(engine.memory.budget_states.is_empty());
        let saved = load_typed::<AlertMemory>(store.as_ref(), keys::NOTIFICATION_STATE)
            .unwrap()
            .unwrap();
        assert!(saved.budget_states.is_empty());
    }

    #[test]
    fn spike_anchors_expire_with_their_window() {
        let (mut engine, clock, _) = engine(date(2025, 6, 10));
        let month = MonthKey::new(2025, 6).unwrap();
        let at = start_of_day(date(2025, 6, 10));
        let txns = vec![
            Transaction::income(1000.0, at),
            Transaction::expense(300.0, "Travel", at),
        ];
        engine.evaluate(month, &txns, &[]);
        assert_eq!(engine.memory.spike_anchors.len(), 1);

        clock.advance(Duration::minutes(30));
        engine.evaluate(month, &txns, &[]);
        assert_eq!(engine.memory.spike_anchors.len(), 1);

        clock.advance(Duration::minutes(31));
        engine.evaluate(month, &txns, &[]);
        assert!(engine.memory.spike_anchors.is_empty());
    }

    #[test]
    fn inbox_operations() {
        let (mut engine, clock, _) = engine(date(2025, 6, 25));
        let first = engine.notify_goal_completed("Car").unwrap().unwrap();
        clock.advance(Duration::minutes(5));
        let second = engine.notify_goal_completed("House").unwrap().unwrap();
        assert_eq!(engine.notifications()[0].id, second.id);
        assert_eq!(engine.unread_count(), 2);
        engine.mark_read(first.id).unwrap();
        assert_eq!(engine.unread_count(), 1);
        assert_eq!(engine.mark_all_read().unwrap(), 1);
        engine.delete(first.id).unwrap();
        assert!(matches!(
            engine.delete(first.id),
            Err(EngineError::NotFound { .. })
        ));
    }
}
