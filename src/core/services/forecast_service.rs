//! Mini-budget bookkeeping and the per-month pace and forecast recompute.

use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use chrono::NaiveDate;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::ForecastConfig,
    core::{
        clock::Clock,
        observer::{EngineEvent, EventKind, Observer},
    },
    errors::{EngineError, EngineResult},
    ledger::{
        mini_budget::state_cache_key, BudgetStatus, MiniBudget, MiniBudgetDraft,
        MiniBudgetMonthlyState, MiniBudgetUpdate, MonthKey, MonthScope, Transaction,
    },
    storage::{keys, load_typed, save_typed, KeyValueStore},
};

use super::report_failure;

pub struct ForecastEngine {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn Observer>,
    config: ForecastConfig,
    budgets: Vec<MiniBudget>,
    states: BTreeMap<String, MiniBudgetMonthlyState>,
    /// Months that already received carried-forward budgets.
    carried: BTreeSet<MonthKey>,
    dirty: BTreeSet<MonthKey>,
    /// Calendar day the date-dependent months were last marked for recompute.
    computed_on: Option<NaiveDate>,
}

impl ForecastEngine {
    /// Loads budgets and the state cache from the store. Every month holding active budgets
    /// starts dirty so the first refresh recomputes it.
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn Observer>,
        config: ForecastConfig,
    ) -> EngineResult<Self> {
        let budgets = load_typed::<Vec<MiniBudget>>(store.as_ref(), keys::MINI_BUDGETS)?
            .unwrap_or_default();
        let states = load_typed::<BTreeMap<String, MiniBudgetMonthlyState>>(
            store.as_ref(),
            keys::MINI_BUDGET_STATES,
        )?
        .unwrap_or_default();
        let carried = load_typed::<BTreeSet<MonthKey>>(store.as_ref(), keys::MINI_BUDGET_CARRIED)?
            .unwrap_or_default();
        let dirty: BTreeSet<MonthKey> = budgets
            .iter()
            .filter(|budget| budget.is_active())
            .map(|budget| budget.month)
            .collect();
        debug!(
            budgets = budgets.len(),
            cached_states = states.len(),
            dirty_months = dirty.len(),
            "forecast engine loaded"
        );
        Ok(Self {
            store,
            clock,
            observer,
            config,
            budgets,
            states,
            carried,
            dirty,
            computed_on: None,
        })
    }

    pub fn budgets(&self) -> &[MiniBudget] {
        &self.budgets
    }

    pub fn budget(&self, id: Uuid) -> Option<&MiniBudget> {
        self.budgets.iter().find(|budget| budget.id == id)
    }

    /// Every budget owned by `month`, archived ones included, ordered by name.
    pub fn budgets_for_month(&self, month: MonthKey) -> Vec<&MiniBudget> {
        let mut budgets: Vec<&MiniBudget> = self
            .budgets
            .iter()
            .filter(|budget| budget.month == month)
            .collect();
        budgets.sort_by(|a, b| a.name.cmp(&b.name));
        budgets
    }

    pub fn active_budgets(&self, month: MonthKey) -> Vec<&MiniBudget> {
        self.budgets_for_month(month)
            .into_iter()
            .filter(|budget| budget.is_active())
            .collect()
    }

    pub fn create(&mut self, draft: MiniBudgetDraft) -> EngineResult<MiniBudget> {
        let budget = MiniBudget::from_draft(draft, self.clock.now())?;
        self.budgets.push(budget.clone());
        self.dirty.insert(budget.month);
        self.persist_budgets()?;
        Ok(budget)
    }

    pub fn update(&mut self, id: Uuid, update: MiniBudgetUpdate) -> EngineResult<MiniBudget> {
        let index = self.index_of(id)?;
        let updated = update.apply(&self.budgets[index], self.clock.now())?;
        self.budgets[index] = updated.clone();
        if update.affects_state() {
            self.dirty.insert(updated.month);
        }
        self.persist_budgets()?;
        Ok(updated)
    }

    pub fn archive(&mut self, id: Uuid) -> EngineResult<MiniBudget> {
        let index = self.index_of(id)?;
        let budget = &mut self.budgets[index];
        if budget.status == BudgetStatus::Archived {
            return Err(EngineError::InvalidTransition(format!(
                "mini-budget `{}` is already archived",
                budget.name
            )));
        }
        budget.status = BudgetStatus::Archived;
        budget.updated_at = self.clock.now();
        let archived = budget.clone();
        self.dirty.insert(archived.month);
        self.persist_budgets()?;
        Ok(archived)
    }

    pub fn delete(&mut self, id: Uuid) -> EngineResult<MiniBudget> {
        let index = self.index_of(id)?;
        let removed = self.budgets.remove(index);
        self.dirty.insert(removed.month);
        self.persist_budgets()?;
        Ok(removed)
    }

    pub fn mark_dirty(&mut self, month: MonthKey) {
        self.dirty.insert(month);
    }

    /// Marks the months whose pace depends on today's date, at most once per calendar day.
    ///
    /// That is the current month plus every month that turned past since the previous mark.
    /// Future months stay untouched because nothing has elapsed in them yet.
    pub fn mark_day_change(&mut self) {
        let today = self.clock.today();
        if self.computed_on == Some(today) {
            return;
        }
        let current = MonthKey::of(today);
        let since = self.computed_on.map(MonthKey::of);
        let stale: BTreeSet<MonthKey> = self
            .budgets
            .iter()
            .filter(|budget| budget.is_active())
            .map(|budget| budget.month)
            .filter(|month| *month <= current && since.map_or(true, |since| *month >= since))
            .collect();
        debug!(%today, months = stale.len(), "day changed, marking forecasts stale");
        self.dirty.extend(stale);
        self.computed_on = Some(today);
    }

    /// Returns and clears the months whose budgets changed since the last call.
    pub fn take_dirty(&mut self) -> Vec<MonthKey> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    /// Clones the previous month's active budgets into `month` when it holds no budget
    /// records at all.
    ///
    /// Past months are never populated, and a month is populated at most once, so archiving
    /// or deleting a carried budget does not bring it back.
    pub fn carry_forward(&mut self, month: MonthKey) -> EngineResult<Vec<MiniBudget>> {
        if month.scope(self.clock.today()) == MonthScope::Past
            || self.carried.contains(&month)
            || !self.budgets_for_month(month).is_empty()
        {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let renewed: Vec<MiniBudget> = self
            .active_budgets(month.previous())
            .into_iter()
            .map(|budget| budget.renewed_for(month, now))
            .collect();
        if renewed.is_empty() {
            return Ok(Vec::new());
        }

        info!(%month, count = renewed.len(), "carried mini-budgets forward");
        self.observer.on_event(
            &EngineEvent::new(EventKind::BudgetCarriedForward)
                .with("month", month)
                .with("count", renewed.len()),
        );
        self.budgets.extend(renewed.iter().cloned());
        self.carried.insert(month);
        self.dirty.insert(month);
        self.persist_budgets()?;
        save_typed(self.store.as_ref(), keys::MINI_BUDGET_CARRIED, &self.carried).map_err(
            |err| {
                report_failure(self.observer.as_ref(), &err);
                err
            },
        )?;
        Ok(renewed)
    }

    /// Recomputes every active budget of `month` from the month's transactions and refreshes
    /// the persisted cache. Cached entries of archived or deleted budgets are dropped.
    pub fn recompute_month(
        &mut self,
        month: MonthKey,
        transactions: &[Transaction],
    ) -> EngineResult<Vec<MiniBudgetMonthlyState>> {
        let today = self.clock.today();
        let fresh: Vec<MiniBudgetMonthlyState> = self
            .active_budgets(month)
            .into_iter()
            .map(|budget| MiniBudgetMonthlyState::compute(budget, transactions, today, &self.config))
            .collect();

        self.states.retain(|_, state| state.month != month);
        for state in &fresh {
            self.states.insert(state.cache_key(), state.clone());
        }
        self.observer.on_event(
            &EngineEvent::new(EventKind::BudgetRecomputed)
                .with("month", month)
                .with("budgets", fresh.len()),
        );
        self.persist_states()?;
        Ok(fresh)
    }

    pub fn state_for(&self, budget_id: Uuid, month: MonthKey) -> Option<&MiniBudgetMonthlyState> {
        self.states.get(&state_cache_key(budget_id, month))
    }

    /// Active budgets of `month` paired with their state. A budget missing from the cache is
    /// computed from `transactions` instead of being skipped.
    pub fn budget_states(
        &self,
        month: MonthKey,
        transactions: &[Transaction],
    ) -> Vec<(&MiniBudget, Cow<'_, MiniBudgetMonthlyState>)> {
        let today = self.clock.today();
        self.active_budgets(month)
            .into_iter()
            .map(|budget| {
                let state = match self.state_for(budget.id, month) {
                    Some(cached) => Cow::Borrowed(cached),
                    None => Cow::Owned(MiniBudgetMonthlyState::compute(
                        budget,
                        transactions,
                        today,
                        &self.config,
                    )),
                };
                (budget, state)
            })
            .collect()
    }

    fn index_of(&self, id: Uuid) -> EngineResult<usize> {
        self.budgets
            .iter()
            .position(|budget| budget.id == id)
            .ok_or_else(|| EngineError::not_found("mini-budget", id))
    }

    fn persist_budgets(&self) -> EngineResult<()> {
        save_typed(self.store.as_ref(), keys::MINI_BUDGETS, &self.budgets).map_err(|err| {
            report_failure(self.observer.as_ref(), &err);
            err
        })
    }

    fn persist_states(&self) -> EngineResult<()> {
        save_typed(self.store.as_ref(), keys::MINI_BUDGET_STATES, &self.states).map_err(|err| {
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
        ledger::{transaction::start_of_day as on, BudgetClassification},
        storage::MemoryStore,
    };
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn engine(store: Arc<MemoryStore>, today: NaiveDate) -> ForecastEngine {
        engine_with_clock(store, Arc::new(FixedClock::at(today, 12)))
    }

    fn engine_with_clock(store: Arc<MemoryStore>, clock: Arc<FixedClock>) -> ForecastEngine {
        ForecastEngine::load(
            store,
            clock,
            Arc::new(RecordingObserver::new()),
            ForecastConfig::default(),
        )
        .unwrap()
    }

    fn month(y: i32, m: u32) -> MonthKey {
        MonthKey::new(y, m).unwrap()
    }

    #[test]
    fn recompute_caches_state_per_budget_and_month() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(store.clone(), date(2025, 4, 10));
        let budget = engine
            .create(MiniBudgetDraft::new("Food", month(2025, 4), 100.0, ["Groceries"]))
            .unwrap();
        assert_eq!(engine.take_dirty(), vec![month(2025, 4)]);

        let txns = vec![Transaction::expense(50.0, "Groceries", on(date(2025, 4, 3)))];
        let states = engine.recompute_month(month(2025, 4), &txns).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].state, BudgetClassification::Over);
        assert!(engine.state_for(budget.id, month(2025, 4)).is_some());
        assert!(store.contains(keys::MINI_BUDGET_STATES));
    }

    #[test]
    fn archived_budgets_drop_out_of_the_cache() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(store, date(2025, 4, 10));
        let budget = engine
            .create(MiniBudgetDraft::new("Fun", month(2025, 4), 80.0, ["Games"]))
            .unwrap();
        engine.recompute_month(month(2025, 4), &[]).unwrap();
        engine.archive(budget.id).unwrap();
        engine.recompute_month(month(2025, 4), &[]).unwrap();
        assert!(engine.state_for(budget.id, month(2025, 4)).is_none());
        assert!(matches!(
            engine.archive(budget.id),
            Err(EngineError::InvalidTransition(_))
        ));
    }

    #[test]
    fn carry_forward_only_into_current_or_future_months() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(store, date(2025, 5, 2));
        engine
            .create(MiniBudgetDraft::new("Food", month(2025, 2), 300.0, ["Groceries"]))
            .unwrap();
        engine
            .create(MiniBudgetDraft::new("Food", month(2025, 4), 300.0, ["Groceries"]))
            .unwrap();

        assert!(engine.carry_forward(month(2025, 4)).unwrap().is_empty());
        let renewed = engine.carry_forward(month(2025, 5)).unwrap();
        assert_eq!(renewed.len(), 1);
        assert_eq!(renewed[0].limit, 300.0);
        assert_eq!(renewed[0].categories, vec!["Groceries".to_string()]);
        assert!(engine.carry_forward(month(2025, 5)).unwrap().is_empty());

        // March is past, so February's budget is not cloned into it.
        assert!(engine.carry_forward(month(2025, 3)).unwrap().is_empty());
    }

    #[test]
    fn archived_or_deleted_carried_budgets_are_not_cloned_again() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(store.clone(), date(2025, 5, 2));
        engine
            .create(MiniBudgetDraft::new("Food", month(2025, 4), 300.0, ["Groceries"]))
            .unwrap();
        let carried = engine.carry_forward(month(2025, 5)).unwrap();
        engine.archive(carried[0].id).unwrap();
        assert!(engine.carry_forward(month(2025, 5)).unwrap().is_empty());
        assert_eq!(engine.budgets_for_month(month(2025, 5)).len(), 1);

        engine.delete(carried[0].id).unwrap();
        assert!(engine.carry_forward(month(2025, 5)).unwrap().is_empty());

        let mut reopened = engine_with_clock(store, Arc::new(FixedClock::at(date(2025, 5, 2), 12)));
        assert!(reopened.carry_forward(month(2025, 5)).unwrap().is_empty());
        assert!(reopened.budgets_for_month(month(2025, 5)).is_empty());
    }

    #[test]
    fn load_marks_months_with_active_budgets_dirty() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(store.clone(), date(2025, 4, 10));
        engine
            .create(MiniBudgetDraft::new("Food", month(2025, 3), 300.0, ["Groceries"]))
            .unwrap();
        let archived = engine
            .create(MiniBudgetDraft::new("Fun", month(2025, 2), 50.0, ["Games"]))
            .unwrap();
        engine.archive(archived.id).unwrap();

        let mut reopened = engine_with_clock(store, Arc::new(FixedClock::at(date(2025, 4, 10), 12)));
        assert_eq!(reopened.take_dirty(), vec![month(2025, 3)]);
    }

    #[test]
    fn a_new_day_marks_the_current_and_newly_past_months() {
        let clock = Arc::new(FixedClock::at(date(2025, 4, 10), 12));
        let mut engine = engine_with_clock(Arc::new(MemoryStore::new()), clock.clone());
        for target in [month(2025, 4), month(2025, 5), month(2025, 6)] {
            engine
                .create(MiniBudgetDraft::new("Food", target, 300.0, ["Groceries"]))
                .unwrap();
        }
        engine.take_dirty();

        engine.mark_day_change();
        assert_eq!(engine.take_dirty(), vec![month(2025, 4)]);
        engine.mark_day_change();
        assert!(engine.take_dirty().is_empty());

        clock.advance(chrono::Duration::days(1));
        engine.mark_day_change();
        assert_eq!(engine.take_dirty(), vec![month(2025, 4)]);

        clock.set(on(date(2025, 5, 3)));
        engine.mark_day_change();
        assert_eq!(engine.take_dirty(), vec![month(2025, 4), month(2025, 5)]);
    }

    #[test]
    fn missing_cache_entries_are_computed_on_read() {
        let mut engine = engine(Arc::new(MemoryStore::new()), date(2025, 4, 10));
        let budget = engine
            .create(MiniBudgetDraft::new("Food", month(2025, 4), 100.0, ["Groceries"]))
            .unwrap();
        let txns = vec![Transaction::expense(30.0, "Groceries", on(date(2025, 4, 3)))];
        assert!(engine.state_for(budget.id, month(2025, 4)).is_none());

        let states = engine.budget_states(month(2025, 4), &txns);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].0.id, budget.id);
        assert_eq!(states[0].1.spent, 30.0);
        assert_eq!(states[0].1.days_elapsed, 10);
    }

    #[test]
    fn unknown_budget_is_not_found() {
        let mut engine = engine(Arc::new(MemoryStore::new()), date(2025, 4, 1));
        let err = engine.delete(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "mini-budget", .. }));
    }
}
