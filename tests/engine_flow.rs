mod common;

use budget_engine::{
    ledger::{
        BudgetClassification, Frequency, LedgerStore, MiniBudgetDraft, NotificationKind,
        RecurringDraft, Transaction, TransactionType,
    },
    EventKind, WriteCommand,
};
use common::{date, month, on, FlakyLedger, Harness};

#[test]
fn recurring_spending_flows_into_budgets_and_alerts() {
    let harness = Harness::new(date(2025, 10, 1));
    let mut engine = harness.engine();
    engine
        .create_recurring(RecurringDraft::new(
            "Salary",
            TransactionType::Income,
            2000.0,
            Frequency::Monthly,
            date(2025, 10, 1),
        ))
        .unwrap();
    engine
        .create_recurring(
            RecurringDraft::new(
                "Lunch",
                TransactionType::Expense,
                20.0,
                Frequency::Daily,
                date(2025, 10, 1),
            )
            .with_category("Dining"),
        )
        .unwrap();
    let budget = engine
        .create_budget(MiniBudgetDraft::new("Dining", month(2025, 10), 400.0, ["Dining"]))
        .unwrap();

    let day_one = engine.run_daily().unwrap();
    assert_eq!(day_one.scheduler.materialized.len(), 2);
    assert!(day_one.refresh.recomputed.contains(&month(2025, 10)));

    // 20 per day over 31 days forecasts 620 against a 400 limit.
    let state = engine.budget_state(budget.id, month(2025, 10)).unwrap();
    assert_eq!(state.spent, 20.0);
    assert_eq!(state.state, BudgetClassification::Over);
    assert!(day_one
        .refresh
        .raised
        .iter()
        .any(|note| note.kind == NotificationKind::MiniBudgetOver));

    for day in 2..=5 {
        harness.set_today(date(2025, 10, day), 9);
        let report = engine.run_daily().unwrap();
        assert_eq!(report.scheduler.materialized.len(), 1);
        assert!(report
            .refresh
            .raised
            .iter()
            .all(|note| note.kind != NotificationKind::MiniBudgetOver));
    }

    let totals = engine.month_totals(month(2025, 10));
    assert_eq!(totals.income, 2000.0);
    assert_eq!(totals.expenses, 100.0);
    assert_eq!(totals.remaining, 1900.0);
    assert_eq!(harness.observer.count(EventKind::TransactionMaterialized), 6);
}

#[test]
fn month_rollover_moves_focus_and_carries_budgets() {
    let harness = Harness::new(date(2025, 10, 31));
    let mut engine = harness.engine();
    engine
        .create_budget(MiniBudgetDraft::new("Dining", month(2025, 10), 250.0, ["Dining"]))
        .unwrap();
    engine.refresh();

    harness.set_today(date(2025, 11, 1), 8);
    let report = engine.focus_month(month(2025, 11));
    assert_eq!(engine.focused_month(), month(2025, 11));
    assert!(report.recomputed.contains(&month(2025, 11)));
    let november = engine.budgets_for_month(month(2025, 11));
    assert_eq!(november.len(), 1);
    assert_eq!(november[0].limit, 250.0);
    assert_eq!(harness.observer.count(EventKind::BudgetCarriedForward), 1);
}

#[test]
fn daily_run_follows_the_calendar_into_a_new_month() {
    let harness = Harness::new(date(2025, 10, 31));
    let mut engine = harness.engine();
    engine
        .create_budget(MiniBudgetDraft::new("Dining", month(2025, 10), 250.0, ["Dining"]))
        .unwrap();
    engine.run_daily().unwrap();
    assert_eq!(engine.focused_month(), month(2025, 10));
    assert_eq!(harness.observer.count(EventKind::BudgetCarriedForward), 0);

    harness.set_today(date(2025, 11, 1), 8);
    let report = engine.run_daily().unwrap();
    assert_eq!(engine.focused_month(), month(2025, 11));
    assert!(report.refresh.recomputed.contains(&month(2025, 11)));
    let november = engine.budgets_for_month(month(2025, 11));
    assert_eq!(november.len(), 1);
    assert!(engine.budget_state(november[0].id, month(2025, 11)).is_some());
    assert_eq!(harness.observer.count(EventKind::BudgetCarriedForward), 1);

    harness.set_today(date(2025, 11, 2), 8);
    engine.run_daily().unwrap();
    assert_eq!(engine.budgets_for_month(month(2025, 11)).len(), 1);
}

#[test]
fn failed_ledger_append_is_replayed_by_retry() {
    let harness = Harness::new(date(2025, 10, 12));
    let mut engine = harness.open(FlakyLedger::default());
    engine.ledger_mut().reject_all = true;

    let txn = Transaction::expense(75.0, "Groceries", on(2025, 10, 12));
    let err = engine.append_transaction(txn.clone()).unwrap_err();
    let command = err.retry_command().cloned().expect("replayable append");
    assert_eq!(command, WriteCommand::Append { transaction: txn.clone() });
    assert_eq!(harness.observer.count(EventKind::PersistenceFailed), 1);

    engine.ledger_mut().reject_all = false;
    engine.retry(command).unwrap();
    let october = engine.ledger().transactions_for_month(month(2025, 10));
    assert_eq!(october, vec![txn]);
    assert_eq!(harness.observer.count(EventKind::RetrySucceeded), 1);
}

#[test]
fn failed_store_write_is_reported_and_retried() {
    let harness = Harness::new(date(2025, 10, 12));
    let mut engine = harness.engine();
    harness.store.set_failing(true);
    let err = engine
        .create_budget(MiniBudgetDraft::new("Food", month(2025, 10), 300.0, ["Groceries"]))
        .unwrap_err();
    assert!(err.is_retryable());
    // The in-memory model already holds the budget.
    assert_eq!(engine.budgets_for_month(month(2025, 10)).len(), 1);

    harness.store.set_failing(false);
    let command = err.retry_command().cloned().unwrap();
    engine.retry(command).unwrap();

    let reopened = harness.engine();
    assert_eq!(reopened.budgets_for_month(month(2025, 10)).len(), 1);
}
