//! Domain models for transactions, recurring definitions, mini-budgets, and notifications,
//! plus the ledger contract the engine reads from and appends to.

#[allow(clippy::module_inception)]
pub mod ledger;
pub mod mini_budget;
pub mod month;
pub mod notification;
pub mod recurring;
pub mod totals;
pub mod transaction;

pub use ledger::{LedgerStore, MemoryLedger};
pub use mini_budget::{
    BudgetClassification, BudgetStatus, MiniBudget, MiniBudgetDraft, MiniBudgetMonthlyState,
    MiniBudgetUpdate,
};
pub use month::{MonthKey, MonthScope};
pub use notification::{Notification, NotificationKind};
pub use recurring::{
    next_due_date, Frequency, RecurringDefinition, RecurringDraft, RecurringStatus,
    RecurringUpdate, UpcomingTransaction,
};
pub use totals::MonthTotals;
pub use transaction::{Transaction, TransactionType};
