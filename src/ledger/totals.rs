use serde::{Deserialize, Serialize};

use super::transaction::{Transaction, TransactionType};

/// Cash totals of one month. Credit purchases are tracked but do not reduce `remaining`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MonthTotals {
    pub income: f64,
    pub expenses: f64,
    pub saved: f64,
    pub credit: f64,
    pub remaining: f64,
}

impl MonthTotals {
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        let mut totals = MonthTotals::default();
        for txn in transactions {
            match txn.kind {
                TransactionType::Income => totals.income += txn.amount,
                TransactionType::Expense => totals.expenses += txn.amount,
                TransactionType::Saved => totals.saved += txn.amount,
                TransactionType::Credit => totals.credit += txn.amount,
            }
        }
        totals.remaining = totals.income - totals.expenses - totals.saved;
        totals
    }

    pub fn has_activity(&self) -> bool {
        self.income > 0.0 || self.expenses > 0.0 || self.saved > 0.0
    }
}
