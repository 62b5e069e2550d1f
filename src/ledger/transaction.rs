use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::month::MonthKey;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Expense,
    Income,
    Saved,
    Credit,
}

/// A money movement recorded in the ledger. `created_at` decides the month bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_product_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(kind: TransactionType, amount: f64, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            amount,
            category: None,
            credit_product_id: None,
            goal_id: None,
            recurring_id: None,
            created_at,
        }
    }

    pub fn expense(amount: f64, category: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self::new(TransactionType::Expense, amount, created_at).with_category(category)
    }

    pub fn income(amount: f64, created_at: DateTime<Utc>) -> Self {
        Self::new(TransactionType::Income, amount, created_at)
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn month(&self) -> MonthKey {
        MonthKey::of(self.created_at.date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }

    pub fn is_expense(&self) -> bool {
        self.kind == TransactionType::Expense
    }

    pub fn in_category(&self, categories: &[String]) -> bool {
        self.category
            .as_ref()
            .map(|category| categories.iter().any(|linked| linked == category))
            .unwrap_or(false)
    }
}

/// Midnight UTC of `date`, the timestamp given to transactions materialized for that day.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(date.and_time(NaiveTime::MIN), Utc)
}
