use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{month::MonthKey, transaction::Transaction};
use crate::{config::ForecastConfig, errors::EngineError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    #[default]
    Active,
    Archived,
}

/// Live classification of a mini-budget within its month.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BudgetClassification {
    Ok,
    Warning,
    Over,
}

impl BudgetClassification {
    pub fn is_alerting(&self) -> bool {
        !matches!(self, BudgetClassification::Ok)
    }
}

/// A spending limit scoped to one calendar month and a set of categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MiniBudget {
    pub id: Uuid,
    pub name: String,
    pub month: MonthKey,
    pub currency: String,
    pub limit: f64,
    pub categories: Vec<String>,
    #[serde(default)]
    pub status: BudgetStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl MiniBudget {
    pub fn from_draft(draft: MiniBudgetDraft, now: DateTime<Utc>) -> Result<Self, EngineError> {
        let categories = normalize_categories(draft.categories);
        validate_fields(&draft.name, draft.limit, &categories)?;
        Ok(Self {
            id: Uuid::new_v4(),
            name: draft.name.trim().to_string(),
            month: draft.month,
            currency: draft.currency,
            limit: draft.limit,
            categories,
            status: BudgetStatus::Active,
            created_at: now,
            updated_at: now,
            note: draft.note,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == BudgetStatus::Active
    }

    pub fn cache_key(&self) -> String {
        state_cache_key(self.id, self.month)
    }

    /// A fresh record for `month` carrying this budget's limit and categories.
    pub fn renewed_for(&self, month: MonthKey, now: DateTime<Utc>) -> MiniBudget {
        MiniBudget {
            id: Uuid::new_v4(),
            month,
            status: BudgetStatus::Active,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }
}

pub fn state_cache_key(budget_id: Uuid, month: MonthKey) -> String {
    format!("{budget_id}-{month}")
}

/// User input for a new mini-budget.
#[derive(Debug, Clone)]
pub struct MiniBudgetDraft {
    pub name: String,
    pub month: MonthKey,
    pub currency: String,
    pub limit: f64,
    pub categories: Vec<String>,
    pub note: Option<String>,
}

impl MiniBudgetDraft {
    pub fn new<I, S>(name: impl Into<String>, month: MonthKey, limit: f64, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            month,
            currency: "USD".into(),
            limit,
            categories: categories.into_iter().map(Into::into).collect(),
            note: None,
        }
    }
}

/// Partial edit of a mini-budget. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct MiniBudgetUpdate {
    pub name: Option<String>,
    pub limit: Option<f64>,
    pub categories: Option<Vec<String>>,
    pub note: Option<Option<String>>,
}

impl MiniBudgetUpdate {
    /// True when the edit can change the budget's computed state.
    pub fn affects_state(&self) -> bool {
        self.limit.is_some() || self.categories.is_some()
    }

    pub fn apply(&self, budget: &MiniBudget, now: DateTime<Utc>) -> Result<MiniBudget, EngineError> {
        let mut updated = budget.clone();
        if let Some(name) = &self.name {
            updated.name = name.trim().to_string();
        }
        if let Some(limit) = self.limit {
            updated.limit = limit;
        }
        if let Some(categories) = &self.categories {
            updated.categories = normalize_categories(categories.clone());
        }
        if let Some(note) = &self.note {
            updated.note = note.clone();
        }
        validate_fields(&updated.name, updated.limit, &updated.categories)?;
        updated.updated_at = now;
        Ok(updated)
    }
}

fn normalize_categories(categories: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(categories.len());
    for category in categories {
        let trimmed = category.trim();
        if trimmed.is_empty() || normalized.iter().any(|existing| existing == trimmed) {
            continue;
        }
        normalized.push(trimmed.to_string());
    }
    normalized
}

fn validate_fields(name: &str, limit: f64, categories: &[String]) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation(
            "mini-budget name must not be empty".into(),
        ));
    }
    if !limit.is_finite() || limit <= 0.0 {
        return Err(EngineError::Validation(
            "mini-budget limit must be greater than zero".into(),
        ));
    }
    if categories.is_empty() {
        return Err(EngineError::Validation(
            "mini-budget needs at least one category".into(),
        ));
    }
    Ok(())
}

/// Derived spending state of one budget in one month.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MiniBudgetMonthlyState {
    pub budget_id: Uuid,
    pub month: MonthKey,
    pub limit: f64,
    pub spent: f64,
    pub remaining: f64,
    pub pace: f64,
    pub forecast: f64,
    pub time_progress: f64,
    pub expected_spending: f64,
    pub spending_ratio: f64,
    pub state: BudgetClassification,
    pub days_elapsed: u32,
    pub days_in_month: u32,
}

impl MiniBudgetMonthlyState {
    /// Computes the state purely from the budget, the month's transactions, and `today`.
    pub fn compute(
        budget: &MiniBudget,
        transactions: &[Transaction],
        today: NaiveDate,
        thresholds: &ForecastConfig,
    ) -> Self {
        let spent: f64 = transactions
            .iter()
            .filter(|txn| txn.is_expense() && txn.month() == budget.month)
            .filter(|txn| txn.in_category(&budget.categories))
            .map(|txn| txn.amount)
            .sum();
        let days_in_month = budget.month.days_in_month();
        let days_elapsed = budget.month.days_elapsed(today);

        let pace = if days_elapsed > 0 {
            spent / days_elapsed as f64
        } else {
            0.0
        };
        let forecast = pace * days_in_month as f64;
        let time_progress = (days_elapsed as f64 / days_in_month as f64).min(1.0);
        let expected_spending = budget.limit * time_progress;
        let spending_ratio = if expected_spending > 0.0 {
            spent / expected_spending
        } else {
            0.0
        };
        let state = classify(spent, budget.limit, forecast, spending_ratio, thresholds);

        Self {
            budget_id: budget.id,
            month: budget.month,
            limit: budget.limit,
            spent,
            remaining: budget.limit - spent,
            pace,
            forecast,
            time_progress,
            expected_spending,
            spending_ratio,
            state,
            days_elapsed,
            days_in_month,
        }
    }

    pub fn cache_key(&self) -> String {
        state_cache_key(self.budget_id, self.month)
    }
}

/// First match wins: already exceeded, projected past the over ratio, then the warning
/// signals (pace ahead of elapsed time, or forecast near the limit).
pub fn classify(
    spent: f64,
    limit: f64,
    forecast: f64,
    spending_ratio: f64,
    thresholds: &ForecastConfig,
) -> BudgetClassification {
    if spent >= limit {
        BudgetClassification::Over
    } else if forecast > limit * thresholds.over_forecast_ratio {
        BudgetClassification::Over
    } else if spending_ratio > thresholds.warning_pace_ratio
        || forecast > limit * thresholds.warning_forecast_ratio
    {
        BudgetClassification::Warning
    } else {
        BudgetClassification::Ok
    }
}
