use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    month::days_in_month,
    transaction::{start_of_day, Transaction, TransactionType},
};
use crate::errors::EngineError;

const DEFAULT_RECURRENCE_TYPE: &str = "general";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn label(&self) -> &'static str {
        match self {
            Frequency::Daily => "Daily",
            Frequency::Weekly => "Weekly",
            Frequency::Biweekly => "Every 2 Weeks",
            Frequency::Monthly => "Monthly",
            Frequency::Yearly => "Yearly",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecurringStatus {
    #[default]
    Active,
    Paused,
    Completed,
}

/// Computes the due date following `current`.
///
/// Monthly and yearly cadences re-derive the day-of-month from `start` on every step and clamp
/// it to the target month's length, so a schedule anchored on the 31st lands on the 30th in
/// April and returns to the 31st in May.
pub fn next_due_date(current: NaiveDate, frequency: Frequency, start: NaiveDate) -> NaiveDate {
    match frequency {
        Frequency::Daily => step_days(current, 1),
        Frequency::Weekly => step_days(current, 7),
        Frequency::Biweekly => step_days(current, 14),
        Frequency::Monthly => {
            let (year, month) = if current.month() == 12 {
                (current.year() + 1, 1)
            } else {
                (current.year(), current.month() + 1)
            };
            clamped_date(year, month, start.day())
        }
        Frequency::Yearly => clamped_date(current.year() + 1, current.month(), start.day()),
    }
}

fn step_days(current: NaiveDate, days: i64) -> NaiveDate {
    current
        .checked_add_signed(Duration::days(days))
        .unwrap_or(NaiveDate::MAX)
}

/// `day` clamped to the month's length. The clamp leaves only a year beyond chrono's range
/// as a failure; that saturates to `NaiveDate::MAX`, which is never due.
fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day.min(days_in_month(year, month)))
        .unwrap_or(NaiveDate::MAX)
}

/// Template that periodically materializes concrete transactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurringDefinition {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    #[serde(default = "RecurringDefinition::default_recurrence_type")]
    pub recurrence_type: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub next_due_date: NaiveDate,
    #[serde(default)]
    pub status: RecurringStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_product_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_by_credit_product_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringDefinition {
    pub fn from_draft(draft: RecurringDraft, now: DateTime<Utc>) -> Result<Self, EngineError> {
        draft.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            name: draft.name.trim().to_string(),
            kind: draft.kind,
            recurrence_type: draft
                .recurrence_type
                .unwrap_or_else(Self::default_recurrence_type),
            amount: draft.amount,
            category: draft.category,
            frequency: draft.frequency,
            start_date: draft.start_date,
            end_date: draft.end_date,
            next_due_date: draft.start_date,
            status: RecurringStatus::Active,
            credit_product_id: draft.credit_product_id,
            paid_by_credit_product_id: draft.paid_by_credit_product_id,
            goal_id: draft.goal_id,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn default_recurrence_type() -> String {
        DEFAULT_RECURRENCE_TYPE.into()
    }

    pub fn is_active(&self) -> bool {
        self.status == RecurringStatus::Active
    }

    /// True once the end date lies strictly before `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.end_date.map(|end| end < today).unwrap_or(false)
    }

    pub fn following_due_date(&self) -> NaiveDate {
        next_due_date(self.next_due_date, self.frequency, self.start_date)
    }

    /// The start date while the schedule has not begun, otherwise the pending due date.
    pub fn next_occurrence(&self, today: NaiveDate) -> NaiveDate {
        if self.start_date > today {
            self.start_date
        } else {
            self.next_due_date
        }
    }

    /// Builds the concrete transaction for the pending due date, timestamped on that date.
    pub fn materialize(&self) -> Transaction {
        let mut txn = Transaction::new(self.kind, self.amount, start_of_day(self.next_due_date));
        txn.category = self.category.clone();
        txn.credit_product_id = self.paid_by_credit_product_id.or(self.credit_product_id);
        txn.goal_id = self.goal_id;
        txn.recurring_id = Some(self.id);
        txn
    }
}

/// User input for a new recurring definition.
#[derive(Debug, Clone)]
pub struct RecurringDraft {
    pub name: String,
    pub kind: TransactionType,
    pub recurrence_type: Option<String>,
    pub amount: f64,
    pub category: Option<String>,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub credit_product_id: Option<Uuid>,
    pub paid_by_credit_product_id: Option<Uuid>,
    pub goal_id: Option<Uuid>,
}

impl RecurringDraft {
    pub fn new(
        name: impl Into<String>,
        kind: TransactionType,
        amount: f64,
        frequency: Frequency,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            recurrence_type: None,
            amount,
            category: None,
            frequency,
            start_date,
            end_date: None,
            credit_product_id: None,
            paid_by_credit_product_id: None,
            goal_id: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn ending(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        validate_fields(&self.name, self.amount, self.start_date, self.end_date)
    }
}

/// Partial edit of a recurring definition. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct RecurringUpdate {
    pub name: Option<String>,
    pub amount: Option<f64>,
    pub category: Option<Option<String>>,
    pub frequency: Option<Frequency>,
    pub end_date: Option<Option<NaiveDate>>,
}

impl RecurringUpdate {
    /// Applies the edit to a copy and validates the result before returning it.
    pub fn apply(
        &self,
        definition: &RecurringDefinition,
        now: DateTime<Utc>,
    ) -> Result<RecurringDefinition, EngineError> {
        let mut updated = definition.clone();
        if let Some(name) = &self.name {
            updated.name = name.trim().to_string();
        }
        if let Some(amount) = self.amount {
            updated.amount = amount;
        }
        if let Some(category) = &self.category {
            updated.category = category.clone();
        }
        if let Some(frequency) = self.frequency {
            updated.frequency = frequency;
        }
        if let Some(end_date) = self.end_date {
            updated.end_date = end_date;
        }
        validate_fields(
            &updated.name,
            updated.amount,
            updated.start_date,
            updated.end_date,
        )?;
        updated.updated_at = now;
        Ok(updated)
    }
}

fn validate_fields(
    name: &str,
    amount: f64,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation(
            "recurring transaction name must not be empty".into(),
        ));
    }
    if !amount.is_finite() || amount <= 0.0 {
        return Err(EngineError::Validation(
            "recurring amount must be a positive number".into(),
        ));
    }
    if let Some(end) = end_date {
        if end < start_date {
            return Err(EngineError::Validation(
                "end date must not precede the start date".into(),
            ));
        }
    }
    Ok(())
}

/// Read-only projection of an occurrence due within the upcoming horizon.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UpcomingTransaction {
    pub definition_id: Uuid,
    pub name: String,
    pub kind: TransactionType,
    pub amount: f64,
    pub category: Option<String>,
    pub frequency: Frequency,
    pub date: NaiveDate,
}

impl UpcomingTransaction {
    pub fn from_definition(definition: &RecurringDefinition, date: NaiveDate) -> Self {
        Self {
            definition_id: definition.id,
            name: definition.name.clone(),
            kind: definition.kind,
            amount: definition.amount,
            category: definition.category.clone(),
            frequency: definition.frequency,
            date,
        }
    }
}
