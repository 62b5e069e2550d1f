use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::month::MonthKey;

/// Closed set of alert triggers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    HighFirstWeekSpending,
    NegativeBalance,
    MidMonthOverspending,
    LargeExpenseSpike,
    LowBalance,
    MiniBudgetOver,
    MiniBudgetWarning,
    GoalCompleted,
}

impl NotificationKind {
    pub fn tag(&self) -> &'static str {
        match self {
            NotificationKind::HighFirstWeekSpending => "high_first_week_spending",
            NotificationKind::NegativeBalance => "negative_balance",
            NotificationKind::MidMonthOverspending => "mid_month_overspending",
            NotificationKind::LargeExpenseSpike => "large_expense_spike",
            NotificationKind::LowBalance => "low_balance",
            NotificationKind::MiniBudgetOver => "mini_budget_over",
            NotificationKind::MiniBudgetWarning => "mini_budget_warning",
            NotificationKind::GoalCompleted => "goal_completed",
        }
    }

    /// Fallback English title; localized text is produced by the rendering layer.
    fn default_title(&self) -> &'static str {
        match self {
            NotificationKind::HighFirstWeekSpending => "High spending this week",
            NotificationKind::NegativeBalance => "Funds exhausted",
            NotificationKind::MidMonthOverspending => "Overspending before mid-month",
            NotificationKind::LargeExpenseSpike => "Large expense",
            NotificationKind::LowBalance => "Low balance",
            NotificationKind::MiniBudgetOver => "Budget exceeded",
            NotificationKind::MiniBudgetWarning => "Budget at risk",
            NotificationKind::GoalCompleted => "Goal completed",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Structured values for localized rendering (amounts, budget and goal names).
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<MonthKey>,
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        month: Option<MonthKey>,
        params: BTreeMap<String, String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let message = default_message(kind, &params);
        Self {
            id: Uuid::new_v4(),
            kind,
            title: kind.default_title().to_string(),
            message,
            params,
            created_at,
            month,
            read: false,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

fn default_message(kind: NotificationKind, params: &BTreeMap<String, String>) -> String {
    let get = |name: &str| params.get(name).cloned().unwrap_or_default();
    match kind {
        NotificationKind::HighFirstWeekSpending => format!(
            "You have spent {} in the first week, more than {}% of this month's income.",
            get("expenses"),
            get("threshold_percent")
        ),
        NotificationKind::NegativeBalance => {
            format!("This month's funds are used up (remaining {}).", get("remaining"))
        }
        NotificationKind::MidMonthOverspending => format!(
            "Only {} left before mid-month, under {}% of this month's income.",
            get("remaining"),
            get("threshold_percent")
        ),
        NotificationKind::LargeExpenseSpike => format!(
            "An expense of {} is more than {}% of this month's income.",
            get("amount"),
            get("threshold_percent")
        ),
        NotificationKind::LowBalance => format!(
            "Only {} left this month, under {}% of income.",
            get("remaining"),
            get("threshold_percent")
        ),
        NotificationKind::MiniBudgetOver => format!(
            "{} is over its limit: spent {} of {}.",
            get("budget"),
            get("spent"),
            get("limit")
        ),
        NotificationKind::MiniBudgetWarning => format!(
            "{} is on pace to exceed its limit: forecast {} of {}.",
            get("budget"),
            get("forecast"),
            get("limit")
        ),
        NotificationKind::GoalCompleted => format!("You reached your goal {}.", get("goal")),
    }
}

/// Formats an amount the way notification parameters carry it.
pub fn format_amount(value: f64) -> String {
    format!("{value:.2}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_match_serialized_form() {
        for kind in [
            NotificationKind::NegativeBalance,
            NotificationKind::LargeExpenseSpike,
            NotificationKind::MiniBudgetOver,
            NotificationKind::GoalCompleted,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.tag());
        }
    }

    #[test]
    fn fallback_message_uses_params() {
        let params = BTreeMap::from([("goal".to_string(), "Vacation".to_string())]);
        let note = Notification::new(NotificationKind::GoalCompleted, None, params, Utc::now());
        assert_eq!(note.title, "Goal completed");
        assert!(note.message.contains("Vacation"));
        assert!(!note.read);
    }
}
