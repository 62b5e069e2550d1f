use std::{fmt, str::FromStr};

use chrono::{Datelike, Duration, NaiveDate};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::EngineError;

/// A calendar month, rendered and persisted as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

/// Where a month sits relative to today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthScope {
    Past,
    Current,
    Future,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self, EngineError> {
        if !(1..=12).contains(&month) || NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(EngineError::Validation(format!(
                "invalid month {year:04}-{month:02}"
            )));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        // Constructor guarantees the first day exists.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day() - Duration::days(1)
    }

    pub fn days_in_month(&self) -> u32 {
        days_in_month(self.year, self.month)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    pub fn scope(&self, today: NaiveDate) -> MonthScope {
        let current = MonthKey::of(today);
        match self.cmp(&current) {
            std::cmp::Ordering::Less => MonthScope::Past,
            std::cmp::Ordering::Equal => MonthScope::Current,
            std::cmp::Ordering::Greater => MonthScope::Future,
        }
    }

    /// Days of this month that have passed as of `today`: the day-of-month for the current
    /// month, the full month for past months, zero for future months.
    pub fn days_elapsed(&self, today: NaiveDate) -> u32 {
        match self.scope(today) {
            MonthScope::Past => self.days_in_month(),
            MonthScope::Current => today.day(),
            MonthScope::Future => 0,
        }
    }
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .map(|first| (first - Duration::days(1)).day())
        .unwrap_or(28)
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::Validation(format!("invalid month key `{value}`"));
        let (year, month) = value.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        MonthKey::new(year, month).map_err(|_| invalid())
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_and_formats_month_keys() {
        let key: MonthKey = "2024-02".parse().unwrap();
        assert_eq!(key.to_string(), "2024-02");
        assert_eq!(key.days_in_month(), 29);
        assert!("2024-13".parse::<MonthKey>().is_err());
        assert!("24-01".parse::<MonthKey>().is_err());
        assert!("2024/01".parse::<MonthKey>().is_err());
    }

    #[test]
    fn navigates_across_year_boundaries() {
        let december = MonthKey::new(2024, 12).unwrap();
        assert_eq!(december.next(), MonthKey::new(2025, 1).unwrap());
        assert_eq!(december.next().previous(), december);
        assert_eq!(december.last_day(), date(2024, 12, 31));
    }

    #[test]
    fn days_elapsed_depends_on_scope() {
        let today = date(2025, 4, 10);
        assert_eq!(MonthKey::of(today).days_elapsed(today), 10);
        assert_eq!(MonthKey::new(2025, 3).unwrap().days_elapsed(today), 31);
        assert_eq!(MonthKey::new(2025, 5).unwrap().days_elapsed(today), 0);
    }

    #[test]
    fn serializes_as_plain_string() {
        let key = MonthKey::new(2025, 7).unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"2025-07\"");
        let back: MonthKey = serde_json::from_str("\"2025-07\"").unwrap();
        assert_eq!(back, key);
    }
}
