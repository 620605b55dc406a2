use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use super::clock::{self, serde_datetime, serde_time};
use crate::errors::{AppError, AppResult};

/// Longest date range a single period may span.
pub const MAX_PERIOD_DAYS: i64 = 366;

/// A date range during which one city is worked with fixed daily hours.
/// Both dates are inclusive.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Period {
    pub id: String,
    pub city_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(with = "serde_time")]
    pub work_start: NaiveTime,
    #[serde(with = "serde_time")]
    pub work_end: NaiveTime,
    #[serde(serialize_with = "serde_datetime::serialize")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serde_datetime::serialize")]
    pub updated_at: NaiveDateTime,
}

impl Period {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end_date;
        self.start_date.iter_days().take_while(move |d| *d <= end)
    }

    pub fn same_schedule(&self, input: &PeriodInput) -> bool {
        self.start_date == input.start_date
            && self.end_date == input.end_date
            && self.work_start == input.work_start
            && self.work_end == input.work_end
    }
}

/// Validated fields for creating or replacing a period.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodInput {
    pub city_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
}

impl PeriodInput {
    pub fn new(
        city_id: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        work_start: NaiveTime,
        work_end: NaiveTime,
    ) -> AppResult<Self> {
        let input = Self {
            city_id: city_id.into(),
            start_date,
            end_date,
            work_start,
            work_end,
        };
        input.validate()?;
        Ok(input)
    }

    pub fn parse(
        city_id: &str,
        start_date: &str,
        end_date: &str,
        work_start: &str,
        work_end: &str,
    ) -> AppResult<Self> {
        Self::new(
            city_id.trim(),
            clock::parse_date(start_date)?,
            clock::parse_date(end_date)?,
            clock::parse_time(work_start)?,
            clock::parse_time(work_end)?,
        )
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.city_id.is_empty() {
            return Err(AppError::Validation("city_id is required".to_string()));
        }
        if self.start_date > self.end_date {
            return Err(AppError::Validation(format!(
                "start date {} is after end date {}",
                self.start_date, self.end_date
            )));
        }
        for (label, t) in [("work start", &self.work_start), ("work end", &self.work_end)] {
            if t.second() != 0 || t.nanosecond() != 0 {
                return Err(AppError::Validation(format!(
                    "{label} {} must fall on a whole minute",
                    clock::format_time(t)
                )));
            }
        }
        if self.work_start >= self.work_end {
            return Err(AppError::Validation(format!(
                "work start {} must be before work end {}",
                clock::format_time(&self.work_start),
                clock::format_time(&self.work_end)
            )));
        }
        let days = (self.end_date - self.start_date).num_days() + 1;
        if days > MAX_PERIOD_DAYS {
            return Err(AppError::Validation(format!(
                "period spans {days} days, at most {MAX_PERIOD_DAYS} allowed"
            )));
        }
        Ok(())
    }
}

/// Partial update; unset fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeriodPatch {
    pub city_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub work_start: Option<String>,
    pub work_end: Option<String>,
}

impl PeriodPatch {
    pub fn apply(&self, current: &Period) -> AppResult<PeriodInput> {
        let city_id = self.city_id.clone().unwrap_or_else(|| current.city_id.clone());
        let start_date = match &self.start_date {
            Some(s) => clock::parse_date(s)?,
            None => current.start_date,
        };
        let end_date = match &self.end_date {
            Some(s) => clock::parse_date(s)?,
            None => current.end_date,
        };
        let work_start = match &self.work_start {
            Some(s) => clock::parse_time(s)?,
            None => current.work_start,
        };
        let work_end = match &self.work_end {
            Some(s) => clock::parse_time(s)?,
            None => current.work_end,
        };
        PeriodInput::new(city_id.trim(), start_date, end_date, work_start, work_end)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PeriodFilter {
    pub city_id: Option<String>,
    /// When set, only periods with `end_date >= as_of` are returned.
    pub active_as_of: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        clock::parse_date(s).unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        clock::parse_time(s).unwrap()
    }

    #[test]
    fn test_valid_single_day_period() {
        let input = PeriodInput::new("moscow", d("2025-06-01"), d("2025-06-01"), t("10:00"), t("12:00"));
        assert!(input.is_ok());
    }

    #[test]
    fn test_end_before_start_rejected() {
        let err = PeriodInput::new("moscow", d("2025-06-02"), d("2025-06-01"), t("10:00"), t("12:00"))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_work_end_not_after_start_rejected() {
        assert!(PeriodInput::new("moscow", d("2025-06-01"), d("2025-06-01"), t("12:00"), t("12:00")).is_err());
        assert!(PeriodInput::new("moscow", d("2025-06-01"), d("2025-06-01"), t("13:00"), t("12:00")).is_err());
    }

    #[test]
    fn test_work_hours_with_seconds_rejected() {
        let err = PeriodInput::parse("moscow", "2025-06-01", "2025-06-01", "10:00:59", "11:00:00").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(PeriodInput::parse("moscow", "2025-06-01", "2025-06-01", "10:00:00", "11:00:30").is_err());
        assert!(PeriodInput::parse("moscow", "2025-06-01", "2025-06-01", "10:00:00", "11:00:00").is_ok());
    }

    #[test]
    fn test_overlong_period_rejected() {
        let err = PeriodInput::new("moscow", d("2025-01-01"), d("2026-01-02"), t("10:00"), t("12:00"))
            .unwrap_err();
        assert!(err.to_string().contains("at most 366"));
    }

    #[test]
    fn test_patch_keeps_unset_fields() {
        let now = chrono::Utc::now().naive_utc();
        let current = Period {
            id: "p1".to_string(),
            city_id: "moscow".to_string(),
            start_date: d("2025-06-01"),
            end_date: d("2025-06-03"),
            work_start: t("10:00"),
            work_end: t("12:00"),
            created_at: now,
            updated_at: now,
        };
        let patch = PeriodPatch {
            work_end: Some("14:00".to_string()),
            ..Default::default()
        };
        let input = patch.apply(&current).unwrap();
        assert_eq!(input.start_date, d("2025-06-01"));
        assert_eq!(input.end_date, d("2025-06-03"));
        assert_eq!(input.work_end, t("14:00"));
        assert!(!current.same_schedule(&input));
        assert_eq!(current.dates().count(), 3);
    }
}
