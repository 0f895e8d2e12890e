use crate::error::{BaselineError, BaselineResult};
use crate::types::DateWindow;
use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, Utc};

pub struct TemporalRangeValidator;

impl TemporalRangeValidator {
    /// Validates a `(start, end)` pair against today's UTC date.
    pub fn validate(start: &str, end: &str, max_span_years: u32) -> BaselineResult<DateWindow> {
        Self::validate_at(start, end, max_span_years, Utc::now().date_naive())
    }

    /// Same as [`validate`](Self::validate) with an explicit "today".
    pub fn validate_at(
        start: &str,
        end: &str,
        max_span_years: u32,
        today: NaiveDate,
    ) -> BaselineResult<DateWindow> {
        let start = Self::parse_date(start)?;
        let end = Self::parse_date(end)?;

        if start > end {
            return Err(BaselineError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }

        let ceiling = start
            .checked_add_months(Months::new(max_span_years.saturating_mul(12)))
            .unwrap_or(NaiveDate::MAX);
        if end > ceiling {
            return Err(BaselineError::DateRangeTooLarge {
                start: start.to_string(),
                end: end.to_string(),
                max_years: max_span_years,
            });
        }

        if end > today {
            return Err(BaselineError::InvalidDate(format!(
                "end date {} is in the future",
                end
            )));
        }

        Ok(DateWindow { start, end })
    }

    /// Parses `YYYY-MM-DD`, or a timestamp whose calendar date is kept.
    pub fn parse_date(raw: &str) -> BaselineResult<NaiveDate> {
        let raw = raw.trim();
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Ok(date);
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Ok(ts.date_naive());
        }
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(ts.date());
        }
        if let Some((date, _time)) = raw.split_once(['T', ' ']) {
            if let Ok(date) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
                return Ok(date);
            }
        }
        Err(BaselineError::InvalidDate(format!(
            "'{}' is not a calendar date (expected YYYY-MM-DD)",
            raw
        )))
    }

    /// The `years`-long window ending today.
    pub fn trailing_years(years: u32, today: NaiveDate) -> DateWindow {
        let start = today
            .checked_sub_months(Months::new(years.saturating_mul(12)))
            .unwrap_or(NaiveDate::MIN);
        DateWindow { start, end: today }
    }
}
