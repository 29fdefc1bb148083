//! Half-open processing windows `[from, to)` and the operator caps on them.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default cap on a single invocation's window.
pub const DEFAULT_MAX_WINDOW_DAYS: u32 = 3;

/// Default cap on rows read per invocation.
pub const DEFAULT_MAX_ROWS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowError {
    #[error("window start {from} must be before end {to}")]
    Empty { from: String, to: String },
    #[error("invalid month '{0}' (expected YYYY-MM)")]
    InvalidMonth(String),
    #[error("invalid timestamp '{0}' (expected RFC 3339 or YYYY-MM-DD)")]
    InvalidTimestamp(String),
    #[error("window spans {days:.2} days, cap is {max_days}; pass --force --yes to override")]
    TooLong { days: f64, max_days: u32 },
    #[error("row limit {requested} exceeds cap {max}; pass --force --yes to override")]
    TooManyRows { requested: usize, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Midnight UTC at the start of `date`.
pub fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

impl Window {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, WindowError> {
        if from >= to {
            return Err(WindowError::Empty {
                from: format_ts(&from),
                to: format_ts(&to),
            });
        }
        Ok(Self { from, to })
    }

    /// Whole days `[from, to)`.
    pub fn from_dates(from: NaiveDate, to: NaiveDate) -> Result<Self, WindowError> {
        Self::new(midnight(from), midnight(to))
    }

    /// Calendar month from `YYYY-MM`.
    pub fn month(text: &str) -> Result<Self, WindowError> {
        let bad = || WindowError::InvalidMonth(text.to_string());
        let (year, month) = text.trim().split_once('-').ok_or_else(bad)?;
        let year: i32 = year.parse().map_err(|_| bad())?;
        let month: u32 = month.parse().map_err(|_| bad())?;
        let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(bad)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(bad)?;
        Self::from_dates(first, next)
    }

    /// Parse a bound given as RFC 3339 or a bare `YYYY-MM-DD` (midnight UTC).
    pub fn parse_bound(input: &str) -> Result<DateTime<Utc>, WindowError> {
        let trimmed = input.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(midnight)
            .map_err(|_| WindowError::InvalidTimestamp(input.to_string()))
    }

    pub fn duration(&self) -> Duration {
        self.to - self.from
    }

    pub fn days(&self) -> f64 {
        self.duration().num_seconds() as f64 / 86_400.0
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.from && *ts < self.to
    }

    /// A calendar day belongs to the window when its midnight does.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.contains(&midnight(date))
    }

    /// `[first, end)` calendar dates whose midnight falls inside the window.
    pub fn date_bounds(&self) -> (NaiveDate, NaiveDate) {
        let from_date = self.from.date_naive();
        let first = if midnight(from_date) == self.from {
            from_date
        } else {
            from_date + Duration::days(1)
        };
        let to_date = self.to.date_naive();
        let end = if midnight(to_date) == self.to {
            to_date
        } else {
            to_date + Duration::days(1)
        };
        (first, end)
    }

    /// Trailing baseline window `[from - days, from)`.
    pub fn baseline(&self, days: u32) -> Window {
        Window {
            from: self.from - Duration::days(i64::from(days)),
            to: self.from,
        }
    }

    /// Reject windows longer than the cap unless the operator passed both
    /// `force` and `confirm`.
    pub fn enforce_caps(&self, max_days: u32, force: bool, confirm: bool) -> Result<(), WindowError> {
        let days = self.days();
        if days > f64::from(max_days) && !(force && confirm) {
            return Err(WindowError::TooLong { days, max_days });
        }
        Ok(())
    }

    pub fn from_label(&self) -> String {
        format_ts(&self.from)
    }

    pub fn to_label(&self) -> String {
        format_ts(&self.to)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", format_ts(&self.from), format_ts(&self.to))
    }
}

/// Second-precision RFC 3339 with a `Z` suffix.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Resolve the effective row limit. A request above the cap needs `force` and `confirm`.
pub fn check_row_limit(
    requested: Option<usize>,
    max: usize,
    force: bool,
    confirm: bool,
) -> Result<usize, WindowError> {
    match requested {
        None => Ok(max),
        Some(n) if n > max && !(force && confirm) => Err(WindowError::TooManyRows { requested: n, max }),
        Some(n) => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn rejects_empty_window() {
        let err = Window::from_dates(date("2026-01-02"), date("2026-01-02")).unwrap_err();
        assert!(matches!(err, WindowError::Empty { .. }));
    }

    #[test]
    fn month_window() {
        let w = Window::month("2026-12").unwrap();
        assert_eq!(w.from_label(), "2026-12-01T00:00:00Z");
        assert_eq!(w.to_label(), "2027-01-01T00:00:00Z");
        assert!(Window::month("2026-13").is_err());
        assert!(Window::month("december").is_err());
    }

    #[test]
    fn parse_bounds() {
        assert_eq!(
            format_ts(&Window::parse_bound("2026-01-02").unwrap()),
            "2026-01-02T00:00:00Z"
        );
        assert_eq!(
            format_ts(&Window::parse_bound("2026-01-02T05:00:00+02:00").unwrap()),
            "2026-01-02T03:00:00Z"
        );
        assert!(Window::parse_bound("yesterday").is_err());
    }

    #[test]
    fn caps_require_force_and_confirm() {
        let w = Window::from_dates(date("2026-01-01"), date("2026-01-05")).unwrap();
        assert!(w.enforce_caps(3, false, false).is_err());
        assert!(w.enforce_caps(3, true, false).is_err());
        assert!(w.enforce_caps(3, false, true).is_err());
        assert!(w.enforce_caps(3, true, true).is_ok());

        let three = Window::from_dates(date("2026-01-01"), date("2026-01-04")).unwrap();
        assert!(three.enforce_caps(3, false, false).is_ok());
    }

    #[test]
    fn row_limit() {
        assert_eq!(check_row_limit(None, 10_000, false, false).unwrap(), 10_000);
        assert_eq!(check_row_limit(Some(500), 10_000, false, false).unwrap(), 500);
        assert!(check_row_limit(Some(20_000), 10_000, true, false).is_err());
        assert_eq!(check_row_limit(Some(20_000), 10_000, true, true).unwrap(), 20_000);
    }

    #[test]
    fn date_membership() {
        let w = Window::new(
            Window::parse_bound("2026-01-01T12:00:00Z").unwrap(),
            Window::parse_bound("2026-01-03T06:00:00Z").unwrap(),
        )
        .unwrap();
        assert!(!w.contains_date(date("2026-01-01")));
        assert!(w.contains_date(date("2026-01-02")));
        assert!(w.contains_date(date("2026-01-03")));
        assert_eq!(w.date_bounds(), (date("2026-01-02"), date("2026-01-04")));
    }

    #[test]
    fn baseline_precedes_window() {
        let w = Window::from_dates(date("2026-02-01"), date("2026-02-02")).unwrap();
        let b = w.baseline(30);
        assert_eq!(b.to, w.from);
        assert_eq!(b.from_label(), "2026-01-02T00:00:00Z");
    }
}
