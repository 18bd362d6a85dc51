use chrono::{DateTime, Duration, NaiveDate, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("{date} shifted by {days} days is outside the supported calendar")]
pub struct DateOutOfRange {
    pub date: NaiveDate,
    pub days: i64,
}

/// Shifts a calendar date by a signed number of days.
pub fn add_days(date: NaiveDate, days: i64) -> Result<NaiveDate, DateOutOfRange> {
    Duration::try_days(days)
        .and_then(|delta| date.checked_add_signed(delta))
        .ok_or(DateOutOfRange { date, days })
}

/// Signed number of whole days from `from` to `to`.
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

/// The scheduling day of a stored timestamp.
///
/// All scheduling works on UTC calendar days, so the time of day is
/// discarded after converting to UTC.
pub fn calendar_day(timestamp: &DateTime<Utc>) -> NaiveDate {
    timestamp.date_naive()
}

/// The current UTC calendar day. Only the HTTP layer samples the clock;
/// everything below it takes `today` as an argument.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// Where a scheduled date falls relative to today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueStatus {
    /// Past due by the given number of days (always >= 1).
    Overdue(i64),
    Today,
    Tomorrow,
    /// Due in the given number of days (always >= 2).
    InDays(i64),
}

impl DueStatus {
    pub fn classify(date: NaiveDate, today: NaiveDate) -> Self {
        match days_between(today, date) {
            d if d < 0 => DueStatus::Overdue(-d),
            0 => DueStatus::Today,
            1 => DueStatus::Tomorrow,
            d => DueStatus::InDays(d),
        }
    }

    pub fn label(&self) -> String {
        match self {
            DueStatus::Overdue(1) => "Atrasado 1 dia".to_string(),
            DueStatus::Overdue(days) => format!("Atrasado {} dias", days),
            DueStatus::Today => "Revisar hoje".to_string(),
            DueStatus::Tomorrow => "Revisar amanhã".to_string(),
            DueStatus::InDays(days) => format!("Revisar em {} dias", days),
        }
    }

    pub fn is_urgent(&self) -> bool {
        matches!(self, DueStatus::Overdue(_) | DueStatus::Today)
    }
}
