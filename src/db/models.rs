use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One persisted temperature/humidity observation.
///
/// `(date, time_of_day)` is unique: a row stands for exactly one capture
/// window. Rows are never updated.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Reading {
    pub id: Uuid,
    pub date: NaiveDate,
    /// Capture instant, second resolution.
    pub time_of_day: NaiveTime,
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity percentage
    pub humidity: f64,
    pub fan_active: bool,
    pub alarm_active: bool,
    pub signal: bool,
    /// Mean of the raw samples seen since the previous capture.
    pub avg_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Insert payload for the `readings` table.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub date: NaiveDate,
    pub time_of_day: NaiveTime,
    pub temperature: f64,
    pub humidity: f64,
    pub fan_active: bool,
    pub alarm_active: bool,
    pub signal: bool,
    pub avg_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
}

/// Inclusive date bounds; a missing bound leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 500;

/// Pagination window for listing readings, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl PageRequest {
    /// Clamp caller-supplied values into a usable window.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone)]
pub struct ReadingPage {
    pub total: i64,
    pub items: Vec<Reading>,
}

// ---------------------------------------------------------------------------
// Grouped averages
// ---------------------------------------------------------------------------

/// Calendar unit the store groups readings by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Day,
    /// Monday-to-Sunday ISO week.
    IsoWeek,
    Month,
}

impl Bucket {
    /// First day of the bucket holding `date`.
    pub fn start_of(self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            Bucket::Day => Some(date),
            Bucket::IsoWeek => date.checked_sub_days(Days::new(u64::from(
                date.weekday().num_days_from_monday(),
            ))),
            Bucket::Month => date.with_day(1),
        }
    }
}

/// Mean temperature and humidity of the readings sharing one bucket start.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct BucketAverage {
    pub bucket: NaiveDate,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub sample_count: i64,
}

/// Averages of one ISO day of the week (1 = Monday).
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct WeekdayBucket {
    pub weekday: i32,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub sample_count: i64,
}

/// Averages of the readings taken at one time of day.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TimeOfDayBucket {
    pub time_of_day: NaiveTime,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub sample_count: i64,
}

/// Single average over a date range. The means are `NULL` when
/// `sample_count` is zero.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct RangeAverage {
    pub avg_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub sample_count: i64,
}
