use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    aggregation::{DaySnapshot, WeekReadings},
    db::models::{PageRequest, Reading, ReadingPage},
    device::FanCommand,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReadingDto {
    pub id: Uuid,
    pub date: NaiveDate,
    /// Capture instant, `HH:MM:SS`.
    #[schema(example = "10:00:00")]
    pub time_of_day: String,
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity, percent
    pub humidity: f64,
    pub fan_active: bool,
    pub alarm_active: bool,
    pub signal: bool,
    /// Mean of the raw samples folded into this capture.
    pub avg_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl From<Reading> for ReadingDto {
    fn from(r: Reading) -> Self {
        Self {
            id: r.id,
            date: r.date,
            time_of_day: r.time_of_day.format("%H:%M:%S").to_string(),
            temperature: r.temperature,
            humidity: r.humidity,
            fan_active: r.fan_active,
            alarm_active: r.alarm_active,
            signal: r.signal,
            avg_temperature: r.avg_temperature,
            avg_humidity: r.avg_humidity,
            recorded_at: r.recorded_at,
        }
    }
}

pub fn to_dtos(rows: Vec<Reading>) -> Vec<ReadingDto> {
    rows.into_iter().map(Into::into).collect()
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadingPageDto {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub items: Vec<ReadingDto>,
}

impl ReadingPageDto {
    pub fn new(page: ReadingPage, request: PageRequest) -> Self {
        Self {
            total: page.total,
            limit: request.limit,
            offset: request.offset,
            items: to_dtos(page.items),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WeekReadingsDto {
    pub iso_year: i32,
    pub iso_week: u32,
    /// Monday
    pub start: NaiveDate,
    /// Sunday
    pub end: NaiveDate,
    pub readings: Vec<ReadingDto>,
}

impl From<WeekReadings> for WeekReadingsDto {
    fn from(w: WeekReadings) -> Self {
        Self {
            iso_year: w.iso_year,
            iso_week: w.iso_week,
            start: w.start,
            end: w.end,
            readings: to_dtos(w.readings),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DaySnapshotDto {
    pub date: NaiveDate,
    pub readings: Vec<ReadingDto>,
}

impl From<DaySnapshot> for DaySnapshotDto {
    fn from(d: DaySnapshot) -> Self {
        Self {
            date: d.date,
            readings: to_dtos(d.readings),
        }
    }
}

/// Result of feeding one raw reading through the Sample Gate.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IngestResponse {
    /// `stored` or `skipped`
    pub status: String,
    pub reason: Option<String>,
    pub reading: Option<ReadingDto>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FanRequest {
    /// `ON` or `OFF`
    #[schema(example = "ON")]
    pub action: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FanResponse {
    pub fan: FanCommand,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CaptureStartResponse {
    /// `started` or `already_running`
    pub status: String,
}

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// 1-500, default 50
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Inclusive date bounds, `YYYY-MM-DD`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RangeParams {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WeekdayParams {
    /// ISO days (1 = Monday), names (`sat,sun`), `weekend` or `weekdays`.
    /// Defaults to `weekend`.
    pub days: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// [`WeekdayParams`] plus a page window over the matching readings.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WeekdayPageParams {
    /// ISO days (1 = Monday), names (`sat,sun`), `weekend` or `weekdays`.
    /// Defaults to `weekend`.
    pub days: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// 1-500, default 50
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
