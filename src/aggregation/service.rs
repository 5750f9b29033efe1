use std::{sync::Arc, time::Duration};

use chrono::{Datelike, Days, NaiveDate, NaiveTime};
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

use super::{
    buckets::{
        iso_week_bounds, iso_weekday, mean_of, month_bounds, DailyAverage, MonthlyAverage,
        TimeOfDayAverage, WeekdayAverage, WeeklyAverage,
    },
    params::{check_month, check_range, check_year, WeekdaySet},
};
use crate::{
    db::{
        models::{Bucket, DateRange, PageRequest, Reading, ReadingPage},
        store::{with_timeout, ReadingStore},
    },
    error::{QueryError, ValidationError},
};

/// Raw readings of one ISO week.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekReadings {
    pub iso_year: i32,
    pub iso_week: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub readings: Vec<Reading>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ProfileDay {
    pub weekday: u32,
    pub date: NaiveDate,
    pub avg_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub sample_count: u64,
}

/// Seven days of an ISO week, Monday first.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WeekProfile {
    pub iso_year: i32,
    pub iso_week: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: Vec<ProfileDay>,
}

/// Per-instant averages of one day, earliest instant first.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DayProfile {
    pub date: NaiveDate,
    pub times: Vec<TimeOfDayAverage>,
}

/// A single average over an inclusive date span.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PeriodAverage {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub sample_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaySnapshot {
    pub date: NaiveDate,
    pub readings: Vec<Reading>,
}

/// On-demand statistics over the Reading Store.
///
/// Parameters are checked before the store is touched, so a
/// [`QueryError::Validation`] never costs a round trip. A valid query over
/// no data yields an empty series, or [`QueryError::NotFound`] for
/// single-value results. Grouping over arbitrary spans happens in the
/// store; only one week of raw rows is ever averaged here.
pub struct Aggregator {
    store: Arc<dyn ReadingStore>,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(store: Arc<dyn ReadingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    // -----------------------------------------------------------------------
    // Series
    // -----------------------------------------------------------------------

    pub async fn daily_averages(&self, range: DateRange) -> Result<Vec<DailyAverage>, QueryError> {
        let range = check_range(range)?;
        let rows = with_timeout(self.timeout, self.store.bucket_averages(Bucket::Day, range)).await?;
        Ok(rows.into_iter().map(DailyAverage::from).collect())
    }

    pub async fn weekly_averages(&self, range: DateRange) -> Result<Vec<WeeklyAverage>, QueryError> {
        let range = check_range(range)?;
        let rows =
            with_timeout(self.timeout, self.store.bucket_averages(Bucket::IsoWeek, range)).await?;
        Ok(rows.into_iter().filter_map(WeeklyAverage::from_bucket).collect())
    }

    pub async fn monthly_averages(
        &self,
        range: DateRange,
    ) -> Result<Vec<MonthlyAverage>, QueryError> {
        let range = check_range(range)?;
        let rows =
            with_timeout(self.timeout, self.store.bucket_averages(Bucket::Month, range)).await?;
        Ok(rows.into_iter().map(MonthlyAverage::from).collect())
    }

    /// Average per capture instant over a single day.
    pub async fn day_profile(&self, date: NaiveDate) -> Result<DayProfile, QueryError> {
        let rows = with_timeout(
            self.timeout,
            self.store.time_of_day_averages(DateRange::between(date, date)),
        )
        .await?;
        Ok(DayProfile {
            date,
            times: rows.into_iter().map(TimeOfDayAverage::from).collect(),
        })
    }

    // -----------------------------------------------------------------------
    // Weeks and days of the week
    // -----------------------------------------------------------------------

    /// Raw readings of the Monday–Sunday week containing `anchor`.
    pub async fn week_of(&self, anchor: NaiveDate) -> Result<WeekReadings, QueryError> {
        let (start, end) = iso_week_bounds(anchor).ok_or_else(|| {
            ValidationError::parameter("date", anchor.to_string(), "week out of range")
        })?;
        let iso = anchor.iso_week();
        let readings = with_timeout(
            self.timeout,
            self.store.find_by_date_range(DateRange::between(start, end)),
        )
        .await?;
        debug!(%start, rows = readings.len(), "Loaded week of readings");
        Ok(WeekReadings {
            iso_year: iso.year(),
            iso_week: iso.week(),
            start,
            end,
            readings,
        })
    }

    pub async fn week_profile(&self, anchor: NaiveDate) -> Result<WeekProfile, QueryError> {
        let week = self.week_of(anchor).await?;
        let days = (0..7)
            .filter_map(|offset| week.start.checked_add_days(Days::new(offset)))
            .map(|date| {
                let averages = mean_of(week.readings.iter().filter(|r| r.date == date));
                ProfileDay {
                    weekday: iso_weekday(date),
                    date,
                    avg_temperature: averages.map(|a| a.avg_temperature),
                    avg_humidity: averages.map(|a| a.avg_humidity),
                    sample_count: averages.map_or(0, |a| a.sample_count),
                }
            })
            .collect();
        Ok(WeekProfile {
            iso_year: week.iso_year,
            iso_week: week.iso_week,
            start: week.start,
            end: week.end,
            days,
        })
    }

    /// One page of raw readings whose day of week is in `days`.
    pub async fn weekday_readings(
        &self,
        days: &WeekdaySet,
        range: DateRange,
        page: PageRequest,
    ) -> Result<ReadingPage, QueryError> {
        let range = check_range(range)?;
        let weekdays = iso_days(days);
        Ok(with_timeout(
            self.timeout,
            self.store.find_by_weekdays(&weekdays, range, page),
        )
        .await?)
    }

    pub async fn weekday_averages(
        &self,
        days: &WeekdaySet,
        range: DateRange,
    ) -> Result<Vec<WeekdayAverage>, QueryError> {
        let range = check_range(range)?;
        let weekdays = iso_days(days);
        let rows =
            with_timeout(self.timeout, self.store.weekday_averages(&weekdays, range)).await?;
        Ok(rows.into_iter().map(WeekdayAverage::from).collect())
    }

    // -----------------------------------------------------------------------
    // Single periods
    // -----------------------------------------------------------------------

    pub async fn month_average(&self, year: i32, month: u32) -> Result<PeriodAverage, QueryError> {
        let (start, end) = month_span(year, month)?;
        self.period_average(start, end, || format!("{year}-{month:02}"))
            .await
    }

    /// Week `week` of a month covers days `1 + 7(week - 1)` to `7 * week`,
    /// running into the next month when the month is shorter.
    pub async fn month_week_average(
        &self,
        year: i32,
        month: u32,
        week: u32,
    ) -> Result<PeriodAverage, QueryError> {
        let (first, last) = month_span(year, month)?;
        let past_month = || {
            ValidationError::parameter("week", week.to_string(), "starts after the end of the month")
        };
        if week == 0 {
            return Err(ValidationError::parameter("week", "0", "must be 1-5").into());
        }
        let start = first
            .checked_add_days(Days::new(7 * u64::from(week - 1)))
            .filter(|start| *start <= last)
            .ok_or_else(past_month)?;
        let end = start
            .checked_add_days(Days::new(6))
            .ok_or_else(past_month)?;
        self.period_average(start, end, || format!("{year}-{month:02} week {week}"))
            .await
    }

    pub async fn year_average(&self, year: i32) -> Result<PeriodAverage, QueryError> {
        let year = check_year(year)?;
        let (start, _) = month_span(year, 1)?;
        let (_, end) = month_span(year, 12)?;
        self.period_average(start, end, || year.to_string()).await
    }

    async fn period_average(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        label: impl FnOnce() -> String,
    ) -> Result<PeriodAverage, QueryError> {
        let row = with_timeout(
            self.timeout,
            self.store.range_average(DateRange::between(start, end)),
        )
        .await?;
        match (row.avg_temperature, row.avg_humidity) {
            (Some(avg_temperature), Some(avg_humidity)) if row.sample_count > 0 => {
                Ok(PeriodAverage {
                    start,
                    end,
                    avg_temperature,
                    avg_humidity,
                    sample_count: u64::try_from(row.sample_count).unwrap_or(0),
                })
            }
            _ => Err(QueryError::NotFound(label())),
        }
    }

    // -----------------------------------------------------------------------
    // Latest readings
    // -----------------------------------------------------------------------

    /// Readings of the most recent day with data, at the given instants.
    pub async fn latest_day(&self, instants: &[NaiveTime]) -> Result<DaySnapshot, QueryError> {
        let date = with_timeout(self.timeout, self.store.latest_date())
            .await?
            .ok_or_else(|| QueryError::NotFound("any day".to_owned()))?;
        let readings =
            with_timeout(self.timeout, self.store.find_by_date_and_times(date, instants)).await?;
        Ok(DaySnapshot { date, readings })
    }

    /// The newest reading of each instant, whatever day it was taken.
    /// Instants never captured are left out.
    pub async fn latest_per_instant(
        &self,
        instants: &[NaiveTime],
    ) -> Result<Vec<Reading>, QueryError> {
        Ok(with_timeout(self.timeout, self.store.latest_at_times(instants)).await?)
    }
}

fn iso_days(days: &WeekdaySet) -> Vec<i32> {
    days.days().filter_map(|d| i32::try_from(d).ok()).collect()
}

fn month_span(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), ValidationError> {
    let year = check_year(year)?;
    let month = check_month(month)?;
    month_bounds(year, month)
        .ok_or_else(|| ValidationError::parameter("month", month.to_string(), "no such month"))
}
