//! Averaged series and the calendar arithmetic behind them.
//!
//! The store does the grouping for long spans; the helpers here average
//! small in-memory sets such as one week of readings. Every average is a
//! plain unweighted arithmetic mean. Groups are only ever built from at
//! least one reading, so no bucket can carry a NaN.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::models::{Bucket, BucketAverage, Reading, TimeOfDayBucket, WeekdayBucket};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct Averages {
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub sample_count: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    temperature_sum: f64,
    humidity_sum: f64,
    count: u64,
}

impl Mean {
    fn push(&mut self, r: &Reading) {
        self.temperature_sum += r.temperature;
        self.humidity_sum += r.humidity;
        self.count += 1;
    }

    fn finish(self) -> Option<Averages> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(Averages {
            avg_temperature: self.temperature_sum / n,
            avg_humidity: self.humidity_sum / n,
            sample_count: self.count,
        })
    }
}

/// Mean over all of `readings`; `None` when there are none.
pub fn mean_of<'a>(readings: impl IntoIterator<Item = &'a Reading>) -> Option<Averages> {
    let mut mean = Mean::default();
    for r in readings {
        mean.push(r);
    }
    mean.finish()
}

/// Average per key, ascending by key.
pub fn group_by<K, F>(readings: &[Reading], key: F) -> BTreeMap<K, Averages>
where
    K: Ord,
    F: Fn(&Reading) -> K,
{
    let mut groups: BTreeMap<K, Mean> = BTreeMap::new();
    for r in readings {
        groups.entry(key(r)).or_default().push(r);
    }
    groups
        .into_iter()
        .filter_map(|(k, m)| m.finish().map(|a| (k, a)))
        .collect()
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

fn count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DailyAverage {
    pub date: NaiveDate,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub sample_count: u64,
}

impl From<BucketAverage> for DailyAverage {
    fn from(b: BucketAverage) -> Self {
        Self {
            date: b.bucket,
            avg_temperature: b.avg_temperature,
            avg_humidity: b.avg_humidity,
            sample_count: count(b.sample_count),
        }
    }
}

/// Keyed by ISO week-numbering year and week, so week 1 of two different
/// years never collide.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WeeklyAverage {
    pub iso_year: i32,
    pub iso_week: u32,
    /// Monday of the week
    pub week_start: NaiveDate,
    /// Sunday of the week
    pub week_end: NaiveDate,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub sample_count: u64,
}

impl WeeklyAverage {
    /// `b.bucket` is the Monday of the week. `None` when its Sunday falls
    /// past the last representable date.
    pub fn from_bucket(b: BucketAverage) -> Option<Self> {
        let (week_start, week_end) = iso_week_bounds(b.bucket)?;
        let iso = week_start.iso_week();
        Some(Self {
            iso_year: iso.year(),
            iso_week: iso.week(),
            week_start,
            week_end,
            avg_temperature: b.avg_temperature,
            avg_humidity: b.avg_humidity,
            sample_count: count(b.sample_count),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MonthlyAverage {
    pub year: i32,
    pub month: u32,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub sample_count: u64,
}

impl From<BucketAverage> for MonthlyAverage {
    fn from(b: BucketAverage) -> Self {
        Self {
            year: b.bucket.year(),
            month: b.bucket.month(),
            avg_temperature: b.avg_temperature,
            avg_humidity: b.avg_humidity,
            sample_count: count(b.sample_count),
        }
    }
}

/// Day-of-week numbering is ISO: 1 = Monday … 7 = Sunday.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WeekdayAverage {
    pub weekday: u32,
    pub name: String,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub sample_count: u64,
}

impl From<WeekdayBucket> for WeekdayAverage {
    fn from(b: WeekdayBucket) -> Self {
        let weekday = u32::try_from(b.weekday).unwrap_or(0);
        Self {
            weekday,
            name: weekday_name(weekday).to_owned(),
            avg_temperature: b.avg_temperature,
            avg_humidity: b.avg_humidity,
            sample_count: count(b.sample_count),
        }
    }
}

/// Averages of one capture instant over a day.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TimeOfDayAverage {
    #[schema(example = "10:00:00")]
    pub time_of_day: String,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub sample_count: u64,
}

impl From<TimeOfDayBucket> for TimeOfDayAverage {
    fn from(b: TimeOfDayBucket) -> Self {
        Self {
            time_of_day: b.time_of_day.format("%H:%M:%S").to_string(),
            avg_temperature: b.avg_temperature,
            avg_humidity: b.avg_humidity,
            sample_count: count(b.sample_count),
        }
    }
}

/// In-memory counterpart of the store's grouped query: one row per bucket
/// start, ascending.
pub fn bucket_rows(readings: &[Reading], bucket: Bucket) -> Vec<BucketAverage> {
    group_by(readings, |r| bucket.start_of(r.date))
        .into_iter()
        .filter_map(|(start, a)| {
            Some(BucketAverage {
                bucket: start?,
                avg_temperature: a.avg_temperature,
                avg_humidity: a.avg_humidity,
                sample_count: a.sample_count as i64,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Calendar helpers
// ---------------------------------------------------------------------------

/// ISO day of week, 1 = Monday … 7 = Sunday.
pub fn iso_weekday(date: NaiveDate) -> u32 {
    date.weekday().number_from_monday()
}

pub fn weekday_name(iso_weekday: u32) -> &'static str {
    match iso_weekday {
        1 => "Monday",
        2 => "Tuesday",
        3 => "Wednesday",
        4 => "Thursday",
        5 => "Friday",
        6 => "Saturday",
        7 => "Sunday",
        _ => "unknown",
    }
}

/// Monday and Sunday of the ISO week containing `anchor`; `None` when either
/// lies outside chrono's calendar.
pub fn iso_week_bounds(anchor: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let monday = Bucket::IsoWeek.start_of(anchor)?;
    Some((monday, monday.checked_add_days(Days::new(6))?))
}

/// First and last day of a month; `None` for an impossible year/month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year.checked_add(1)?, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next.pred_opt()?))
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{NaiveTime, Utc};
    use uuid::Uuid;

    use super::*;

    pub(crate) fn reading(date: &str, time: &str, temperature: f64, humidity: f64) -> Reading {
        Reading {
            id: Uuid::new_v4(),
            date: date.parse().unwrap(),
            time_of_day: NaiveTime::parse_from_str(time, "%H:%M").unwrap(),
            temperature,
            humidity,
            fan_active: false,
            alarm_active: false,
            signal: false,
            avg_temperature: None,
            avg_humidity: None,
            recorded_at: Utc::now(),
        }
    }

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn mean_of_two_readings() {
        let rows = [
            reading("2024-11-20", "10:00", 20.0, 50.0),
            reading("2024-11-20", "14:00", 30.0, 60.0),
        ];
        assert_eq!(
            mean_of(&rows),
            Some(Averages {
                avg_temperature: 25.0,
                avg_humidity: 55.0,
                sample_count: 2,
            })
        );
        let none: [Reading; 0] = [];
        assert_eq!(mean_of(&none), None);
    }

    #[test]
    fn day_buckets_are_sorted_by_date() {
        let rows = vec![
            reading("2024-11-22", "10:00", 20.0, 50.0),
            reading("2024-11-20", "10:00", 22.0, 50.0),
            reading("2024-11-21", "10:00", 24.0, 50.0),
        ];
        let dates: Vec<NaiveDate> = bucket_rows(&rows, Bucket::Day)
            .into_iter()
            .map(|b| b.bucket)
            .collect();
        assert_eq!(dates, vec![d("2024-11-20"), d("2024-11-21"), d("2024-11-22")]);
        assert!(bucket_rows(&[], Bucket::Month).is_empty());
    }

    #[test]
    fn week_one_of_different_iso_years_do_not_collide() {
        // 2024-01-02 is in 2024-W01; 2024-12-30 is already in 2025-W01.
        let rows = vec![
            reading("2024-01-02", "10:00", 10.0, 40.0),
            reading("2024-12-30", "10:00", 30.0, 60.0),
            reading("2025-01-02", "10:00", 50.0, 80.0),
        ];
        let weeks: Vec<WeeklyAverage> = bucket_rows(&rows, Bucket::IsoWeek)
            .into_iter()
            .filter_map(WeeklyAverage::from_bucket)
            .collect();
        assert_eq!(weeks.len(), 2);
        assert_eq!((weeks[0].iso_year, weeks[0].iso_week), (2024, 1));
        assert_eq!((weeks[1].iso_year, weeks[1].iso_week), (2025, 1));
        assert_eq!(weeks[1].week_start, d("2024-12-30"));
        assert_eq!(weeks[1].week_end, d("2025-01-05"));
        assert_eq!(weeks[1].avg_temperature, 40.0);
        assert_eq!(weeks[1].sample_count, 2);
    }

    #[test]
    fn month_buckets_carry_year_and_month() {
        let rows = vec![
            reading("2024-11-30", "10:00", 20.0, 40.0),
            reading("2024-12-01", "10:00", 30.0, 60.0),
            reading("2024-12-15", "10:00", 40.0, 80.0),
            reading("2023-12-15", "10:00", 0.0, 0.0),
        ];
        let months: Vec<MonthlyAverage> = bucket_rows(&rows, Bucket::Month)
            .into_iter()
            .map(MonthlyAverage::from)
            .collect();
        let keys: Vec<(i32, u32)> = months.iter().map(|m| (m.year, m.month)).collect();
        assert_eq!(keys, vec![(2023, 12), (2024, 11), (2024, 12)]);
        assert_eq!(months[2].avg_temperature, 35.0);
        assert_eq!(months[2].avg_humidity, 70.0);
    }

    #[test]
    fn weekday_rows_get_iso_names() {
        let monday = WeekdayAverage::from(WeekdayBucket {
            weekday: 1,
            avg_temperature: 20.0,
            avg_humidity: 40.0,
            sample_count: 3,
        });
        assert_eq!((monday.weekday, monday.name.as_str()), (1, "Monday"));
        assert_eq!(monday.sample_count, 3);
        assert_eq!(weekday_name(7), "Sunday");
        assert_eq!(weekday_name(0), "unknown");
    }

    #[test]
    fn weekday_numbering_is_iso() {
        assert_eq!(iso_weekday(d("2024-11-18")), 1); // Monday
        assert_eq!(iso_weekday(d("2024-11-23")), 6); // Saturday
        assert_eq!(iso_weekday(d("2024-11-24")), 7); // Sunday
    }

    #[test]
    fn iso_week_bounds_run_monday_to_sunday() {
        let week = Some((d("2024-11-18"), d("2024-11-24")));
        assert_eq!(iso_week_bounds(d("2024-11-20")), week);
        assert_eq!(iso_week_bounds(d("2024-11-18")), week);
        assert_eq!(iso_week_bounds(d("2024-11-24")), week);
        assert_eq!(
            iso_week_bounds(d("2025-01-01")),
            Some((d("2024-12-30"), d("2025-01-05")))
        );
    }

    #[test]
    fn iso_week_bounds_at_calendar_edges_do_not_overflow() {
        for edge in [NaiveDate::MIN, NaiveDate::MAX] {
            if let Some((monday, sunday)) = iso_week_bounds(edge) {
                assert_eq!((sunday - monday).num_days(), 6);
                assert!(monday <= edge && edge <= sunday);
            }
        }
        // The week of the last representable date runs past it unless it is a Sunday.
        assert_eq!(
            iso_week_bounds(NaiveDate::MAX).is_some(),
            iso_weekday(NaiveDate::MAX) == 7
        );
    }

    #[test]
    fn month_bounds_handle_lengths_and_december() {
        assert_eq!(month_bounds(2024, 2), Some((d("2024-02-01"), d("2024-02-29"))));
        assert_eq!(month_bounds(2023, 2), Some((d("2023-02-01"), d("2023-02-28"))));
        assert_eq!(month_bounds(2024, 12), Some((d("2024-12-01"), d("2024-12-31"))));
        assert_eq!(month_bounds(2024, 13), None);
        assert_eq!(month_bounds(2024, 0), None);
        assert_eq!(month_bounds(NaiveDate::MAX.year(), 12), None);
    }
}
