use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use super::{
    models::{
        Bucket, BucketAverage, DateRange, NewReading, PageRequest, RangeAverage, Reading,
        ReadingPage, TimeOfDayBucket, WeekdayBucket,
    },
    store::ReadingStore,
};
use crate::{
    aggregation::buckets::{bucket_rows, group_by, iso_weekday, mean_of},
    error::StoreError,
};

/// `ReadingStore` over a `Vec`, with the same ordering and uniqueness rules
/// as the Postgres store. Inserts can be made to fail or stall.
#[derive(Default)]
pub(crate) struct MemoryReadingStore {
    rows: Mutex<Vec<Reading>>,
    failing: AtomicBool,
    insert_delay: Mutex<Option<Duration>>,
}

impl MemoryReadingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn set_insert_delay(&self, delay: Duration) {
        *self.insert_delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Reading> {
        self.rows.lock().unwrap().clone()
    }

    /// Insert directly, bypassing failure injection.
    pub(crate) fn seed(&self, reading: NewReading) -> Reading {
        let row = materialize(reading);
        self.rows.lock().unwrap().push(row.clone());
        row
    }
}

fn materialize(r: NewReading) -> Reading {
    Reading {
        id: Uuid::new_v4(),
        date: r.date,
        time_of_day: r.time_of_day,
        temperature: r.temperature,
        humidity: r.humidity,
        fan_active: r.fan_active,
        alarm_active: r.alarm_active,
        signal: r.signal,
        avg_temperature: r.avg_temperature,
        avg_humidity: r.avg_humidity,
        recorded_at: Utc::now(),
    }
}

fn ascending(rows: &mut [Reading]) {
    rows.sort_by(|a, b| (a.date, a.time_of_day).cmp(&(b.date, b.time_of_day)));
}

impl MemoryReadingStore {
    fn in_range(&self, range: DateRange) -> Vec<Reading> {
        let mut rows: Vec<Reading> = self
            .snapshot()
            .into_iter()
            .filter(|r| range.contains(r.date))
            .collect();
        ascending(&mut rows);
        rows
    }

    fn on_weekdays(&self, weekdays: &[i32], range: DateRange) -> Vec<Reading> {
        let mut rows = self.in_range(range);
        rows.retain(|r| weekdays.contains(&(iso_weekday(r.date) as i32)));
        rows
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn insert(&self, reading: NewReading) -> Result<Reading, StoreError> {
        let delay = *self.insert_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut rows = self.rows.lock().unwrap();
        if rows
            .iter()
            .any(|r| r.date == reading.date && r.time_of_day == reading.time_of_day)
        {
            return Err(StoreError::Duplicate {
                date: reading.date,
                time_of_day: reading.time_of_day,
            });
        }
        let row = materialize(reading);
        rows.push(row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Reading>, StoreError> {
        Ok(self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn find_page(&self, page: PageRequest) -> Result<ReadingPage, StoreError> {
        let mut rows = self.snapshot();
        ascending(&mut rows);
        rows.reverse();
        let total = rows.len() as i64;
        let items = rows
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Ok(ReadingPage { total, items })
    }

    async fn find_by_date_range(&self, range: DateRange) -> Result<Vec<Reading>, StoreError> {
        Ok(self.in_range(range))
    }

    async fn find_by_date_and_times(
        &self,
        date: NaiveDate,
        times: &[NaiveTime],
    ) -> Result<Vec<Reading>, StoreError> {
        let mut rows: Vec<Reading> = self
            .snapshot()
            .into_iter()
            .filter(|r| r.date == date && times.contains(&r.time_of_day))
            .collect();
        ascending(&mut rows);
        Ok(rows)
    }

    async fn find_by_weekdays(
        &self,
        weekdays: &[i32],
        range: DateRange,
        page: PageRequest,
    ) -> Result<ReadingPage, StoreError> {
        let rows = self.on_weekdays(weekdays, range);
        let total = rows.len() as i64;
        let items = rows
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Ok(ReadingPage { total, items })
    }

    async fn latest_at_times(&self, times: &[NaiveTime]) -> Result<Vec<Reading>, StoreError> {
        let mut latest: Vec<Reading> = Vec::new();
        for r in self.snapshot().into_iter().filter(|r| times.contains(&r.time_of_day)) {
            match latest.iter().position(|l| l.time_of_day == r.time_of_day) {
                Some(i) if latest[i].date < r.date => latest[i] = r,
                Some(_) => {}
                None => latest.push(r),
            }
        }
        latest.sort_by_key(|r| r.time_of_day);
        Ok(latest)
    }

    async fn latest_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.rows.lock().unwrap().iter().map(|r| r.date).max())
    }

    async fn bucket_averages(
        &self,
        bucket: Bucket,
        range: DateRange,
    ) -> Result<Vec<BucketAverage>, StoreError> {
        Ok(bucket_rows(&self.in_range(range), bucket))
    }

    async fn weekday_averages(
        &self,
        weekdays: &[i32],
        range: DateRange,
    ) -> Result<Vec<WeekdayBucket>, StoreError> {
        Ok(group_by(&self.on_weekdays(weekdays, range), |r| iso_weekday(r.date))
            .into_iter()
            .map(|(weekday, a)| WeekdayBucket {
                weekday: weekday as i32,
                avg_temperature: a.avg_temperature,
                avg_humidity: a.avg_humidity,
                sample_count: a.sample_count as i64,
            })
            .collect())
    }

    async fn time_of_day_averages(
        &self,
        range: DateRange,
    ) -> Result<Vec<TimeOfDayBucket>, StoreError> {
        Ok(group_by(&self.in_range(range), |r| r.time_of_day)
            .into_iter()
            .map(|(time_of_day, a)| TimeOfDayBucket {
                time_of_day,
                avg_temperature: a.avg_temperature,
                avg_humidity: a.avg_humidity,
                sample_count: a.sample_count as i64,
            })
            .collect())
    }

    async fn range_average(&self, range: DateRange) -> Result<RangeAverage, StoreError> {
        let rows = self.in_range(range);
        let averages = mean_of(&rows);
        Ok(RangeAverage {
            avg_temperature: averages.map(|a| a.avg_temperature),
            avg_humidity: averages.map(|a| a.avg_humidity),
            sample_count: rows.len() as i64,
        })
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(self.len() as i64)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let n = rows.len() as u64;
        rows.clear();
        Ok(n)
    }
}
