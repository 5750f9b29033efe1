use std::{future::Future, time::Duration};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{
    Bucket, BucketAverage, DateRange, NewReading, PageRequest, RangeAverage, Reading,
    ReadingPage, TimeOfDayBucket, WeekdayBucket,
};
use crate::error::StoreError;

/// Durable CRUD over `Reading`s.
///
/// One process-wide instance is shared by the Sample Gate (writes) and the
/// Aggregator (reads). Every method is a single independent statement, so
/// no transaction is involved.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist a reading. A second reading for the same `(date, time_of_day)`
    /// fails with [`StoreError::Duplicate`].
    async fn insert(&self, reading: NewReading) -> Result<Reading, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Reading>, StoreError>;

    /// One page of readings, newest first, with the overall row count.
    async fn find_page(&self, page: PageRequest) -> Result<ReadingPage, StoreError>;

    /// Readings whose date falls inside `range`, ascending by date then time.
    async fn find_by_date_range(&self, range: DateRange) -> Result<Vec<Reading>, StoreError>;

    /// Readings of `date` taken at one of `times`, ascending by time.
    async fn find_by_date_and_times(
        &self,
        date: NaiveDate,
        times: &[NaiveTime],
    ) -> Result<Vec<Reading>, StoreError>;

    /// One page of readings whose ISO day of week (1 = Monday) is in
    /// `weekdays`, ascending by date then time.
    async fn find_by_weekdays(
        &self,
        weekdays: &[i32],
        range: DateRange,
        page: PageRequest,
    ) -> Result<ReadingPage, StoreError>;

    /// The most recent reading taken at each of `times`, ascending by time.
    /// Instants that were never captured are absent.
    async fn latest_at_times(&self, times: &[NaiveTime]) -> Result<Vec<Reading>, StoreError>;

    /// Most recent date holding at least one reading.
    async fn latest_date(&self) -> Result<Option<NaiveDate>, StoreError>;

    // Grouped averages, computed by the store so long spans are never
    // loaded row by row.

    /// One row per non-empty bucket inside `range`, ascending by bucket start.
    async fn bucket_averages(
        &self,
        bucket: Bucket,
        range: DateRange,
    ) -> Result<Vec<BucketAverage>, StoreError>;

    /// One row per day of week in `weekdays` that has readings, ascending.
    async fn weekday_averages(
        &self,
        weekdays: &[i32],
        range: DateRange,
    ) -> Result<Vec<WeekdayBucket>, StoreError>;

    /// One row per time of day with readings inside `range`, ascending.
    async fn time_of_day_averages(
        &self,
        range: DateRange,
    ) -> Result<Vec<TimeOfDayBucket>, StoreError>;

    /// Average over every reading inside `range`.
    async fn range_average(&self, range: DateRange) -> Result<RangeAverage, StoreError>;

    async fn count(&self) -> Result<i64, StoreError>;

    /// Remove every reading. Administrative reset only.
    async fn delete_all(&self) -> Result<u64, StoreError>;
}

/// Run a store call, turning an elapsed deadline into [`StoreError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn insert(&self, reading: NewReading) -> Result<Reading, StoreError> {
        sqlx::query_as::<_, Reading>(
            r#"
            INSERT INTO readings
                (date, time_of_day, temperature, humidity,
                 fan_active, alarm_active, signal,
                 avg_temperature, avg_humidity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, date, time_of_day, temperature, humidity,
                      fan_active, alarm_active, signal,
                      avg_temperature, avg_humidity, recorded_at
            "#,
        )
        .bind(reading.date)
        .bind(reading.time_of_day)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.fan_active)
        .bind(reading.alarm_active)
        .bind(reading.signal)
        .bind(reading.avg_temperature)
        .bind(reading.avg_humidity)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify_insert_error(e, &reading))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Reading>, StoreError> {
        let row = sqlx::query_as::<_, Reading>(
            r#"
            SELECT id, date, time_of_day, temperature, humidity,
                   fan_active, alarm_active, signal,
                   avg_temperature, avg_humidity, recorded_at
            FROM readings
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_page(&self, page: PageRequest) -> Result<ReadingPage, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM readings")
            .fetch_one(&self.pool)
            .await?;

        let items = sqlx::query_as::<_, Reading>(
            r#"
            SELECT id, date, time_of_day, temperature, humidity,
                   fan_active, alarm_active, signal,
                   avg_temperature, avg_humidity, recorded_at
            FROM readings
            ORDER BY date DESC, time_of_day DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(ReadingPage { total, items })
    }

    async fn find_by_date_range(&self, range: DateRange) -> Result<Vec<Reading>, StoreError> {
        let rows = sqlx::query_as::<_, Reading>(
            r#"
            SELECT id, date, time_of_day, temperature, humidity,
                   fan_active, alarm_active, signal,
                   avg_temperature, avg_humidity, recorded_at
            FROM readings
            WHERE ($1::date IS NULL OR date >= $1)
              AND ($2::date IS NULL OR date <= $2)
            ORDER BY date ASC, time_of_day ASC
            "#,
        )
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_by_date_and_times(
        &self,
        date: NaiveDate,
        times: &[NaiveTime],
    ) -> Result<Vec<Reading>, StoreError> {
        let rows = sqlx::query_as::<_, Reading>(
            r#"
            SELECT id, date, time_of_day, temperature, humidity,
                   fan_active, alarm_active, signal,
                   avg_temperature, avg_humidity, recorded_at
            FROM readings
            WHERE date = $1
              AND time_of_day = ANY($2)
            ORDER BY time_of_day ASC
            "#,
        )
        .bind(date)
        .bind(times)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_by_weekdays(
        &self,
        weekdays: &[i32],
        range: DateRange,
        page: PageRequest,
    ) -> Result<ReadingPage, StoreError> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM readings
            WHERE EXTRACT(ISODOW FROM date)::int = ANY($1)
              AND ($2::date IS NULL OR date >= $2)
              AND ($3::date IS NULL OR date <= $3)
            "#,
        )
        .bind(weekdays)
        .bind(range.from)
        .bind(range.to)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, Reading>(
            r#"
            SELECT id, date, time_of_day, temperature, humidity,
                   fan_active, alarm_active, signal,
                   avg_temperature, avg_humidity, recorded_at
            FROM readings
            WHERE EXTRACT(ISODOW FROM date)::int = ANY($1)
              AND ($2::date IS NULL OR date >= $2)
              AND ($3::date IS NULL OR date <= $3)
            ORDER BY date ASC, time_of_day ASC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(weekdays)
        .bind(range.from)
        .bind(range.to)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(ReadingPage { total, items })
    }

    async fn latest_at_times(&self, times: &[NaiveTime]) -> Result<Vec<Reading>, StoreError> {
        let rows = sqlx::query_as::<_, Reading>(
            r#"
            SELECT DISTINCT ON (time_of_day)
                   id, date, time_of_day, temperature, humidity,
                   fan_active, alarm_active, signal,
                   avg_temperature, avg_humidity, recorded_at
            FROM readings
            WHERE time_of_day = ANY($1)
            ORDER BY time_of_day ASC, date DESC
            "#,
        )
        .bind(times)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn latest_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        let date: Option<NaiveDate> = sqlx::query_scalar("SELECT MAX(date) FROM readings")
            .fetch_one(&self.pool)
            .await?;
        Ok(date)
    }

    async fn bucket_averages(
        &self,
        bucket: Bucket,
        range: DateRange,
    ) -> Result<Vec<BucketAverage>, StoreError> {
        // date_trunc('week') starts on ISO Monday.
        let unit = match bucket {
            Bucket::Day => "day",
            Bucket::IsoWeek => "week",
            Bucket::Month => "month",
        };
        let rows = sqlx::query_as::<_, BucketAverage>(
            r#"
            SELECT date_trunc($1, date::timestamp)::date AS bucket,
                   AVG(temperature) AS avg_temperature,
                   AVG(humidity) AS avg_humidity,
                   COUNT(*) AS sample_count
            FROM readings
            WHERE ($2::date IS NULL OR date >= $2)
              AND ($3::date IS NULL OR date <= $3)
            GROUP BY bucket
            ORDER BY bucket ASC
            "#,
        )
        .bind(unit)
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn weekday_averages(
        &self,
        weekdays: &[i32],
        range: DateRange,
    ) -> Result<Vec<WeekdayBucket>, StoreError> {
        let rows = sqlx::query_as::<_, WeekdayBucket>(
            r#"
            SELECT EXTRACT(ISODOW FROM date)::int AS weekday,
                   AVG(temperature) AS avg_temperature,
                   AVG(humidity) AS avg_humidity,
                   COUNT(*) AS sample_count
            FROM readings
            WHERE EXTRACT(ISODOW FROM date)::int = ANY($1)
              AND ($2::date IS NULL OR date >= $2)
              AND ($3::date IS NULL OR date <= $3)
            GROUP BY weekday
            ORDER BY weekday ASC
            "#,
        )
        .bind(weekdays)
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn time_of_day_averages(
        &self,
        range: DateRange,
    ) -> Result<Vec<TimeOfDayBucket>, StoreError> {
        let rows = sqlx::query_as::<_, TimeOfDayBucket>(
            r#"
            SELECT time_of_day,
                   AVG(temperature) AS avg_temperature,
                   AVG(humidity) AS avg_humidity,
                   COUNT(*) AS sample_count
            FROM readings
            WHERE ($1::date IS NULL OR date >= $1)
              AND ($2::date IS NULL OR date <= $2)
            GROUP BY time_of_day
            ORDER BY time_of_day ASC
            "#,
        )
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn range_average(&self, range: DateRange) -> Result<RangeAverage, StoreError> {
        let row = sqlx::query_as::<_, RangeAverage>(
            r#"
            SELECT AVG(temperature) AS avg_temperature,
                   AVG(humidity) AS avg_humidity,
                   COUNT(*) AS sample_count
            FROM readings
            WHERE ($1::date IS NULL OR date >= $1)
              AND ($2::date IS NULL OR date <= $2)
            "#,
        )
        .bind(range.from)
        .bind(range.to)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM readings")
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let done = sqlx::query("DELETE FROM readings")
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}

/// Postgres reports unique violations as SQLSTATE 23505; the only unique
/// key on `readings` besides the primary key is `(date, time_of_day)`.
fn classify_insert_error(err: sqlx::Error, reading: &NewReading) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Duplicate {
                date: reading.date,
                time_of_day: reading.time_of_day,
            };
        }
    }
    StoreError::Database(err)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
