//! Wipes the readings table and fills it with synthetic data.
//!
//! One reading per capture instant (`CAPTURE_INSTANTS`) for each day in
//! `[from, to)`.
//!
//! Usage:
//!   cargo run --bin seed_readings -- --from 2024-11-01 --to 2024-12-01

use std::env;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rand::Rng;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use climate_monitor::{
    config::Config,
    db::{self, models::NewReading, PgReadingStore, ReadingStore},
};

fn arg(args: &[String], flag: &str) -> Result<NaiveDate> {
    let raw = args
        .windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
        .with_context(|| format!("missing {flag} YYYY-MM-DD"))?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("{flag} must be YYYY-MM-DD"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let from = arg(&args, "--from")?;
    let to = arg(&args, "--to")?;
    if from >= to {
        bail!("--from must be before --to");
    }

    let config = Config::from_env()?;
    let pool = db::create_pool(
        &config.database_url,
        config.database_max_connections,
        config.store_timeout,
    )
    .await?;
    db::run_migrations(&pool).await?;
    let store = PgReadingStore::new(pool);

    let removed = store.delete_all().await?;
    info!(removed, "Readings cleared");

    let instants = config.capture_policy.instants();
    let mut rng = rand::rng();
    let mut inserted = 0u64;
    for date in from.iter_days().take_while(|d| *d < to) {
        for &time_of_day in &instants {
            store
                .insert(NewReading {
                    date,
                    time_of_day,
                    temperature: round2(rng.random_range(20.0..35.0)),
                    humidity: round2(rng.random_range(40.0..80.0)),
                    fan_active: rng.random_bool(0.5),
                    alarm_active: rng.random_bool(0.1),
                    signal: rng.random_bool(0.1),
                    avg_temperature: None,
                    avg_humidity: None,
                })
                .await
                .with_context(|| format!("failed to insert {date} {time_of_day}"))?;
            inserted += 1;
        }
    }

    info!(inserted, %from, %to, "Seeding complete");
    Ok(())
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
