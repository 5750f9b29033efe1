use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};

use crate::{device::DEFAULT_BAUD_RATE, gate::CapturePolicy, notifier::DEFAULT_CAPACITY};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub server_host: String,
    pub server_port: u16,
    /// Wall-clock instants at which a raw reading may be persisted.
    pub capture_policy: CapturePolicy,
    /// Line-delimited JSON feed (serial device, FIFO or plain file).
    pub reading_source_path: PathBuf,
    /// Serial line speed; ignored for FIFOs and plain files.
    pub reading_source_baud: u32,
    /// Start capturing at boot rather than on `POST /collecte/donnees/capture`.
    pub capture_autostart: bool,
    /// Upper bound on every Reading Store call.
    pub store_timeout: Duration,
    pub notifier_capacity: usize,
    /// Single allowed browser origin; `None` allows any.
    pub cors_allowed_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections: optional("DATABASE_MAX_CONNECTIONS", "10")
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a positive integer")?,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            capture_policy: optional("CAPTURE_INSTANTS", "hourly")
                .parse()
                .context("CAPTURE_INSTANTS must be 'hourly' or a list like '10:00,14:00,17:00'")?,
            reading_source_path: optional("READING_SOURCE_PATH", "/dev/ttyUSB0").into(),
            reading_source_baud: parse_baud(&optional(
                "READING_SOURCE_BAUD",
                &DEFAULT_BAUD_RATE.to_string(),
            ))?,
            capture_autostart: parse_bool(&optional("CAPTURE_AUTOSTART", "false"))
                .context("CAPTURE_AUTOSTART must be true or false")?,
            store_timeout: Duration::from_secs(
                optional("STORE_TIMEOUT_SECS", "5")
                    .parse()
                    .context("STORE_TIMEOUT_SECS must be a positive integer")?,
            ),
            notifier_capacity: optional("NOTIFIER_CAPACITY", &DEFAULT_CAPACITY.to_string())
                .parse()
                .context("NOTIFIER_CAPACITY must be a positive integer")?,
            cors_allowed_origin: std::env::var("CORS_ALLOWED_ORIGIN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        })
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}

fn parse_baud(raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(baud) if baud > 0 => Ok(baud),
        _ => bail!("READING_SOURCE_BAUD must be a positive integer, got {raw:?}"),
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
