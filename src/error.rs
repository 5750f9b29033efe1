use std::{path::PathBuf, time::Duration};

use chrono::{NaiveDate, NaiveTime};

/// A raw reading or a query parameter that cannot be used.
///
/// Raw readings failing validation are logged and dropped; query
/// parameters failing validation become a client error.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed reading payload: {0}")]
    Malformed(String),

    #[error("{field} must be a finite number, got {value}")]
    NotNumeric { field: &'static str, value: String },

    #[error("invalid {field}: {value:?} ({reason})")]
    InvalidParameter {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl ValidationError {
    pub(crate) fn parameter(field: &'static str, value: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidParameter {
            field,
            value: value.into(),
            reason,
        }
    }
}

/// Failure talking to the Reading Store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a reading already exists for {date} {time_of_day}")]
    Duplicate { date: NaiveDate, time_of_day: NaiveTime },

    #[error("reading store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of an Aggregator or lookup query that did not produce data.
///
/// The three variants stay distinct so the HTTP layer can tell a bad
/// request from an empty period from a broken store.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no data for {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("no listener is subscribed")]
    NoSubscribers,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot open reading source {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open serial device {path} at {baud_rate} baud: {source}")]
    Serial {
        path: PathBuf,
        baud_rate: u32,
        #[source]
        source: serialport::Error,
    },
}

/// Failure sending a command line to the microcontroller.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no serial device is connected")]
    NotConnected,

    #[error("device write failed: {0}")]
    Write(#[from] std::io::Error),
}
