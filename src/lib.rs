pub mod aggregation;
pub mod api;
pub mod capture;
pub mod config;
pub mod db;
pub mod device;
pub mod error;
pub mod gate;
pub mod notifier;

#[cfg(test)]
pub(crate) mod log_capture;
