pub mod client;
pub mod models;

pub use client::{HttpMonitoringApi, MonitoringApi};
pub use models::{BillingEvent, MonitoringSummary};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("monitoring service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("monitoring service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid monitoring response: {0}")]
    Decode(String),
    #[error("invalid monitoring service URL: {0}")]
    InvalidUrl(String),
}
