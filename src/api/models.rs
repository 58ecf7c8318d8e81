//! Wire models exchanged with the monitoring backend.
//!
//! `MonitoringSummary` is the server-of-record view of billable time for one
//! (patient, provider) pair; `BillingEvent` is the only thing the client writes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSummary {
    pub total_duration_in_seconds: u64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BillingEvent {
    /// Client-generated; lets the backend drop a duplicate delivery.
    pub event_id: Uuid,
    pub patient_id: String,
    pub provider_id: String,
    pub duration_in_seconds: u64,
}

impl BillingEvent {
    pub fn new(patient_id: &str, provider_id: &str, duration_in_seconds: u64) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            patient_id: patient_id.to_string(),
            provider_id: provider_id.to_string(),
            duration_in_seconds,
        }
    }
}
