use serde::Serialize;

use super::state::MonitoringSnapshot;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BillingFailure {
    pub patient_id: String,
    pub duration_in_seconds: u64,
    pub message: String,
}

/// Notifications pushed to the host page.
pub trait MonitoringEvents: Send + Sync {
    /// The rendered phase or visibility flags changed.
    fn state_changed(&self, snapshot: &MonitoringSnapshot);

    /// Periodic refresh for the timer display while the clock runs.
    fn heartbeat(&self, snapshot: &MonitoringSnapshot);

    /// Non-blocking toast: this window's billable time was not recorded.
    fn billing_failed(&self, failure: &BillingFailure);
}

/// Sink that only writes to the log; used when no host is attached.
pub struct LogEvents;

impl MonitoringEvents for LogEvents {
    fn state_changed(&self, snapshot: &MonitoringSnapshot) {
        log::info!(
            "monitoring session for patient {} is now {:?}",
            snapshot.patient_id,
            snapshot.view.phase
        );
    }

    fn heartbeat(&self, _snapshot: &MonitoringSnapshot) {}

    fn billing_failed(&self, failure: &BillingFailure) {
        log::warn!(
            "billing event for patient {} not recorded: {}",
            failure.patient_id,
            failure.message
        );
    }
}
