use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::api::MonitoringSummary;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl From<&MonitoringSummary> for BillingPeriod {
    fn from(summary: &MonitoringSummary) -> Self {
        Self {
            start: summary.period_start,
            end: summary.period_end,
        }
    }
}

impl BillingPeriod {
    pub fn has_ended(&self, today: NaiveDate) -> bool {
        today > self.end
    }
}

/// Monthly ceiling on billable seconds. Tripping is permanent until a summary
/// for a different billing period arrives.
#[derive(Debug, Clone)]
pub struct CapEnforcer {
    cap_secs: u64,
    period: Option<BillingPeriod>,
    exceeded: bool,
}

impl CapEnforcer {
    pub fn new(cap_secs: u64) -> Self {
        Self {
            cap_secs,
            period: None,
            exceeded: false,
        }
    }

    pub fn cap_secs(&self) -> u64 {
        self.cap_secs
    }

    pub fn period(&self) -> Option<BillingPeriod> {
        self.period
    }

    pub fn is_exceeded(&self) -> bool {
        self.exceeded
    }

    pub fn evaluate(&self, elapsed_secs: u64) -> bool {
        elapsed_secs >= self.cap_secs
    }

    /// Latches `exceeded` once `elapsed_secs` reaches the cap. Returns `true`
    /// only on the tripping transition.
    pub fn observe(&mut self, elapsed_secs: u64) -> bool {
        if self.exceeded || !self.evaluate(elapsed_secs) {
            return false;
        }
        self.exceeded = true;
        true
    }

    /// Switches to `period`, clearing the latch if it is a new one. Returns
    /// `true` when the period changed.
    pub fn enter_period(&mut self, period: BillingPeriod) -> bool {
        if self.period == Some(period) {
            return false;
        }
        let had_period = self.period.is_some();
        self.period = Some(period);
        self.exceeded = false;
        had_period
    }
}
