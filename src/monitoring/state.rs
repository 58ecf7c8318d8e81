use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::api::{BillingEvent, MonitoringSummary};
use crate::settings::MonitoringSettings;

use super::{
    cap::{BillingPeriod, CapEnforcer},
    clock::{ClockStatus, SessionClock},
    gate::{ActivityGate, ActivitySignal, IdleProfile, ViewerRole},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    pub patient_id: String,
    pub provider_id: String,
    pub role: ViewerRole,
    pub is_patient_viewing: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Active,
    Inactive,
    CapExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSignals {
    pub activity: ActivitySignal,
    pub cap_exceeded: bool,
    pub summary_loaded: bool,
}

/// What the host page renders. The three phases are mutually exclusive.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub phase: SessionPhase,
    pub show_measurements: bool,
    pub show_chat: bool,
    pub show_timer: bool,
    pub show_activate_prompt: bool,
}

pub fn derive_session_state(signals: &SessionSignals) -> SessionView {
    if signals.activity.viewer_is_subject {
        return SessionView {
            phase: SessionPhase::Active,
            show_measurements: true,
            show_chat: true,
            show_timer: false,
            show_activate_prompt: false,
        };
    }

    if signals.cap_exceeded {
        return SessionView {
            phase: SessionPhase::CapExceeded,
            show_measurements: false,
            show_chat: false,
            show_timer: false,
            show_activate_prompt: false,
        };
    }

    if !signals.activity.is_open() {
        return SessionView {
            phase: SessionPhase::Inactive,
            show_measurements: false,
            show_chat: false,
            show_timer: signals.summary_loaded,
            show_activate_prompt: true,
        };
    }

    SessionView {
        phase: SessionPhase::Active,
        show_measurements: true,
        show_chat: true,
        show_timer: signals.summary_loaded,
        show_activate_prompt: false,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CapNotice {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub cap_minutes: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSnapshot {
    pub patient_id: String,
    pub provider_id: String,
    pub view: SessionView,
    pub signal: ActivitySignal,
    pub clock_status: ClockStatus,
    pub elapsed_secs: Option<u64>,
    pub timer_text: Option<String>,
    pub cap_notice: Option<CapNotice>,
    pub billing_events_sent: u64,
    pub billing_events_failed: u64,
}

/// Everything one monitoring session knows, mutated only under the
/// controller's lock. Every mutator finishes by reconciling the clock with
/// the derived view.
#[derive(Debug)]
pub struct MonitoringState {
    patient_id: String,
    provider_id: String,
    summary: Option<MonitoringSummary>,
    clock: SessionClock,
    gate: ActivityGate,
    cap: CapEnforcer,
    billing_interval: Duration,
    next_billing_at: Option<Instant>,
    next_summary_fetch: Option<Instant>,
    billing_events_sent: u64,
    billing_events_failed: u64,
}

impl MonitoringState {
    pub fn new(params: &SessionParams, settings: &MonitoringSettings, now: Instant) -> Self {
        let profile = IdleProfile::for_viewer(params.role, params.is_patient_viewing, settings);
        Self {
            patient_id: params.patient_id.clone(),
            provider_id: params.provider_id.clone(),
            summary: None,
            clock: SessionClock::new(),
            gate: ActivityGate::new(profile, now),
            cap: CapEnforcer::new(settings.monthly_cap_secs),
            billing_interval: settings.billing_interval(),
            next_billing_at: None,
            next_summary_fetch: None,
            billing_events_sent: 0,
            billing_events_failed: 0,
        }
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn is_clock_running(&self) -> bool {
        self.clock.is_running()
    }

    pub fn is_cap_exceeded(&self) -> bool {
        self.cap.is_exceeded()
    }

    pub fn signals(&self) -> SessionSignals {
        SessionSignals {
            activity: self.gate.signal(),
            cap_exceeded: self.cap.is_exceeded(),
            summary_loaded: self.summary.is_some(),
        }
    }

    pub fn view(&self) -> SessionView {
        derive_session_state(&self.signals())
    }

    pub fn record_input(&mut self, now: Instant) {
        self.gate.record_input(now);
    }

    pub fn set_tab_visible(&mut self, visible: bool, now: Instant) {
        self.gate.set_tab_visible(visible);
        self.sync(now);
    }

    /// Explicit re-engagement. Refused once the cap has tripped.
    pub fn activate(&mut self, now: Instant) -> bool {
        if self.cap.is_exceeded() && !self.gate.viewer_is_subject() {
            return false;
        }
        self.gate.activate(now);
        self.sync(now);
        true
    }

    pub fn poll_idle(&mut self, now: Instant) -> bool {
        let went_idle = self.gate.poll_idle(now);
        if went_idle {
            self.sync(now);
        }
        went_idle
    }

    /// Applies a server summary. A paused clock keeps the value it captured
    /// at pause time; the new total becomes the seed for the next resume. A
    /// running clock only jumps forward, keeping local time not yet billed.
    pub fn apply_summary(&mut self, summary: MonitoringSummary, now: Instant) {
        let total = summary.total_duration_in_seconds;
        let new_period = self.cap.enter_period(BillingPeriod::from(&summary));

        if !self.gate.viewer_is_subject() {
            self.cap.observe(total);
        }

        if !self.clock.is_seeded() || new_period {
            self.clock.reset(total, now);
        } else {
            self.clock.advance_to(total, now);
        }

        self.summary = Some(summary);
        self.sync(now);
    }

    /// Freezes the clock for teardown; nothing resumes it afterwards.
    pub fn halt(&mut self, now: Instant) {
        self.clock.pause(now);
        self.next_billing_at = None;
    }

    pub fn sync(&mut self, now: Instant) {
        self.reconcile_clock(now);
        self.enforce_cap(now);
    }

    fn should_run(&self) -> bool {
        let view = self.view();
        view.phase == SessionPhase::Active
            && !self.gate.viewer_is_subject()
            && self.summary.is_some()
    }

    fn reconcile_clock(&mut self, now: Instant) {
        match (self.should_run(), self.clock.is_running()) {
            (true, false) => {
                let seed = self.summary.as_ref().map(|s| s.total_duration_in_seconds);
                if self.clock.start(seed, now) {
                    self.next_billing_at = Some(now + self.billing_interval);
                }
            }
            (false, true) => {
                self.clock.pause(now);
                self.next_billing_at = None;
            }
            _ => {}
        }
    }

    fn enforce_cap(&mut self, now: Instant) {
        if self.gate.viewer_is_subject() || !self.clock.is_running() {
            return;
        }
        if self.cap.observe(self.clock.elapsed_secs(now)) {
            self.clock.pause(now);
            self.next_billing_at = None;
        }
    }

    /// Hands out the billing event for a completed window, at most once. The
    /// cadence skips ahead rather than catching up on missed windows.
    pub fn take_due_billing(&mut self, now: Instant) -> Option<BillingEvent> {
        let due = self.next_billing_at?;
        if !self.clock.is_running() || now < due {
            return None;
        }

        if self.clock.elapsed_secs(due) > self.cap.cap_secs() {
            self.enforce_cap(now);
            return None;
        }

        let mut next = due;
        while next <= now {
            next += self.billing_interval;
        }
        self.next_billing_at = Some(next);

        Some(BillingEvent::new(
            &self.patient_id,
            &self.provider_id,
            self.billing_interval.as_secs(),
        ))
    }

    pub fn record_billing_result(&mut self, delivered: bool) {
        if delivered {
            self.billing_events_sent += 1;
        } else {
            self.billing_events_failed += 1;
        }
    }

    /// A fetch is due while no summary is loaded, or while the cap is tripped
    /// for a period that has already ended.
    pub fn summary_fetch_due(&self, now: Instant, today: NaiveDate) -> bool {
        let needed = match &self.summary {
            None => true,
            Some(_) => {
                self.cap.is_exceeded()
                    && self.cap.period().is_some_and(|period| period.has_ended(today))
            }
        };
        needed && self.next_summary_fetch.map_or(true, |at| now >= at)
    }

    pub fn schedule_summary_fetch(&mut self, now: Instant) {
        self.next_summary_fetch = Some(now + self.billing_interval);
    }

    pub fn snapshot(&self, now: Instant) -> MonitoringSnapshot {
        let view = self.view();
        let elapsed = self.clock.is_seeded().then(|| self.clock.elapsed_secs(now));
        let cap_notice = match (view.phase, self.cap.period()) {
            (SessionPhase::CapExceeded, Some(period)) => Some(CapNotice {
                period_start: period.start,
                period_end: period.end,
                cap_minutes: self.cap.cap_secs() / 60,
            }),
            _ => None,
        };

        MonitoringSnapshot {
            patient_id: self.patient_id.clone(),
            provider_id: self.provider_id.clone(),
            view,
            signal: self.gate.signal(),
            clock_status: self.clock.status(),
            elapsed_secs: elapsed,
            timer_text: view.show_timer.then(|| self.clock.display(now)),
            cap_notice,
            billing_events_sent: self.billing_events_sent,
            billing_events_failed: self.billing_events_failed,
        }
    }
}
