use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::settings::MonitoringSettings;

/// Who is looking at the monitoring view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ViewerRole {
    Clinician,
    Administrator,
    Patient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleProfile {
    Timeout(Duration),
    /// Self-view: never idle, never billed.
    Bypass,
}

impl IdleProfile {
    pub fn for_viewer(
        role: ViewerRole,
        is_patient_viewing: bool,
        settings: &MonitoringSettings,
    ) -> Self {
        if is_patient_viewing {
            return IdleProfile::Bypass;
        }
        match role {
            ViewerRole::Patient => IdleProfile::Bypass,
            ViewerRole::Clinician => {
                IdleProfile::Timeout(Duration::from_secs(settings.clinician_idle_timeout_secs))
            }
            ViewerRole::Administrator => IdleProfile::Timeout(Duration::from_secs(
                settings.administrator_idle_timeout_secs,
            )),
        }
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, IdleProfile::Bypass)
    }
}

/// Latching idle timer: once idle, input events alone never clear it.
#[derive(Debug, Clone)]
pub struct IdleDetector {
    timeout: Duration,
    last_input: Instant,
    idle: bool,
}

impl IdleDetector {
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_input: now,
            idle: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn record_input(&mut self, now: Instant) {
        if !self.idle {
            self.last_input = now;
        }
    }

    /// Re-evaluates the timeout; returns `true` on the transition into idle.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.idle {
            return false;
        }
        if now.saturating_duration_since(self.last_input) >= self.timeout {
            self.idle = true;
            return true;
        }
        false
    }

    pub fn force_idle(&mut self) {
        self.idle = true;
    }

    pub fn activate(&mut self, now: Instant) {
        self.idle = false;
        self.last_input = now;
    }
}

/// Instantaneous view of the environment signals feeding the gate.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySignal {
    pub tab_active: bool,
    pub user_idle: bool,
    pub viewer_is_subject: bool,
}

impl ActivitySignal {
    /// Self-view keeps the gate open regardless of tab or idle state.
    pub fn is_open(&self) -> bool {
        self.viewer_is_subject || (self.tab_active && !self.user_idle)
    }
}

#[derive(Debug, Clone)]
pub struct ActivityGate {
    tab_active: bool,
    idle: Option<IdleDetector>,
}

impl ActivityGate {
    pub fn new(profile: IdleProfile, now: Instant) -> Self {
        let idle = match profile {
            IdleProfile::Timeout(timeout) => Some(IdleDetector::new(timeout, now)),
            IdleProfile::Bypass => None,
        };
        Self {
            tab_active: true,
            idle,
        }
    }

    pub fn viewer_is_subject(&self) -> bool {
        self.idle.is_none()
    }

    pub fn signal(&self) -> ActivitySignal {
        ActivitySignal {
            tab_active: self.tab_active,
            user_idle: self.idle.as_ref().is_some_and(IdleDetector::is_idle),
            viewer_is_subject: self.viewer_is_subject(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.signal().is_open()
    }

    pub fn record_input(&mut self, now: Instant) {
        if let Some(idle) = self.idle.as_mut() {
            idle.record_input(now);
        }
    }

    /// Hiding the tab closes the gate and latches idle, so coming back
    /// still needs an explicit activation.
    pub fn set_tab_visible(&mut self, visible: bool) {
        self.tab_active = visible;
        if !visible {
            if let Some(idle) = self.idle.as_mut() {
                idle.force_idle();
            }
        }
    }

    pub fn poll_idle(&mut self, now: Instant) -> bool {
        self.idle.as_mut().is_some_and(|idle| idle.poll(now))
    }

    pub fn activate(&mut self, now: Instant) {
        if let Some(idle) = self.idle.as_mut() {
            idle.activate(now);
        }
    }
}
