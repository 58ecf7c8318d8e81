use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

const API_URL_ENV: &str = "RPM_MONITOR_API_URL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringSettings {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    /// Length of one billing tick; also the duration each event reports.
    pub billing_interval_secs: u64,
    /// Per-period ceiling on billable seconds. 19 minutes, one short of the
    /// 20-minute billing threshold.
    pub monthly_cap_secs: u64,
    pub clinician_idle_timeout_secs: u64,
    pub administrator_idle_timeout_secs: u64,
    pub heartbeat_ms: u64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".into(),
            api_token: None,
            request_timeout_secs: 10,
            billing_interval_secs: 5,
            monthly_cap_secs: 19 * 60,
            clinician_idle_timeout_secs: 10,
            administrator_idle_timeout_secs: 30 * 60,
            heartbeat_ms: 1000,
        }
    }
}

impl MonitoringSettings {
    pub fn validate(&self) -> Result<()> {
        if self.billing_interval_secs == 0 {
            bail!("billingIntervalSecs must be greater than zero");
        }
        if self.heartbeat_ms == 0 {
            bail!("heartbeatMs must be greater than zero");
        }
        if self.monthly_cap_secs == 0 {
            bail!("monthlyCapSecs must be greater than zero");
        }
        if self.clinician_idle_timeout_secs == 0 || self.administrator_idle_timeout_secs == 0 {
            bail!("idle timeouts must be greater than zero");
        }
        if self.api_base_url.trim().is_empty() {
            bail!("apiBaseUrl must not be empty");
        }
        Ok(())
    }

    pub fn billing_interval(&self) -> Duration {
        Duration::from_secs(self.billing_interval_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url;
            }
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<MonitoringSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<MonitoringSettings>(&contents) {
                Ok(parsed) if parsed.validate().is_ok() => parsed,
                Ok(_) | Err(_) => {
                    log::warn!(
                        "Ignoring invalid monitoring settings in {}; using defaults",
                        path.display()
                    );
                    MonitoringSettings::default()
                }
            }
        } else {
            MonitoringSettings::default()
        };
        data.apply_env_overrides();

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> MonitoringSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: MonitoringSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &MonitoringSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, MonitoringSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MonitoringSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
