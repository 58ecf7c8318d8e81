use tauri::{AppHandle, Emitter, State};

use crate::{settings::MonitoringSettings, AppState};

use super::{
    events::{BillingFailure, MonitoringEvents},
    state::{MonitoringSnapshot, SessionParams},
};

/// Forwards monitoring notifications to the webview.
pub struct TauriEvents {
    app_handle: AppHandle,
}

impl TauriEvents {
    pub fn new(app_handle: AppHandle) -> Self {
        Self { app_handle }
    }
}

impl MonitoringEvents for TauriEvents {
    fn state_changed(&self, snapshot: &MonitoringSnapshot) {
        let _ = self.app_handle.emit("monitoring-state-changed", snapshot);
    }

    fn heartbeat(&self, snapshot: &MonitoringSnapshot) {
        let _ = self.app_handle.emit("monitoring-heartbeat", snapshot);
    }

    fn billing_failed(&self, failure: &BillingFailure) {
        if let Err(err) = self.app_handle.emit("monitoring-billing-failed", failure) {
            log::error!("failed to emit monitoring-billing-failed: {err}");
        }
    }
}

#[tauri::command]
pub async fn open_monitoring_session(
    state: State<'_, AppState>,
    params: SessionParams,
) -> Result<MonitoringSnapshot, String> {
    let settings = state.settings.get();
    state
        .sessions
        .open(params, &settings)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn close_monitoring_session(state: State<'_, AppState>) -> Result<(), String> {
    state.sessions.close().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn report_user_input(state: State<'_, AppState>) -> Result<(), String> {
    // Input with no open session is not an error; the view may be mid-teardown.
    if let Ok(controller) = state.sessions.current().await {
        controller.record_input().await;
    }
    Ok(())
}

#[tauri::command]
pub async fn report_tab_visibility(
    state: State<'_, AppState>,
    visible: bool,
) -> Result<MonitoringSnapshot, String> {
    let controller = state.sessions.current().await.map_err(|e| e.to_string())?;
    controller
        .set_tab_visible(visible)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn activate_monitoring(state: State<'_, AppState>) -> Result<MonitoringSnapshot, String> {
    let controller = state.sessions.current().await.map_err(|e| e.to_string())?;
    controller.activate().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn refresh_monitoring_summary(
    state: State<'_, AppState>,
) -> Result<MonitoringSnapshot, String> {
    let controller = state.sessions.current().await.map_err(|e| e.to_string())?;
    controller.refresh_summary().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_monitoring_snapshot(
    state: State<'_, AppState>,
) -> Result<MonitoringSnapshot, String> {
    let controller = state.sessions.current().await.map_err(|e| e.to_string())?;
    Ok(controller.snapshot().await)
}

#[tauri::command]
pub fn get_monitoring_settings(state: State<'_, AppState>) -> Result<MonitoringSettings, String> {
    Ok(state.settings.get())
}

/// Takes effect for the next opened session; the API endpoint is read at startup.
#[tauri::command]
pub fn update_monitoring_settings(
    state: State<'_, AppState>,
    settings: MonitoringSettings,
) -> Result<(), String> {
    state.settings.update(settings).map_err(|e| e.to_string())
}
