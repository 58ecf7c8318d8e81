pub mod api;
pub mod monitoring;
pub mod settings;
pub mod utils;

pub use api::{ApiError, BillingEvent, HttpMonitoringApi, MonitoringApi, MonitoringSummary};
pub use monitoring::{
    derive_session_state, MonitoringController, MonitoringEvents, MonitoringSnapshot,
    SessionManager, SessionParams, SessionPhase, SessionView, ViewerRole,
};
pub use settings::{MonitoringSettings, SettingsStore};
pub use utils::logging::init_logging;

#[cfg(feature = "desktop")]
pub(crate) struct AppState {
    pub(crate) sessions: SessionManager,
    pub(crate) settings: SettingsStore,
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use std::sync::Arc;

    use crate::monitoring::commands::{
        activate_monitoring, close_monitoring_session, get_monitoring_settings,
        get_monitoring_snapshot, open_monitoring_session, refresh_monitoring_summary,
        report_tab_visibility, report_user_input, update_monitoring_settings, TauriEvents,
    };
    use tauri::Manager;

    init_logging();
    log::info!("RPM monitor starting up...");

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let result = (|| -> anyhow::Result<()> {
                let app_data_dir = app
                    .path()
                    .app_data_dir()
                    .map_err(|err| anyhow::anyhow!(err))?;
                std::fs::create_dir_all(&app_data_dir)?;

                let settings = SettingsStore::new(app_data_dir.join("monitoring-settings.json"))?;
                let api = HttpMonitoringApi::new(&settings.get())?;
                let events = TauriEvents::new(app.handle().clone());

                app.manage(AppState {
                    sessions: SessionManager::new(Arc::new(api), Arc::new(events)),
                    settings,
                });
                Ok(())
            })();

            result.map_err(|err| err.into())
        })
        .on_window_event(|window, event| {
            // Leaving the view must not leave a billing driver behind.
            if let tauri::WindowEvent::Destroyed = event {
                let state = window.state::<AppState>();
                if let Err(err) = tauri::async_runtime::block_on(state.sessions.close()) {
                    log::error!("Failed to close monitoring session on window teardown: {err:#}");
                }
            }
        })
        .invoke_handler(tauri::generate_handler![
            open_monitoring_session,
            close_monitoring_session,
            report_user_input,
            report_tab_visibility,
            activate_monitoring,
            refresh_monitoring_summary,
            get_monitoring_snapshot,
            get_monitoring_settings,
            update_monitoring_settings,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
