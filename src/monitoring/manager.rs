use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{error, info};
use tokio::sync::Mutex;

use crate::{api::MonitoringApi, settings::MonitoringSettings};

use super::{
    controller::MonitoringController,
    events::MonitoringEvents,
    state::{MonitoringSnapshot, SessionParams},
};

/// Holds the single live monitoring session. Opening a session for another
/// patient fully tears the previous one down before the new one is built.
pub struct SessionManager {
    api: Arc<dyn MonitoringApi>,
    events: Arc<dyn MonitoringEvents>,
    current: Mutex<Option<MonitoringController>>,
}

impl SessionManager {
    pub fn new(api: Arc<dyn MonitoringApi>, events: Arc<dyn MonitoringEvents>) -> Self {
        Self {
            api,
            events,
            current: Mutex::new(None),
        }
    }

    pub async fn open(
        &self,
        params: SessionParams,
        settings: &MonitoringSettings,
    ) -> Result<MonitoringSnapshot> {
        settings.validate()?;

        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            info!(
                "closing monitoring session for patient {} before opening {}",
                previous.params().patient_id,
                params.patient_id
            );
            if let Err(err) = previous.stop().await {
                error!("Failed to stop previous monitoring session: {err:#}");
            }
        }

        let controller =
            MonitoringController::new(params, settings, self.api.clone(), self.events.clone());
        let snapshot = controller.start().await?;
        *current = Some(controller);
        Ok(snapshot)
    }

    pub async fn close(&self) -> Result<()> {
        let previous = self.current.lock().await.take();
        match previous {
            Some(controller) => controller.stop().await,
            None => Ok(()),
        }
    }

    pub async fn current(&self) -> Result<MonitoringController> {
        self.current
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("no monitoring session is open"))
    }
}
