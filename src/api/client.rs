use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Url;

use super::{ApiError, BillingEvent, MonitoringSummary};
use crate::settings::MonitoringSettings;

/// REST operations the monitoring core depends on.
#[async_trait]
pub trait MonitoringApi: Send + Sync {
    async fn fetch_summary(
        &self,
        patient_id: &str,
        provider_id: &str,
    ) -> Result<MonitoringSummary, ApiError>;

    async fn post_billing_event(&self, event: &BillingEvent) -> Result<(), ApiError>;
}

#[derive(Clone)]
pub struct HttpMonitoringApi {
    base_url: Url,
    token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpMonitoringApi {
    pub fn new(settings: &MonitoringSettings) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        let base_url = Url::parse(&settings.api_base_url)
            .map_err(|err| ApiError::InvalidUrl(format!("{}: {err}", settings.api_base_url)))?;

        Ok(Self {
            base_url,
            token: settings.api_token.clone(),
            http_client,
        })
    }

    /// Appends `segments` to the base path, percent-encoding each one so ids
    /// containing `/`, `?` or spaces stay inside their own segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn summary_url(&self, patient_id: &str, provider_id: &str) -> Result<Url, ApiError> {
        self.endpoint(&[
            "rpm",
            "patients",
            patient_id,
            "providers",
            provider_id,
            "summary",
        ])
    }

    fn billing_url(&self, patient_id: &str) -> Result<Url, ApiError> {
        self.endpoint(&["rpm", "patients", patient_id, "billing-events"])
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    warn!("monitoring service returned {status}: {body}");
    Err(ApiError::Status { status, body })
}

#[async_trait]
impl MonitoringApi for HttpMonitoringApi {
    async fn fetch_summary(
        &self,
        patient_id: &str,
        provider_id: &str,
    ) -> Result<MonitoringSummary, ApiError> {
        let url = self.summary_url(patient_id, provider_id)?;
        debug!("fetching monitoring summary from {url}");

        let response = self.authorize(self.http_client.get(url)).send().await?;
        let response = check_status(response).await?;

        response
            .json::<MonitoringSummary>()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn post_billing_event(&self, event: &BillingEvent) -> Result<(), ApiError> {
        let url = self.billing_url(&event.patient_id)?;
        debug!(
            "posting {}s billing event {} to {url}",
            event.duration_in_seconds, event.event_id
        );

        let response = self
            .authorize(self.http_client.post(url).json(event))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
