use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::{
    sync::Mutex,
    task::{JoinHandle, JoinSet},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    api::{ApiError, BillingEvent, MonitoringApi},
    settings::MonitoringSettings,
};

use super::{
    events::{BillingFailure, MonitoringEvents},
    state::{MonitoringSnapshot, MonitoringState, SessionParams},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Owns one patient's monitoring session: the state aggregate, the driver
/// task that evaluates idle/cap and emits billing events, and its cancellation.
/// Network calls started by the driver run in tasks the driver owns, so a
/// slow backend never delays the next heartbeat.
///
/// A controller is never retargeted. Switching patients means stopping this
/// one and building another.
#[derive(Clone)]
pub struct MonitoringController {
    params: Arc<SessionParams>,
    state: Arc<Mutex<MonitoringState>>,
    api: Arc<dyn MonitoringApi>,
    events: Arc<dyn MonitoringEvents>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    cancel_token: CancellationToken,
    heartbeat_interval: Duration,
}

impl MonitoringController {
    pub fn new(
        params: SessionParams,
        settings: &MonitoringSettings,
        api: Arc<dyn MonitoringApi>,
        events: Arc<dyn MonitoringEvents>,
    ) -> Self {
        let state = MonitoringState::new(&params, settings, Instant::now());
        Self {
            params: Arc::new(params),
            state: Arc::new(Mutex::new(state)),
            api,
            events,
            ticker: Arc::new(Mutex::new(None)),
            cancel_token: CancellationToken::new(),
            heartbeat_interval: settings.heartbeat(),
        }
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Loads the summary and arms the driver. A failed fetch is not fatal:
    /// the clock stays unseeded and the driver retries on its next tick.
    pub async fn start(&self) -> Result<MonitoringSnapshot> {
        self.ensure_live()?;
        if self.ticker.lock().await.is_some() {
            bail!("monitoring session already started");
        }

        if let Err(err) =
            fetch_and_apply_summary(&self.state, &*self.api, &*self.events, &self.cancel_token)
                .await
        {
            log_warn!(
                "initial summary fetch failed for patient {}: {err}",
                self.params.patient_id
            );
            self.state
                .lock()
                .await
                .schedule_summary_fetch(Instant::now());
        }

        self.spawn_ticker().await;
        log_info!(
            "monitoring started for patient {} (provider {}, role {:?})",
            self.params.patient_id,
            self.params.provider_id,
            self.params.role
        );

        Ok(self.snapshot().await)
    }

    /// Cancels the driver and waits for it to exit. In-flight deliveries are
    /// aborted with it, so no billing event is emitted for this session
    /// afterwards.
    pub async fn stop(&self) -> Result<()> {
        self.cancel_token.cancel();

        let handle = self.ticker.lock().await.take();
        if let Some(handle) = handle {
            handle
                .await
                .context("monitoring driver task failed to join")?;
        }

        {
            let mut state = self.state.lock().await;
            state.halt(Instant::now());
        }
        log_info!("monitoring stopped for patient {}", self.params.patient_id);
        Ok(())
    }

    pub async fn record_input(&self) {
        if self.is_stopped() {
            return;
        }
        self.state.lock().await.record_input(Instant::now());
    }

    pub async fn set_tab_visible(&self, visible: bool) -> Result<MonitoringSnapshot> {
        self.ensure_live()?;
        update_state(&self.state, &*self.events, |state, now| {
            state.set_tab_visible(visible, now)
        })
        .await;
        Ok(self.snapshot().await)
    }

    /// The "Activate" action. This is the only way out of the inactive
    /// phase; it is refused once the period's cap has been reached.
    pub async fn activate(&self) -> Result<MonitoringSnapshot> {
        self.ensure_live()?;
        let accepted =
            update_state(&self.state, &*self.events, |state, now| state.activate(now)).await;
        if !accepted {
            bail!("monitoring cap reached for the current billing period");
        }
        Ok(self.snapshot().await)
    }

    /// Invalidates and re-fetches the summary.
    pub async fn refresh_summary(&self) -> Result<MonitoringSnapshot> {
        self.ensure_live()?;
        fetch_and_apply_summary(&self.state, &*self.api, &*self.events, &self.cancel_token)
            .await
            .context("failed to refresh monitoring summary")?;
        Ok(self.snapshot().await)
    }

    pub async fn snapshot(&self) -> MonitoringSnapshot {
        self.state.lock().await.snapshot(Instant::now())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_stopped() {
            bail!(
                "monitoring session for patient {} has ended",
                self.params.patient_id
            );
        }
        Ok(())
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let state = self.state.clone();
        let api = self.api.clone();
        let events = self.events.clone();
        let token = self.cancel_token.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let patient_id = self.params.patient_id.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut background: JoinSet<()> = JoinSet::new();

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        log_info!("monitoring driver for patient {} shutting down", patient_id);
                        background.shutdown().await;
                        break;
                    }
                    Some(joined) = background.join_next(), if !background.is_empty() => {
                        if let Err(err) = joined {
                            if err.is_panic() {
                                log_error!("monitoring task for patient {} panicked: {err}", patient_id);
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        run_heartbeat(&state, &api, &events, &token, &mut background).await;
                    }
                }
            }
        });

        *ticker_guard = Some(handle);
    }
}

/// Runs `f` under the state lock and publishes a state change if the derived
/// view moved.
async fn update_state<R>(
    state: &Mutex<MonitoringState>,
    events: &dyn MonitoringEvents,
    f: impl FnOnce(&mut MonitoringState, Instant) -> R,
) -> R {
    let now = Instant::now();
    let (result, changed) = {
        let mut guard = state.lock().await;
        let before = guard.view();
        let result = f(&mut *guard, now);
        let changed = (guard.view() != before).then(|| guard.snapshot(now));
        (result, changed)
    };

    if let Some(snapshot) = changed {
        events.state_changed(&snapshot);
    }
    result
}

async fn fetch_and_apply_summary(
    state: &Mutex<MonitoringState>,
    api: &dyn MonitoringApi,
    events: &dyn MonitoringEvents,
    token: &CancellationToken,
) -> Result<(), ApiError> {
    let (patient_id, provider_id) = {
        let guard = state.lock().await;
        (guard.patient_id().to_string(), guard.provider_id().to_string())
    };

    let summary = api.fetch_summary(&patient_id, &provider_id).await?;
    if token.is_cancelled() {
        return Ok(());
    }

    update_state(state, events, |state, now| state.apply_summary(summary, now)).await;
    Ok(())
}

/// One driver tick. Only touches local state; any network call it decides
/// on is handed to `background`.
async fn run_heartbeat(
    state: &Arc<Mutex<MonitoringState>>,
    api: &Arc<dyn MonitoringApi>,
    events: &Arc<dyn MonitoringEvents>,
    token: &CancellationToken,
    background: &mut JoinSet<()>,
) {
    if token.is_cancelled() {
        return;
    }

    let today = Utc::now().date_naive();
    let tasks_in_flight = !background.is_empty();
    let (due_event, fetch_due) = update_state(state, &**events, |state, now| {
        state.poll_idle(now);
        // Bill the window that just closed before the cap looks at the clock,
        // so a window ending exactly on the cap is still recorded.
        let due_event = state.take_due_billing(now);
        state.sync(now);

        let fetch_due =
            due_event.is_none() && !tasks_in_flight && state.summary_fetch_due(now, today);
        if fetch_due {
            state.schedule_summary_fetch(now);
        }
        (due_event, fetch_due)
    })
    .await;

    let (state_task, api_task, events_task, token_task) =
        (state.clone(), api.clone(), events.clone(), token.clone());
    if let Some(event) = due_event {
        background.spawn(async move {
            deliver_billing_event(&state_task, &*api_task, &*events_task, &token_task, event)
                .await;
        });
    } else if fetch_due {
        background.spawn(async move {
            if let Err(err) =
                fetch_and_apply_summary(&state_task, &*api_task, &*events_task, &token_task).await
            {
                log_warn!("summary fetch retry failed: {err}");
            }
        });
    }

    let snapshot = {
        let guard = state.lock().await;
        guard
            .is_clock_running()
            .then(|| guard.snapshot(Instant::now()))
    };
    if let Some(snapshot) = snapshot {
        events.heartbeat(&snapshot);
    }
}

/// Posts one event, at most once. Success invalidates the summary; failure is
/// reported to the host and the window is simply not billed.
async fn deliver_billing_event(
    state: &Mutex<MonitoringState>,
    api: &dyn MonitoringApi,
    events: &dyn MonitoringEvents,
    token: &CancellationToken,
    event: BillingEvent,
) {
    match api.post_billing_event(&event).await {
        Ok(()) => {
            state.lock().await.record_billing_result(true);
            log_info!(
                "billed {}s for patient {} (event {})",
                event.duration_in_seconds,
                event.patient_id,
                event.event_id
            );

            if token.is_cancelled() {
                return;
            }
            if let Err(err) = fetch_and_apply_summary(state, api, events, token).await {
                log_warn!(
                    "summary refresh after billing failed for patient {}: {err}",
                    event.patient_id
                );
            }
        }
        Err(err) => {
            state.lock().await.record_billing_result(false);
            log_error!(
                "billing event {} for patient {} failed: {err}",
                event.event_id,
                event.patient_id
            );
            events.billing_failed(&BillingFailure {
                patient_id: event.patient_id.clone(),
                duration_in_seconds: event.duration_in_seconds,
                message: err.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MonitoringSummary;
    use crate::monitoring::{clock::ClockStatus, gate::ViewerRole, state::SessionPhase};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeApi {
        total: StdMutex<u64>,
        posted: StdMutex<Vec<BillingEvent>>,
        fail_fetch: StdMutex<bool>,
        post_delay: StdMutex<Duration>,
    }

    #[async_trait]
    impl MonitoringApi for FakeApi {
        async fn fetch_summary(
            &self,
            _patient_id: &str,
            _provider_id: &str,
        ) -> Result<MonitoringSummary, ApiError> {
            if *self.fail_fetch.lock().unwrap() {
                return Err(ApiError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            Ok(MonitoringSummary {
                total_duration_in_seconds: *self.total.lock().unwrap(),
                period_start: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
                period_end: NaiveDate::from_ymd_opt(2099, 10, 30).unwrap(),
            })
        }

        async fn post_billing_event(&self, event: &BillingEvent) -> Result<(), ApiError> {
            let delay = *self.post_delay.lock().unwrap();
            if !delay.is_zero() {
                time::sleep(delay).await;
            }
            *self.total.lock().unwrap() += event.duration_in_seconds;
            self.posted.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingEvents {
        phases: StdMutex<Vec<SessionPhase>>,
    }

    impl MonitoringEvents for RecordingEvents {
        fn state_changed(&self, snapshot: &MonitoringSnapshot) {
            self.phases.lock().unwrap().push(snapshot.view.phase);
        }

        fn heartbeat(&self, _snapshot: &MonitoringSnapshot) {}

        fn billing_failed(&self, _failure: &BillingFailure) {}
    }

    fn params() -> SessionParams {
        SessionParams {
            patient_id: "p-1".into(),
            provider_id: "dr-1".into(),
            role: ViewerRole::Clinician,
            is_patient_viewing: false,
        }
    }

    fn controller(
        api: Arc<FakeApi>,
        events: Arc<RecordingEvents>,
        idle_timeout_secs: u64,
    ) -> MonitoringController {
        let settings = MonitoringSettings {
            clinician_idle_timeout_secs: idle_timeout_secs,
            ..MonitoringSettings::default()
        };
        MonitoringController::new(params(), &settings, api, events)
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_pauses_billing_until_activated() {
        let api = Arc::new(FakeApi::default());
        *api.total.lock().unwrap() = 600;
        let events = Arc::new(RecordingEvents::default());
        let controller = controller(api.clone(), events.clone(), 10);

        controller.start().await.unwrap();
        time::sleep(Duration::from_millis(12_500)).await;

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.view.phase, SessionPhase::Inactive);
        assert!(snapshot.view.show_activate_prompt);
        // Windows closing at 5s and 10s: the 10s heartbeat saw idle first.
        assert_eq!(api.posted.lock().unwrap().len(), 1);

        // Input alone does not resume.
        controller.record_input().await;
        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(api.posted.lock().unwrap().len(), 1);

        controller.activate().await.unwrap();
        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(api.posted.lock().unwrap().len(), 2);
        assert!(events.phases.lock().unwrap().contains(&SessionPhase::Inactive));

        controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initial_fetch_is_retried() {
        let api = Arc::new(FakeApi::default());
        *api.fail_fetch.lock().unwrap() = true;
        let events = Arc::new(RecordingEvents::default());
        let controller = controller(api.clone(), events, 60);

        let snapshot = controller.start().await.unwrap();
        assert_eq!(snapshot.elapsed_secs, None);
        assert_eq!(snapshot.timer_text, None);

        *api.fail_fetch.lock().unwrap() = false;
        time::sleep(Duration::from_millis(5_500)).await;

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.elapsed_secs, Some(0));
        assert!(api.posted.lock().unwrap().is_empty());

        controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_controller_emits_nothing() {
        let api = Arc::new(FakeApi::default());
        let events = Arc::new(RecordingEvents::default());
        let controller = controller(api.clone(), events, 60);

        controller.start().await.unwrap();
        time::sleep(Duration::from_millis(2_000)).await;
        controller.stop().await.unwrap();

        time::sleep(Duration::from_secs(30)).await;
        assert!(api.posted.lock().unwrap().is_empty());
        assert!(controller.activate().await.is_err());
        assert!(controller.start().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_delivery_does_not_hold_back_idle_timeout() {
        let api = Arc::new(FakeApi::default());
        *api.post_delay.lock().unwrap() = Duration::from_secs(9);
        let events = Arc::new(RecordingEvents::default());
        let controller = controller(api.clone(), events.clone(), 10);

        controller.start().await.unwrap();
        time::sleep(Duration::from_millis(12_500)).await;

        // The 5s window is still being posted, but the 10s heartbeat ran.
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.view.phase, SessionPhase::Inactive);
        assert!(!snapshot.view.show_measurements);
        assert_eq!(snapshot.clock_status, ClockStatus::Paused);
        assert_eq!(snapshot.elapsed_secs, Some(10));
        assert!(api.posted.lock().unwrap().is_empty());
        assert!(events.phases.lock().unwrap().contains(&SessionPhase::Inactive));

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(api.posted.lock().unwrap().len(), 1);
        assert_eq!(controller.snapshot().await.billing_events_sent, 1);

        controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_in_flight_delivery() {
        let api = Arc::new(FakeApi::default());
        *api.post_delay.lock().unwrap() = Duration::from_secs(9);
        let events = Arc::new(RecordingEvents::default());
        let controller = controller(api.clone(), events, 60);

        controller.start().await.unwrap();
        time::sleep(Duration::from_secs(7)).await;
        controller.stop().await.unwrap();

        time::sleep(Duration::from_secs(30)).await;
        assert!(api.posted.lock().unwrap().is_empty());
        assert_eq!(*api.total.lock().unwrap(), 0);
        assert_eq!(controller.snapshot().await.billing_events_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_heartbeat_takes_no_window() {
        let api: Arc<dyn MonitoringApi> = Arc::new(FakeApi::default());
        let events: Arc<dyn MonitoringEvents> = Arc::new(RecordingEvents::default());
        let state = Arc::new(Mutex::new(MonitoringState::new(
            &params(),
            &MonitoringSettings::default(),
            Instant::now(),
        )));
        fetch_and_apply_summary(&state, &*api, &*events, &CancellationToken::new())
            .await
            .unwrap();
        time::advance(Duration::from_secs(5)).await;

        let token = CancellationToken::new();
        token.cancel();
        let mut background = JoinSet::new();
        run_heartbeat(&state, &api, &events, &token, &mut background).await;

        assert!(background.is_empty());
        // The closed window was left untouched by the cancelled tick.
        assert!(state.lock().await.take_due_billing(Instant::now()).is_some());
    }
}
