//! The attribution reporter.
//!
//! [`Reporter`] is a cloneable handle over one shared state: the invocation
//! list, the configuration store, the enable flag, and the refresh
//! bookkeeping. Every read-modify-write of that state happens under a single
//! async mutex, so `clear_cache`, `add_configurations`, and
//! `record_and_update` never interleave. Network requests run in spawned
//! tasks outside the lock; their completions take the lock again before
//! touching state.

use std::collections::BTreeSet;
use std::sync::Arc;

use aem_store::{AddReport, ClearReport, ConfigStore, SnapshotFile, clear_cache};
use aem_types::Invocation;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::applink::parse_url;
use crate::config::ReporterConfig;
use crate::error::{ReporterError, TransportError};
use crate::transport::{GraphRequest, GraphTransport, HttpTransport};
use crate::upload::conversions_payload;

/// Continuation run once when a configuration refresh resolves.
pub type RefreshCompletion = Box<dyn FnOnce(Result<(), TransportError>) + Send + 'static>;

/// Derived refresh state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReporterPhase {
    /// No fresh configuration and no refresh in flight.
    Idle,
    /// A configuration refresh is in flight.
    LoadingConfiguration,
    /// Configurations are loaded and the refresh timestamp is fresh.
    Ready,
}

/// Result of [`Reporter::record_and_update`].
#[derive(Debug)]
pub enum RecordOutcome {
    Disabled,
    EmptyEvent,
    /// The configuration refresh failed; nothing was recorded.
    ConfigurationUnavailable(TransportError),
    NoConfiguration,
    /// No pending invocation's configuration counts this event.
    Unattributed,
    Attributed {
        invocations: usize,
        /// The aggregation upload, if one was sent.
        upload: Option<JoinHandle<()>>,
    },
}

/// The part of an invocation an upload reported. A completed upload only
/// aggregates invocations that still match it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SentConversion {
    id: Uuid,
    conversion_value: i64,
    priority: i64,
}

impl SentConversion {
    fn of(invocation: &Invocation) -> Self {
        Self {
            id: invocation.id(),
            conversion_value: invocation.conversion_value(),
            priority: invocation.priority(),
        }
    }

    fn is_current(&self, invocation: &Invocation) -> bool {
        *self == Self::of(invocation)
    }
}

struct ReporterState {
    is_enabled: bool,
    is_loading_configuration: bool,
    refresh_timestamp: Option<DateTime<Utc>>,
    invocations: Vec<Invocation>,
    configs: ConfigStore,
    completions: Vec<RefreshCompletion>,
}

impl ReporterState {
    fn is_config_refresh_timestamp_valid(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.refresh_timestamp
            .is_some_and(|refreshed| now - refreshed < window)
    }
}

struct Inner {
    config: ReporterConfig,
    transport: Arc<dyn GraphTransport>,
    report_file: SnapshotFile,
    config_file: SnapshotFile,
    state: Mutex<ReporterState>,
}

#[derive(Clone)]
pub struct Reporter {
    inner: Arc<Inner>,
}

impl Reporter {
    /// Create a disabled reporter, restoring invocations and configurations
    /// from the snapshots in the configured data directory.
    pub fn new(config: ReporterConfig, transport: Arc<dyn GraphTransport>) -> Self {
        let report_file = config.report_file();
        let config_file = config.config_file();
        let invocations: Vec<Invocation> = report_file.load();
        let configs = ConfigStore::load_from(&config_file);
        debug!(
            invocations = invocations.len(),
            configs = configs.len(),
            "restored reporter state"
        );

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                report_file,
                config_file,
                state: Mutex::new(ReporterState {
                    is_enabled: false,
                    is_loading_configuration: false,
                    refresh_timestamp: None,
                    invocations,
                    configs,
                    completions: Vec::new(),
                }),
            }),
        }
    }

    /// [`Reporter::new`] with the HTTPS transport.
    pub fn with_http_transport(config: ReporterConfig) -> Result<Self, ReporterError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.inner.config
    }

    /// Turn reporting on. Idempotent.
    ///
    /// The first call clears expired state and uploads whatever is still
    /// pending from a previous run.
    pub async fn enable(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.is_enabled {
                return;
            }
            state.is_enabled = true;
            info!("aem reporting enabled");
            self.clear_cache_locked(&mut state);
        }
        self.send_aggregation_request().await;
    }

    pub async fn is_enabled(&self) -> bool {
        self.inner.state.lock().await.is_enabled
    }

    pub async fn phase(&self) -> ReporterPhase {
        let state = self.inner.state.lock().await;
        if state.is_loading_configuration {
            ReporterPhase::LoadingConfiguration
        } else if !state.configs.is_empty()
            && state.is_config_refresh_timestamp_valid(Utc::now(), self.inner.config.get_refresh_window())
        {
            ReporterPhase::Ready
        } else {
            ReporterPhase::Idle
        }
    }

    /// Copy of the current invocation list.
    pub async fn invocations(&self) -> Vec<Invocation> {
        self.inner.state.lock().await.invocations.clone()
    }

    /// Copy of the current configuration store.
    pub async fn configurations(&self) -> ConfigStore {
        self.inner.state.lock().await.configs.clone()
    }

    /// Record the invocation carried by a deep link, if any.
    ///
    /// The invocation list is persisted immediately. A refresh is scheduled
    /// when the configuration is stale. Returns whether an invocation was
    /// recorded.
    pub async fn handle(&self, url: &str) -> bool {
        let Some(invocation) = parse_url(url) else {
            return false;
        };
        let needs_refresh = {
            let mut state = self.inner.state.lock().await;
            info!(campaign_id = invocation.campaign_id(), "recorded app link invocation");
            state.invocations.push(invocation);
            self.persist_report(&state);
            !state.is_config_refresh_timestamp_valid(Utc::now(), self.inner.config.get_refresh_window())
        };
        if needs_refresh {
            self.load_configuration_with(None).await;
        }
        true
    }

    /// Whether the last configuration refresh is inside the refresh window.
    pub async fn is_config_refresh_timestamp_valid(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.is_config_refresh_timestamp_valid(Utc::now(), self.inner.config.get_refresh_window())
    }

    /// Refresh configurations unless they are fresh, queueing `completion`.
    ///
    /// - Fresh timestamp and a non-empty store: every queued completion runs
    ///   now with `Ok`.
    /// - A refresh already in flight: no new request; the completion runs
    ///   when that refresh resolves.
    /// - Otherwise one configuration request is spawned.
    ///
    /// Queued completions run exactly once each, in the order they were
    /// queued, after the lock is released.
    pub async fn load_configuration_with(&self, completion: Option<RefreshCompletion>) {
        let mut state = self.inner.state.lock().await;
        if let Some(completion) = completion {
            state.completions.push(completion);
        }

        if !state.configs.is_empty()
            && state.is_config_refresh_timestamp_valid(Utc::now(), self.inner.config.get_refresh_window())
        {
            let completions = std::mem::take(&mut state.completions);
            drop(state);
            run_completions(completions, Ok(()));
            return;
        }
        if state.is_loading_configuration {
            debug!("configuration refresh already in flight");
            return;
        }

        state.is_loading_configuration = true;
        let request = self.configuration_request(&state);
        drop(state);

        let reporter = self.clone();
        tokio::spawn(async move { reporter.finish_configuration_refresh(request).await });
    }

    /// [`Self::load_configuration_with`], awaiting the outcome.
    pub async fn load_configuration(&self) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.load_configuration_with(Some(Box::new(move |result| {
            let _ = tx.send(result);
        })))
        .await;
        rx.await.unwrap_or_else(|_| {
            Err(TransportError::Abandoned {
                path: self.inner.config.conversion_configs_path(),
            })
        })
    }

    /// Attribute a host event to every pending invocation.
    ///
    /// No-op when reporting is disabled, the event name is empty, or no
    /// configuration is available after the refresh. When at least one
    /// invocation records the event the invocation list is persisted and an
    /// aggregation upload is sent.
    pub async fn record_and_update(&self, event: &str, currency: Option<&str>, value: Option<f64>) -> RecordOutcome {
        if !self.is_enabled().await {
            return RecordOutcome::Disabled;
        }
        if event.is_empty() {
            return RecordOutcome::EmptyEvent;
        }
        if let Err(error) = self.load_configuration().await {
            debug!(%error, event, "skipping event without configuration");
            return RecordOutcome::ConfigurationUnavailable(error);
        }

        let attributed = {
            let mut state = self.inner.state.lock().await;
            if state.configs.is_empty() {
                return RecordOutcome::NoConfiguration;
            }

            let now = Utc::now();
            let ReporterState {
                invocations,
                configs,
                ..
            } = &mut *state;
            let mut attributed = 0;
            for invocation in invocations.iter_mut().filter(|i| !i.is_aggregated()) {
                let mode_configs = configs.configs(invocation.config_mode());
                if !invocation.attribute_event(event, currency, value, mode_configs) {
                    continue;
                }
                attributed += 1;
                if invocation.update_conversion_value(mode_configs, now) {
                    debug!(
                        campaign_id = invocation.campaign_id(),
                        conversion_value = invocation.conversion_value(),
                        "conversion value updated"
                    );
                }
            }
            if attributed > 0 {
                self.persist_report(&state);
            }
            attributed
        };

        if attributed == 0 {
            return RecordOutcome::Unattributed;
        }
        let upload = self.send_aggregation_request().await;
        RecordOutcome::Attributed {
            invocations: attributed,
            upload,
        }
    }

    /// Upload every non-aggregated invocation in one request.
    ///
    /// Returns `None` without building a request when nothing is pending.
    /// On success the included invocations are marked aggregated and the
    /// list persisted, except those whose conversion value moved while the
    /// upload was in flight; on failure nothing changes and they are retried
    /// on the next call.
    pub async fn send_aggregation_request(&self) -> Option<JoinHandle<()>> {
        let (request, sent) = {
            let state = self.inner.state.lock().await;
            let pending: Vec<&Invocation> = state
                .invocations
                .iter()
                .filter(|invocation| !invocation.is_aggregated())
                .collect();
            if pending.is_empty() {
                return None;
            }
            let sent: Vec<SentConversion> = pending.iter().copied().map(SentConversion::of).collect();
            let request = GraphRequest::post(
                self.inner.config.conversions_path(),
                conversions_payload(pending.iter().copied()),
            );
            (request, sent)
        };

        info!(count = sent.len(), "sending aggregation request");
        let reporter = self.clone();
        Some(tokio::spawn(async move {
            reporter.finish_aggregation(request, sent).await
        }))
    }

    /// Merge a batch of raw configurations and persist the store.
    pub async fn add_configurations(&self, batch: &[Value]) -> AddReport {
        let mut state = self.inner.state.lock().await;
        let report = state.configs.add_configurations(batch);
        self.persist_configs(&state);
        report
    }

    /// Expire invocations and trim configurations, persisting both when
    /// anything was removed.
    pub async fn clear_cache(&self) -> ClearReport {
        let mut state = self.inner.state.lock().await;
        self.clear_cache_locked(&mut state)
    }

    pub async fn save_report_data(&self) -> Result<(), ReporterError> {
        let state = self.inner.state.lock().await;
        Ok(self.inner.report_file.save(&state.invocations)?)
    }

    /// Read the persisted invocation list. Does not touch in-memory state.
    pub fn load_report_data(&self) -> Vec<Invocation> {
        self.inner.report_file.load()
    }

    pub async fn save_configurations(&self) -> Result<(), ReporterError> {
        let state = self.inner.state.lock().await;
        Ok(state.configs.save_to(&self.inner.config_file)?)
    }

    /// Read the persisted configuration store. Does not touch in-memory state.
    pub fn load_configurations(&self) -> ConfigStore {
        ConfigStore::load_from(&self.inner.config_file)
    }

    fn configuration_request(&self, state: &ReporterState) -> GraphRequest {
        let advertiser_ids: BTreeSet<&str> = state
            .invocations
            .iter()
            .filter_map(Invocation::advertiser_id)
            .collect();
        GraphRequest::get(
            self.inner.config.conversion_configs_path(),
            json!({ "fields": "", "advertiser_ids": advertiser_ids }),
        )
    }

    async fn finish_configuration_refresh(&self, request: GraphRequest) {
        let path = request.path.clone();
        let result = self.inner.transport.start(request).await;

        let mut state = self.inner.state.lock().await;
        let entries = result.and_then(|mut response| match response.get_mut("data").map(Value::take) {
            Some(Value::Array(entries)) => Ok(entries),
            _ => Err(TransportError::Decode {
                path,
                message: "response has no `data` array".to_string(),
            }),
        });
        let outcome = match entries {
            Ok(entries) => {
                let report = state.configs.add_configurations(&entries);
                state.refresh_timestamp = Some(Utc::now());
                info!(
                    added = report.added,
                    rejected = report.rejected,
                    "configuration refresh completed"
                );
                self.clear_cache_locked(&mut state);
                self.persist_configs(&state);
                Ok(())
            }
            Err(error) => {
                warn!(%error, "configuration refresh failed");
                Err(error)
            }
        };
        state.is_loading_configuration = false;
        let completions = std::mem::take(&mut state.completions);
        drop(state);

        run_completions(completions, outcome);
    }

    async fn finish_aggregation(&self, request: GraphRequest, sent: Vec<SentConversion>) {
        if let Err(error) = self.inner.transport.start(request).await {
            warn!(%error, count = sent.len(), "aggregation upload failed, invocations stay pending");
            return;
        }

        let mut state = self.inner.state.lock().await;
        let mut aggregated = 0;
        for invocation in state
            .invocations
            .iter_mut()
            .filter(|invocation| sent.iter().any(|conversion| conversion.is_current(invocation)))
        {
            invocation.set_aggregated(true);
            aggregated += 1;
        }
        if aggregated < sent.len() {
            debug!(
                stale = sent.len() - aggregated,
                "invocations changed or removed during upload, not aggregated"
            );
        }
        if aggregated > 0 {
            self.persist_report(&state);
        }
        debug!(count = aggregated, "invocations aggregated");
    }

    fn clear_cache_locked(&self, state: &mut ReporterState) -> ClearReport {
        let ReporterState {
            invocations,
            configs,
            ..
        } = &mut *state;
        let report = clear_cache(invocations, configs, Utc::now());
        if !report.is_noop() {
            self.persist_report(state);
            self.persist_configs(state);
        }
        report
    }

    fn persist_report(&self, state: &ReporterState) {
        if let Err(error) = self.inner.report_file.save(&state.invocations) {
            warn!(%error, "failed to save invocations");
        }
    }

    fn persist_configs(&self, state: &ReporterState) {
        if let Err(error) = state.configs.save_to(&self.inner.config_file) {
            warn!(%error, "failed to save configurations");
        }
    }
}

fn run_completions(completions: Vec<RefreshCompletion>, outcome: Result<(), TransportError>) {
    for completion in completions {
        completion(outcome.clone());
    }
}
