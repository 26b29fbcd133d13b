//! Owns the pipeline: the scheduler, the live channel, the window and every
//! derived value. Renderers only ever get a [`DashboardView`] copy.

use crate::collectors::Sources;
use crate::collectors::http::HttpBackend;
use crate::config::{Config, Thresholds};
use crate::error::FetchError;
use crate::insights::{self, Insight, InsightInputs};
use crate::kpi::{self, ConfidenceTracker, DerivedKpi};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::scheduler::{PollOutcome, PollScheduler, PollSink, SchedulerHandle, SourceSet};
use crate::stream::{ChannelState, EventSink, LiveEventChannel};
use crate::types::{LiveEvent, ResourceSample, Snapshot, SnapshotSet, SourceStatus};
use crate::window::{EventLog, SlidingWindow};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use reqwest::Client;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const RECENT_EVENTS: usize = 50;
const ALL_SOURCES_DOWN: &str = "No telemetry source answered; showing last known values";

/// Read-only copy of everything a renderer needs.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub running: bool,
    pub channel: ChannelState,
    pub snapshots: Option<SnapshotSet>,
    pub sources: Vec<SourceStatus>,
    pub window: Vec<ResourceSample>,
    pub recent_events: Vec<LiveEvent>,
    pub kpi: Option<DerivedKpi>,
    pub insights: Vec<Insight>,
    pub banner: Option<String>,
    pub last_poll: Option<DateTime<Utc>>,
    pub metrics: MetricsSnapshot,
}

struct PipelineState {
    running: bool,
    epoch: u64,
    window: SlidingWindow,
    events: EventLog,
    snapshots: Option<SnapshotSet>,
    statuses: Vec<SourceStatus>,
    confidence: ConfidenceTracker,
    confidence_series: VecDeque<f64>,
    kpi: Option<DerivedKpi>,
    insights: Vec<Insight>,
    banner: Option<String>,
    last_poll: Option<DateTime<Utc>>,
}

impl PipelineState {
    fn new(config: &Config) -> Self {
        Self {
            running: false,
            epoch: 0,
            window: SlidingWindow::new(config.window.capacity),
            events: EventLog::new(config.window.max_events),
            snapshots: None,
            statuses: Vec::new(),
            confidence: ConfidenceTracker::new(config.thresholds.high_confidence),
            confidence_series: VecDeque::with_capacity(config.window.capacity),
            kpi: None,
            insights: Vec::new(),
            banner: None,
            last_poll: None,
        }
    }

    fn absorb(&mut self, outcome: PollOutcome, thresholds: &Thresholds) {
        let all_failed = outcome.all_failed();
        let PollOutcome {
            resources,
            processes,
            uptime,
            database,
            analysis,
            prompts,
            security,
            logs,
            statuses,
            completed_at,
        } = outcome;

        if !resources.stale {
            self.window.push(resources.value);
        }

        if !analysis.stale && self.confidence.ingest(&analysis.value) > 0 {
            if let Some(avg) = self.confidence.average_confidence() {
                if self.confidence_series.len() == self.window.capacity() {
                    self.confidence_series.pop_front();
                }
                self.confidence_series.push_back(avg);
            }
        }
        let analysis = Snapshot {
            value: kpi::summarize_history(&analysis.value, completed_at),
            as_of: analysis.as_of,
            stale: analysis.stale,
        };

        if !logs.stale {
            for event in logs.value {
                self.events.push(event);
            }
        }

        let series: Vec<f64> = self.confidence_series.iter().copied().collect();
        let derived = kpi::derive(&self.window.snapshot(), &self.confidence, &series);

        let engine = processes.value.engine;
        let inputs = InsightInputs {
            high_confidence_pct: derived.high_confidence_rate.map(|r| r * 100.0),
            queue_length: engine.queue_length,
            avg_processing_ms: engine.avg_processing_ms,
            cpu_pct: f64::from(resources.value.cpu_pct()),
            mem_pct: f64::from(resources.value.mem_pct()),
            db_healthy: database.value.healthy,
        };
        self.insights = insights::evaluate(&inputs, thresholds);
        self.kpi = Some(derived);

        self.banner = all_failed.then(|| ALL_SOURCES_DOWN.to_string());
        self.snapshots = Some(SnapshotSet {
            resources,
            processes,
            uptime,
            database,
            analysis,
            prompts,
            security,
        });
        self.statuses = statuses;
        self.last_poll = Some(completed_at);
    }
}

struct Shared {
    state: Mutex<PipelineState>,
    metrics: Arc<Metrics>,
    thresholds: Thresholds,
    cycles: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PollSink for Shared {
    fn apply(&self, epoch: u64, outcome: PollOutcome) {
        {
            let mut state = self.lock();
            if !state.running || state.epoch != epoch {
                self.metrics.inc_stale_results_discarded();
                debug!(
                    "[controller] discarding poll result from epoch {epoch} (current {})",
                    state.epoch
                );
                return;
            }
            state.absorb(outcome, &self.thresholds);
        }
        self.cycles.send_modify(|n| *n += 1);
    }
}

impl EventSink for Shared {
    fn ingest(&self, event: LiveEvent) {
        let mut state = self.lock();
        if state.running {
            state.events.push(event);
        }
    }
}

pub struct MonitoringController {
    config: Config,
    shared: Arc<Shared>,
    scheduler: PollScheduler,
    channel: LiveEventChannel,
    supervisor: Option<JoinHandle<()>>,
}

impl MonitoringController {
    /// Build a controller polling the HTTP backend named in `config`.
    pub fn new(config: Config) -> Result<Self, FetchError> {
        let backend = HttpBackend::new(config.backend.clone(), config.polling.fetch_timeout())?;
        // no overall timeout on the stream client: the response body is open-ended
        let stream_client = Client::builder().build()?;
        Ok(Self::with_sources(config, Sources::http(backend), stream_client))
    }

    pub fn with_sources(config: Config, sources: Sources, stream_client: Client) -> Self {
        let metrics = Arc::new(Metrics::new());
        let (cycles, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(PipelineState::new(&config)),
            metrics: Arc::clone(&metrics),
            thresholds: config.thresholds.clone(),
            cycles,
        });

        let scheduler = PollScheduler::new(
            SourceSet::new(sources, config.polling.fetch_timeout()),
            Arc::clone(&shared) as Arc<dyn PollSink>,
            Arc::clone(&metrics),
        );
        let channel = LiveEventChannel::new(
            stream_client,
            config.backend.stream_url(),
            config.backend.token.clone(),
            Arc::clone(&shared) as Arc<dyn EventSink>,
            metrics,
        );

        Self {
            config,
            shared,
            scheduler,
            channel,
            supervisor: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.shared.metrics)
    }

    /// Counter bumped after every applied poll cycle. Subscribe before
    /// `start` to observe the first one.
    pub fn cycles(&self) -> watch::Receiver<u64> {
        self.shared.cycles.subscribe()
    }

    /// Open the live channel and start polling. Returns `false` if already
    /// running.
    pub fn start(&mut self) -> bool {
        let epoch = {
            let mut state = self.shared.lock();
            if state.running {
                return false;
            }
            state.running = true;
            state.epoch += 1;
            state.epoch
        };

        self.channel.connect();
        self.scheduler.start(self.config.polling.interval(), epoch);
        self.supervisor = self.scheduler.handle().map(|handle| {
            tokio::spawn(supervise(
                self.channel.subscribe(),
                handle,
                Arc::clone(&self.shared.metrics),
                self.config.polling.interval(),
                self.config.polling.fallback_interval(),
            ))
        });
        info!("[controller] monitoring started (epoch {epoch})");
        true
    }

    /// Close the channel and stop polling. A poll already in flight completes
    /// but its result is discarded. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let was_running = {
            let mut state = self.shared.lock();
            let was_running = state.running;
            if was_running {
                state.running = false;
                state.epoch += 1;
            }
            was_running
        };

        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
        self.channel.close();
        self.scheduler.stop();
        self.shared.metrics.set_fallback_active(false);
        if was_running {
            info!("[controller] monitoring stopped");
        }
    }

    /// Poll now, outside the regular cadence, and retry the live channel if
    /// it has dropped. Returns `false` when not running.
    pub fn refresh_now(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        if self.channel.state() == ChannelState::Disconnected {
            debug!("[controller] retrying live channel");
            self.channel.connect();
        }
        self.scheduler.trigger_immediate()
    }

    pub fn view(&self) -> DashboardView {
        let state = self.shared.lock();
        DashboardView {
            running: state.running,
            channel: self.channel.state(),
            snapshots: state.snapshots.clone(),
            sources: state.statuses.clone(),
            window: state.window.snapshot(),
            recent_events: state.events.recent(RECENT_EVENTS),
            kpi: state.kpi.clone(),
            insights: state.insights.clone(),
            banner: state.banner.clone(),
            last_poll: state.last_poll,
            metrics: self.shared.metrics.snapshot(),
        }
    }
}

impl Drop for MonitoringController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Follow the channel state: poll at the fallback cadence while it is down,
/// back to normal once it reconnects.
async fn supervise(
    mut channel: watch::Receiver<ChannelState>,
    scheduler: SchedulerHandle,
    metrics: Arc<Metrics>,
    normal: Duration,
    fallback: Duration,
) {
    let mut degraded = false;
    loop {
        let state = *channel.borrow_and_update();
        match state {
            ChannelState::Connected if degraded => {
                info!("[controller] live channel back, polling every {normal:?}");
                scheduler.set_interval(normal);
                metrics.set_fallback_active(false);
                degraded = false;
            }
            ChannelState::Disconnected | ChannelState::Error if !degraded => {
                warn!("[controller] live channel down, polling every {fallback:?}");
                scheduler.set_interval(fallback);
                metrics.set_fallback_active(true);
                degraded = true;
            }
            _ => {}
        }
        if channel.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testing::ScriptedSource;
    use crate::insights::Severity;
    use crate::scheduler::tests::{healthy_sources, scripted_sources};
    use crate::types::{AnalysisRecord, EventLevel};
    use httpmock::prelude::*;

    fn config(base_url: &str, interval_ms: u64, fallback_ms: u64) -> Config {
        let mut config = Config::default();
        config.backend.base_url = base_url.to_string();
        config.polling.interval_ms = interval_ms;
        config.polling.fallback_interval_ms = fallback_ms;
        config.polling.fetch_timeout_ms = 5_000;
        config
    }

    fn controller(config: Config, sources: Sources) -> MonitoringController {
        MonitoringController::with_sources(config, sources, Client::new())
    }

    async fn wait_cycles(rx: &mut watch::Receiver<u64>, at_least: u64) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|n| *n >= at_least))
            .await
            .expect("poll cycle did not complete in time")
            .expect("controller dropped");
    }

    async fn stream_down_server() -> (MockServer, String) {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/stream");
                then.status(503);
            })
            .await;
        let base = server.base_url();
        (server, base)
    }

    fn record(id: &str, confidence: f64) -> AnalysisRecord {
        AnalysisRecord {
            id: id.to_string(),
            timestamp: Utc::now(),
            recommendation: "scale_up".to_string(),
            confidence,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_poll() {
        let sources = scripted_sources(Duration::from_secs(3), false);
        let mut ctl = controller(config("http://127.0.0.1:9", 10_000, 10_000), sources);

        assert!(ctl.start());
        tokio::time::sleep(Duration::from_secs(1)).await;
        ctl.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let view = ctl.view();
        assert!(!view.running);
        assert!(view.snapshots.is_none());
        assert!(view.window.is_empty());
        assert!(view.last_poll.is_none());
        assert_eq!(view.metrics.stale_results_discarded, 1);
    }

    #[tokio::test]
    async fn cycle_populates_view() {
        let (_server, base) = stream_down_server().await;
        let mut ctl = controller(config(&base, 60_000, 60_000), healthy_sources());
        let mut cycles = ctl.cycles();

        ctl.start();
        wait_cycles(&mut cycles, 1).await;

        let view = ctl.view();
        assert!(view.running);
        assert_eq!(view.window.len(), 1);
        assert!(view.banner.is_none());
        assert_eq!(view.sources.len(), 8);
        let snaps = view.snapshots.expect("snapshots after a cycle");
        assert_eq!(snaps.ai_engine().queue_length, 1);
        assert_eq!(view.insights.len(), 1);
        assert_eq!(view.insights[0].title, "System stable");
        assert_eq!(view.insights[0].severity, Severity::Good);
        ctl.stop();
    }

    #[tokio::test]
    async fn analysis_history_drives_confidence_kpi() {
        let (_server, base) = stream_down_server().await;
        let mut sources = healthy_sources();
        sources.analysis = Arc::new(ScriptedSource::always(
            "analysis_history",
            vec![record("a", 90.0), record("b", 50.0), record("c", 85.0)],
        ));
        let mut ctl = controller(config(&base, 60_000, 60_000), sources);
        let mut cycles = ctl.cycles();

        ctl.start();
        wait_cycles(&mut cycles, 1).await;
        assert!(ctl.refresh_now());
        wait_cycles(&mut cycles, 2).await;

        let view = ctl.view();
        let kpi = view.kpi.expect("kpi after a cycle");
        let rate = kpi.high_confidence_rate.expect("rate with records");
        assert!((rate - 2.0 / 3.0).abs() < 1e-9, "re-polled ids are not recounted");
        assert_eq!(kpi.avg_confidence_series.len(), 1);
        assert!(view.insights.iter().any(|i| i.title == "Declining confidence"));
        assert_eq!(view.snapshots.unwrap().analysis.value.total, 3);
        ctl.stop();
    }

    #[tokio::test]
    async fn stream_failure_switches_to_fallback_polling() {
        let (_server, base) = stream_down_server().await;
        let mut ctl = controller(config(&base, 60_000, 200), healthy_sources());
        let mut cycles = ctl.cycles();

        ctl.start();
        // the first cycle runs at once; later ones only come from the fallback cadence
        wait_cycles(&mut cycles, 3).await;

        let view = ctl.view();
        assert_eq!(view.channel, ChannelState::Disconnected);
        assert!(view.metrics.fallback_active);
        assert!(view.metrics.stream_errors >= 1);
        assert!(view.window.len() >= 1);
        assert!(view.last_poll.is_some());

        ctl.stop();
        assert!(!ctl.metrics().fallback_active());
    }

    #[tokio::test]
    async fn stream_dropping_mid_session_keeps_polling() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/stream");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body("data: {\"id\":\"live-1\",\"timestamp\":\"2025-01-01T00:00:00Z\",\"level\":\"warning\",\"message\":\"queue rising\",\"source\":\"engine\"}\n\n");
            })
            .await;
        let mut ctl = controller(config(&server.base_url(), 60_000, 200), healthy_sources());
        let mut cycles = ctl.cycles();

        ctl.start();
        wait_cycles(&mut cycles, 1).await;
        let first_poll = ctl.view().last_poll.expect("first cycle applied");

        // only the fallback cadence can produce cycles 2 and 3 within the timeout
        wait_cycles(&mut cycles, 3).await;
        let view = ctl.view();

        assert_eq!(view.metrics.events_received, 1, "event arrived while connected");
        assert!(view.recent_events.iter().any(|e| e.id == "live-1"));
        assert_eq!(view.metrics.stream_errors, 1);
        assert!(view.metrics.fallback_active);
        assert_eq!(view.channel, ChannelState::Disconnected);
        assert!(view.last_poll.expect("later cycles applied") > first_poll);
        assert!(view.window.len() >= 3);
        ctl.stop();
    }

    #[tokio::test]
    async fn refresh_retries_dropped_channel() {
        let server = MockServer::start_async().await;
        let stream = server
            .mock_async(|when, then| {
                when.method(GET).path("/stream");
                then.status(503);
            })
            .await;
        let mut ctl = controller(config(&server.base_url(), 60_000, 60_000), healthy_sources());
        let mut cycles = ctl.cycles();
        let mut channel = ctl.channel.subscribe();

        ctl.start();
        wait_cycles(&mut cycles, 1).await;
        tokio::time::timeout(
            Duration::from_secs(5),
            channel.wait_for(|s| *s == ChannelState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(ctl.refresh_now());
        wait_cycles(&mut cycles, 2).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while stream.hits_async().await < 2 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("channel was not retried");
        ctl.stop();
    }

    #[tokio::test]
    async fn total_outage_sets_banner() {
        let (_server, base) = stream_down_server().await;
        let sources = scripted_sources(Duration::ZERO, true);
        let mut ctl = controller(config(&base, 60_000, 60_000), sources);
        let mut cycles = ctl.cycles();

        ctl.start();
        wait_cycles(&mut cycles, 1).await;

        let view = ctl.view();
        assert_eq!(view.banner.as_deref(), Some(ALL_SOURCES_DOWN));
        assert!(view.window.is_empty(), "stale samples never enter the window");
        assert!(view.sources.iter().all(|s| s.stale));
        ctl.stop();
    }

    #[tokio::test]
    async fn start_stop_are_idempotent() {
        let (_server, base) = stream_down_server().await;
        let mut ctl = controller(config(&base, 60_000, 60_000), healthy_sources());

        ctl.stop();
        assert!(!ctl.refresh_now());
        assert!(ctl.start());
        assert!(!ctl.start());
        ctl.stop();
        ctl.stop();
        assert!(!ctl.is_running());
        assert_eq!(ctl.view().channel, ChannelState::Disconnected);

        assert!(ctl.start(), "restart after stop");
        ctl.stop();
    }

    #[tokio::test]
    async fn pushed_events_only_land_while_running() {
        let (_server, base) = stream_down_server().await;
        let mut ctl = controller(config(&base, 60_000, 60_000), healthy_sources());
        let event = |id: &str| LiveEvent {
            id: id.to_string(),
            timestamp: Utc::now(),
            level: EventLevel::Info,
            message: "tick".to_string(),
            source: "engine".to_string(),
            details: None,
        };

        ctl.shared.ingest(event("before"));
        ctl.start();
        ctl.shared.ingest(event("during"));
        ctl.shared.ingest(event("during"));
        ctl.stop();
        ctl.shared.ingest(event("after"));

        let ids: Vec<String> = ctl.view().recent_events.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["during".to_string()]);
    }
}
