//! Fixed-interval fan-out over every metric source.

use crate::collectors::{SourceAdapter, Sources};
use crate::metrics::Metrics;
use crate::types::{
    AnalysisRecord, DbHealth, LiveEvent, ProcessReport, PromptStats, ResourceSample,
    SecurityScore, Snapshot, SourceStatus, UptimeStats,
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Result of one joined poll cycle. Every field is populated; failed sources
/// carry stale values.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub resources: Snapshot<ResourceSample>,
    pub processes: Snapshot<ProcessReport>,
    pub uptime: Snapshot<UptimeStats>,
    pub database: Snapshot<DbHealth>,
    pub analysis: Snapshot<Vec<AnalysisRecord>>,
    pub prompts: Snapshot<PromptStats>,
    pub security: Snapshot<SecurityScore>,
    pub logs: Snapshot<Vec<LiveEvent>>,
    pub statuses: Vec<SourceStatus>,
    pub completed_at: DateTime<Utc>,
}

impl PollOutcome {
    pub fn failed_sources(&self) -> usize {
        self.statuses.iter().filter(|s| s.stale).count()
    }

    pub fn all_failed(&self) -> bool {
        !self.statuses.is_empty() && self.statuses.iter().all(|s| s.stale)
    }
}

/// Adapters for every source, polled together.
pub struct SourceSet {
    resources: SourceAdapter<ResourceSample>,
    processes: SourceAdapter<ProcessReport>,
    uptime: SourceAdapter<UptimeStats>,
    database: SourceAdapter<DbHealth>,
    analysis: SourceAdapter<Vec<AnalysisRecord>>,
    prompts: SourceAdapter<PromptStats>,
    security: SourceAdapter<SecurityScore>,
    logs: SourceAdapter<Vec<LiveEvent>>,
}

impl SourceSet {
    pub fn new(sources: Sources, timeout: Duration) -> Self {
        Self {
            resources: SourceAdapter::new(sources.resources, timeout),
            processes: SourceAdapter::new(sources.processes, timeout),
            uptime: SourceAdapter::new(sources.uptime, timeout),
            database: SourceAdapter::new(sources.database, timeout),
            analysis: SourceAdapter::new(sources.analysis, timeout),
            prompts: SourceAdapter::new(sources.prompts, timeout),
            security: SourceAdapter::new(sources.security, timeout),
            logs: SourceAdapter::new(sources.logs, timeout),
        }
    }

    /// Poll every adapter concurrently and wait for all of them. One slow or
    /// failing adapter only affects its own field.
    pub async fn poll_all(&mut self) -> PollOutcome {
        let (resources, processes, uptime, database, analysis, prompts, security, logs) = tokio::join!(
            self.resources.poll(),
            self.processes.poll(),
            self.uptime.poll(),
            self.database.poll(),
            self.analysis.poll(),
            self.prompts.poll(),
            self.security.poll(),
            self.logs.poll(),
        );

        let statuses = vec![
            self.resources.status(),
            self.processes.status(),
            self.uptime.status(),
            self.database.status(),
            self.analysis.status(),
            self.prompts.status(),
            self.security.status(),
            self.logs.status(),
        ];

        PollOutcome {
            resources,
            processes,
            uptime,
            database,
            analysis,
            prompts,
            security,
            logs,
            statuses,
            completed_at: Utc::now(),
        }
    }
}

/// Receives joined poll results. The run epoch lets the receiver reject
/// results that belong to a run that has since been stopped.
pub trait PollSink: Send + Sync + 'static {
    fn apply(&self, epoch: u64, outcome: PollOutcome);
}

#[derive(Debug)]
enum Command {
    PollNow,
    SetInterval(Duration),
}

/// Cloneable control handle for a running scheduler task.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    pub fn poll_now(&self) -> bool {
        self.commands.send(Command::PollNow).is_ok()
    }

    pub fn set_interval(&self, interval: Duration) -> bool {
        self.commands.send(Command::SetInterval(interval)).is_ok()
    }
}

struct Worker {
    handle: SchedulerHandle,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct PollScheduler {
    sources: Arc<Mutex<SourceSet>>,
    sink: Arc<dyn PollSink>,
    metrics: Arc<Metrics>,
    worker: Option<Worker>,
}

impl PollScheduler {
    pub fn new(sources: SourceSet, sink: Arc<dyn PollSink>, metrics: Arc<Metrics>) -> Self {
        Self {
            sources: Arc::new(Mutex::new(sources)),
            sink,
            metrics,
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.task.is_finished())
    }

    /// Spawn the periodic task. The first cycle runs immediately. Returns
    /// `false` (and does nothing) if already running.
    pub fn start(&mut self, interval: Duration, epoch: u64) -> bool {
        if self.is_running() {
            return false;
        }
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_worker(
            Arc::clone(&self.sources),
            Arc::clone(&self.sink),
            Arc::clone(&self.metrics),
            interval,
            epoch,
            commands_rx,
            shutdown_rx,
        ));
        info!("[poll] started, interval {interval:?}");
        self.worker = Some(Worker {
            handle: SchedulerHandle {
                commands: commands_tx,
            },
            shutdown: shutdown_tx,
            task,
        });
        true
    }

    /// Stop the periodic task. No tick fires after this returns; a cycle
    /// already in flight finishes but its epoch is stale by then.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(true);
            info!("[poll] stopped");
        }
    }

    pub fn trigger_immediate(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.handle.poll_now())
    }

    pub fn set_interval(&self, interval: Duration) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| w.handle.set_interval(interval))
    }

    pub fn handle(&self) -> Option<SchedulerHandle> {
        self.worker.as_ref().map(|w| w.handle.clone())
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_worker(
    sources: Arc<Mutex<SourceSet>>,
    sink: Arc<dyn PollSink>,
    metrics: Arc<Metrics>,
    interval: Duration,
    epoch: u64,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut period = interval;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            cmd = commands.recv() => match cmd {
                Some(Command::PollNow) => {
                    debug!("[poll] manual refresh");
                    run_cycle(&sources, sink.as_ref(), &metrics, epoch).await;
                }
                Some(Command::SetInterval(next)) => {
                    if next != period && !next.is_zero() {
                        info!("[poll] interval {period:?} -> {next:?}");
                        period = next;
                        ticker = tokio::time::interval_at(Instant::now() + next, next);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                run_cycle(&sources, sink.as_ref(), &metrics, epoch).await;
            }
        }
    }
    debug!("[poll] worker exited");
}

async fn run_cycle(sources: &Mutex<SourceSet>, sink: &dyn PollSink, metrics: &Metrics, epoch: u64) {
    let outcome = sources.lock().await.poll_all().await;
    metrics.inc_polls();

    let failed = outcome.failed_sources();
    if failed > 0 {
        metrics.add_fetch_failures(failed as u64);
        if outcome.all_failed() {
            warn!("[poll] every source failed this cycle");
        } else {
            debug!("[poll] {failed} source(s) stale this cycle");
        }
    }
    sink.apply(epoch, outcome);
}
