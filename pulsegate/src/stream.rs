//! Server-push channel for live events.
//!
//! The channel never reconnects on its own. When the stream errors or the
//! server closes it, the channel moves to `Disconnected` and whoever watches
//! its state (the controller) compensates by polling faster until a later
//! explicit `connect` succeeds.

use crate::error::StreamError;
use crate::metrics::Metrics;
use crate::types::LiveEvent;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Receives events decoded from the stream.
pub trait EventSink: Send + Sync + 'static {
    fn ingest(&self, event: LiveEvent);
}

struct Shared {
    state: watch::Sender<ChannelState>,
    /// Bumped on every connect and close; a stream task only touches state
    /// while its session is current.
    session: AtomicU64,
    sink: Arc<dyn EventSink>,
    metrics: Arc<Metrics>,
}

impl Shared {
    fn transition(&self, session: u64, next: ChannelState) -> bool {
        self.state.send_if_modified(|current| {
            if self.session.load(Ordering::SeqCst) != session || *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.load(Ordering::SeqCst) == session
    }
}

pub struct LiveEventChannel {
    client: Client,
    url: String,
    token: Option<String>,
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl LiveEventChannel {
    pub fn new(
        client: Client,
        url: String,
        token: Option<String>,
        sink: Arc<dyn EventSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            client,
            url,
            token,
            shared: Arc::new(Shared {
                state,
                session: AtomicU64::new(0),
                sink,
                metrics,
            }),
            task: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Open the stream. Only valid from `Disconnected`; returns `false`
    /// otherwise.
    pub fn connect(&mut self) -> bool {
        let mut session = 0;
        let started = self.shared.state.send_if_modified(|current| {
            if *current != ChannelState::Disconnected {
                return false;
            }
            session = self.shared.session.fetch_add(1, Ordering::SeqCst) + 1;
            *current = ChannelState::Connecting;
            true
        });
        if !started {
            return false;
        }

        if let Some(old) = self.task.take() {
            old.abort();
        }
        info!("[stream] connecting to {}", self.url);
        self.task = Some(tokio::spawn(run_stream(
            self.client.clone(),
            self.url.clone(),
            self.token.clone(),
            Arc::clone(&self.shared),
            session,
        )));
        true
    }

    /// Close the stream (if open) and return to `Disconnected`. Idempotent.
    pub fn close(&mut self) {
        self.shared.state.send_modify(|current| {
            self.shared.session.fetch_add(1, Ordering::SeqCst);
            *current = ChannelState::Disconnected;
        });
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("[stream] closed");
        }
    }
}

impl Drop for LiveEventChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_stream(
    client: Client,
    url: String,
    token: Option<String>,
    shared: Arc<Shared>,
    session: u64,
) {
    let err = match consume(&client, &url, token.as_deref(), &shared, session).await {
        Ok(()) => StreamError::Closed,
        Err(err) => err,
    };
    if !shared.is_current(session) {
        return;
    }
    shared.metrics.inc_stream_errors();
    warn!("[stream] {err}; falling back to polling");
    shared.transition(session, ChannelState::Error);
    shared.transition(session, ChannelState::Disconnected);
}

async fn consume(
    client: &Client,
    url: &str,
    token: Option<&str>,
    shared: &Shared,
    session: u64,
) -> Result<(), StreamError> {
    let mut request = client.get(url).header("accept", "text/event-stream");
    if let Some(token) = token {
        request = request.query(&[("token", token)]);
    }
    let resp = request.send().await?;
    if !resp.status().is_success() {
        return Err(StreamError::Status(resp.status().as_u16()));
    }

    if !shared.transition(session, ChannelState::Connected) {
        return Ok(());
    }
    info!("[stream] connected");

    let mut events = resp.bytes_stream().eventsource();
    while let Some(item) = events.next().await {
        let event = item.map_err(|e| StreamError::Interrupted(e.to_string()))?;
        if event.data.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LiveEvent>(&event.data) {
            Ok(live) => {
                if !shared.is_current(session) {
                    return Ok(());
                }
                shared.metrics.inc_events_received();
                shared.sink.ingest(live);
            }
            Err(err) => {
                shared.metrics.inc_events_malformed();
                debug!("[stream] skipping malformed event: {err}");
            }
        }
    }
    Ok(())
}
