//! Push-channel plumbing for live updates.
//!
//! One conversation view owns at most one subscription. The
//! subscription task runs a connect / read / backoff loop with a
//! cancellation flag checked before every retry, so no reconnect timer
//! outlives the view that opened it. Malformed SSE payloads are logged
//! and dropped; the stream continues.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::model::{Message, StreamEvent};

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Lifecycle of a push-channel connection, per conversation view:
/// `Closed → Connecting → Open → (Error → Connecting) | Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Connecting,
    Open,
    /// Transport failed; the loop will reconnect after the backoff.
    Error,
}

// ---------------------------------------------------------------------------
// SSE event parsing
// ---------------------------------------------------------------------------

/// Incremental parser for an SSE byte stream.
///
/// Chunks arrive with no alignment to event or even character
/// boundaries, so raw bytes are buffered and decoded only once a full
/// line is available — a multibyte character split across two chunks
/// must survive intact. Only `data:` lines carry payloads; comment and
/// event-name lines are ignored.
#[derive(Debug, Default)]
pub struct EventParser {
    buffer: Vec<u8>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every complete event it unlocked.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(&self.buffer[..line_end]).trim().to_string();
            self.buffer.drain(..=line_end);

            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            match serde_json::from_str::<StreamEvent>(payload.trim()) {
                Ok(event) => events.push(event),
                Err(e) => {
                    // Malformed payloads are dropped, never fatal.
                    warn!(error = %e, payload = payload.trim(), "dropping undecodable stream event");
                }
            }
        }

        events
    }
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

/// Owner-side handle for a running subscription task.
///
/// Dropping the handle aborts the task; [`close`](Self::close) shuts it
/// down cooperatively and waits for it to finish.
pub struct StreamHandle {
    cancel: watch::Sender<bool>,
    state_rx: watch::Receiver<StreamState>,
    attempts: Arc<AtomicU32>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Current connection state.
    pub fn state(&self) -> StreamState {
        *self.state_rx.borrow()
    }

    /// How many connection attempts the task has made so far. Each pass
    /// through `Connecting` counts once, including reconnects.
    pub fn connect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Cooperatively stop the task and wait for it to exit. The state
    /// ends at `Closed` and no further reconnect is attempted.
    pub async fn close(mut self) {
        let _ = self.cancel.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let _ = self.cancel.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// SSE subscription
// ---------------------------------------------------------------------------

/// Subscribe to the SSE feed for `conv_key`.
///
/// Events are delivered through the returned receiver. On transport
/// error or server EOF the connection is closed and reopened after the
/// fixed `backoff` — unconditionally and without limit, until the
/// handle is closed.
pub fn subscribe(
    api: ApiClient,
    conv_key: impl Into<String>,
    backoff: Duration,
) -> (StreamHandle, mpsc::UnboundedReceiver<StreamEvent>) {
    let conv_key = conv_key.into();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(StreamState::Closed);
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_task = Arc::clone(&attempts);

    let task = tokio::spawn(async move {
        run_sse_loop(api, conv_key, backoff, event_tx, cancel_rx, state_tx, attempts_task).await;
    });

    (
        StreamHandle { cancel: cancel_tx, state_rx, attempts, task: Some(task) },
        event_rx,
    )
}

async fn run_sse_loop(
    api: ApiClient,
    conv_key: String,
    backoff: Duration,
    event_tx: mpsc::UnboundedSender<StreamEvent>,
    mut cancel_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<StreamState>,
    attempts: Arc<AtomicU32>,
) {
    loop {
        if *cancel_rx.borrow() {
            break;
        }

        let _ = state_tx.send(StreamState::Connecting);
        attempts.fetch_add(1, Ordering::Relaxed);

        match api.open_message_stream(&conv_key).await {
            Ok(resp) => {
                let _ = state_tx.send(StreamState::Open);
                debug!(conv_key = %conv_key, "message stream open");
                read_stream(resp, &event_tx, &mut cancel_rx).await;
                if *cancel_rx.borrow() {
                    break;
                }
                let _ = state_tx.send(StreamState::Error);
                warn!(conv_key = %conv_key, backoff_secs = backoff.as_secs(), "stream dropped, reconnecting");
            }
            Err(e) => {
                let _ = state_tx.send(StreamState::Error);
                warn!(conv_key = %conv_key, error = %e, backoff_secs = backoff.as_secs(), "stream connect failed, retrying");
            }
        }

        // Fixed backoff, interruptible by the cancellation flag.
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = cancel_rx.changed() => {}
        }
    }

    let _ = state_tx.send(StreamState::Closed);
}

/// Drain one open response until EOF, transport error, cancellation, or
/// the receiver going away.
async fn read_stream(
    resp: reqwest::Response,
    event_tx: &mpsc::UnboundedSender<StreamEvent>,
    cancel_rx: &mut watch::Receiver<bool>,
) {
    let mut parser = EventParser::new();
    let mut body = resp.bytes_stream();

    loop {
        let chunk = tokio::select! {
            chunk = body.next() => chunk,
            _ = cancel_rx.changed() => return,
        };
        let Some(chunk) = chunk else {
            return; // server closed the stream
        };
        let Ok(chunk) = chunk else {
            return; // transport error, caller reconnects
        };
        for event in parser.push(&chunk) {
            if event_tx.send(event).is_err() {
                return; // view went away
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Poll fallback
// ---------------------------------------------------------------------------

/// Subscribe by timed polling instead of SSE, producing the same
/// `init`-then-`new` event feed.
///
/// The first successful fetch is emitted as a full snapshot; later
/// fetches emit only the tail beyond the last seen length. Failed polls
/// are soft errors — the tick is skipped and the next one tries again.
pub fn poll(
    api: ApiClient,
    conv_key: impl Into<String>,
    interval: Duration,
) -> (StreamHandle, mpsc::UnboundedReceiver<StreamEvent>) {
    let conv_key = conv_key.into();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(StreamState::Closed);
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_task = Arc::clone(&attempts);

    let task = tokio::spawn(async move {
        run_poll_loop(api, conv_key, interval, event_tx, cancel_rx, state_tx, attempts_task).await;
    });

    (
        StreamHandle { cancel: cancel_tx, state_rx, attempts, task: Some(task) },
        event_rx,
    )
}

async fn run_poll_loop(
    api: ApiClient,
    conv_key: String,
    interval: Duration,
    event_tx: mpsc::UnboundedSender<StreamEvent>,
    mut cancel_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<StreamState>,
    attempts: Arc<AtomicU32>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let _ = state_tx.send(StreamState::Connecting);
    attempts.fetch_add(1, Ordering::Relaxed);
    let mut seen_len: Option<usize> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel_rx.changed() => break,
        }
        if *cancel_rx.borrow() {
            break;
        }

        match api.get_messages(&conv_key).await {
            Ok(messages) => {
                let _ = state_tx.send(StreamState::Open);
                let event = match seen_len {
                    None => {
                        seen_len = Some(messages.len());
                        Some(StreamEvent::Init { messages })
                    }
                    Some(len) if messages.len() > len => {
                        let tail: Vec<Message> = messages[len..].to_vec();
                        seen_len = Some(messages.len());
                        Some(StreamEvent::New { messages: tail })
                    }
                    Some(_) => None,
                };
                if let Some(event) = event {
                    if event_tx.send(event).is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!(conv_key = %conv_key, error = %e, "poll failed, will retry next tick");
            }
        }
    }

    let _ = state_tx.send(StreamState::Closed);
}
