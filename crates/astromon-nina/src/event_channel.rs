//! Persistent event-socket channel, one per configured instance.
//!
//! The socket task only reads: it decodes pushed event frames and applies
//! them to the shared [`InstanceState`] under its mutex, then wakes the
//! scheduler. Reconnection is *externally* driven: the task never retries on
//! its own; it records that it ended and the scheduler's periodic
//! [`EventChannel::check_reconnect`] call applies the backoff ladder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use astromon_core::prelude::*;
use astromon_core::telemetry::InstanceState;

use crate::protocol::{apply_event, parse_event, socket_url};

/// Initial reconnection delay.
const INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Reconnection delay cap.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Socket connect deadline.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Budget for acquiring the instance mutex on the socket task. Updates are
/// dropped rather than blocking the callback longer.
const LOCK_BUDGET: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// ReconnectPolicy
// ---------------------------------------------------------------------------

/// Exponential backoff ladder for reconnect attempts: 5, 10, 20, 40, 60,
/// 60, ... seconds, reset to 5 by a successful connect.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    delay: Duration,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self {
            delay: INITIAL_DELAY,
        }
    }

    /// Take the delay to wait before the next attempt and advance the ladder.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        self.delay = (self.delay * 2).min(MAX_DELAY);
        current
    }

    /// A successful connect resets the ladder.
    pub fn reset(&mut self) {
        self.delay = INITIAL_DELAY;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shared task flags
// ---------------------------------------------------------------------------

/// Flags shared between the socket task and the owning channel.
#[derive(Debug, Default)]
struct Shared {
    /// Socket is currently open.
    connected: AtomicBool,
    /// The task has exited (cleanly or not) and awaits reaping.
    task_done: AtomicBool,
    /// The finished task did establish a connection at some point.
    connect_ok: AtomicBool,
}

// ---------------------------------------------------------------------------
// EventChannel
// ---------------------------------------------------------------------------

/// One persistent event-socket connection, driven by the scheduler.
pub struct EventChannel {
    instance: usize,
    ws_url: String,
    state: Arc<Mutex<InstanceState>>,
    wake: Arc<Notify>,
    shared: Arc<Shared>,
    policy: ReconnectPolicy,
    /// `None` means an attempt is due immediately.
    next_attempt_at: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

impl EventChannel {
    /// Create a channel for `base_url` (`scheme://host[:port]/v2/api/`).
    pub fn new(
        instance: usize,
        base_url: &str,
        state: Arc<Mutex<InstanceState>>,
        wake: Arc<Notify>,
    ) -> Result<Self> {
        let ws_url = socket_url(base_url)?;
        Ok(Self::with_socket_url(instance, ws_url, state, wake))
    }

    /// Create a channel from an already-derived socket URL.
    pub fn with_socket_url(
        instance: usize,
        ws_url: String,
        state: Arc<Mutex<InstanceState>>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            instance,
            ws_url,
            state,
            wake,
            shared: Arc::new(Shared::default()),
            policy: ReconnectPolicy::new(),
            next_attempt_at: None,
            task: None,
        }
    }

    /// Socket currently open?
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Drive the reconnect state machine. Called once per scheduler cycle.
    ///
    /// Reaps a finished socket task (advancing or resetting the backoff
    /// ladder) and spawns a new connection attempt once its delay elapsed.
    pub fn check_reconnect(&mut self, now: Instant) {
        // Reap a finished task and schedule the next attempt.
        if self.task.is_some() && self.shared.task_done.load(Ordering::SeqCst) {
            self.task = None;
            if self.shared.connect_ok.swap(false, Ordering::SeqCst) {
                self.policy.reset();
            }
            let delay = self.policy.next_delay();
            self.next_attempt_at = Some(now + delay);
            debug!(
                "instance {}: event socket down, next attempt in {:?}",
                self.instance, delay
            );
        }

        if self.task.is_some() {
            return;
        }

        if let Some(at) = self.next_attempt_at {
            if now < at {
                return;
            }
        }

        self.next_attempt_at = None;
        self.spawn_task();
    }

    /// Abort the socket task, e.g. before streaming a firmware image.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.task_done.store(false, Ordering::SeqCst);
        // An aborted channel reconnects promptly once driven again.
        self.next_attempt_at = None;
    }

    fn spawn_task(&mut self) {
        self.shared.task_done.store(false, Ordering::SeqCst);
        self.shared.connect_ok.store(false, Ordering::SeqCst);

        let instance = self.instance;
        let ws_url = self.ws_url.clone();
        let state = Arc::clone(&self.state);
        let wake = Arc::clone(&self.wake);
        let shared = Arc::clone(&self.shared);

        debug!("instance {}: connecting event socket {}", instance, ws_url);
        self.task = Some(tokio::spawn(run_socket(
            instance, ws_url, state, wake, shared,
        )));
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Socket task
// ---------------------------------------------------------------------------

/// Run one socket connection to completion. Never reconnects by itself.
async fn run_socket(
    instance: usize,
    ws_url: String,
    state: Arc<Mutex<InstanceState>>,
    wake: Arc<Notify>,
    shared: Arc<Shared>,
) {
    let connect = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(ws_url.as_str())).await;
    let mut stream = match connect {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(err)) => {
            warn!("instance {}: event socket connect failed: {}", instance, err);
            shared.task_done.store(true, Ordering::SeqCst);
            return;
        }
        Err(_) => {
            warn!(
                "instance {}: event socket connect timed out after {:?}",
                instance, CONNECT_TIMEOUT
            );
            shared.task_done.store(true, Ordering::SeqCst);
            return;
        }
    };

    info!("instance {}: event socket connected", instance);
    shared.connected.store(true, Ordering::SeqCst);
    shared.connect_ok.store(true, Ordering::SeqCst);
    set_channel_flag(&state, true).await;
    wake.notify_one();

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                handle_frame(instance, text.as_str(), &state, &wake).await;
            }
            Ok(WsMessage::Close(_)) => {
                debug!("instance {}: event socket received Close", instance);
                break;
            }
            Ok(_) => {
                // Ping/Pong/Binary — ignore
            }
            Err(err) => {
                warn!("instance {}: event socket read error: {}", instance, err);
                break;
            }
        }
    }

    info!("instance {}: event socket disconnected", instance);
    shared.connected.store(false, Ordering::SeqCst);
    set_channel_flag(&state, false).await;
    shared.task_done.store(true, Ordering::SeqCst);
    wake.notify_one();
}

/// Parse one frame and apply it under the instance mutex.
async fn handle_frame(
    instance: usize,
    text: &str,
    state: &Arc<Mutex<InstanceState>>,
    wake: &Arc<Notify>,
) {
    let Some(event) = parse_event(text) else {
        debug!("instance {}: ignoring non-event frame", instance);
        return;
    };

    match tokio::time::timeout(LOCK_BUDGET, state.lock()).await {
        Ok(mut guard) => {
            if apply_event(&event, &mut guard) {
                drop(guard);
                wake.notify_one();
            }
        }
        Err(_) => {
            // Dropping one update is cheaper than stalling the socket.
            warn!(
                "instance {}: state lock busy for {:?}, dropping {:?}",
                instance, LOCK_BUDGET, event
            );
        }
    }
}

/// Mirror the socket state into the instance record, within the lock budget.
async fn set_channel_flag(state: &Arc<Mutex<InstanceState>>, connected: bool) {
    if let Ok(mut guard) = tokio::time::timeout(LOCK_BUDGET, state.lock()).await {
        guard.event_channel_connected = connected;
        guard.ui_refresh_needed = true;
    }
}
