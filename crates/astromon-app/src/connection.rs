//! Per-instance connection-health state machine.
//!
//! Poll outcomes feed [`ConnectionManager::report_success`] /
//! [`report_failure`](ConnectionManager::report_failure); the machine decides
//! when sustained failure becomes a user-visible "disconnected" page. The
//! timeout is time-based on purpose: one lost request must never flip a page
//! offline, only a sustained absence of successes does.

use std::time::{Duration, Instant};

/// Connection state of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
    /// Nothing reported yet.
    #[default]
    Unknown,
    /// A connection attempt was registered but no outcome arrived yet.
    Connecting,
    Connected,
    Disconnected,
}

/// Health bookkeeping for one instance.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    state: ConnState,
    last_state_change: Option<Instant>,
    last_connected: Option<Instant>,
    consecutive_successes: u32,
    consecutive_failures: u32,
    static_data_ready: bool,
    event_channel_connected: bool,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    pub fn last_connected(&self) -> Option<Instant> {
        self.last_connected
    }

    pub fn last_state_change(&self) -> Option<Instant> {
        self.last_state_change
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Static (slow-changing) fields have been fetched and cached.
    pub fn static_data_ready(&self) -> bool {
        self.static_data_ready
    }

    pub fn set_static_data_ready(&mut self, ready: bool) {
        self.static_data_ready = ready;
    }

    /// Tracked for display only; never influences the state machine.
    pub fn event_channel_connected(&self) -> bool {
        self.event_channel_connected
    }

    pub fn set_event_channel_connected(&mut self, connected: bool) {
        self.event_channel_connected = connected;
    }

    /// A connection attempt is starting (only meaningful from `Unknown`).
    pub fn register_attempt(&mut self, now: Instant) {
        if self.state == ConnState::Unknown {
            self.transition(ConnState::Connecting, now);
        }
    }

    /// A poll round-trip succeeded.
    pub fn report_success(&mut self, now: Instant) {
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
        self.last_connected = Some(now);
        if self.state != ConnState::Connected {
            self.transition(ConnState::Connected, now);
        }
    }

    /// A poll round-trip failed. `timeout` is the configured grace period.
    pub fn report_failure(&mut self, now: Instant, timeout: Duration) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;

        match self.state {
            ConnState::Unknown | ConnState::Connecting => {
                self.transition(ConnState::Disconnected, now);
            }
            ConnState::Connected => {
                let expired = self
                    .last_connected
                    .map(|at| now.duration_since(at) >= timeout)
                    .unwrap_or(true);
                if expired {
                    self.static_data_ready = false;
                    self.transition(ConnState::Disconnected, now);
                }
                // Within the grace period the single failure stays hidden.
            }
            ConnState::Disconnected => {
                self.static_data_ready = false;
            }
        }
    }

    fn transition(&mut self, next: ConnState, now: Instant) {
        if self.state != next {
            self.state = next;
            self.last_state_change = Some(now);
        }
    }
}
