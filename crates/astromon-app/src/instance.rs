//! Per-instance handle: the state record, poll bookkeeping, connection
//! health, and the event channel, bundled the way the scheduler drives them.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Notify};

use astromon_core::prelude::*;
use astromon_core::telemetry::InstanceState;
use astromon_nina::endpoints::ProfileInfo;
use astromon_nina::event_channel::EventChannel;
use astromon_nina::http::PollClient;

use crate::connection::ConnectionManager;

/// Poll bookkeeping kept beside the instance state.
///
/// Owned exclusively by the scheduler; nothing here is shared.
#[derive(Default)]
pub struct PollState {
    pub last_slow_poll: Option<Instant>,
    pub last_sequence_poll: Option<Instant>,
    /// Last camera heartbeat of either tier; drives the 10 s background
    /// pre-fetch cadence.
    pub last_heartbeat: Option<Instant>,
    pub static_fetched: bool,
    /// Cached static fields, restored into the state on every full poll.
    pub profile: ProfileInfo,
    pub filters: Vec<String>,
    /// Filter sync runs once per instance lifetime, on the first successful
    /// fetch with a non-empty filter list.
    pub filters_synced: bool,
    /// Keep-alive HTTP handle reused across poll cycles.
    pub http: Option<PollClient>,
}

impl PollState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset on detected disconnection: drop the keep-alive handle and the
    /// static cache so the next success re-fetches everything. The
    /// once-per-lifetime filter sync survives.
    pub fn reset(&mut self) {
        self.last_slow_poll = None;
        self.last_sequence_poll = None;
        self.static_fetched = false;
        self.profile = ProfileInfo::default();
        self.filters.clear();
        self.http = None;
    }
}

/// One configured remote instance.
pub struct Instance {
    pub index: usize,
    pub base_url: String,
    /// Shared with the event channel and (read-only) with the renderer.
    pub state: Arc<Mutex<InstanceState>>,
    pub poll: PollState,
    pub connection: ConnectionManager,
    /// Present only while the instance has a usable base URL.
    pub channel: Option<EventChannel>,
}

impl Instance {
    /// Build an instance slot. `base_url` may be empty (unconfigured slot).
    pub fn new(index: usize, base_url: &str, wake: Arc<Notify>) -> Self {
        let state = Arc::new(Mutex::new(InstanceState::new()));
        let channel = make_channel(index, base_url, &state, &wake);
        Self {
            index,
            base_url: base_url.to_string(),
            state,
            poll: PollState::new(),
            connection: ConnectionManager::new(),
            channel,
        }
    }

    /// Whether this slot currently polls anything.
    pub fn configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    /// React to a settings change: on a new base URL, drop every piece of
    /// per-server state and rebuild the event channel.
    pub fn set_base_url(&mut self, base_url: &str, wake: &Arc<Notify>) {
        if self.base_url == base_url {
            return;
        }
        info!(
            "instance {}: base URL changed ({} -> {})",
            self.index,
            if self.base_url.is_empty() { "unset" } else { &self.base_url },
            if base_url.is_empty() { "unset" } else { base_url },
        );
        if let Some(channel) = self.channel.as_mut() {
            channel.shutdown();
        }
        self.base_url = base_url.to_string();
        self.poll.reset();
        self.poll.filters_synced = false;
        self.connection = ConnectionManager::new();
        self.channel = make_channel(self.index, base_url, &self.state, wake);
    }
}

fn make_channel(
    index: usize,
    base_url: &str,
    state: &Arc<Mutex<InstanceState>>,
    wake: &Arc<Notify>,
) -> Option<EventChannel> {
    if base_url.is_empty() {
        return None;
    }
    match EventChannel::new(index, base_url, Arc::clone(state), Arc::clone(wake)) {
        Ok(channel) => Some(channel),
        Err(err) => {
            warn!("instance {}: no event channel: {}", index, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_slot_has_no_channel() {
        let instance = Instance::new(0, "", Arc::new(Notify::new()));
        assert!(!instance.configured());
        assert!(instance.channel.is_none());
    }

    #[test]
    fn test_configured_slot_gets_channel() {
        let instance = Instance::new(0, "http://scope:1888/v2/api/", Arc::new(Notify::new()));
        assert!(instance.configured());
        assert!(instance.channel.is_some());
    }

    #[test]
    fn test_poll_state_reset_preserves_sync_marker() {
        let mut poll = PollState::new();
        poll.static_fetched = true;
        poll.filters = vec!["L".to_string()];
        poll.filters_synced = true;
        poll.last_slow_poll = Some(Instant::now());
        poll.http = Some(PollClient::keepalive());

        poll.reset();
        assert!(!poll.static_fetched);
        assert!(poll.filters.is_empty());
        assert!(poll.last_slow_poll.is_none());
        assert!(poll.http.is_none());
        assert!(poll.filters_synced, "sync is once per lifetime");
    }

    #[tokio::test]
    async fn test_set_base_url_rebuilds() {
        let wake = Arc::new(Notify::new());
        let mut instance = Instance::new(1, "http://a:1888/v2/api/", Arc::clone(&wake));
        instance.poll.static_fetched = true;
        instance.poll.filters_synced = true;
        instance.connection.report_success(Instant::now());

        instance.set_base_url("http://b:1888/v2/api/", &wake);
        assert_eq!(instance.base_url, "http://b:1888/v2/api/");
        assert!(!instance.poll.static_fetched);
        assert!(!instance.poll.filters_synced, "new server, sync again");
        assert!(!instance.connection.is_connected());
        assert!(instance.channel.is_some());

        instance.set_base_url("", &wake);
        assert!(instance.channel.is_none());
    }

    #[tokio::test]
    async fn test_set_same_url_is_noop() {
        let wake = Arc::new(Notify::new());
        let mut instance = Instance::new(0, "http://a:1888/v2/api/", Arc::clone(&wake));
        instance.poll.static_fetched = true;
        instance.set_base_url("http://a:1888/v2/api/", &wake);
        assert!(instance.poll.static_fetched);
    }
}
