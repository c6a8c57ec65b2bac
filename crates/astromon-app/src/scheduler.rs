//! The cooperative polling scheduler.
//!
//! One task, one loop: every cycle it classifies the active page, runs the
//! tiered REST polls for each configured instance (full-rate for the page
//! the user is looking at, 10-second pre-fetch for the rest), drives the
//! event-channel reconnects, fixes up derived fields, and signals the UI.
//! The scheduler is the sole writer of most instance fields; the event
//! channel writes only its documented subset.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::{watch, Notify};

use astromon_core::prelude::*;
use astromon_core::telemetry::{status, InstanceState};
use astromon_nina::endpoints::{
    self, apply_camera_info, apply_guider_info, parse_filter_names, parse_profile, paths,
    EVENT_FALLBACK_TIER, SLOW_TIER,
};
use astromon_nina::http::{endpoint_url, PollClient};
use astromon_nina::sequence::{walk_sequence, SequenceSummary};

use crate::instance::Instance;
use crate::settings::types::{Settings, MAX_INSTANCES};
use crate::settings::SettingsStore;
use crate::ui::{next_rotation_page, Page, UiLink, WifiLink};

/// Background pre-fetch cadence for pages the user is not viewing.
const BACKGROUND_PREFETCH_INTERVAL: Duration = Duration::from_secs(10);

/// Cadence of the slow-changing endpoint tier on the active instance.
const SLOW_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Cadence of the sequence-tree walk on the active instance.
const SEQUENCE_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Thumbnail request parameters for the round display.
const THUMBNAIL_SIZE: u32 = 480;
const THUMBNAIL_QUALITY: u8 = 80;

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    last.map(|at| now.duration_since(at) >= interval).unwrap_or(true)
}

/// GET one endpoint, flagging transport/5xx failures so the caller can
/// invalidate the keep-alive handle.
async fn fetch(
    client: &PollClient,
    base: &str,
    path: &str,
    hard_fail: &mut bool,
) -> Option<Value> {
    match client.get_json(&endpoint_url(base, path)).await {
        Ok(value) => Some(value),
        Err(err) => {
            if err.is_retryable() {
                *hard_fail = true;
            }
            warn!("poll {} failed: {}", path, err);
            None
        }
    }
}

/// Copy a sequence-walk result into the state record.
///
/// Runs before the exposure fix-up, so a live exposure's `MM:SS` overwrites
/// the condition-derived `H:MM` string when both exist.
fn apply_sequence_summary(summary: &SequenceSummary, state: &mut InstanceState) {
    state.status = if summary.running {
        status::RUNNING.to_string()
    } else {
        status::FINISHED.to_string()
    };
    state.container_name = summary.container_name.clone();
    state.step_name = summary.step_name.clone();
    if !summary.target_name.is_empty() {
        state.target_name = summary.target_name.clone();
    }
    if let Some(smart) = summary.smart_exposure {
        state.iterations_completed = smart.completed_iterations;
        state.iterations_total = smart.iterations;
        if smart.exposure_time > 0.0 {
            state.exposure_total = smart.exposure_time;
        }
    }
    if let Some(condition) = &summary.condition {
        state.time_remaining = condition.formatted();
    }
}

/// The single cooperative poll loop.
pub struct PollingScheduler {
    store: Arc<SettingsStore>,
    ui: Arc<dyn UiLink>,
    wifi: Arc<dyn WifiLink>,
    instances: Vec<Instance>,
    wake: Arc<Notify>,
    shutdown_rx: watch::Receiver<bool>,
    next_rotation_at: Option<Instant>,
    wifi_signal: Option<i8>,
}

impl PollingScheduler {
    pub fn new(
        store: Arc<SettingsStore>,
        ui: Arc<dyn UiLink>,
        wifi: Arc<dyn WifiLink>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        let cfg = store.snapshot();
        let instances = (0..MAX_INSTANCES)
            .map(|i| Instance::new(i, cfg.instance_url(i).unwrap_or(""), Arc::clone(&wake)))
            .collect();
        Self {
            store,
            ui,
            wifi,
            instances,
            wake,
            shutdown_rx,
            next_rotation_at: None,
            wifi_signal: None,
        }
    }

    /// Handle the event channels notify to shorten one cadence sleep.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Last WiFi signal reading, for the sysinfo page.
    pub fn wifi_signal(&self) -> Option<i8> {
        self.wifi_signal
    }

    /// Shared state handle of instance `i`, for external readers (MQTT).
    pub fn instance_state(&self, i: usize) -> Option<Arc<tokio::sync::Mutex<InstanceState>>> {
        self.instances.get(i).map(|inst| Arc::clone(&inst.state))
    }

    /// Run until shutdown.
    pub async fn run(mut self) {
        info!("polling scheduler started");
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            self.poll_cycle().await;

            let cadence =
                Duration::from_secs(self.store.snapshot().ui.update_rate_s.max(1) as u64);
            let wake = Arc::clone(&self.wake);
            tokio::select! {
                _ = tokio::time::sleep(cadence) => {}
                _ = wake.notified() => {
                    trace!("scheduler woken early by event channel");
                }
                _ = self.shutdown_rx.changed() => break,
            }
        }
        info!("polling scheduler stopped");
    }

    /// One iteration of the cooperative loop.
    pub async fn poll_cycle(&mut self) {
        let cfg = self.store.snapshot();
        let now = Instant::now();

        self.sync_instances(&cfg);

        let instance_count = cfg.instance_count();
        let page = self.ui.active_page();
        let rotate_interval = Duration::from_secs(cfg.ui.auto_rotate.interval_s as u64);

        // A manual page change restarts the rotation clock.
        if self.ui.take_page_changed() {
            self.next_rotation_at = Some(now + rotate_interval);
        }

        if cfg.ui.auto_rotate.enabled {
            let deadline = *self.next_rotation_at.get_or_insert(now + rotate_interval);
            if now >= deadline {
                let connected: Vec<bool> = self
                    .instances
                    .iter()
                    .map(|inst| inst.connection.is_connected())
                    .collect();
                if let Some(next) = next_rotation_page(
                    page,
                    instance_count,
                    cfg.ui.auto_rotate.pages,
                    cfg.ui.auto_rotate.skip_disconnected,
                    &connected,
                ) {
                    debug!("auto-rotate: {:?} -> {:?}", page, next);
                    self.ui.animate_to(next);
                }
                self.next_rotation_at = Some(now + rotate_interval);
            }
        } else {
            self.next_rotation_at = None;
        }

        self.wifi_signal = self.wifi.signal_strength();

        let timeout = Duration::from_secs(cfg.ui.connection_timeout_s as u64);
        for idx in 0..self.instances.len() {
            if !self.instances[idx].configured() {
                continue;
            }

            let active = page == Page::Summary || page == Page::Nina(idx);
            if active {
                self.full_poll(idx, now, timeout).await;
            } else if due(
                self.instances[idx].poll.last_heartbeat,
                BACKGROUND_PREFETCH_INTERVAL,
                now,
            ) {
                self.background_prefetch(idx, now, timeout).await;
            }

            let inst = &mut self.instances[idx];

            // One-time filter sync, once a poll produced a filter list.
            if !inst.poll.filters_synced && !inst.poll.filters.is_empty() {
                self.store.sync_filters(idx, &inst.poll.filters);
                inst.poll.filters_synced = true;
            }

            let channel_up = inst
                .channel
                .as_ref()
                .map(|c| c.is_connected())
                .unwrap_or(false);
            inst.connection.set_event_channel_connected(channel_up);
            if let Some(channel) = inst.channel.as_mut() {
                channel.check_reconnect(Instant::now());
            }
        }

        self.repaint(page).await;
        self.service_thumbnail(page).await;
    }

    /// Apply any settings change to the instance slots.
    fn sync_instances(&mut self, cfg: &Settings) {
        for idx in 0..self.instances.len() {
            let url = cfg.instance_url(idx).unwrap_or("").to_string();
            let wake = Arc::clone(&self.wake);
            self.instances[idx].set_base_url(&url, &wake);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Full poll (active page)
    // ─────────────────────────────────────────────────────────────

    async fn full_poll(&mut self, idx: usize, now: Instant, timeout: Duration) {
        let base = self.instances[idx].base_url.clone();
        let client = self.instances[idx]
            .poll
            .http
            .take()
            .unwrap_or_else(PollClient::keepalive);
        let mut hard_fail = false;

        // Heartbeat. Everything else is skipped when the camera endpoint
        // is unreachable.
        let Some(camera) = fetch(&client, &base, paths::CAMERA_INFO, &mut hard_fail).await else {
            let inst = &mut self.instances[idx];
            inst.connection.report_failure(now, timeout);
            inst.poll.static_fetched = false;
            if !inst.connection.is_connected() {
                inst.poll.reset();
            }
            let mut state = inst.state.lock().await;
            state.connected = false;
            state.ui_refresh_needed = true;
            return;
        };

        {
            let inst = &mut self.instances[idx];
            inst.connection.report_success(now);
            inst.poll.last_heartbeat = Some(now);
            let mut state = inst.state.lock().await;
            apply_camera_info(&camera, &mut state);
            state.connected = true;
        }

        if !self.instances[idx].poll.static_fetched {
            self.fetch_static_tier(idx, &base, &client, now, &mut hard_fail)
                .await;
        } else {
            // Warm path: restore the cached static fields.
            let inst = &self.instances[idx];
            let mut state = inst.state.lock().await;
            state.profile_name = inst.poll.profile.profile_name.clone();
            if !inst.poll.profile.telescope_name.is_empty() {
                state.telescope_name = inst.poll.profile.telescope_name.clone();
            }
            state.set_filters(inst.poll.filters.iter().cloned());
        }

        // Volatile tier: guider RMS changes every frame.
        if let Some(guider) = fetch(&client, &base, paths::GUIDER_INFO, &mut hard_fail).await {
            let mut state = self.instances[idx].state.lock().await;
            apply_guider_info(&guider, &mut state);
        }

        // Event-gated tier: these fields arrive over the socket when it is
        // up; poll them only as a fallback.
        let channel_up = self.instances[idx]
            .channel
            .as_ref()
            .map(|c| c.is_connected())
            .unwrap_or(false);
        if !channel_up {
            for fetcher in EVENT_FALLBACK_TIER {
                if let Some(value) = fetch(&client, &base, fetcher.path, &mut hard_fail).await {
                    let mut state = self.instances[idx].state.lock().await;
                    (fetcher.apply)(&value, &mut state);
                }
            }
        }

        // Slow tier.
        if due(self.instances[idx].poll.last_slow_poll, SLOW_POLL_INTERVAL, now) {
            for fetcher in SLOW_TIER {
                if let Some(value) = fetch(&client, &base, fetcher.path, &mut hard_fail).await {
                    let mut state = self.instances[idx].state.lock().await;
                    (fetcher.apply)(&value, &mut state);
                }
            }
            self.instances[idx].poll.last_slow_poll = Some(now);
        }

        // Sequence tier.
        let sequence_due = {
            let state = self.instances[idx].state.lock().await;
            state.sequence_poll_needed
        } || due(
            self.instances[idx].poll.last_sequence_poll,
            SEQUENCE_POLL_INTERVAL,
            now,
        );
        if sequence_due {
            if let Some(value) = fetch(&client, &base, paths::SEQUENCE_JSON, &mut hard_fail).await
            {
                let summary = walk_sequence(&value);
                let mut state = self.instances[idx].state.lock().await;
                if let Some(summary) = &summary {
                    apply_sequence_summary(summary, &mut state);
                }
                state.sequence_poll_needed = false;
            }
            self.instances[idx].poll.last_sequence_poll = Some(now);
        }

        // Derived-field fix-up and the freshness stamp.
        {
            let mut state = self.instances[idx].state.lock().await;
            state.fix_exposure_timing();
            state.last_successful_poll_ms = epoch_ms();
        }

        // Keep-alive discipline: the handle survives the cycle unless a
        // transport error or 5xx poisoned the connection.
        if !hard_fail {
            self.instances[idx].poll.http = Some(client);
        }
    }

    /// First-contact fetch of the slow-changing fields, cached in PollState.
    async fn fetch_static_tier(
        &mut self,
        idx: usize,
        base: &str,
        client: &PollClient,
        now: Instant,
        hard_fail: &mut bool,
    ) {
        let profile = fetch(client, base, paths::PROFILE_SHOW, hard_fail).await;
        let filterwheel = fetch(client, base, paths::FILTERWHEEL_INFO, hard_fail).await;
        let history = fetch(client, base, paths::IMAGE_HISTORY, hard_fail).await;
        let switches = fetch(client, base, paths::SWITCH_INFO, hard_fail).await;

        let inst = &mut self.instances[idx];
        if let Some(info) = profile.as_ref().and_then(parse_profile) {
            inst.poll.profile = info;
        }
        if let Some(names) = filterwheel.as_ref().and_then(parse_filter_names) {
            inst.poll.filters = names;
        }

        {
            let mut state = inst.state.lock().await;
            state.profile_name = inst.poll.profile.profile_name.clone();
            if !inst.poll.profile.telescope_name.is_empty() {
                state.telescope_name = inst.poll.profile.telescope_name.clone();
            }
            state.set_filters(inst.poll.filters.iter().cloned());
            if let Some(value) = &filterwheel {
                endpoints::apply_filterwheel_selected(value, &mut state);
            }
            if let Some(value) = &history {
                endpoints::apply_image_history(value, &mut state);
            }
            if let Some(value) = &switches {
                endpoints::apply_switch_info(value, &mut state);
            }
        }

        inst.poll.static_fetched = true;
        inst.poll.last_slow_poll = Some(now);
        inst.poll.last_sequence_poll = Some(now);
        inst.connection.set_static_data_ready(true);
        debug!("instance {}: static tier cached", idx);
    }

    // ─────────────────────────────────────────────────────────────
    // Background pre-fetch (inactive pages)
    // ─────────────────────────────────────────────────────────────

    /// Every 10 s for pages the user is not viewing: heartbeat plus the
    /// slow-changing set, skipping the fast-changing endpoints. The goal is
    /// warm data the moment the user switches pages.
    async fn background_prefetch(&mut self, idx: usize, now: Instant, timeout: Duration) {
        let base = self.instances[idx].base_url.clone();
        let client = PollClient::oneshot();
        let mut hard_fail = false;

        self.instances[idx].poll.last_heartbeat = Some(now);

        let Some(camera) = fetch(&client, &base, paths::CAMERA_INFO, &mut hard_fail).await else {
            let inst = &mut self.instances[idx];
            inst.connection.report_failure(now, timeout);
            if !inst.connection.is_connected() {
                inst.poll.reset();
                let mut state = inst.state.lock().await;
                state.connected = false;
            }
            return;
        };

        {
            let inst = &mut self.instances[idx];
            inst.connection.report_success(now);
            let mut state = inst.state.lock().await;
            apply_camera_info(&camera, &mut state);
            state.connected = true;
        }

        let profile = fetch(&client, &base, paths::PROFILE_SHOW, &mut hard_fail).await;
        let filterwheel = fetch(&client, &base, paths::FILTERWHEEL_INFO, &mut hard_fail).await;

        let inst = &mut self.instances[idx];
        if let Some(info) = profile.as_ref().and_then(parse_profile) {
            inst.poll.profile = info;
        }
        if let Some(names) = filterwheel.as_ref().and_then(parse_filter_names) {
            inst.poll.filters = names;
        }
        {
            let mut state = inst.state.lock().await;
            state.profile_name = inst.poll.profile.profile_name.clone();
            if !inst.poll.profile.telescope_name.is_empty() {
                state.telescope_name = inst.poll.profile.telescope_name.clone();
            }
            state.set_filters(inst.poll.filters.iter().cloned());
        }

        for fetcher in SLOW_TIER {
            if let Some(value) = fetch(&client, &base, fetcher.path, &mut hard_fail).await {
                let mut state = self.instances[idx].state.lock().await;
                (fetcher.apply)(&value, &mut state);
            }
        }

        if let Some(value) = fetch(&client, &base, paths::SEQUENCE_JSON, &mut hard_fail).await {
            if let Some(summary) = walk_sequence(&value) {
                let mut state = self.instances[idx].state.lock().await;
                apply_sequence_summary(&summary, &mut state);
            }
        }

        {
            let mut state = self.instances[idx].state.lock().await;
            state.fix_exposure_timing();
            state.last_successful_poll_ms = epoch_ms();
        }

        // Page-switch warm start: the static tier is now in hand.
        let inst = &mut self.instances[idx];
        inst.poll.static_fetched = true;
        inst.poll.last_slow_poll = Some(now);
        inst.poll.last_sequence_poll = Some(now);
        inst.connection.set_static_data_ready(true);
    }

    // ─────────────────────────────────────────────────────────────
    // UI signals
    // ─────────────────────────────────────────────────────────────

    async fn repaint(&mut self, page: Page) {
        match page {
            Page::Summary => {
                let mut guards = Vec::with_capacity(self.instances.len());
                for inst in &self.instances {
                    guards.push(inst.state.lock().await);
                }
                {
                    let refs: Vec<&InstanceState> = guards.iter().map(|g| &**g).collect();
                    self.ui.repaint_summary(&refs);
                }
                for guard in &mut guards {
                    guard.ui_refresh_needed = false;
                }
            }
            Page::Nina(idx) => {
                if let Some(inst) = self.instances.get(idx) {
                    let mut state = inst.state.lock().await;
                    self.ui.repaint_instance(idx, &state);
                    state.ui_refresh_needed = false;
                }
            }
            Page::SysInfo => {}
        }
    }

    /// Fetch and deliver the prepared-image thumbnail when the UI asks for
    /// it, or when a fresh image landed while the thumbnail is on screen.
    async fn service_thumbnail(&mut self, page: Page) {
        let Page::Nina(idx) = page else {
            return;
        };
        let Some(inst) = self.instances.get(idx) else {
            return;
        };
        if !inst.configured() {
            return;
        }

        let new_image = {
            let state = inst.state.lock().await;
            state.new_image_available
        };
        let wanted = self.ui.take_thumbnail_request()
            || (new_image && self.ui.thumbnail_visible());
        if !wanted {
            return;
        }

        let client = inst.poll.http.clone().unwrap_or_else(PollClient::oneshot);
        let url = endpoint_url(
            &inst.base_url,
            &paths::prepared_image(THUMBNAIL_SIZE, THUMBNAIL_SIZE, THUMBNAIL_QUALITY),
        );
        match client.fetch_image(&url).await {
            Ok(jpeg) => {
                debug!("instance {}: thumbnail fetched ({} bytes)", idx, jpeg.len());
                self.ui.show_thumbnail(idx, jpeg);
                let mut state = self.instances[idx].state.lock().await;
                state.new_image_available = false;
            }
            Err(err) => {
                warn!("instance {}: thumbnail fetch failed: {}", idx, err);
            }
        }
    }
}
