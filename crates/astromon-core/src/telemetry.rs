//! Per-instance fused telemetry record.
//!
//! [`InstanceState`] is the single mutable record everything converges on:
//! the polling scheduler writes most fields, the event channel writes a small
//! documented subset, and the UI reads a snapshot under the per-instance
//! lock. Constructed zero-initialized at startup and never destroyed.

use serde::{Deserialize, Serialize};

/// Upper bound on the filter list carried per instance.
pub const MAX_FILTERS: usize = 10;

/// Upper bound on named PWM power outputs.
pub const MAX_PWM_OUTPUTS: usize = 4;

/// Sequence status strings as shown on the display.
pub mod status {
    pub const UNKNOWN: &str = "UNKNOWN";
    pub const IDLE: &str = "IDLE";
    pub const RUNNING: &str = "RUNNING";
    pub const PAUSED: &str = "PAUSED";
    pub const FINISHED: &str = "FINISHED";
    pub const STOPPED: &str = "STOPPED";

    /// Normalize a server-reported status into the display set.
    pub fn normalize(raw: &str) -> &'static str {
        match raw.to_ascii_uppercase().as_str() {
            "RUNNING" => RUNNING,
            "IDLE" | "CREATED" => IDLE,
            "PAUSED" => PAUSED,
            "FINISHED" => FINISHED,
            "STOPPED" | "SKIPPED" => STOPPED,
            _ => UNKNOWN,
        }
    }
}

/// One named PWM output reading from the power box.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PwmOutput {
    pub name: String,
    /// Duty cycle in percent.
    pub value: f64,
}

/// Power-box readings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PowerReadings {
    pub input_voltage: f64,
    pub total_current: f64,
    pub total_watts: f64,
    pub pwm: Vec<PwmOutput>,
}

/// Guider RMS error triple, in arcseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RmsError {
    pub total: f64,
    pub ra: f64,
    pub dec: f64,
}

/// Fused live state of one remote automation server.
///
/// Invariants maintained by the mutation helpers below:
/// `0 <= exposure_current <= exposure_total`, `filters.len() <= MAX_FILTERS`,
/// `status` is one of the [`status`] constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceState {
    pub connected: bool,
    pub status: String,
    pub target_name: String,
    pub profile_name: String,
    pub telescope_name: String,

    // Camera
    pub camera_temp: f64,
    pub cooler_power: f64,

    // Guider
    pub rms: RmsError,
    pub is_dithering: bool,

    // Focuser
    pub focuser_position: i32,

    // Exposure bookkeeping. `exposure_current` may be stored negative by the
    // camera fetcher to encode "seconds remaining"; the scheduler's fix-up
    // pass restores the invariant before any reader sees it.
    pub exposure_current: f64,
    pub exposure_total: f64,
    /// Absolute end of the running exposure, unix epoch seconds. 0 = none.
    pub exposure_end_epoch: i64,
    pub iterations_completed: u32,
    pub iterations_total: u32,
    /// `MM:SS` when derived from a live exposure end, `H:MM` when derived
    /// from a sequence condition.
    pub time_remaining: String,

    // Filter wheel
    pub current_filter: String,
    pub filters: Vec<String>,

    // Sequence
    pub container_name: String,
    pub step_name: String,

    // Image statistics
    pub hfr: f64,
    pub stars: u32,
    /// Monotone count of images seen in the server's history.
    pub image_count: u32,

    // Mount
    pub meridian_flip: String,

    // Power box
    pub power: PowerReadings,

    // Safety monitor
    pub safety_connected: bool,
    pub is_safe: bool,

    /// Milliseconds-since-boot stamp of the last successful full poll.
    pub last_successful_poll_ms: u64,

    // Edge flags, consumed by the scheduler/UI.
    pub new_image_available: bool,
    pub ui_refresh_needed: bool,
    pub sequence_poll_needed: bool,

    pub event_channel_connected: bool,
}

impl Default for InstanceState {
    fn default() -> Self {
        Self {
            connected: false,
            status: status::UNKNOWN.to_string(),
            target_name: String::new(),
            profile_name: String::new(),
            telescope_name: String::new(),
            camera_temp: 0.0,
            cooler_power: 0.0,
            rms: RmsError::default(),
            is_dithering: false,
            focuser_position: 0,
            exposure_current: 0.0,
            exposure_total: 0.0,
            exposure_end_epoch: 0,
            iterations_completed: 0,
            iterations_total: 0,
            time_remaining: String::new(),
            current_filter: String::new(),
            filters: Vec::new(),
            container_name: String::new(),
            step_name: String::new(),
            hfr: 0.0,
            stars: 0,
            image_count: 0,
            meridian_flip: String::new(),
            power: PowerReadings::default(),
            safety_connected: false,
            is_safe: false,
            last_successful_poll_ms: 0,
            new_image_available: false,
            ui_refresh_needed: false,
            sequence_poll_needed: false,
            event_channel_connected: false,
        }
    }
}

impl InstanceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known filters.
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    /// Replace the filter list, truncating to [`MAX_FILTERS`].
    pub fn set_filters<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = names
            .into_iter()
            .take(MAX_FILTERS)
            .map(Into::into)
            .collect();
    }

    /// Exposure timing fix-up.
    ///
    /// The camera fetcher stores a negative `exposure_current` to encode
    /// "seconds remaining". This resolves that encoding and clamps the pair
    /// back into `0 <= current <= total`.
    pub fn fix_exposure_timing(&mut self) {
        if self.exposure_current < 0.0 {
            let remaining = -self.exposure_current;
            self.exposure_current = if self.exposure_total > 0.0 {
                self.exposure_total - remaining
            } else {
                0.0
            };
            self.time_remaining = format_mmss(remaining.max(0.0) as u64);
        }
        if self.exposure_current < 0.0 {
            self.exposure_current = 0.0;
        }
        if self.exposure_total > 0.0 && self.exposure_current > self.exposure_total {
            self.exposure_current = self.exposure_total;
        }
    }
}

/// Format whole seconds as `MM:SS`.
pub fn format_mmss(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Format whole seconds as `H:MM`.
pub fn format_hmm(secs: u64) -> String {
    format!("{}:{:02}", secs / 3600, (secs % 3600) / 60)
}
