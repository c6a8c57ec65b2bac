//! Current settings record (schema version 9).
//!
//! The record is persisted as a versioned blob (see `store`); older layouts
//! live in `versions` and migrate forward through a linear chain. Every
//! numeric field is clamped to its documented range on load and on save, so
//! readers never see an out-of-range value.

use serde::{Deserialize, Serialize};

/// Schema version stamped on every persisted blob.
pub const SCHEMA_VERSION: u32 = 9;

/// Maximum number of configured remote instances.
pub const MAX_INSTANCES: usize = 3;

/// Field length limits enforced by the admin config surface.
pub mod limits {
    pub const URL_MAX: usize = 128;
    pub const IDENTITY_MAX: usize = 64; // NTP, timezone, MQTT identity fields
    pub const TOPIC_PREFIX_MAX: usize = 64;
    pub const FILTER_COLORS_MAX: usize = 512;
    pub const THRESHOLDS_MAX: usize = 256;
}

/// Default RMS threshold blob, used when the stored blob is empty.
pub const DEFAULT_RMS_THRESHOLDS: &str =
    r##"{"good_max":0.5,"ok_max":1.0,"good_color":"#00FF00","ok_color":"#FFFF00","bad_color":"#FF0000"}"##;

/// Default HFR threshold blob, used when the stored blob is empty.
pub const DEFAULT_HFR_THRESHOLDS: &str =
    r##"{"good_max":2.5,"ok_max":3.5,"good_color":"#00FF00","ok_color":"#FFFF00","bad_color":"#FF0000"}"##;

fn clamp_u8(value: &mut u8, min: u8, max: u8) -> bool {
    let clamped = (*value).clamp(min, max);
    let changed = clamped != *value;
    *value = clamped;
    changed
}

fn clamp_u16(value: &mut u16, min: u16, max: u16) -> bool {
    let clamped = (*value).clamp(min, max);
    let changed = clamped != *value;
    *value = clamped;
    changed
}

fn truncate(value: &mut String, max: usize) -> bool {
    if value.len() > max {
        value.truncate(max);
        true
    } else {
        false
    }
}

/// Remote instance base URLs and enable flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSettings {
    /// Base URLs of the form `http://host[:port]/v2/api/`; empty = unused.
    pub api_urls: [String; MAX_INSTANCES],
    pub enabled: [bool; MAX_INSTANCES],
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            api_urls: Default::default(),
            enabled: [true; MAX_INSTANCES],
        }
    }
}

/// Time-sync settings. The radio subsystem owns WiFi credentials; they never
/// appear in this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub ntp_server: String,
    pub timezone: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            ntp_server: "pool.ntp.org".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

/// User-editable JSON blobs and the global color-brightness scaler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorSettings {
    pub filter_colors: [String; MAX_INSTANCES],
    pub rms_thresholds: [String; MAX_INSTANCES],
    pub hfr_thresholds: [String; MAX_INSTANCES],
    /// 0-100, applied after every color lookup.
    pub color_brightness: u8,
}

impl Default for ColorSettings {
    fn default() -> Self {
        Self {
            filter_colors: Default::default(),
            rms_thresholds: [
                DEFAULT_RMS_THRESHOLDS.to_string(),
                DEFAULT_RMS_THRESHOLDS.to_string(),
                DEFAULT_RMS_THRESHOLDS.to_string(),
            ],
            hfr_thresholds: [
                DEFAULT_HFR_THRESHOLDS.to_string(),
                DEFAULT_HFR_THRESHOLDS.to_string(),
                DEFAULT_HFR_THRESHOLDS.to_string(),
            ],
            color_brightness: 100,
        }
    }
}

/// Display hardware settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Backlight brightness, 0-100.
    pub brightness: u8,
    /// Theme index, 0-20.
    pub theme: u8,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            brightness: 80,
            theme: 0,
        }
    }
}

/// Home-automation bridge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub enabled: bool,
    pub broker_url: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub topic_prefix: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_url: String::new(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            topic_prefix: "astromon".to_string(),
        }
    }
}

/// Auto-rotate behavior between pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoRotateSettings {
    pub enabled: bool,
    /// Seconds between rotations, 3-3600.
    pub interval_s: u16,
    /// Transition effect index.
    pub effect: u8,
    pub skip_disconnected: bool,
    /// Bitmask of pages included in the rotation; bit order follows
    /// the page index order.
    pub pages: u8,
}

impl Default for AutoRotateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_s: 10,
            effect: 0,
            skip_disconnected: true,
            pages: 0xFF,
        }
    }
}

/// UI behavior preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiPreferences {
    /// Page shown at boot; -1 = last active.
    pub active_page_override: i8,
    pub auto_rotate: AutoRotateSettings,
    /// Scheduler cadence in seconds, 1-60.
    pub update_rate_s: u16,
    /// Guide-graph refresh interval in seconds, 1-60.
    pub graph_update_s: u16,
    /// Grace period before sustained poll failure flips a page offline,
    /// 5-300 seconds.
    pub connection_timeout_s: u16,
    /// Toast display duration in seconds, 1-30.
    pub toast_duration_s: u16,
    pub debug: bool,
    pub screen_sleep_enabled: bool,
    /// Seconds of inactivity before the screen sleeps, 10-7200.
    pub screen_sleep_timeout_s: u16,
    /// Flash the display on safety alerts.
    pub alert_flash: bool,
}

impl Default for UiPreferences {
    fn default() -> Self {
        Self {
            active_page_override: -1,
            auto_rotate: AutoRotateSettings::default(),
            update_rate_s: 2,
            graph_update_s: 5,
            connection_timeout_s: 30,
            toast_duration_s: 5,
            debug: false,
            screen_sleep_enabled: false,
            screen_sleep_timeout_s: 300,
            alert_flash: true,
        }
    }
}

/// The complete device configuration, singleton per appliance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub instances: InstanceSettings,
    pub network: NetworkSettings,
    pub colors: ColorSettings,
    pub display: DisplaySettings,
    pub mqtt: MqttSettings,
    pub ui: UiPreferences,
}

impl Settings {
    /// Number of configured instances: non-empty URLs, minimum 1.
    pub fn instance_count(&self) -> usize {
        self.instances
            .api_urls
            .iter()
            .filter(|u| !u.is_empty())
            .count()
            .max(1)
    }

    /// Base URL of instance `i`, if configured and enabled.
    pub fn instance_url(&self, i: usize) -> Option<&str> {
        let url = self.instances.api_urls.get(i)?;
        if url.is_empty() || !self.instances.enabled.get(i).copied().unwrap_or(false) {
            None
        } else {
            Some(url)
        }
    }

    /// Clamp every field into its documented range and replace empty
    /// threshold blobs with the defaults.
    ///
    /// Returns `true` when anything was corrected, so the caller can decide
    /// to re-persist.
    pub fn validate(&mut self) -> bool {
        let mut changed = false;

        for url in &mut self.instances.api_urls {
            changed |= truncate(url, limits::URL_MAX);
        }
        changed |= truncate(&mut self.network.ntp_server, limits::IDENTITY_MAX);
        changed |= truncate(&mut self.network.timezone, limits::IDENTITY_MAX);
        changed |= truncate(&mut self.mqtt.broker_url, limits::URL_MAX);
        changed |= truncate(&mut self.mqtt.username, limits::IDENTITY_MAX);
        changed |= truncate(&mut self.mqtt.password, limits::IDENTITY_MAX);
        changed |= truncate(&mut self.mqtt.topic_prefix, limits::TOPIC_PREFIX_MAX);

        for blob in &mut self.colors.filter_colors {
            changed |= truncate(blob, limits::FILTER_COLORS_MAX);
        }
        for blob in &mut self.colors.rms_thresholds {
            changed |= truncate(blob, limits::THRESHOLDS_MAX);
            if blob.trim().is_empty() {
                *blob = DEFAULT_RMS_THRESHOLDS.to_string();
                changed = true;
            }
        }
        for blob in &mut self.colors.hfr_thresholds {
            changed |= truncate(blob, limits::THRESHOLDS_MAX);
            if blob.trim().is_empty() {
                *blob = DEFAULT_HFR_THRESHOLDS.to_string();
                changed = true;
            }
        }

        changed |= clamp_u8(&mut self.display.brightness, 0, 100);
        changed |= clamp_u8(&mut self.display.theme, 0, 20);
        changed |= clamp_u8(&mut self.colors.color_brightness, 0, 100);

        if self.mqtt.port == 0 {
            self.mqtt.port = 1883;
            changed = true;
        }

        changed |= clamp_u16(&mut self.ui.update_rate_s, 1, 60);
        changed |= clamp_u16(&mut self.ui.graph_update_s, 1, 60);
        changed |= clamp_u16(&mut self.ui.connection_timeout_s, 5, 300);
        changed |= clamp_u16(&mut self.ui.toast_duration_s, 1, 30);
        changed |= clamp_u16(&mut self.ui.auto_rotate.interval_s, 3, 3600);
        changed |= clamp_u16(&mut self.ui.screen_sleep_timeout_s, 10, 7200);

        changed
    }
}
