//! Historical settings layouts and the forward migration chain.
//!
//! Every schema version that ever shipped is kept here as an immutable value
//! type. Migration runs version by version as a linear `From` composition:
//! each step copies the fields that exist in both layouts by name and
//! defaults the rest, so adding a version never requires rewriting the chain.
//!
//! Blobs with an unrecognized version word (including the pre-versioned
//! legacy layout) reset to defaults; defaults are always stamped with the
//! current version.

use serde::{Deserialize, Serialize};

use super::types::{
    Settings, DEFAULT_HFR_THRESHOLDS, DEFAULT_RMS_THRESHOLDS, MAX_INSTANCES, SCHEMA_VERSION,
};

fn default_brightness() -> u8 {
    80
}

fn default_ntp() -> String {
    "pool.ntp.org".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_rotate_interval() -> u16 {
    10
}

fn default_update_rate() -> u16 {
    2
}

fn default_connection_timeout() -> u16 {
    30
}

fn default_toast() -> u16 {
    5
}

/// v1: single instance, display basics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsV1 {
    pub api_url: String,
    pub ntp_server: String,
    pub timezone: String,
    pub brightness: u8,
    pub theme: u8,
}

impl Default for SettingsV1 {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            ntp_server: default_ntp(),
            timezone: default_timezone(),
            brightness: default_brightness(),
            theme: 0,
        }
    }
}

/// v2: three instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsV2 {
    pub api_urls: [String; MAX_INSTANCES],
    pub ntp_server: String,
    pub timezone: String,
    pub brightness: u8,
    pub theme: u8,
}

impl From<SettingsV1> for SettingsV2 {
    fn from(old: SettingsV1) -> Self {
        Self {
            api_urls: [old.api_url, String::new(), String::new()],
            ntp_server: old.ntp_server,
            timezone: old.timezone,
            brightness: old.brightness,
            theme: old.theme,
        }
    }
}

/// v3: per-instance filter color blobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsV3 {
    pub api_urls: [String; MAX_INSTANCES],
    pub ntp_server: String,
    pub timezone: String,
    pub brightness: u8,
    pub theme: u8,
    pub filter_colors: [String; MAX_INSTANCES],
}

impl From<SettingsV2> for SettingsV3 {
    fn from(old: SettingsV2) -> Self {
        Self {
            api_urls: old.api_urls,
            ntp_server: old.ntp_server,
            timezone: old.timezone,
            brightness: old.brightness,
            theme: old.theme,
            filter_colors: Default::default(),
        }
    }
}

/// v4: RMS/HFR threshold blobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsV4 {
    pub api_urls: [String; MAX_INSTANCES],
    pub ntp_server: String,
    pub timezone: String,
    pub brightness: u8,
    pub theme: u8,
    pub filter_colors: [String; MAX_INSTANCES],
    pub rms_thresholds: [String; MAX_INSTANCES],
    pub hfr_thresholds: [String; MAX_INSTANCES],
}

impl From<SettingsV3> for SettingsV4 {
    fn from(old: SettingsV3) -> Self {
        Self {
            api_urls: old.api_urls,
            ntp_server: old.ntp_server,
            timezone: old.timezone,
            brightness: old.brightness,
            theme: old.theme,
            filter_colors: old.filter_colors,
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
        }
    }
}

/// v5: MQTT bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsV5 {
    pub api_urls: [String; MAX_INSTANCES],
    pub ntp_server: String,
    pub timezone: String,
    pub brightness: u8,
    pub theme: u8,
    pub filter_colors: [String; MAX_INSTANCES],
    pub rms_thresholds: [String; MAX_INSTANCES],
    pub hfr_thresholds: [String; MAX_INSTANCES],
    pub mqtt_enabled: bool,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_username: String,
    pub mqtt_password: String,
    pub mqtt_topic_prefix: String,
}

impl Default for SettingsV5 {
    fn default() -> Self {
        Self {
            api_urls: Default::default(),
            ntp_server: default_ntp(),
            timezone: default_timezone(),
            brightness: default_brightness(),
            theme: 0,
            filter_colors: Default::default(),
            rms_thresholds: Default::default(),
            hfr_thresholds: Default::default(),
            mqtt_enabled: false,
            mqtt_broker: String::new(),
            mqtt_port: default_mqtt_port(),
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            mqtt_topic_prefix: "astromon".to_string(),
        }
    }
}

impl From<SettingsV4> for SettingsV5 {
    fn from(old: SettingsV4) -> Self {
        Self {
            api_urls: old.api_urls,
            ntp_server: old.ntp_server,
            timezone: old.timezone,
            brightness: old.brightness,
            theme: old.theme,
            filter_colors: old.filter_colors,
            rms_thresholds: old.rms_thresholds,
            hfr_thresholds: old.hfr_thresholds,
            ..Self::default()
        }
    }
}

/// v6: auto-rotate preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsV6 {
    #[serde(flatten)]
    pub base: SettingsV5,
    pub auto_rotate_enabled: bool,
    pub auto_rotate_interval_s: u16,
    pub auto_rotate_effect: u8,
    pub auto_rotate_skip_disconnected: bool,
}

impl Default for SettingsV6 {
    fn default() -> Self {
        Self {
            base: SettingsV5::default(),
            auto_rotate_enabled: false,
            auto_rotate_interval_s: default_rotate_interval(),
            auto_rotate_effect: 0,
            auto_rotate_skip_disconnected: true,
        }
    }
}

impl From<SettingsV5> for SettingsV6 {
    fn from(old: SettingsV5) -> Self {
        Self {
            base: old,
            ..Self::default()
        }
    }
}

/// v7: polling cadence and UI timing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsV7 {
    #[serde(flatten)]
    pub base: SettingsV6,
    pub update_rate_s: u16,
    pub connection_timeout_s: u16,
    pub toast_duration_s: u16,
    pub debug: bool,
}

impl Default for SettingsV7 {
    fn default() -> Self {
        Self {
            base: SettingsV6::default(),
            update_rate_s: default_update_rate(),
            connection_timeout_s: default_connection_timeout(),
            toast_duration_s: default_toast(),
            debug: false,
        }
    }
}

impl From<SettingsV6> for SettingsV7 {
    fn from(old: SettingsV6) -> Self {
        Self {
            base: old,
            ..Self::default()
        }
    }
}

/// v8: per-instance enable flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsV8 {
    #[serde(flatten)]
    pub base: SettingsV7,
    pub instance_enabled: [bool; MAX_INSTANCES],
}

impl Default for SettingsV8 {
    fn default() -> Self {
        Self {
            base: SettingsV7::default(),
            instance_enabled: [true; MAX_INSTANCES],
        }
    }
}

impl From<SettingsV7> for SettingsV8 {
    fn from(old: SettingsV7) -> Self {
        // An instance that had a URL configured was in use; carry it over
        // enabled. Empty slots stay enabled-when-filled-later.
        let mut instance_enabled = [true; MAX_INSTANCES];
        for (flag, url) in instance_enabled.iter_mut().zip(&old.base.base.api_urls) {
            *flag = !url.is_empty();
        }
        // All-empty configs keep the default so a freshly added URL works.
        if old.base.base.api_urls.iter().all(|u| u.is_empty()) {
            instance_enabled = [true; MAX_INSTANCES];
        }
        Self {
            base: old,
            instance_enabled,
        }
    }
}

/// v8 → v9 (current): fan the flat record out into the sectioned layout and
/// default the fields v9 introduced (screen sleep, alert flash, color
/// brightness, graph interval, page bitmask, boot page override).
impl From<SettingsV8> for Settings {
    fn from(old: SettingsV8) -> Self {
        let v7 = old.base;
        let v6 = v7.base;
        let v5 = v6.base;

        let mut cfg = Settings::default();
        cfg.instances.api_urls = v5.api_urls;
        cfg.instances.enabled = old.instance_enabled;
        cfg.network.ntp_server = v5.ntp_server;
        cfg.network.timezone = v5.timezone;
        cfg.display.brightness = v5.brightness;
        cfg.display.theme = v5.theme;
        cfg.colors.filter_colors = v5.filter_colors;
        cfg.colors.rms_thresholds = v5.rms_thresholds;
        cfg.colors.hfr_thresholds = v5.hfr_thresholds;
        cfg.mqtt.enabled = v5.mqtt_enabled;
        cfg.mqtt.broker_url = v5.mqtt_broker;
        cfg.mqtt.port = v5.mqtt_port;
        cfg.mqtt.username = v5.mqtt_username;
        cfg.mqtt.password = v5.mqtt_password;
        cfg.mqtt.topic_prefix = v5.mqtt_topic_prefix;
        cfg.ui.auto_rotate.enabled = v6.auto_rotate_enabled;
        cfg.ui.auto_rotate.interval_s = v6.auto_rotate_interval_s;
        cfg.ui.auto_rotate.effect = v6.auto_rotate_effect;
        cfg.ui.auto_rotate.skip_disconnected = v6.auto_rotate_skip_disconnected;
        cfg.ui.update_rate_s = v7.update_rate_s;
        cfg.ui.connection_timeout_s = v7.connection_timeout_s;
        cfg.ui.toast_duration_s = v7.toast_duration_s;
        cfg.ui.debug = v7.debug;
        cfg
    }
}

/// Parse a payload of schema `version` and migrate it to the current layout.
///
/// Returns `None` for unknown versions or unparseable payloads; the store
/// then resets to defaults.
pub fn migrate_payload(version: u32, payload: &[u8]) -> Option<Settings> {
    fn parse<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Option<T> {
        serde_json::from_slice(payload).ok()
    }

    let settings = match version {
        SCHEMA_VERSION => parse::<Settings>(payload)?,
        8 => parse::<SettingsV8>(payload)?.into(),
        7 => Settings::from(SettingsV8::from(parse::<SettingsV7>(payload)?)),
        6 => {
            let v: SettingsV6 = parse(payload)?;
            Settings::from(SettingsV8::from(SettingsV7::from(v)))
        }
        5 => {
            let v: SettingsV5 = parse(payload)?;
            Settings::from(SettingsV8::from(SettingsV7::from(SettingsV6::from(v))))
        }
        4 => {
            let v: SettingsV4 = parse(payload)?;
            Settings::from(SettingsV8::from(SettingsV7::from(SettingsV6::from(
                SettingsV5::from(v),
            ))))
        }
        3 => {
            let v: SettingsV3 = parse(payload)?;
            Settings::from(SettingsV8::from(SettingsV7::from(SettingsV6::from(
                SettingsV5::from(SettingsV4::from(v)),
            ))))
        }
        2 => {
            let v: SettingsV2 = parse(payload)?;
            Settings::from(SettingsV8::from(SettingsV7::from(SettingsV6::from(
                SettingsV5::from(SettingsV4::from(SettingsV3::from(v))),
            ))))
        }
        1 => {
            let v: SettingsV1 = parse(payload)?;
            Settings::from(SettingsV8::from(SettingsV7::from(SettingsV6::from(
                SettingsV5::from(SettingsV4::from(SettingsV3::from(SettingsV2::from(v)))),
            ))))
        }
        _ => return None,
    };

    Some(settings)
}
