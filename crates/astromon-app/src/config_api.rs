//! Flat-JSON configuration surface.
//!
//! The local admin HTTP server is an external collaborator; these two
//! functions are the API it calls. `config_json` flattens the live settings
//! (plus the radio-owned SSID and the dirty flag) into one object;
//! `apply_config_json` validates an incoming object field by field and
//! applies or persists it. WiFi credentials live in the radio subsystem and
//! never pass through here beyond the read-only SSID.

use serde_json::{json, Map, Value};
use url::Url;

use astromon_core::prelude::*;

use crate::settings::types::{limits, Settings, MAX_INSTANCES};
use crate::settings::SettingsStore;

/// How an accepted config body takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// `save`: replace live copy and persist.
    Persist,
    /// `apply`: replace live copy only.
    LiveOnly,
}

/// Flatten the live settings into the admin JSON object.
pub fn config_json(store: &SettingsStore, ssid: &str) -> Value {
    let cfg = store.snapshot();
    let mut out = Map::new();

    out.insert("ssid".into(), json!(ssid));
    for i in 0..MAX_INSTANCES {
        out.insert(format!("api_url_{}", i + 1), json!(cfg.instances.api_urls[i]));
        out.insert(
            format!("instance_enabled_{}", i + 1),
            json!(cfg.instances.enabled[i]),
        );
        out.insert(
            format!("filter_colors_{}", i + 1),
            json!(cfg.colors.filter_colors[i]),
        );
        out.insert(
            format!("rms_thresholds_{}", i + 1),
            json!(cfg.colors.rms_thresholds[i]),
        );
        out.insert(
            format!("hfr_thresholds_{}", i + 1),
            json!(cfg.colors.hfr_thresholds[i]),
        );
    }

    out.insert("ntp_server".into(), json!(cfg.network.ntp_server));
    out.insert("timezone".into(), json!(cfg.network.timezone));

    out.insert("brightness".into(), json!(cfg.display.brightness));
    out.insert("theme".into(), json!(cfg.display.theme));
    out.insert("color_brightness".into(), json!(cfg.colors.color_brightness));

    out.insert("mqtt_enabled".into(), json!(cfg.mqtt.enabled));
    out.insert("mqtt_broker".into(), json!(cfg.mqtt.broker_url));
    out.insert("mqtt_port".into(), json!(cfg.mqtt.port));
    out.insert("mqtt_username".into(), json!(cfg.mqtt.username));
    out.insert("mqtt_password".into(), json!(cfg.mqtt.password));
    out.insert("mqtt_topic_prefix".into(), json!(cfg.mqtt.topic_prefix));

    out.insert("active_page".into(), json!(cfg.ui.active_page_override));
    out.insert("auto_rotate_enabled".into(), json!(cfg.ui.auto_rotate.enabled));
    out.insert(
        "auto_rotate_interval_s".into(),
        json!(cfg.ui.auto_rotate.interval_s),
    );
    out.insert("auto_rotate_effect".into(), json!(cfg.ui.auto_rotate.effect));
    out.insert(
        "auto_rotate_skip_disconnected".into(),
        json!(cfg.ui.auto_rotate.skip_disconnected),
    );
    out.insert("auto_rotate_pages".into(), json!(cfg.ui.auto_rotate.pages));
    out.insert("update_rate_s".into(), json!(cfg.ui.update_rate_s));
    out.insert("graph_update_s".into(), json!(cfg.ui.graph_update_s));
    out.insert(
        "connection_timeout_s".into(),
        json!(cfg.ui.connection_timeout_s),
    );
    out.insert("toast_duration_s".into(), json!(cfg.ui.toast_duration_s));
    out.insert("debug".into(), json!(cfg.ui.debug));
    out.insert(
        "screen_sleep_enabled".into(),
        json!(cfg.ui.screen_sleep_enabled),
    );
    out.insert(
        "screen_sleep_timeout_s".into(),
        json!(cfg.ui.screen_sleep_timeout_s),
    );
    out.insert("alert_flash".into(), json!(cfg.ui.alert_flash));

    out.insert("_dirty".into(), json!(store.is_dirty()));

    Value::Object(out)
}

/// Validate and apply an incoming config object.
///
/// Only present keys change their fields; everything else keeps its current
/// value. Length and URL-shape violations reject the whole body before
/// anything is applied.
pub fn apply_config_json(store: &SettingsStore, body: &Value, mode: ApplyMode) -> Result<()> {
    let object = body
        .as_object()
        .ok_or_else(|| Error::config("config body must be a JSON object"))?;

    let mut cfg = store.snapshot();
    update_settings(&mut cfg, object)?;

    match mode {
        ApplyMode::Persist => store.save(cfg),
        ApplyMode::LiveOnly => {
            store.apply(cfg);
            Ok(())
        }
    }
}

fn update_settings(cfg: &mut Settings, object: &Map<String, Value>) -> Result<()> {
    let str_field = |key: &str, max: usize| -> Result<Option<String>> {
        match object.get(key) {
            None => Ok(None),
            Some(value) => {
                let s = value
                    .as_str()
                    .ok_or_else(|| Error::validation(key, "expected a string"))?;
                if s.len() > max {
                    return Err(Error::validation(key, format!("longer than {max} bytes")));
                }
                Ok(Some(s.to_string()))
            }
        }
    };
    let bool_field = |key: &str| -> Result<Option<bool>> {
        match object.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_bool()
                .map(Some)
                .ok_or_else(|| Error::validation(key, "expected a boolean")),
        }
    };
    let num_field = |key: &str| -> Result<Option<i64>> {
        match object.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| Error::validation(key, "expected a number")),
        }
    };

    for i in 0..MAX_INSTANCES {
        let key = format!("api_url_{}", i + 1);
        if let Some(url) = str_field(&key, limits::URL_MAX)? {
            validate_api_url(&key, &url)?;
            cfg.instances.api_urls[i] = url;
        }
        if let Some(flag) = bool_field(&format!("instance_enabled_{}", i + 1))? {
            cfg.instances.enabled[i] = flag;
        }
        if let Some(blob) = str_field(&format!("filter_colors_{}", i + 1), limits::FILTER_COLORS_MAX)? {
            cfg.colors.filter_colors[i] = blob;
        }
        if let Some(blob) = str_field(&format!("rms_thresholds_{}", i + 1), limits::THRESHOLDS_MAX)? {
            cfg.colors.rms_thresholds[i] = blob;
        }
        if let Some(blob) = str_field(&format!("hfr_thresholds_{}", i + 1), limits::THRESHOLDS_MAX)? {
            cfg.colors.hfr_thresholds[i] = blob;
        }
    }

    if let Some(s) = str_field("ntp_server", limits::IDENTITY_MAX)? {
        cfg.network.ntp_server = s;
    }
    if let Some(s) = str_field("timezone", limits::IDENTITY_MAX)? {
        cfg.network.timezone = s;
    }

    if let Some(n) = num_field("brightness")? {
        cfg.display.brightness = n.clamp(0, 100) as u8;
    }
    if let Some(n) = num_field("theme")? {
        cfg.display.theme = n.clamp(0, 20) as u8;
    }
    if let Some(n) = num_field("color_brightness")? {
        cfg.colors.color_brightness = n.clamp(0, 100) as u8;
    }

    if let Some(flag) = bool_field("mqtt_enabled")? {
        cfg.mqtt.enabled = flag;
    }
    if let Some(s) = str_field("mqtt_broker", limits::URL_MAX)? {
        cfg.mqtt.broker_url = s;
    }
    if let Some(n) = num_field("mqtt_port")? {
        if !(1..=65535).contains(&n) {
            return Err(Error::validation("mqtt_port", "out of range"));
        }
        cfg.mqtt.port = n as u16;
    }
    if let Some(s) = str_field("mqtt_username", limits::IDENTITY_MAX)? {
        cfg.mqtt.username = s;
    }
    if let Some(s) = str_field("mqtt_password", limits::IDENTITY_MAX)? {
        cfg.mqtt.password = s;
    }
    if let Some(s) = str_field("mqtt_topic_prefix", limits::TOPIC_PREFIX_MAX)? {
        cfg.mqtt.topic_prefix = s;
    }

    if let Some(n) = num_field("active_page")? {
        cfg.ui.active_page_override = n.clamp(-1, 7) as i8;
    }
    if let Some(flag) = bool_field("auto_rotate_enabled")? {
        cfg.ui.auto_rotate.enabled = flag;
    }
    if let Some(n) = num_field("auto_rotate_interval_s")? {
        cfg.ui.auto_rotate.interval_s = n.clamp(0, u16::MAX as i64) as u16;
    }
    if let Some(n) = num_field("auto_rotate_effect")? {
        cfg.ui.auto_rotate.effect = n.clamp(0, u8::MAX as i64) as u8;
    }
    if let Some(flag) = bool_field("auto_rotate_skip_disconnected")? {
        cfg.ui.auto_rotate.skip_disconnected = flag;
    }
    if let Some(n) = num_field("auto_rotate_pages")? {
        cfg.ui.auto_rotate.pages = n.clamp(0, u8::MAX as i64) as u8;
    }
    if let Some(n) = num_field("update_rate_s")? {
        cfg.ui.update_rate_s = n.clamp(0, u16::MAX as i64) as u16;
    }
    if let Some(n) = num_field("graph_update_s")? {
        cfg.ui.graph_update_s = n.clamp(0, u16::MAX as i64) as u16;
    }
    if let Some(n) = num_field("connection_timeout_s")? {
        cfg.ui.connection_timeout_s = n.clamp(0, u16::MAX as i64) as u16;
    }
    if let Some(n) = num_field("toast_duration_s")? {
        cfg.ui.toast_duration_s = n.clamp(0, u16::MAX as i64) as u16;
    }
    if let Some(flag) = bool_field("debug")? {
        cfg.ui.debug = flag;
    }
    if let Some(flag) = bool_field("screen_sleep_enabled")? {
        cfg.ui.screen_sleep_enabled = flag;
    }
    if let Some(n) = num_field("screen_sleep_timeout_s")? {
        cfg.ui.screen_sleep_timeout_s = n.clamp(0, u16::MAX as i64) as u16;
    }
    if let Some(flag) = bool_field("alert_flash")? {
        cfg.ui.alert_flash = flag;
    }

    Ok(())
}

/// Non-empty instance URLs must be well-formed http(s) URLs with a host.
fn validate_api_url(key: &str, url: &str) -> Result<()> {
    if url.is_empty() {
        return Ok(());
    }
    let parsed =
        Url::parse(url).map_err(|e| Error::validation(key, format!("not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::validation(key, "scheme must be http or https"));
    }
    if parsed.host_str().is_none() {
        return Err(Error::validation(key, "missing host"));
    }
    Ok(())
}
