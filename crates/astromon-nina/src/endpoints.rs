//! Typed REST endpoint fetchers.
//!
//! Every poll endpoint has an *apply* function of the uniform shape
//! `fn(&Value, &mut InstanceState)`: parse the response tree, copy the fields
//! it owns, leave everything untouched on any parse failure. The scheduler
//! drives them through the [`Fetcher`] tables below; apply functions never
//! fail and never clear data they could not replace.

use astromon_core::prelude::*;
use astromon_core::telemetry::{InstanceState, PwmOutput, MAX_PWM_OUTPUTS};
use serde::Deserialize;
use serde_json::Value;

/// Relative REST paths under the `/v2/api/` base.
pub mod paths {
    pub const CAMERA_INFO: &str = "equipment/camera/info";
    pub const FILTERWHEEL_INFO: &str = "equipment/filterwheel/info";
    pub const GUIDER_INFO: &str = "equipment/guider/info";
    pub const MOUNT_INFO: &str = "equipment/mount/info";
    pub const FOCUSER_INFO: &str = "equipment/focuser/info";
    pub const SWITCH_INFO: &str = "equipment/switch/info";
    pub const SAFETY_INFO: &str = "equipment/safetymonitor/info";
    pub const WEATHER_INFO: &str = "equipment/weather/info";
    pub const GUIDER_GRAPH: &str = "equipment/guider/graph";
    pub const IMAGE_HISTORY: &str = "image-history";
    pub const IMAGE_HISTORY_LIGHTS: &str = "image-history?all=true&imageType=LIGHT";
    pub const PROFILE_SHOW: &str = "profile/show";
    pub const SEQUENCE_JSON: &str = "sequence/json";

    /// Prepared-image path for a `width x height` thumbnail.
    pub fn prepared_image(width: u32, height: u32, quality: u8) -> String {
        format!("prepared-image?resize=true&size={width}x{height}&quality={quality}&autoPrepare=true")
    }
}

/// Unwrap the server's `{Response, Success, Error, ...}` envelope.
///
/// Returns `None` when the envelope reports failure; tolerates bare payloads
/// without an envelope.
pub fn response(value: &Value) -> Option<&Value> {
    if let Some(success) = value.get("Success").and_then(Value::as_bool) {
        if !success {
            debug!(
                "server reported error: {}",
                value.get("Error").and_then(serde_json::Value::as_str).unwrap_or("?")
            );
            return None;
        }
    }
    value.get("Response").or(Some(value))
}

fn parse<T: for<'de> Deserialize<'de>>(value: &Value) -> Option<T> {
    let payload = response(value)?;
    match serde_json::from_value(payload.clone()) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            debug!("response parse failed: {}", err);
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Response payloads
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct CameraInfo {
    connected: bool,
    temperature: f64,
    cooler_power: f64,
    is_exposing: bool,
    exposure_total_time: f64,
    remaining_exposure_time: f64,
    exposure_end_time: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RmsAxis {
    arcseconds: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RmsErrorInfo {
    #[serde(rename = "Total")]
    total: RmsAxis,
    #[serde(rename = "RA")]
    ra: RmsAxis,
    #[serde(rename = "Dec")]
    dec: RmsAxis,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct GuiderInfo {
    connected: bool,
    #[serde(rename = "RMSError")]
    rms_error: RmsErrorInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct FilterRef {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct FilterWheelInfo {
    connected: bool,
    selected_filter: Option<FilterRef>,
    available_filters: Vec<FilterRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct FocuserInfo {
    connected: bool,
    position: i32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct MountInfo {
    connected: bool,
    time_to_meridian_flip_string: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SwitchGauge {
    name: String,
    value: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SwitchInfo {
    connected: bool,
    writable_switches: Vec<SwitchGauge>,
    readonly_switches: Vec<SwitchGauge>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SafetyMonitorInfo {
    connected: bool,
    is_safe: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ImageHistoryEntry {
    #[serde(rename = "HFR")]
    hfr: f64,
    stars: u32,
    exposure_time: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct TelescopeSettings {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ProfileShow {
    name: String,
    telescope_settings: TelescopeSettings,
}

/// Static profile fields cached between slow polls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileInfo {
    pub profile_name: String,
    pub telescope_name: String,
}

// ─────────────────────────────────────────────────────────────────
// Apply functions
// ─────────────────────────────────────────────────────────────────

/// `camera/info`: the heartbeat.
///
/// Stores `-remaining` into `exposure_current` while an exposure runs; the
/// scheduler's fix-up pass resolves the encoding after the poll tier.
pub fn apply_camera_info(value: &Value, state: &mut InstanceState) {
    let Some(info) = parse::<CameraInfo>(value) else {
        return;
    };
    state.connected = info.connected;
    state.camera_temp = info.temperature;
    state.cooler_power = info.cooler_power;
    if info.is_exposing {
        if info.exposure_total_time > 0.0 {
            state.exposure_total = info.exposure_total_time;
        }
        state.exposure_current = -info.remaining_exposure_time;
        state.exposure_end_epoch = info.exposure_end_time;
    } else {
        state.exposure_end_epoch = 0;
    }
}

/// `guider/info`: RMS error triple.
pub fn apply_guider_info(value: &Value, state: &mut InstanceState) {
    let Some(info) = parse::<GuiderInfo>(value) else {
        return;
    };
    if !info.connected {
        return;
    }
    state.rms.total = info.rms_error.total.arcseconds;
    state.rms.ra = info.rms_error.ra.arcseconds;
    state.rms.dec = info.rms_error.dec.arcseconds;
}

/// `filterwheel/info`: selected filter only (poll fallback for the
/// FILTERWHEEL-CHANGED event).
pub fn apply_filterwheel_selected(value: &Value, state: &mut InstanceState) {
    let Some(info) = parse::<FilterWheelInfo>(value) else {
        return;
    };
    if let Some(selected) = info.selected_filter {
        if !selected.name.is_empty() {
            state.current_filter = selected.name;
        }
    }
}

/// `filterwheel/info`: available filter names, for the static tier.
pub fn parse_filter_names(value: &Value) -> Option<Vec<String>> {
    let info = parse::<FilterWheelInfo>(value)?;
    Some(
        info.available_filters
            .into_iter()
            .map(|f| f.name)
            .filter(|n| !n.is_empty())
            .collect(),
    )
}

/// `focuser/info`: position.
pub fn apply_focuser_info(value: &Value, state: &mut InstanceState) {
    let Some(info) = parse::<FocuserInfo>(value) else {
        return;
    };
    if info.connected {
        state.focuser_position = info.position;
    }
}

/// `mount/info`: meridian-flip countdown string.
pub fn apply_mount_info(value: &Value, state: &mut InstanceState) {
    let Some(info) = parse::<MountInfo>(value) else {
        return;
    };
    if info.connected && !info.time_to_meridian_flip_string.is_empty() {
        state.meridian_flip = info.time_to_meridian_flip_string;
    }
}

/// `switch/info`: power-box readings.
///
/// Readonly gauges are matched by name (voltage/current/power); writable
/// switches become the named PWM outputs, capped at four.
pub fn apply_switch_info(value: &Value, state: &mut InstanceState) {
    let Some(info) = parse::<SwitchInfo>(value) else {
        return;
    };
    if !info.connected {
        return;
    }
    for gauge in &info.readonly_switches {
        let name = gauge.name.to_ascii_lowercase();
        if name.contains("voltage") {
            state.power.input_voltage = gauge.value;
        } else if name.contains("current") {
            state.power.total_current = gauge.value;
        } else if name.contains("power") || name.contains("watt") {
            state.power.total_watts = gauge.value;
        }
    }
    state.power.pwm = info
        .writable_switches
        .into_iter()
        .take(MAX_PWM_OUTPUTS)
        .map(|s| PwmOutput {
            name: s.name,
            value: s.value,
        })
        .collect();
}

/// `safetymonitor/info`: safety flags.
pub fn apply_safety_info(value: &Value, state: &mut InstanceState) {
    let Some(info) = parse::<SafetyMonitorInfo>(value) else {
        return;
    };
    state.safety_connected = info.connected;
    state.is_safe = info.connected && info.is_safe;
}

/// `image-history`: image statistics fallback when the event channel is
/// down.
///
/// The history length is a monotone image counter: growth raises
/// `new_image_available` without comparing per-image statistics.
pub fn apply_image_history(value: &Value, state: &mut InstanceState) {
    let Some(payload) = response(value) else {
        return;
    };
    let Some(entries) = payload.as_array() else {
        return;
    };
    let count = entries.len() as u32;
    if let Some(last) = entries.last() {
        if let Ok(entry) = serde_json::from_value::<ImageHistoryEntry>(last.clone()) {
            state.hfr = entry.hfr;
            state.stars = entry.stars;
            if entry.exposure_time > 0.0 {
                state.exposure_total = entry.exposure_time;
            }
        }
    }
    if count > state.image_count && state.image_count > 0 {
        state.new_image_available = true;
        state.ui_refresh_needed = true;
    }
    state.image_count = count;
}

/// `profile/show`: static profile fields.
pub fn parse_profile(value: &Value) -> Option<ProfileInfo> {
    let show = parse::<ProfileShow>(value)?;
    Some(ProfileInfo {
        profile_name: show.name,
        telescope_name: show.telescope_settings.name,
    })
}

// ─────────────────────────────────────────────────────────────────
// Fetcher tables
// ─────────────────────────────────────────────────────────────────

/// Uniform apply-function shape shared by every fetcher.
pub type ApplyFn = fn(&Value, &mut InstanceState);

/// A named poll endpoint with its apply function.
#[derive(Clone, Copy)]
pub struct Fetcher {
    pub name: &'static str,
    pub path: &'static str,
    pub apply: ApplyFn,
}

/// Slow tier: fetched every 30 s on the active instance and on every
/// background pre-fetch.
pub const SLOW_TIER: &[Fetcher] = &[
    Fetcher {
        name: "focuser",
        path: paths::FOCUSER_INFO,
        apply: apply_focuser_info,
    },
    Fetcher {
        name: "mount",
        path: paths::MOUNT_INFO,
        apply: apply_mount_info,
    },
    Fetcher {
        name: "switch",
        path: paths::SWITCH_INFO,
        apply: apply_switch_info,
    },
    Fetcher {
        name: "safetymonitor",
        path: paths::SAFETY_INFO,
        apply: apply_safety_info,
    },
];

/// Event-gated tier: polled only while the event channel is down, because
/// the socket events own these fields otherwise.
pub const EVENT_FALLBACK_TIER: &[Fetcher] = &[
    Fetcher {
        name: "image-history",
        path: paths::IMAGE_HISTORY,
        apply: apply_image_history,
    },
    Fetcher {
        name: "filterwheel",
        path: paths::FILTERWHEEL_INFO,
        apply: apply_filterwheel_selected,
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wrap(inner: Value) -> Value {
        json!({ "Response": inner, "Error": "", "StatusCode": 200, "Success": true })
    }

    // -- envelope ------------------------------------------------------------

    #[test]
    fn test_response_unwraps_envelope() {
        let v = wrap(json!({"Connected": true}));
        assert_eq!(response(&v).unwrap()["Connected"], json!(true));
    }

    #[test]
    fn test_response_rejects_failed_envelope() {
        let v = json!({ "Response": {}, "Error": "camera not connected", "Success": false });
        assert!(response(&v).is_none());
    }

    #[test]
    fn test_response_tolerates_bare_payload() {
        let v = json!({"Connected": true});
        assert_eq!(response(&v).unwrap()["Connected"], json!(true));
    }

    // -- camera --------------------------------------------------------------

    #[test]
    fn test_apply_camera_info_exposing() {
        let mut state = InstanceState::new();
        let v = wrap(json!({
            "Connected": true,
            "Temperature": -10.2,
            "CoolerPower": 43.0,
            "IsExposing": true,
            "ExposureTotalTime": 300.0,
            "RemainingExposureTime": 120.0,
            "ExposureEndTime": 1700000120,
        }));
        apply_camera_info(&v, &mut state);
        assert!(state.connected);
        assert_eq!(state.camera_temp, -10.2);
        assert_eq!(state.cooler_power, 43.0);
        assert_eq!(state.exposure_total, 300.0);
        assert_eq!(state.exposure_current, -120.0);
        assert_eq!(state.exposure_end_epoch, 1700000120);
    }

    #[test]
    fn test_apply_camera_info_idle_clears_end_epoch() {
        let mut state = InstanceState::new();
        state.exposure_end_epoch = 12345;
        let v = wrap(json!({"Connected": true, "IsExposing": false}));
        apply_camera_info(&v, &mut state);
        assert_eq!(state.exposure_end_epoch, 0);
    }

    #[test]
    fn test_apply_camera_info_garbage_leaves_state() {
        let mut state = InstanceState::new();
        state.camera_temp = -5.0;
        apply_camera_info(&json!("nonsense"), &mut state);
        assert_eq!(state.camera_temp, -5.0);
    }

    // -- guider --------------------------------------------------------------

    #[test]
    fn test_apply_guider_info() {
        let mut state = InstanceState::new();
        let v = wrap(json!({
            "Connected": true,
            "RMSError": {
                "Total": {"Arcseconds": 0.62},
                "RA": {"Arcseconds": 0.41},
                "Dec": {"Arcseconds": 0.47},
            }
        }));
        apply_guider_info(&v, &mut state);
        assert_eq!(state.rms.total, 0.62);
        assert_eq!(state.rms.ra, 0.41);
        assert_eq!(state.rms.dec, 0.47);
    }

    #[test]
    fn test_apply_guider_info_disconnected_keeps_last_rms() {
        let mut state = InstanceState::new();
        state.rms.total = 0.5;
        let v = wrap(json!({"Connected": false, "RMSError": {"Total": {"Arcseconds": 0.0}}}));
        apply_guider_info(&v, &mut state);
        assert_eq!(state.rms.total, 0.5);
    }

    // -- filter wheel --------------------------------------------------------

    #[test]
    fn test_apply_filterwheel_selected() {
        let mut state = InstanceState::new();
        let v = wrap(json!({
            "Connected": true,
            "SelectedFilter": {"Name": "Ha"},
            "AvailableFilters": [{"Name": "L"}, {"Name": "Ha"}],
        }));
        apply_filterwheel_selected(&v, &mut state);
        assert_eq!(state.current_filter, "Ha");
    }

    #[test]
    fn test_parse_filter_names() {
        let v = wrap(json!({
            "Connected": true,
            "AvailableFilters": [{"Name": "L"}, {"Name": "R"}, {"Name": ""}],
        }));
        assert_eq!(parse_filter_names(&v).unwrap(), vec!["L", "R"]);
    }

    // -- focuser / mount -----------------------------------------------------

    #[test]
    fn test_apply_focuser_info() {
        let mut state = InstanceState::new();
        let v = wrap(json!({"Connected": true, "Position": 15230}));
        apply_focuser_info(&v, &mut state);
        assert_eq!(state.focuser_position, 15230);
    }

    #[test]
    fn test_apply_mount_info() {
        let mut state = InstanceState::new();
        let v = wrap(json!({"Connected": true, "TimeToMeridianFlipString": "02:15:33"}));
        apply_mount_info(&v, &mut state);
        assert_eq!(state.meridian_flip, "02:15:33");
    }

    // -- switch --------------------------------------------------------------

    #[test]
    fn test_apply_switch_info_maps_gauges_and_pwm() {
        let mut state = InstanceState::new();
        let v = wrap(json!({
            "Connected": true,
            "ReadonlySwitches": [
                {"Name": "Input Voltage", "Value": 12.4},
                {"Name": "Total Current", "Value": 3.1},
                {"Name": "Total Power", "Value": 38.4},
            ],
            "WritableSwitches": [
                {"Name": "Dew Heater A", "Value": 40.0},
                {"Name": "Dew Heater B", "Value": 0.0},
            ],
        }));
        apply_switch_info(&v, &mut state);
        assert_eq!(state.power.input_voltage, 12.4);
        assert_eq!(state.power.total_current, 3.1);
        assert_eq!(state.power.total_watts, 38.4);
        assert_eq!(state.power.pwm.len(), 2);
        assert_eq!(state.power.pwm[0].name, "Dew Heater A");
        assert_eq!(state.power.pwm[0].value, 40.0);
    }

    #[test]
    fn test_apply_switch_info_caps_pwm_outputs() {
        let mut state = InstanceState::new();
        let outputs: Vec<Value> = (0..6)
            .map(|i| json!({"Name": format!("Out {i}"), "Value": 10.0 * i as f64}))
            .collect();
        let v = wrap(json!({"Connected": true, "WritableSwitches": outputs}));
        apply_switch_info(&v, &mut state);
        assert_eq!(state.power.pwm.len(), MAX_PWM_OUTPUTS);
    }

    // -- safety --------------------------------------------------------------

    #[test]
    fn test_apply_safety_info() {
        let mut state = InstanceState::new();
        let v = wrap(json!({"Connected": true, "IsSafe": true}));
        apply_safety_info(&v, &mut state);
        assert!(state.safety_connected);
        assert!(state.is_safe);

        let v = wrap(json!({"Connected": false, "IsSafe": true}));
        apply_safety_info(&v, &mut state);
        assert!(!state.is_safe);
    }

    // -- image history -------------------------------------------------------

    #[test]
    fn test_apply_image_history_updates_stats() {
        let mut state = InstanceState::new();
        let v = wrap(json!([
            {"HFR": 2.8, "Stars": 420, "ExposureTime": 180.0},
            {"HFR": 2.6, "Stars": 451, "ExposureTime": 180.0},
        ]));
        apply_image_history(&v, &mut state);
        assert_eq!(state.hfr, 2.6);
        assert_eq!(state.stars, 451);
        assert_eq!(state.exposure_total, 180.0);
        assert_eq!(state.image_count, 2);
        // First observation never raises the new-image edge.
        assert!(!state.new_image_available);
    }

    #[test]
    fn test_apply_image_history_new_image_edge_on_growth() {
        let mut state = InstanceState::new();
        state.image_count = 2;
        let v = wrap(json!([
            {"HFR": 2.8, "Stars": 420},
            {"HFR": 2.6, "Stars": 451},
            {"HFR": 2.6, "Stars": 451},
        ]));
        apply_image_history(&v, &mut state);
        assert!(state.new_image_available, "identical stats must still count");
        assert_eq!(state.image_count, 3);
    }

    // -- profile -------------------------------------------------------------

    #[test]
    fn test_parse_profile() {
        let v = wrap(json!({
            "Name": "Deep Sky Rig",
            "TelescopeSettings": {"Name": "Esprit 100"},
        }));
        let info = parse_profile(&v).unwrap();
        assert_eq!(info.profile_name, "Deep Sky Rig");
        assert_eq!(info.telescope_name, "Esprit 100");
    }

    // -- tables --------------------------------------------------------------

    #[test]
    fn test_fetcher_tables_are_complete() {
        let slow: Vec<&str> = SLOW_TIER.iter().map(|f| f.name).collect();
        assert_eq!(slow, vec!["focuser", "mount", "switch", "safetymonitor"]);

        let fallback: Vec<&str> = EVENT_FALLBACK_TIER.iter().map(|f| f.name).collect();
        assert_eq!(fallback, vec!["image-history", "filterwheel"]);
    }

    #[test]
    fn test_prepared_image_path() {
        assert_eq!(
            paths::prepared_image(480, 480, 80),
            "prepared-image?resize=true&size=480x480&quality=80&autoPrepare=true"
        );
    }
}
