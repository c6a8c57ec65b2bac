//! Event-socket protocol handling.
//!
//! The server pushes newline-free JSON objects of the shape
//! `{"Response": {"Event": "<NAME>", ...}}` over a persistent text-frame
//! socket. Parsing happens on the socket task; the resulting
//! [`ServerEvent`] is applied to the instance state under its mutex.

use astromon_core::prelude::*;
use astromon_core::telemetry::{status, InstanceState};
use serde_json::Value;
use url::Url;

/// Path of the event socket on the server.
const SOCKET_PATH: &str = "/v2/socket";

/// Derive the event-socket URL from a REST base URL.
///
/// `http://host:1888/v2/api/` becomes `ws://host:1888/v2/socket`.
pub fn socket_url(base_url: &str) -> Result<String> {
    let mut url = Url::parse(base_url).map_err(|e| Error::config(format!("bad base URL: {e}")))?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| Error::config("base URL scheme cannot carry a socket"))?;
    url.set_path(SOCKET_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

/// A decoded server-side event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ImageSave {
        hfr: f64,
        stars: u32,
        exposure_time: f64,
        target_name: String,
        telescope_name: String,
    },
    FilterChanged {
        name: String,
    },
    SequenceStarting,
    SequenceFinished,
    GuiderDither,
    GuiderStart,
    NewTargetStart {
        target_name: String,
    },
    /// Recognized frame, unrecognized event name.
    Unknown(String),
}

fn str_field(node: &Value, key: &str) -> String {
    node.get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Parse one text frame into a [`ServerEvent`].
///
/// Returns `None` for frames that are not event objects (responses to
/// subscriptions, keep-alives, malformed JSON).
pub fn parse_event(text: &str) -> Option<ServerEvent> {
    let value: Value = serde_json::from_str(text).ok()?;
    let payload = value.get("Response")?;
    let name = payload.get("Event").and_then(Value::as_str)?;

    let event = match name {
        "IMAGE-SAVE" => {
            let stats = payload.get("ImageStatistics");
            let num = |key: &str| {
                stats
                    .and_then(|s| s.get(key))
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)
            };
            ServerEvent::ImageSave {
                hfr: num("HFR"),
                stars: stats
                    .and_then(|s| s.get("Stars"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32,
                exposure_time: num("ExposureTime"),
                target_name: stats.map(|s| str_field(s, "TargetName")).unwrap_or_default(),
                telescope_name: stats
                    .map(|s| str_field(s, "TelescopeName"))
                    .unwrap_or_default(),
            }
        }
        "FILTERWHEEL-CHANGED" => ServerEvent::FilterChanged {
            name: payload
                .get("New")
                .map(|n| str_field(n, "Name"))
                .unwrap_or_default(),
        },
        "SEQUENCE-STARTING" => ServerEvent::SequenceStarting,
        "SEQUENCE-FINISHED" => ServerEvent::SequenceFinished,
        "GUIDER-DITHER" => ServerEvent::GuiderDither,
        "GUIDER-START" => ServerEvent::GuiderStart,
        "TS-NEWTARGETSTART" => ServerEvent::NewTargetStart {
            target_name: str_field(payload, "TargetName"),
        },
        other => ServerEvent::Unknown(other.to_string()),
    };

    Some(event)
}

/// Apply a decoded event to the instance state.
///
/// Returns `true` when the state was mutated (callers then wake the
/// scheduler). Every applied event sets `ui_refresh_needed`.
pub fn apply_event(event: &ServerEvent, state: &mut InstanceState) -> bool {
    match event {
        ServerEvent::ImageSave {
            hfr,
            stars,
            exposure_time,
            target_name,
            telescope_name,
        } => {
            // The wheel may already have advanced to the next filter by the
            // time the save lands, so current_filter stays untouched here.
            state.hfr = *hfr;
            state.stars = *stars;
            if *exposure_time > 0.0 {
                state.exposure_total = *exposure_time;
            }
            if !target_name.is_empty() {
                state.target_name = target_name.clone();
            }
            if !telescope_name.is_empty() {
                state.telescope_name = telescope_name.clone();
            }
            state.image_count = state.image_count.saturating_add(1);
            state.new_image_available = true;
        }
        ServerEvent::FilterChanged { name } => {
            if name.is_empty() {
                return false;
            }
            state.current_filter = name.clone();
        }
        ServerEvent::SequenceStarting => {
            state.status = status::RUNNING.to_string();
            state.sequence_poll_needed = true;
        }
        ServerEvent::SequenceFinished => {
            state.status = status::FINISHED.to_string();
        }
        ServerEvent::GuiderDither => {
            state.is_dithering = true;
        }
        ServerEvent::GuiderStart => {
            state.is_dithering = false;
        }
        ServerEvent::NewTargetStart { target_name } => {
            if target_name.is_empty() {
                return false;
            }
            state.target_name = target_name.clone();
        }
        ServerEvent::Unknown(name) => {
            debug!("ignoring unrecognized server event: {}", name);
            return false;
        }
    }

    state.ui_refresh_needed = true;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- socket_url ----------------------------------------------------------

    #[test]
    fn test_socket_url_from_rest_base() {
        assert_eq!(
            socket_url("http://astro-pc:1888/v2/api/").unwrap(),
            "ws://astro-pc:1888/v2/socket"
        );
    }

    #[test]
    fn test_socket_url_without_port() {
        assert_eq!(
            socket_url("http://10.0.0.5/v2/api/").unwrap(),
            "ws://10.0.0.5/v2/socket"
        );
    }

    #[test]
    fn test_socket_url_https_becomes_wss() {
        assert_eq!(
            socket_url("https://scope.local:8443/v2/api/").unwrap(),
            "wss://scope.local:8443/v2/socket"
        );
    }

    #[test]
    fn test_socket_url_rejects_garbage() {
        assert!(socket_url("not a url").is_err());
    }

    // -- parse_event ---------------------------------------------------------

    #[test]
    fn test_parse_image_save() {
        let frame = r#"{"Response":{"Event":"IMAGE-SAVE","ImageStatistics":{
            "HFR":2.41,"Stars":512,"ExposureTime":300.0,
            "TargetName":"M31","TelescopeName":"Esprit 100"}}}"#;
        let event = parse_event(frame).unwrap();
        assert_eq!(
            event,
            ServerEvent::ImageSave {
                hfr: 2.41,
                stars: 512,
                exposure_time: 300.0,
                target_name: "M31".to_string(),
                telescope_name: "Esprit 100".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_filterwheel_changed() {
        let frame = r#"{"Response":{"Event":"FILTERWHEEL-CHANGED","Previous":{"Name":"L"},"New":{"Name":"Ha"}}}"#;
        assert_eq!(
            parse_event(frame).unwrap(),
            ServerEvent::FilterChanged {
                name: "Ha".to_string()
            }
        );
    }

    #[test]
    fn test_parse_sequence_and_guider_events() {
        for (name, expected) in [
            ("SEQUENCE-STARTING", ServerEvent::SequenceStarting),
            ("SEQUENCE-FINISHED", ServerEvent::SequenceFinished),
            ("GUIDER-DITHER", ServerEvent::GuiderDither),
            ("GUIDER-START", ServerEvent::GuiderStart),
        ] {
            let frame = format!(r#"{{"Response":{{"Event":"{name}"}}}}"#);
            assert_eq!(parse_event(&frame).unwrap(), expected);
        }
    }

    #[test]
    fn test_parse_new_target_start() {
        let frame = r#"{"Response":{"Event":"TS-NEWTARGETSTART","TargetName":"NGC 7000"}}"#;
        assert_eq!(
            parse_event(frame).unwrap(),
            ServerEvent::NewTargetStart {
                target_name: "NGC 7000".to_string()
            }
        );
    }

    #[test]
    fn test_parse_unknown_event() {
        let frame = r#"{"Response":{"Event":"FLAT-COVER-CLOSED"}}"#;
        assert_eq!(
            parse_event(frame).unwrap(),
            ServerEvent::Unknown("FLAT-COVER-CLOSED".to_string())
        );
    }

    #[test]
    fn test_parse_non_event_frames() {
        assert!(parse_event("not json").is_none());
        assert!(parse_event(r#"{"Response":"subscribed"}"#).is_none());
        assert!(parse_event(r#"{"Other":{"Event":"IMAGE-SAVE"}}"#).is_none());
    }

    // -- apply_event ---------------------------------------------------------

    #[test]
    fn test_apply_image_save_updates_stats_not_filter() {
        let mut state = InstanceState::new();
        state.current_filter = "Ha".to_string();
        let event = ServerEvent::ImageSave {
            hfr: 2.1,
            stars: 300,
            exposure_time: 180.0,
            target_name: "M31".to_string(),
            telescope_name: "Esprit".to_string(),
        };
        assert!(apply_event(&event, &mut state));
        assert_eq!(state.hfr, 2.1);
        assert_eq!(state.stars, 300);
        assert_eq!(state.exposure_total, 180.0);
        assert_eq!(state.target_name, "M31");
        assert_eq!(state.telescope_name, "Esprit");
        assert!(state.new_image_available);
        assert!(state.ui_refresh_needed);
        // The wheel may already have moved on; filter is event-owned elsewhere.
        assert_eq!(state.current_filter, "Ha");
    }

    #[test]
    fn test_apply_image_save_bumps_image_count() {
        let mut state = InstanceState::new();
        state.image_count = 7;
        let event = ServerEvent::ImageSave {
            hfr: 0.0,
            stars: 0,
            exposure_time: 0.0,
            target_name: String::new(),
            telescope_name: String::new(),
        };
        apply_event(&event, &mut state);
        assert_eq!(state.image_count, 8);
    }

    #[test]
    fn test_apply_filter_changed() {
        let mut state = InstanceState::new();
        let event = ServerEvent::FilterChanged {
            name: "Oiii".to_string(),
        };
        assert!(apply_event(&event, &mut state));
        assert_eq!(state.current_filter, "Oiii");
    }

    #[test]
    fn test_apply_sequence_status_transitions() {
        let mut state = InstanceState::new();
        assert!(apply_event(&ServerEvent::SequenceStarting, &mut state));
        assert_eq!(state.status, status::RUNNING);
        assert!(state.sequence_poll_needed);

        assert!(apply_event(&ServerEvent::SequenceFinished, &mut state));
        assert_eq!(state.status, status::FINISHED);
    }

    #[test]
    fn test_apply_dither_flag() {
        let mut state = InstanceState::new();
        assert!(apply_event(&ServerEvent::GuiderDither, &mut state));
        assert!(state.is_dithering);
        assert!(apply_event(&ServerEvent::GuiderStart, &mut state));
        assert!(!state.is_dithering);
    }

    #[test]
    fn test_apply_unknown_is_noop() {
        let mut state = InstanceState::new();
        assert!(!apply_event(
            &ServerEvent::Unknown("MOUNT-PARKED".to_string()),
            &mut state
        ));
        assert!(!state.ui_refresh_needed);
    }
}
