//! # astromon-nina - Remote server protocol layer
//!
//! Talks to N.I.N.A.-style astrophotography-automation servers:
//!
//! - [`http`] - Shared REST poll client with the retry ladder and the
//!   keep-alive discipline, plus the capped prepared-image download
//! - [`endpoints`] - Typed apply-functions and the named fetcher tables for
//!   every `/v2/api` poll endpoint
//! - [`sequence`] - The `sequence/json` tree walker
//! - [`protocol`] - Event-socket frame parsing and state application
//! - [`event_channel`] - The per-instance socket task with externally
//!   driven reconnect

pub mod endpoints;
pub mod event_channel;
pub mod http;
pub mod protocol;
pub mod sequence;

pub use endpoints::{Fetcher, ProfileInfo, EVENT_FALLBACK_TIER, SLOW_TIER};
pub use event_channel::{EventChannel, ReconnectPolicy};
pub use http::{endpoint_url, PollClient, IMAGE_MAX_BYTES};
pub use protocol::{parse_event, socket_url, ServerEvent};
pub use sequence::{walk_sequence, BindingCondition, SequenceSummary, SmartExposure};
