//! # astromon-app - State fusion and orchestration
//!
//! The engine that drives the display:
//!
//! - [`settings`] - Versioned persistent settings store with the forward
//!   migration chain and the change-notification edge
//! - [`json_cache`] - Lazy parse cache of the user-editable JSON blobs plus
//!   filter/threshold color evaluation and filter sync
//! - [`connection`] - Per-instance connection-health state machine with the
//!   time-based offline timeout
//! - [`instance`] - Per-instance handle (state mutex, poll bookkeeping,
//!   event channel)
//! - [`scheduler`] - The cooperative polling loop
//! - [`ui`] - Page model and the renderer/radio collaborator traits
//! - [`config_api`] - Flat-JSON admin configuration surface

pub mod config_api;
pub mod connection;
pub mod instance;
pub mod json_cache;
pub mod scheduler;
pub mod settings;
pub mod ui;

pub use config_api::{apply_config_json, config_json, ApplyMode};
pub use connection::{ConnState, ConnectionManager};
pub use instance::{Instance, PollState};
pub use json_cache::{BlobKind, JsonCache, ThresholdSpec};
pub use scheduler::PollingScheduler;
pub use settings::{Settings, SettingsStore, MAX_INSTANCES, SCHEMA_VERSION};
pub use ui::{next_rotation_page, Page, UiLink, WifiLink};
