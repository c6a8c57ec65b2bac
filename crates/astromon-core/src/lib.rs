//! # astromon-core - Core Domain Types
//!
//! Foundation crate for astromon. Provides the per-instance telemetry record,
//! error handling, the color model, and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Telemetry (`telemetry`)
//! - [`InstanceState`] - Fused live state of one remote automation server
//! - [`PowerReadings`], [`PwmOutput`], [`RmsError`] - Equipment sub-records
//! - [`status`] - The normalized sequence-status string set
//!
//! ### Colors (`color`)
//! - [`Rgb`] - 24-bit color with hex parsing and brightness scaling
//! - [`default_filter_color()`] - Built-in per-filter default colors
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with retryable/recoverable classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use astromon_core::prelude::*;
//! ```

pub mod color;
pub mod error;
pub mod logging;
pub mod telemetry;

/// Prelude for common imports used throughout all astromon crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use color::{default_filter_color, Rgb};
pub use error::{Error, Result, ResultExt};
pub use telemetry::{
    format_hmm, format_mmss, status, InstanceState, PowerReadings, PwmOutput, RmsError,
    MAX_FILTERS, MAX_PWM_OUTPUTS,
};
