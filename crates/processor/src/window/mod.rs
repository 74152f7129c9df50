//! Per-key tumbling window aggregation
//!
//! The [`WindowManager`] counts message occurrences per fingerprint key in
//! fixed-duration, non-overlapping windows. Each key has at most one open
//! window at a time; a background sweep closes expired windows and feeds
//! them to a lazy closed-window stream shared by the repetition and
//! throttle processors.

pub mod fingerprint;
pub mod manager;
pub mod types;

pub use fingerprint::{field_fingerprint, Fingerprint};
pub use manager::WindowManager;
pub use types::MessageWindow;
