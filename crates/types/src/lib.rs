//! Core types and data model for the logalike pipeline
//!
//! This crate provides the fundamental data structures shared by every
//! pipeline stage: the keyed [`Message`] record with its runtime type table
//! and write policy, the [`Destination`] naming scheme for egress, and the
//! injectable [`Clock`] used by the time-dependent components.

pub mod clock;
pub mod destination;
pub mod errors;
pub mod field;
pub mod message;

pub use clock::{Clock, ManualClock, SystemClock};
pub use destination::{Destination, Frequency};
pub use errors::{Result, TypeError};
pub use field::{
    format_timestamp, format_utc_timestamp, FieldKind, FieldValue, TypePolicy, TypeTable,
};
pub use message::{Message, ERROR_FIELD, TIMESTAMP_FIELD};
