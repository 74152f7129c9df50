//! Bulk egress to a remote document store
//!
//! The [`BulkSink`] coalesces accepted messages into size- and time-bounded
//! batches of index actions with a bounded number of in-flight requests.
//! The transport protocol reaching the remote store is an external
//! collaborator behind the [`BulkTransport`] contract.

pub mod bulk;
pub mod config;
pub mod error;
pub mod transport;

pub use bulk::BulkSink;
pub use config::BulkConfig;
pub use error::{Result, SinkError, TransportError};
pub use transport::{BulkItemFailure, BulkResponse, BulkTransport, IndexAction};
