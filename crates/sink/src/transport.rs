//! The transport contract
//!
//! The sink batches [`IndexAction`]s and hands whole batches to a
//! [`BulkTransport`]. The concrete protocol (HTTP bulk API, native client,
//! a test double) is up to the implementation; the sink only needs batch
//! execution with per-item failure reporting.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::TransportError;

/// One index request: a document bound for one destination.
#[derive(Debug, Clone, Serialize)]
pub struct IndexAction {
    /// Identifies the action in failure logs.
    pub id: Uuid,
    /// The destination's wire name, date suffix already applied.
    pub destination: String,
    /// Document type label attached to every action.
    pub doc_type: String,
    /// The JSON document. Timestamp fields are already in canonical wire
    /// form.
    pub document: Map<String, Value>,
}

impl IndexAction {
    pub fn new(
        destination: impl Into<String>,
        doc_type: impl Into<String>,
        document: Map<String, Value>,
    ) -> Self {
        IndexAction {
            id: Uuid::new_v4(),
            destination: destination.into(),
            doc_type: doc_type.into(),
            document,
        }
    }
}

/// Outcome of one batch execution: the batch was accepted, possibly with
/// individual items rejected.
#[derive(Debug, Clone, Default)]
pub struct BulkResponse {
    pub failures: Vec<BulkItemFailure>,
}

impl BulkResponse {
    /// A response with every item accepted.
    pub fn ok() -> Self {
        Self::default()
    }
}

/// One rejected item within an otherwise executed batch.
#[derive(Debug, Clone)]
pub struct BulkItemFailure {
    pub id: Uuid,
    pub destination: String,
    pub reason: String,
}

/// Executes batches against the remote document store.
#[async_trait]
pub trait BulkTransport: Send + Sync + 'static {
    /// Executes one batch. Item order within the batch is the submission
    /// order. Returning `Err` means the whole batch failed.
    async fn execute(&self, actions: &[IndexAction]) -> Result<BulkResponse, TransportError>;

    /// Releases transport resources. The default does nothing.
    async fn close(&self) {}
}

#[async_trait]
impl<T: BulkTransport> BulkTransport for std::sync::Arc<T> {
    async fn execute(&self, actions: &[IndexAction]) -> Result<BulkResponse, TransportError> {
        (**self).execute(actions).await
    }

    async fn close(&self) {
        (**self).close().await;
    }
}
