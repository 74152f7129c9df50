//! The bulk sink
//!
//! Accumulates index actions and flushes them when the batch reaches its
//! size limit or the flush interval elapses, whichever comes first. At most
//! a configured number of flushes are in flight at once; submitting blocks
//! the caller while the limit is reached. Failed batches are logged per
//! rejected item and never retried or reordered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use logalike_processor::Output;
use logalike_types::{format_utc_timestamp, Clock, Message, SystemClock, TIMESTAMP_FIELD};

use crate::config::BulkConfig;
use crate::error::Result;
use crate::transport::{BulkTransport, IndexAction};

/// Batching consumer writing messages to a remote document store through a
/// [`BulkTransport`]. Implements the pipeline's [`Output`] contract.
pub struct BulkSink<T: BulkTransport> {
    inner: Arc<SinkInner<T>>,
    closed: AtomicBool,
}

struct SinkInner<T> {
    transport: T,
    config: BulkConfig,
    clock: Arc<dyn Clock>,
    buffer: Mutex<Vec<IndexAction>>,
    in_flight: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl<T: BulkTransport> BulkSink<T> {
    /// Creates a sink flushing on the system clock.
    pub fn new(transport: T, config: BulkConfig) -> Result<Self> {
        Self::with_clock(transport, config, Arc::new(SystemClock))
    }

    /// Creates a sink reading timestamps from the given clock.
    pub fn with_clock(transport: T, config: BulkConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let in_flight = Arc::new(Semaphore::new(config.max_concurrent_flushes));
        let inner = Arc::new(SinkInner {
            transport,
            config,
            clock,
            buffer: Mutex::new(Vec::new()),
            in_flight,
            cancel: CancellationToken::new(),
        });

        Self::spawn_flush_ticker(Arc::clone(&inner));
        debug!(
            flush_interval_ms = inner.config.flush_interval_ms,
            max_actions = inner.config.max_actions,
            "bulk sink started"
        );

        Ok(BulkSink {
            inner,
            closed: AtomicBool::new(false),
        })
    }

    fn spawn_flush_ticker(inner: Arc<SinkInner<T>>) {
        let period = inner.config.flush_interval();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = ticker.tick() => SinkInner::flush_pending(&inner).await,
                }
            }
        });
    }

    /// Number of actions waiting in the current batch.
    pub async fn pending_actions(&self) -> usize {
        self.inner.buffer.lock().await.len()
    }
}

#[async_trait]
impl<T: BulkTransport> Output for BulkSink<T> {
    /// Indexes the message once per declared destination (or once to the
    /// default destination), normalising timestamps on the way. Messages
    /// accepted after `close` are dropped; the final flush has already run
    /// and the transport may be gone.
    async fn accept(&self, message: Message) {
        if self.closed.load(Ordering::SeqCst) {
            trace!("sink is closed, dropping message");
            return;
        }
        for action in self.inner.actions_for(&message) {
            SinkInner::submit(&self.inner, action).await;
        }
    }

    /// Flushes the remaining partial batch and waits for in-flight flushes
    /// to finish. Idempotent.
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing bulk sink");
        self.inner.cancel.cancel();
        SinkInner::flush_pending(&self.inner).await;

        // Holding every permit means no flush is still in flight.
        let all = self.inner.config.max_concurrent_flushes as u32;
        if let Ok(permits) = self.inner.in_flight.acquire_many(all).await {
            drop(permits);
        }
        self.inner.transport.close().await;
    }
}

impl<T: BulkTransport> SinkInner<T> {
    /// Builds one index action per destination the message declares, or a
    /// single action to the default destination.
    fn actions_for(&self, message: &Message) -> Vec<IndexAction> {
        let now = self.clock.now();
        let date = now.date_naive();
        let document = self.document_of(message, now);

        let destinations = message.destinations();
        if destinations.is_empty() {
            trace!(
                destination = %self.config.default_destination,
                "message carries no destination, using default"
            );
            return vec![IndexAction::new(
                self.config.default_destination.wire_name(date),
                self.config.doc_type.clone(),
                document,
            )];
        }

        destinations
            .iter()
            .map(|destination| {
                IndexAction::new(
                    destination.wire_name(date),
                    self.config.doc_type.clone(),
                    document.clone(),
                )
            })
            .collect()
    }

    /// Renders the message as a JSON document. Timestamp fields serialise
    /// in canonical wire form; a missing `@timestamp` is synthesised from
    /// the clock.
    fn document_of(&self, message: &Message, now: chrono::DateTime<chrono::Utc>) -> Map<String, Value> {
        let mut document = Map::new();
        for (name, value) in message.fields() {
            let rendered = serde_json::to_value(value).unwrap_or(Value::Null);
            document.insert(name.to_owned(), rendered);
        }
        document
            .entry(TIMESTAMP_FIELD.to_owned())
            .or_insert_with(|| Value::String(format_utc_timestamp(&now)));
        document
    }

    async fn submit(inner: &Arc<Self>, action: IndexAction) {
        let batch = {
            let mut buffer = inner.buffer.lock().await;
            buffer.push(action);
            if buffer.len() >= inner.config.max_actions {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            Self::dispatch(inner, batch).await;
        }
    }

    async fn flush_pending(inner: &Arc<Self>) {
        let batch = {
            let mut buffer = inner.buffer.lock().await;
            if buffer.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut *buffer))
            }
        };
        if let Some(batch) = batch {
            Self::dispatch(inner, batch).await;
        }
    }

    /// Sends one batch on a background task. Blocks the caller while the
    /// in-flight limit is reached.
    async fn dispatch(inner: &Arc<Self>, batch: Vec<IndexAction>) {
        let Ok(permit) = Arc::clone(&inner.in_flight).acquire_owned().await else {
            return;
        };
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let _permit = permit;
            let size = batch.len();
            debug!(size, "dispatching bulk batch");
            match inner.transport.execute(&batch).await {
                Ok(response) => {
                    for failure in response.failures {
                        error!(
                            id = %failure.id,
                            destination = %failure.destination,
                            reason = %failure.reason,
                            "bulk item rejected"
                        );
                    }
                }
                Err(transport_error) => {
                    for action in &batch {
                        error!(
                            id = %action.id,
                            destination = %action.destination,
                            %transport_error,
                            "bulk action failed"
                        );
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use chrono::TimeZone;

    use logalike_types::{Destination, ManualClock};

    use crate::error::TransportError;
    use crate::transport::{BulkItemFailure, BulkResponse};

    #[derive(Default)]
    struct RecordingTransport {
        batches: StdMutex<Vec<Vec<IndexAction>>>,
        reject_all: bool,
    }

    #[async_trait]
    impl BulkTransport for RecordingTransport {
        async fn execute(&self, actions: &[IndexAction]) -> std::result::Result<BulkResponse, TransportError> {
            self.batches.lock().unwrap().push(actions.to_vec());
            if self.reject_all {
                Ok(BulkResponse {
                    failures: actions
                        .iter()
                        .map(|action| BulkItemFailure {
                            id: action.id,
                            destination: action.destination.clone(),
                            reason: "mapping conflict".into(),
                        })
                        .collect(),
                })
            } else {
                Ok(BulkResponse::ok())
            }
        }
    }

    struct SlowTransport {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BulkTransport for SlowTransport {
        async fn execute(&self, _actions: &[IndexAction]) -> std::result::Result<BulkResponse, TransportError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(BulkResponse::ok())
        }
    }

    fn sink_with(
        config: BulkConfig,
    ) -> (BulkSink<Arc<RecordingTransport>>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let sink = BulkSink::new(Arc::clone(&transport), config).unwrap();
        (sink, transport)
    }

    fn body(text: &str) -> Message {
        Message::untyped().put("body", text).unwrap()
    }

    #[tokio::test]
    async fn test_batch_flushes_when_size_limit_reached() {
        let config = BulkConfig {
            max_actions: 2,
            flush_interval_ms: 3_600_000,
            ..Default::default()
        };
        let (sink, transport) = sink_with(config);

        sink.accept(body("a")).await;
        assert_eq!(sink.pending_actions().await, 1);
        sink.accept(body("b")).await;

        // The size-triggered flush runs on a background task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let batches = transport.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn test_interval_flushes_partial_batch() {
        let config = BulkConfig {
            max_actions: 3,
            flush_interval_ms: 1_000,
            max_concurrent_flushes: 1,
            ..Default::default()
        };
        let (sink, transport) = sink_with(config);

        sink.accept(body("a")).await;
        sink.accept(body("b")).await;
        assert!(transport.batches.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let batches = transport.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn test_close_flushes_remainder() {
        let config = BulkConfig {
            flush_interval_ms: 3_600_000,
            ..Default::default()
        };
        let (sink, transport) = sink_with(config);

        sink.accept(body("a")).await;
        sink.close().await;

        let batches = transport.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[tokio::test]
    async fn test_one_action_per_declared_destination() {
        let config = BulkConfig {
            flush_interval_ms: 3_600_000,
            ..Default::default()
        };
        let (sink, transport) = sink_with(config);

        let message = body("multi")
            .with_destination(Destination::daily("alpha").unwrap())
            .with_destination(Destination::constant("beta").unwrap());
        sink.accept(message).await;
        sink.close().await;

        let batches = transport.batches.lock().unwrap();
        assert_eq!(batches[0].len(), 2);
        assert!(batches[0][0].destination.starts_with("alpha-"));
        assert_eq!(batches[0][1].destination, "beta");
    }

    #[tokio::test]
    async fn test_default_destination_and_doc_type() {
        let start = chrono::Utc.with_ymd_and_hms(2015, 9, 30, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let transport = Arc::new(RecordingTransport::default());
        let sink = BulkSink::with_clock(
            Arc::clone(&transport),
            BulkConfig {
                flush_interval_ms: 3_600_000,
                ..Default::default()
            },
            clock,
        )
        .unwrap();

        sink.accept(body("plain")).await;
        sink.close().await;

        let batches = transport.batches.lock().unwrap();
        let action = &batches[0][0];
        assert_eq!(action.destination, "logalike-2015.09.30");
        assert_eq!(action.doc_type, "logalike");
    }

    #[tokio::test]
    async fn test_timestamps_are_normalised_on_the_wire() {
        let config = BulkConfig {
            flush_interval_ms: 3_600_000,
            ..Default::default()
        };
        let (sink, transport) = sink_with(config);

        let ts = chrono::Utc
            .with_ymd_and_hms(2015, 9, 30, 12, 31, 21)
            .unwrap()
            .fixed_offset();
        let message = Message::untyped().put_timestamp(ts).unwrap();
        sink.accept(message).await;
        sink.close().await;

        let batches = transport.batches.lock().unwrap();
        let document = &batches[0][0].document;
        assert_eq!(
            document.get("@timestamp"),
            Some(&Value::String("2015-09-30T12:31:21.000+0000".into()))
        );
    }

    #[tokio::test]
    async fn test_missing_timestamp_is_synthesised_from_clock() {
        let start = chrono::Utc.with_ymd_and_hms(2015, 9, 30, 12, 31, 21).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let transport = Arc::new(RecordingTransport::default());
        let sink = BulkSink::with_clock(
            Arc::clone(&transport),
            BulkConfig {
                flush_interval_ms: 3_600_000,
                ..Default::default()
            },
            clock,
        )
        .unwrap();

        sink.accept(body("no timestamp")).await;
        sink.close().await;

        let batches = transport.batches.lock().unwrap();
        let document = &batches[0][0].document;
        assert_eq!(
            document.get("@timestamp"),
            Some(&Value::String("2015-09-30T12:31:21.000+0000".into()))
        );
    }

    #[tokio::test]
    async fn test_in_flight_flushes_are_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let transport = Arc::new(SlowTransport {
            active: Arc::clone(&active),
            peak: Arc::clone(&peak),
        });
        let sink = BulkSink::new(
            transport,
            BulkConfig {
                max_actions: 1,
                max_concurrent_flushes: 2,
                flush_interval_ms: 3_600_000,
                ..Default::default()
            },
        )
        .unwrap();

        for i in 0..6 {
            sink.accept(body(&format!("m{i}"))).await;
        }
        sink.close().await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_item_failures_do_not_propagate() {
        let transport = Arc::new(RecordingTransport {
            reject_all: true,
            ..Default::default()
        });
        let sink = BulkSink::new(
            Arc::clone(&transport),
            BulkConfig {
                flush_interval_ms: 3_600_000,
                ..Default::default()
            },
        )
        .unwrap();

        // Rejected items are logged, not surfaced; accept and close stay
        // infallible.
        sink.accept(body("rejected")).await;
        sink.close().await;
        assert_eq!(transport.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_accept_after_close_is_dropped() {
        let (sink, transport) = sink_with(BulkConfig {
            flush_interval_ms: 3_600_000,
            ..Default::default()
        });
        sink.close().await;
        sink.accept(body("late")).await;

        assert_eq!(sink.pending_actions().await, 0);
        assert!(transport.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (sink, transport) = sink_with(BulkConfig {
            flush_interval_ms: 3_600_000,
            ..Default::default()
        });
        sink.accept(body("a")).await;
        sink.close().await;
        sink.close().await;
        assert_eq!(transport.batches.lock().unwrap().len(), 1);
    }
}
