//! Per-emitter throttling
//!
//! Drops messages from emitters exceeding a per-window limit. An emitter is
//! the logical source of messages identified by a fingerprint (a host, a
//! process). Counters run in the shared [`WindowManager`]; an emitter whose
//! closed window exceeded the limit is recorded as throttled and its
//! messages are dropped until a later window falls back under the limit.
//!
//! Counting is unconditional, so an emitter is still measured while being
//! dropped. Transitions are reported to a [`ThrottleListener`] which may
//! turn them into notification messages on the output stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use logalike_types::{Clock, Message, SystemClock};

use crate::config::ThrottleConfig;
use crate::error::{ProcessorError, Result};
use crate::pipeline::chain::{MessageStream, Processor};
use crate::window::{Fingerprint, WindowManager};

const OUTPUT_CAPACITY: usize = 64;

/// Reacts to emitter throttling transitions. Each callback may return a
/// notification message, emitted on the processor's output stream.
///
/// `start_time` is the instant the emitter was first recorded over-limit;
/// `count` is the message count of the window that triggered the
/// transition.
pub trait ThrottleListener: Send + Sync {
    fn on_start(
        &self,
        _start_time: DateTime<Utc>,
        _fingerprint: &str,
        _count: u64,
    ) -> Option<Message> {
        None
    }

    fn on_recurring(
        &self,
        _start_time: DateTime<Utc>,
        _fingerprint: &str,
        _count: u64,
    ) -> Option<Message> {
        None
    }

    fn on_end(
        &self,
        _start_time: DateTime<Utc>,
        _fingerprint: &str,
        _count: u64,
    ) -> Option<Message> {
        None
    }
}

/// A listener that never produces notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentListener;

impl ThrottleListener for SilentListener {}

/// The throttle processor. Build via [`ThrottleProcessor::builder`].
pub struct ThrottleProcessor {
    windows: Arc<WindowManager>,
    fingerprint: Fingerprint,
    limit: u64,
    listener: Arc<dyn ThrottleListener>,
    throttled: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
    clock: Arc<dyn Clock>,
}

impl ThrottleProcessor {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Whether the emitter is currently recorded as throttled.
    pub fn is_throttled(&self, fingerprint: &str) -> bool {
        self.throttled.lock().unwrap().contains_key(fingerprint)
    }
}

impl Processor for ThrottleProcessor {
    fn apply(&self, input: MessageStream) -> MessageStream {
        let (tx, rx) = mpsc::channel(OUTPUT_CAPACITY);

        let windows = Arc::clone(&self.windows);
        let fingerprint = Arc::clone(&self.fingerprint);
        let throttled = Arc::clone(&self.throttled);
        let limit = self.limit;
        let pass_tx = tx.clone();
        tokio::spawn(async move {
            let mut input = input;
            while let Some(message) = input.next().await {
                let key = (fingerprint)(&message);
                // Count unconditionally so over-limit emitters are measured
                // even while being dropped.
                let count = windows.increment(&message);
                let blocked = throttled.lock().unwrap().contains_key(&key);
                if blocked || count > limit {
                    trace!(key = %key, count, "dropping over-limit message");
                    continue;
                }
                if pass_tx.send(message).await.is_err() {
                    break;
                }
            }
        });

        let mut closed = self.windows.closed_stream();
        let fingerprint = Arc::clone(&self.fingerprint);
        let throttled = Arc::clone(&self.throttled);
        let listener = Arc::clone(&self.listener);
        let clock = Arc::clone(&self.clock);
        let limit = self.limit;
        tokio::spawn(async move {
            while let Some(window) = closed.next().await {
                let key = (fingerprint)(window.message());
                let count = window.count();
                // The record read-modify-write and the listener call are
                // covered by one lock so transitions are serialised per key.
                let notification = {
                    let mut record = throttled.lock().unwrap();
                    let already_throttled = record.contains_key(&key);
                    if count > limit && already_throttled {
                        let start = record[&key];
                        listener.on_recurring(start, &key, count)
                    } else if count > limit {
                        let start = clock.now();
                        record.insert(key.clone(), start);
                        debug!(key = %key, count, limit, "throttling emitter");
                        listener.on_start(start, &key, count)
                    } else if already_throttled {
                        let start = record.remove(&key).unwrap_or_else(|| clock.now());
                        debug!(key = %key, count, limit, "releasing emitter");
                        listener.on_end(start, &key, count)
                    } else {
                        None
                    }
                };
                if let Some(message) = notification {
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
            }
        });

        ReceiverStream::new(rx).boxed()
    }

    fn shutdown(&self) {
        self.windows.close();
    }
}

/// Builder for [`ThrottleProcessor`]. The cycle, limit, and fingerprint are
/// required; the listener defaults to [`SilentListener`].
pub struct Builder {
    cycle: Option<Duration>,
    limit: Option<u64>,
    fingerprint: Option<Fingerprint>,
    listener: Arc<dyn ThrottleListener>,
    clock: Arc<dyn Clock>,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            cycle: None,
            limit: None,
            fingerprint: None,
            listener: Arc::new(SilentListener),
            clock: Arc::new(SystemClock),
        }
    }
}

impl Builder {
    pub fn cycle(mut self, cycle: Duration) -> Self {
        self.cycle = Some(cycle);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_config(mut self, config: ThrottleConfig) -> Self {
        self.cycle = Some(config.cycle_duration());
        self.limit = Some(config.limit);
        self
    }

    pub fn fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Shorthand for fingerprinting by the string value of a field.
    pub fn fingerprint_field(self, field: impl Into<String>) -> Self {
        self.fingerprint(crate::window::field_fingerprint(field))
    }

    pub fn listener(mut self, listener: impl ThrottleListener + 'static) -> Self {
        self.listener = Arc::new(listener);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<ThrottleProcessor> {
        let cycle = self
            .cycle
            .ok_or_else(|| ProcessorError::configuration("throttle cycle must be set"))?;
        if cycle.is_zero() {
            return Err(ProcessorError::configuration(
                "throttle cycle cannot be zero or less",
            ));
        }
        let limit = self
            .limit
            .ok_or_else(|| ProcessorError::configuration("throttle limit must be set"))?;
        let fingerprint = self
            .fingerprint
            .ok_or_else(|| ProcessorError::configuration("fingerprint must be set"))?;

        let windows = WindowManager::with_clock(
            cycle,
            Arc::clone(&fingerprint),
            Arc::clone(&self.clock),
        )?;
        debug!(?cycle, limit, "throttle processor initialised");

        Ok(ThrottleProcessor {
            windows: Arc::new(windows),
            fingerprint,
            limit,
            listener: self.listener,
            throttled: Arc::new(Mutex::new(HashMap::new())),
            clock: self.clock,
        })
    }
}
