//! Repetition collapse
//!
//! Detects messages repeating within a time window. Every incoming message
//! is forwarded immediately (annotated as not-repeated), while a per-key
//! counter runs in the shared [`WindowManager`]. When a window closes, one
//! aggregate message is emitted carrying `isRepeated` and `repeatCount`
//! fields, so a burst of identical messages collapses into a single
//! aggregate per window.
//!
//! The output is the merge of the pass-through stream and the aggregate
//! stream; no ordering is promised between the two.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use logalike_types::{Clock, Message, SystemClock};

use crate::config::RepetitionConfig;
use crate::error::Result;
use crate::pipeline::chain::{MessageStream, Processor};
use crate::stateless::MapperFn;
use crate::window::{Fingerprint, WindowManager};

/// Field marking whether a message was seen more than once in its window.
pub const REPEATED_FIELD: &str = "isRepeated";

/// Field carrying the number of occurrences counted in the window.
pub const REPEAT_COUNT_FIELD: &str = "repeatCount";

const OUTPUT_CAPACITY: usize = 64;

/// Annotates a copy of the message with the repetition fields. Messages
/// whose policy rejects the fields are forwarded unannotated.
fn annotate(message: &Message, repeated: bool, count: u64) -> Message {
    let annotated = message
        .clone()
        .put(REPEATED_FIELD, repeated)
        .and_then(|m| m.put(REPEAT_COUNT_FIELD, count as i64));
    match annotated {
        Ok(message) => message,
        Err(error) => {
            debug!(%error, "message policy rejected repetition fields");
            message.clone()
        }
    }
}

/// The repetition processor. Build via [`RepetitionProcessor::builder`].
pub struct RepetitionProcessor {
    windows: Arc<WindowManager>,
    pass_mapper: MapperFn,
    repeating_mapper: MapperFn,
    non_repeating_mapper: MapperFn,
}

impl RepetitionProcessor {
    pub fn builder() -> Builder {
        Builder::default()
    }
}

impl Processor for RepetitionProcessor {
    fn apply(&self, input: MessageStream) -> MessageStream {
        let (tx, rx) = mpsc::channel(OUTPUT_CAPACITY);

        let windows = Arc::clone(&self.windows);
        let pass_mapper = Arc::clone(&self.pass_mapper);
        let pass_tx = tx.clone();
        tokio::spawn(async move {
            let mut input = input;
            while let Some(message) = input.next().await {
                windows.increment(&message);
                trace!("forwarding message");
                if pass_tx.send((pass_mapper)(message)).await.is_err() {
                    break;
                }
            }
        });

        let mut closed = self.windows.closed_stream();
        let repeating = Arc::clone(&self.repeating_mapper);
        let non_repeating = Arc::clone(&self.non_repeating_mapper);
        tokio::spawn(async move {
            while let Some(window) = closed.next().await {
                let count = window.count();
                let aggregate = annotate(window.message(), count > 1, count);
                let mapped = if count > 1 {
                    (repeating)(aggregate)
                } else {
                    (non_repeating)(aggregate)
                };
                trace!(count, "emitting window aggregate");
                if tx.send(mapped).await.is_err() {
                    break;
                }
            }
        });

        ReceiverStream::new(rx).boxed()
    }

    fn shutdown(&self) {
        self.windows.close();
    }
}

/// Builder for [`RepetitionProcessor`]. The fingerprint is required; the
/// window duration defaults to two minutes.
pub struct Builder {
    config: RepetitionConfig,
    fingerprint: Option<Fingerprint>,
    clock: Arc<dyn Clock>,
    pass_mapper: Option<MapperFn>,
    repeating_mapper: MapperFn,
    non_repeating_mapper: MapperFn,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            config: RepetitionConfig::default(),
            fingerprint: None,
            clock: Arc::new(SystemClock),
            pass_mapper: None,
            repeating_mapper: Arc::new(|message| message),
            non_repeating_mapper: Arc::new(|message| message),
        }
    }
}

impl Builder {
    pub fn fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Shorthand for fingerprinting by the string value of a field.
    pub fn fingerprint_field(self, field: impl Into<String>) -> Self {
        self.fingerprint(crate::window::field_fingerprint(field))
    }

    pub fn window_duration(mut self, duration: Duration) -> Self {
        self.config.window_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_config(mut self, config: RepetitionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Mapper applied to every forwarded message. Defaults to annotating
    /// with `isRepeated=false, repeatCount=0`.
    pub fn pass_mapper(mut self, mapper: impl Fn(Message) -> Message + Send + Sync + 'static) -> Self {
        self.pass_mapper = Some(Arc::new(mapper));
        self
    }

    /// Mapper applied to aggregates whose window counted more than one
    /// message.
    pub fn repeating_mapper(
        mut self,
        mapper: impl Fn(Message) -> Message + Send + Sync + 'static,
    ) -> Self {
        self.repeating_mapper = Arc::new(mapper);
        self
    }

    /// Mapper applied to aggregates whose window counted a single message.
    pub fn non_repeating_mapper(
        mut self,
        mapper: impl Fn(Message) -> Message + Send + Sync + 'static,
    ) -> Self {
        self.non_repeating_mapper = Arc::new(mapper);
        self
    }

    pub fn build(self) -> Result<RepetitionProcessor> {
        self.config.validate()?;
        let fingerprint = self.fingerprint.ok_or_else(|| {
            crate::error::ProcessorError::configuration("fingerprint must be set")
        })?;
        let windows = WindowManager::with_clock(
            self.config.window_duration(),
            fingerprint,
            self.clock,
        )?;
        debug!(window_ms = self.config.window_ms, "repetition processor initialised");
        Ok(RepetitionProcessor {
            windows: Arc::new(windows),
            pass_mapper: self
                .pass_mapper
                .unwrap_or_else(|| Arc::new(|message| annotate(&message, false, 0))),
            repeating_mapper: self.repeating_mapper,
            non_repeating_mapper: self.non_repeating_mapper,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn body(text: &str) -> Message {
        Message::untyped().put("body", text).unwrap()
    }

    #[tokio::test]
    async fn test_fingerprint_is_required() {
        assert!(RepetitionProcessor::builder().build().is_err());
    }

    #[tokio::test]
    async fn test_pass_through_annotates_immediately() {
        let processor = RepetitionProcessor::builder()
            .fingerprint_field("body")
            .window_duration(Duration::from_secs(3600))
            .build()
            .unwrap();

        let input = futures::stream::iter(vec![body("a"), body("b")]).boxed();
        let mut output = processor.apply(input);

        for _ in 0..2 {
            let message = output.next().await.unwrap();
            assert_eq!(message.get_bool(REPEATED_FIELD), Some(false));
            assert_eq!(message.get_i64(REPEAT_COUNT_FIELD), Some(0));
        }
    }

    #[tokio::test]
    async fn test_window_aggregates_tag_repetitions() {
        let processor = RepetitionProcessor::builder()
            .fingerprint_field("body")
            .window_duration(Duration::from_millis(100))
            .build()
            .unwrap();

        let input =
            futures::stream::iter(vec![body("a"), body("a"), body("a"), body("b")]).boxed();
        let mut output = processor.apply(input);

        // Wait out two window durations so the sweeper has closed both
        // windows, then collect until both aggregates arrive. Aggregates
        // carry a repeat count of at least 1; pass-throughs carry 0. No
        // ordering is promised between the two sub-streams.
        tokio::time::sleep(Duration::from_millis(250)).await;

        let mut aggregates = HashMap::new();
        let mut pass_through = 0;
        while aggregates.len() < 2 {
            let message = output.next().await.unwrap();
            let count = message.get_i64(REPEAT_COUNT_FIELD).unwrap();
            if count == 0 {
                pass_through += 1;
                continue;
            }
            aggregates.insert(
                message.get_str("body").unwrap().to_owned(),
                (message.get_bool(REPEATED_FIELD).unwrap(), count),
            );
        }
        assert_eq!(pass_through, 4);
        assert_eq!(aggregates.get("a"), Some(&(true, 3)));
        assert_eq!(aggregates.get("b"), Some(&(false, 1)));
    }

    #[tokio::test]
    async fn test_custom_mappers_route_by_repetition() {
        let processor = RepetitionProcessor::builder()
            .fingerprint_field("body")
            .window_duration(Duration::from_secs(3600))
            .repeating_mapper(|m| m.put("route", "repeating").unwrap())
            .non_repeating_mapper(|m| m.put("route", "single").unwrap())
            .build()
            .unwrap();

        let input = futures::stream::iter(vec![body("a"), body("a"), body("b")]).boxed();
        let mut output = processor.apply(input);

        // Drain the three pass-through messages.
        for _ in 0..3 {
            output.next().await.unwrap();
        }

        processor.shutdown();
        let mut routes = HashMap::new();
        while let Some(message) = output.next().await {
            if let Some(route) = message.get_str("route") {
                routes.insert(message.get_str("body").unwrap().to_owned(), route.to_owned());
            }
        }
        assert_eq!(routes.get("a").map(String::as_str), Some("repeating"));
        assert_eq!(routes.get("b").map(String::as_str), Some("single"));
    }
}
