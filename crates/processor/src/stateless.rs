//! Stateless processors
//!
//! Transforms that touch one message at a time and keep no state across
//! messages. Stateless processors can be replicated freely; they carry no
//! locks and no background work.

use std::sync::Arc;

use futures::future;
use futures::StreamExt;
use tracing::debug;

use logalike_types::Message;

use crate::pipeline::chain::{MessageStream, Processor};

/// A shareable message-to-message function.
pub type MapperFn = Arc<dyn Fn(Message) -> Message + Send + Sync>;

/// The neutral processor: passes the stream through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityProcessor;

impl Processor for IdentityProcessor {
    fn apply(&self, input: MessageStream) -> MessageStream {
        input
    }
}

/// Keeps the messages matching a predicate.
pub struct FilterProcessor {
    predicate: Arc<dyn Fn(&Message) -> bool + Send + Sync>,
}

impl FilterProcessor {
    pub fn new(predicate: impl Fn(&Message) -> bool + Send + Sync + 'static) -> Self {
        FilterProcessor {
            predicate: Arc::new(predicate),
        }
    }
}

impl Processor for FilterProcessor {
    fn apply(&self, input: MessageStream) -> MessageStream {
        let predicate = Arc::clone(&self.predicate);
        input
            .filter(move |message| future::ready((predicate)(message)))
            .boxed()
    }
}

/// Applies a function to every message.
pub struct MapProcessor {
    mapper: MapperFn,
}

impl MapProcessor {
    pub fn new(mapper: impl Fn(Message) -> Message + Send + Sync + 'static) -> Self {
        MapProcessor {
            mapper: Arc::new(mapper),
        }
    }
}

impl Processor for MapProcessor {
    fn apply(&self, input: MessageStream) -> MessageStream {
        let mapper = Arc::clone(&self.mapper);
        input.map(move |message| (mapper)(message)).boxed()
    }
}

/// Applies a mapper only to messages matching a predicate; the rest pass
/// through untouched.
pub struct ConditionalMapper {
    predicate: Arc<dyn Fn(&Message) -> bool + Send + Sync>,
    mapper: MapperFn,
}

impl ConditionalMapper {
    pub fn new(
        predicate: impl Fn(&Message) -> bool + Send + Sync + 'static,
        mapper: impl Fn(Message) -> Message + Send + Sync + 'static,
    ) -> Self {
        ConditionalMapper {
            predicate: Arc::new(predicate),
            mapper: Arc::new(mapper),
        }
    }
}

impl Processor for ConditionalMapper {
    fn apply(&self, input: MessageStream) -> MessageStream {
        let predicate = Arc::clone(&self.predicate);
        let mapper = Arc::clone(&self.mapper);
        input
            .map(move |message| {
                if (predicate)(&message) {
                    (mapper)(message)
                } else {
                    message
                }
            })
            .boxed()
    }
}

/// Extracts `key=value` pairs from a source field and puts each pair as a
/// field on the message.
///
/// The source text is split into pairs on the pair delimiters (default `,`
/// and `;`), and each pair on the key-value separator (default `=`).
/// Fragments that do not split into a key and a value are skipped.
#[derive(Clone)]
pub struct KeyValueMapper {
    field: String,
    pair_delimiters: Vec<char>,
    separator: char,
}

impl KeyValueMapper {
    pub fn new(field: impl Into<String>) -> Self {
        KeyValueMapper {
            field: field.into(),
            pair_delimiters: vec![',', ';'],
            separator: '=',
        }
    }

    pub fn with_pair_delimiters(mut self, delimiters: Vec<char>) -> Self {
        self.pair_delimiters = delimiters;
        self
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    fn parse_into(&self, message: Message, text: &str) -> Message {
        let mut parsed = message;
        for pair in text.split(|c| self.pair_delimiters.contains(&c)) {
            if pair.is_empty() {
                continue;
            }
            let mut halves = pair.splitn(2, self.separator);
            let key = halves.next().unwrap_or_default();
            match halves.next() {
                Some(value) if !key.is_empty() => {
                    match parsed.clone().put(key, value) {
                        Ok(updated) => parsed = updated,
                        Err(error) => {
                            debug!(%error, key, "skipping rejected key-value pair");
                        }
                    }
                }
                _ => {
                    debug!(pair, separator = %self.separator, "failed to split into a key-value pair");
                }
            }
        }
        parsed
    }
}

impl Processor for KeyValueMapper {
    fn apply(&self, input: MessageStream) -> MessageStream {
        let mapper = self.clone();
        input
            .map(move |message| {
                match message.get_str(&mapper.field).map(str::to_owned) {
                    Some(text) => mapper.parse_into(message, &text),
                    None => message,
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn body(text: &str) -> Message {
        Message::untyped().put("body", text).unwrap()
    }

    async fn run(processor: &dyn Processor, input: Vec<Message>) -> Vec<Message> {
        processor
            .apply(stream::iter(input).boxed())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_filter_keeps_matching_messages() {
        let filter = FilterProcessor::new(|m: &Message| m.get_str("body") == Some("keep"));
        let output = run(&filter, vec![body("keep"), body("drop"), body("keep")]).await;
        assert_eq!(output.len(), 2);
    }

    #[tokio::test]
    async fn test_map_transforms_every_message() {
        let map = MapProcessor::new(|m: Message| m.put("seen", true).unwrap());
        let output = run(&map, vec![body("a"), body("b")]).await;
        assert!(output.iter().all(|m| m.get_bool("seen") == Some(true)));
    }

    #[tokio::test]
    async fn test_conditional_mapper_only_touches_matches() {
        let mapper = ConditionalMapper::new(
            |m: &Message| m.get_str("body") == Some("a"),
            |m: Message| m.put("tagged", true).unwrap(),
        );
        let output = run(&mapper, vec![body("a"), body("b")]).await;
        assert_eq!(output[0].get_bool("tagged"), Some(true));
        assert_eq!(output[1].get_bool("tagged"), None);
    }

    #[tokio::test]
    async fn test_key_value_mapper_extracts_pairs() {
        let mapper = KeyValueMapper::new("body");
        let output = run(&mapper, vec![body("host=web-1,level=info")]).await;
        assert_eq!(output[0].get_str("host"), Some("web-1"));
        assert_eq!(output[0].get_str("level"), Some("info"));
    }

    #[tokio::test]
    async fn test_key_value_mapper_skips_unsplittable_fragments() {
        let mapper = KeyValueMapper::new("body");
        let output = run(&mapper, vec![body("host=web-1,garbage,=orphan")]).await;
        assert_eq!(output[0].get_str("host"), Some("web-1"));
        assert!(!output[0].contains("garbage"));
        assert_eq!(output[0].len(), 2); // body + host
    }

    #[tokio::test]
    async fn test_key_value_mapper_custom_delimiters() {
        let mapper = KeyValueMapper::new("body")
            .with_pair_delimiters(vec![' '])
            .with_separator(':');
        let output = run(&mapper, vec![body("host:web-1 level:warn")]).await;
        assert_eq!(output[0].get_str("host"), Some("web-1"));
        assert_eq!(output[0].get_str("level"), Some("warn"));
    }

    #[tokio::test]
    async fn test_key_value_mapper_without_field_is_noop() {
        let mapper = KeyValueMapper::new("missing");
        let input = body("host=web-1");
        let output = run(&mapper, vec![input.clone()]).await;
        assert_eq!(output[0], input);
    }
}
