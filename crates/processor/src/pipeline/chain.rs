//! The processor contract and ordered composition
//!
//! A processor is a total function from a message stream to a message
//! stream. Composition is left-to-right associative and the identity
//! processor is the neutral element, so a chain of processors is itself a
//! processor.

use std::sync::Arc;

use futures::stream::BoxStream;

use logalike_types::Message;

/// The lazy, conceptually unbounded sequence of messages flowing between
/// pipeline stages.
pub type MessageStream = BoxStream<'static, Message>;

/// A pipeline stage transforming a message stream.
pub trait Processor: Send + Sync {
    /// Applies this processor to the stream. Stateful processors may spawn
    /// background tasks whose output is merged into the returned stream.
    fn apply(&self, input: MessageStream) -> MessageStream;

    /// Invoked by the runtime during teardown. Processors with background
    /// work finalise it here; the default does nothing.
    fn shutdown(&self) {}
}

/// An ordered chain of processors applied left to right.
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Arc<dyn Processor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a processor to the end of the chain.
    pub fn add<P: Processor + 'static>(&mut self, processor: P) {
        self.processors.push(Arc::new(processor));
    }

    /// Appends an already-shared processor.
    pub fn add_shared(&mut self, processor: Arc<dyn Processor>) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl Processor for ProcessorChain {
    fn apply(&self, input: MessageStream) -> MessageStream {
        self.processors
            .iter()
            .fold(input, |stream, processor| processor.apply(stream))
    }

    fn shutdown(&self) {
        for processor in &self.processors {
            processor.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    use crate::stateless::{IdentityProcessor, MapProcessor};

    fn messages(bodies: &[&str]) -> Vec<Message> {
        bodies
            .iter()
            .map(|body| Message::untyped().put("body", *body).unwrap())
            .collect()
    }

    async fn run_chain(chain: &ProcessorChain, input: Vec<Message>) -> Vec<Message> {
        chain
            .apply(futures::stream::iter(input).boxed())
            .collect()
            .await
    }

    fn suffix_mapper(suffix: &'static str) -> MapProcessor {
        MapProcessor::new(move |message: Message| {
            let body = format!("{}{}", message.get_str("body").unwrap_or(""), suffix);
            message.put("body", body).unwrap()
        })
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let chain = ProcessorChain::new();
        let input = messages(&["a", "b"]);
        let output = run_chain(&chain, input.clone()).await;
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn test_chain_applies_left_to_right() {
        let mut chain = ProcessorChain::new();
        chain.add(suffix_mapper("1"));
        chain.add(suffix_mapper("2"));

        let output = run_chain(&chain, messages(&["x"])).await;
        assert_eq!(output[0].get_str("body"), Some("x12"));
    }

    #[tokio::test]
    async fn test_identity_is_neutral() {
        let input = messages(&["a", "b", "c"]);

        let mut with_identity = ProcessorChain::new();
        with_identity.add(IdentityProcessor);
        with_identity.add(suffix_mapper("!"));
        with_identity.add(IdentityProcessor);

        let mut without = ProcessorChain::new();
        without.add(suffix_mapper("!"));

        let left = run_chain(&with_identity, input.clone()).await;
        let right = run_chain(&without, input).await;
        assert_eq!(left, right);
    }
}
