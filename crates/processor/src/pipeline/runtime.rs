//! The pipeline runtime
//!
//! Drives a producer's message stream through the processor chain into a
//! consumer with a pool of workers and cooperative cancellation. The
//! runtime owns the single close flag: once set, workers stop accepting new
//! messages at the next message boundary, processors finalise their
//! background work, and producer and consumer are closed in turn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use logalike_types::Message;

use crate::config::PipelineConfig;
use crate::error::{ProcessorError, Result};
use crate::pipeline::chain::{MessageStream, Processor, ProcessorChain};

/// A producer of messages. Any collaborator offering a lazy message
/// sequence integrates with the runtime through this contract.
#[async_trait]
pub trait Input: Send {
    /// The producer's message sequence. Called once by the runtime.
    fn stream(&mut self) -> MessageStream;

    /// Releases the producer's resources. The default does nothing.
    async fn close(&mut self) {}
}

/// A consumer of processed messages.
#[async_trait]
pub trait Output: Send + Sync {
    /// Hands one message to the consumer. May block on downstream
    /// backpressure.
    async fn accept(&self, message: Message);

    /// Releases the consumer's resources. The default does nothing.
    async fn close(&self) {}
}

/// The assembled pipeline. Build via [`Pipeline::builder`]; share behind an
/// `Arc` so `run` and `close` can be driven from different tasks.
pub struct Pipeline {
    input: Mutex<Box<dyn Input>>,
    output: Arc<dyn Output>,
    chain: ProcessorChain,
    config: PipelineConfig,
    cancel: CancellationToken,
    closed: AtomicBool,
    running: AtomicBool,
    drained: Notify,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Runs the pipeline until the producer's stream ends or the pipeline
    /// is closed. Messages flow through the chain into a bounded handoff
    /// channel drained by the worker pool; each worker re-checks the close
    /// flag at every message boundary, so after `close` at most one message
    /// per worker is still in flight.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        let stream = {
            let mut input = self.input.lock().await;
            input.stream()
        };
        let mut stream = self.chain.apply(stream);

        let (tx, rx) = mpsc::channel::<Message>(self.config.handoff_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.config.workers);
        for worker in 0..self.config.workers {
            let rx = Arc::clone(&rx);
            let output = Arc::clone(&self.output);
            let cancel = self.cancel.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = { rx.lock().await.recv().await };
                    match next {
                        Some(message) => output.accept(message).await,
                        None => break,
                    }
                }
                trace!(worker, "consumer worker stopped");
            }));
        }

        info!(workers = self.config.workers, "pipeline running");
        loop {
            // Biased so a set close flag wins over a ready message and the
            // feeder stops at the next message boundary.
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        drop(tx);

        for worker in workers {
            let _ = worker.await;
        }
        self.running.store(false, Ordering::SeqCst);
        self.drained.notify_waiters();
        debug!("pipeline drained");
    }

    /// Shuts the pipeline down: sets the close flag, finalises processor
    /// background work, waits for the workers to finish their in-flight
    /// messages, then closes producer and consumer in turn. Idempotent;
    /// returns within bounded time.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing pipeline");
        self.cancel.cancel();
        self.chain.shutdown();

        // A worker may still be handing its last message to the consumer;
        // closing the consumer under it would lose that message. Register
        // for the drain notification before re-checking the flag so the
        // wakeup cannot slip between the two.
        let mut drained = std::pin::pin!(self.drained.notified());
        drained.as_mut().enable();
        if self.running.load(Ordering::SeqCst) {
            drained.await;
        }

        self.input.lock().await.close().await;
        self.output.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Builder for [`Pipeline`]. Producer and consumer are required.
#[derive(Default)]
pub struct PipelineBuilder {
    input: Option<Box<dyn Input>>,
    output: Option<Arc<dyn Output>>,
    chain: ProcessorChain,
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn input(mut self, input: impl Input + 'static) -> Self {
        self.input = Some(Box::new(input));
        self
    }

    pub fn output(mut self, output: impl Output + 'static) -> Self {
        self.output = Some(Arc::new(output));
        self
    }

    pub fn shared_output(mut self, output: Arc<dyn Output>) -> Self {
        self.output = Some(output);
        self
    }

    /// Appends a processor to the chain.
    pub fn add_processor(mut self, processor: impl Processor + 'static) -> Self {
        self.chain.add(processor);
        self
    }

    /// Appends a predicate filter to the chain.
    pub fn add_filter(self, predicate: impl Fn(&Message) -> bool + Send + Sync + 'static) -> Self {
        self.add_processor(crate::stateless::FilterProcessor::new(predicate))
    }

    /// Appends a mapper to the chain.
    pub fn add_mapper(self, mapper: impl Fn(Message) -> Message + Send + Sync + 'static) -> Self {
        self.add_processor(crate::stateless::MapProcessor::new(mapper))
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        let input = self
            .input
            .ok_or_else(|| ProcessorError::configuration("input must be defined"))?;
        let output = self
            .output
            .ok_or_else(|| ProcessorError::configuration("output must be defined"))?;
        Ok(Pipeline {
            input: Mutex::new(input),
            output,
            chain: self.chain,
            config: self.config,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            running: AtomicBool::new(false),
            drained: Notify::new(),
        })
    }
}
