//! Processor composition and the pipeline runtime

pub mod chain;
pub mod runtime;

pub use chain::{MessageStream, Processor, ProcessorChain};
pub use runtime::{Input, Output, Pipeline, PipelineBuilder};
