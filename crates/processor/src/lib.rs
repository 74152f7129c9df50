//! Stream processing stages and pipeline runtime
//!
//! This crate drives an unbounded producer stream of
//! [`Message`](logalike_types::Message)s through an ordered chain of
//! processors into a consumer. Stateless processors transform the stream in
//! place; the stateful stages ([`RepetitionProcessor`], [`ThrottleProcessor`])
//! share the per-key tumbling [`WindowManager`] and merge a pass-through
//! stream with a lazily evaluated stream of closed windows.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod repetition;
pub mod stateless;
pub mod throttle;
pub mod window;

pub use config::{PipelineConfig, RepetitionConfig, ThrottleConfig};
pub use error::{ProcessorError, Result};
pub use pipeline::{
    Input, MessageStream, Output, Pipeline, PipelineBuilder, Processor, ProcessorChain,
};
pub use repetition::{RepetitionProcessor, REPEATED_FIELD, REPEAT_COUNT_FIELD};
pub use stateless::{
    ConditionalMapper, FilterProcessor, IdentityProcessor, KeyValueMapper, MapProcessor, MapperFn,
};
pub use throttle::{SilentListener, ThrottleListener, ThrottleProcessor};
pub use window::{field_fingerprint, Fingerprint, MessageWindow, WindowManager};
