//! File tailing input for the logalike pipeline
//!
//! One tailer follows one file, detecting appends, rotations, and
//! truncations, and resuming from a byte offset persisted per tracked file
//! in the [`PositionStore`]. A [`TailerFactory`] multiplexes the lines of
//! all its tailers into one bounded queue, which [`FileInput`] exposes as a
//! lazy message stream to the pipeline runtime.

pub mod config;
pub mod error;
pub mod factory;
pub mod input;
pub mod lines;
pub mod store;
pub mod tailer;

pub use config::{FactoryConfig, StartPosition, TailerConfig};
pub use error::{CollectorError, Result, StoreError, TailError};
pub use factory::TailerFactory;
pub use input::{FileInput, FileInputBuilder};
pub use lines::LineSplitter;
pub use store::PositionStore;
pub use tailer::{PositionTailer, TailerListener};
