//! File input
//!
//! Exposes the factory's multiplexed line queue as a lazy message stream
//! through the pipeline's [`Input`] contract. A converter closure turns
//! each raw line into a [`Message`]; the stream is conceptually infinite
//! and ends after draining once the factory is closed.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use logalike_processor::{Input, MessageStream};
use logalike_types::Message;

use crate::config::{FactoryConfig, TailerConfig};
use crate::error::Result;
use crate::factory::TailerFactory;

/// Converts a raw line into a message.
pub type LineConverter = Arc<dyn Fn(String) -> Message + Send + Sync>;

/// An [`Input`] that reads and parses lines from one or more tailed files.
pub struct FileInput {
    factory: TailerFactory,
    converter: LineConverter,
}

impl FileInput {
    /// Starts building a tailing input around a line converter.
    pub fn builder(
        converter: impl Fn(String) -> Message + Send + Sync + 'static,
    ) -> FileInputBuilder {
        FileInputBuilder {
            converter: Arc::new(converter),
            factory_config: FactoryConfig::default(),
            tailer_config: TailerConfig::default(),
            files: Vec::new(),
        }
    }

    /// The factory driving this input's tailers.
    pub fn factory(&self) -> &TailerFactory {
        &self.factory
    }
}

#[async_trait]
impl Input for FileInput {
    fn stream(&mut self) -> MessageStream {
        match self.factory.take_line_receiver() {
            Some(receiver) => {
                let converter = Arc::clone(&self.converter);
                ReceiverStream::new(receiver)
                    .map(move |line| (converter)(line))
                    .boxed()
            }
            None => {
                warn!("file input stream requested more than once");
                futures::stream::empty().boxed()
            }
        }
    }

    async fn close(&mut self) {
        self.factory.close().await;
    }
}

/// Builder for [`FileInput`]. Spawns one tailer per added file at build
/// time, so it must run inside an async runtime.
pub struct FileInputBuilder {
    converter: LineConverter,
    factory_config: FactoryConfig,
    tailer_config: TailerConfig,
    files: Vec<PathBuf>,
}

impl FileInputBuilder {
    /// Adds a file to tail.
    pub fn add_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    pub fn factory_config(mut self, config: FactoryConfig) -> Self {
        self.factory_config = config;
        self
    }

    /// Tailer settings applied to every added file.
    pub fn tailer_config(mut self, config: TailerConfig) -> Self {
        self.tailer_config = config;
        self
    }

    pub fn build(self) -> Result<FileInput> {
        let factory = TailerFactory::new(self.factory_config)?;
        for file in self.files {
            factory.start_tailer(file, self.tailer_config.clone())?;
        }
        Ok(FileInput {
            factory,
            converter: self.converter,
        })
    }
}
