//! Tailer factory
//!
//! Spawns one tailer task per file and multiplexes their lines into a
//! single bounded queue. Within a single tailer line order is preserved up
//! to the point of enqueue; after the shared queue no inter-source order is
//! promised. A full queue drops lines after a bounded wait, which is the
//! pipeline's only backpressure signal to file readers.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::{FactoryConfig, StartPosition, TailerConfig};
use crate::error::{CollectorError, Result, StoreError};
use crate::store::PositionStore;
use crate::tailer::{PositionTailer, TailerListener};

/// Spawns tailers and owns the line queue they share.
pub struct TailerFactory {
    config: FactoryConfig,
    line_tx: Mutex<Option<mpsc::Sender<String>>>,
    line_rx: Mutex<Option<mpsc::Receiver<String>>>,
    store: Option<Arc<PositionStore>>,
    cancel: CancellationToken,
    tailers: DashMap<PathBuf, JoinHandle<()>>,
}

impl TailerFactory {
    /// Creates a factory. A store directory that exists but is not a
    /// directory fails startup; other store failures degrade to tailing
    /// without persistence.
    pub fn new(config: FactoryConfig) -> Result<Self> {
        config.validate()?;

        let store = match &config.store_directory {
            None => None,
            Some(directory) => match PositionStore::open(directory) {
                Ok(store) => Some(Arc::new(store)),
                Err(error @ StoreError::Configuration { .. }) => {
                    return Err(error.into());
                }
                Err(error) => {
                    warn!(%error, "failed to open position store, tailing without persistence");
                    None
                }
            },
        };

        let (line_tx, line_rx) = mpsc::channel(config.queue_capacity);
        Ok(TailerFactory {
            config,
            line_tx: Mutex::new(Some(line_tx)),
            line_rx: Mutex::new(Some(line_rx)),
            store,
            cancel: CancellationToken::new(),
            tailers: DashMap::new(),
        })
    }

    /// Spawns a tailer for the file. An `Auto` start position resolves to
    /// the persisted offset when the store has one, otherwise to the end of
    /// the file.
    pub fn start_tailer(&self, path: impl Into<PathBuf>, mut config: TailerConfig) -> Result<()> {
        let path = path.into();
        config.validate()?;

        if config.start == StartPosition::Auto {
            config.start = self.resolve_auto(&path);
        }

        let line_tx = self
            .line_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CollectorError::configuration("factory is closed"))?;

        let listener = QueueingListener {
            path: path.clone(),
            line_tx,
            store: self.store.clone(),
            enqueue_timeout: self.config.enqueue_timeout(),
        };
        let tailer = PositionTailer::new(path.clone(), config, self.cancel.child_token())?;
        let handle = tokio::spawn(tailer.run(Box::new(listener)));
        self.tailers.insert(path.clone(), handle);
        debug!(path = %path.display(), "started tailing file");
        Ok(())
    }

    fn resolve_auto(&self, path: &Path) -> StartPosition {
        match self.store.as_ref().and_then(|store| store.get(path)) {
            Some(offset) => {
                debug!(path = %path.display(), offset, "resuming from persisted position");
                StartPosition::Offset(offset)
            }
            None => StartPosition::End,
        }
    }

    /// Takes the receiving end of the shared line queue. Yields `None`
    /// after the first call.
    pub fn take_line_receiver(&self) -> Option<mpsc::Receiver<String>> {
        self.line_rx.lock().unwrap().take()
    }

    /// Number of tailers spawned and not yet joined.
    pub fn tailer_count(&self) -> usize {
        self.tailers.len()
    }

    /// Stops all tailers, waits for them to exit, closes the position
    /// store, and drops the queue sender so consumers end after draining.
    /// Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.line_tx.lock().unwrap().take();

        let paths: Vec<PathBuf> = self.tailers.iter().map(|entry| entry.key().clone()).collect();
        for path in paths {
            if let Some((_, handle)) = self.tailers.remove(&path) {
                let _ = handle.await;
            }
        }

        if let Some(store) = &self.store {
            store.close();
        }
        debug!("tailer factory closed");
    }
}

/// Listener wiring one tailer to the shared line queue and the position
/// store.
struct QueueingListener {
    path: PathBuf,
    line_tx: mpsc::Sender<String>,
    store: Option<Arc<PositionStore>>,
    enqueue_timeout: Duration,
}

#[async_trait]
impl TailerListener for QueueingListener {
    async fn on_line(&mut self, line: String) {
        trace!(path = %self.path.display(), "read a line");
        match self.line_tx.send_timeout(line, self.enqueue_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(
                    path = %self.path.display(),
                    timeout = ?self.enqueue_timeout,
                    "line queue full, dropping line"
                );
            }
            Err(SendTimeoutError::Closed(_)) => {
                trace!(path = %self.path.display(), "line queue closed");
            }
        }
    }

    async fn on_rotated(&mut self) {
        debug!(path = %self.path.display(), "file rotated");
    }

    async fn on_missing(&mut self) {
        warn!(path = %self.path.display(), "file not found");
    }

    async fn on_error(&mut self, error: &crate::error::TailError) {
        warn!(path = %self.path.display(), %error, "exception when tailing file");
    }

    async fn on_position_advanced(&mut self, position: u64) {
        if let Some(store) = &self.store {
            store.set(&self.path, position);
        }
    }
}
