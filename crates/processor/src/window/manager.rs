//! The tumbling window manager

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use logalike_types::{Clock, Message, SystemClock};

use crate::error::{ProcessorError, Result};
use crate::window::fingerprint::Fingerprint;
use crate::window::types::MessageWindow;

/// Counts message occurrences per fingerprint key in tumbling windows of a
/// fixed duration.
///
/// `increment` is linearisable per key: a single lock guards the open-window
/// table, so concurrent increments for the same key observe a total order.
/// A background task sweeps the table every window duration, moving expired
/// windows onto the closed-window channel. Closing the manager runs a final
/// sweep over everything still open and then ends the closed-window stream.
///
/// Construction spawns the sweep task and therefore must happen inside an
/// async runtime.
pub struct WindowManager {
    inner: Arc<Inner>,
    closed_rx: Mutex<Option<mpsc::UnboundedReceiver<MessageWindow>>>,
}

struct Inner {
    duration: chrono::Duration,
    fingerprint: Fingerprint,
    clock: Arc<dyn Clock>,
    open: Mutex<HashMap<String, MessageWindow>>,
    closed_tx: Mutex<Option<mpsc::UnboundedSender<MessageWindow>>>,
    cancel: CancellationToken,
}

impl WindowManager {
    /// Creates a manager sweeping every `duration` with the system clock.
    pub fn new(duration: Duration, fingerprint: Fingerprint) -> Result<Self> {
        Self::with_clock(duration, fingerprint, Arc::new(SystemClock))
    }

    /// Creates a manager reading time from the given clock. The sweep
    /// period itself still follows the runtime's timer.
    pub fn with_clock(
        duration: Duration,
        fingerprint: Fingerprint,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if duration.is_zero() {
            return Err(ProcessorError::configuration(
                "window duration must be greater than 0",
            ));
        }
        let chrono_duration = chrono::Duration::from_std(duration).map_err(|_| {
            ProcessorError::configuration(format!("window duration out of range: {duration:?}"))
        })?;

        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            duration: chrono_duration,
            fingerprint,
            clock,
            open: Mutex::new(HashMap::new()),
            closed_tx: Mutex::new(Some(closed_tx)),
            cancel: CancellationToken::new(),
        });

        Self::spawn_sweeper(Arc::clone(&inner), duration);
        debug!(?duration, "window manager started");

        Ok(WindowManager {
            inner,
            closed_rx: Mutex::new(Some(closed_rx)),
        })
    }

    fn spawn_sweeper(inner: Arc<Inner>, period: Duration) {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = ticker.tick() => inner.sweep_expired(),
                }
            }
        });
    }

    /// Increments the counter for the message's fingerprint, opening a new
    /// window owning a copy of the message when none exists. Returns the
    /// new count; 1 means the window was just opened.
    pub fn increment(&self, message: &Message) -> u64 {
        let key = (self.inner.fingerprint)(message);
        let now = self.inner.clock.now();
        let mut open = self.inner.open.lock().unwrap();
        match open.get_mut(&key) {
            Some(window) => window.increment(),
            None => {
                open.insert(key, MessageWindow::new(message.clone(), now));
                1
            }
        }
    }

    /// The lazy stream of closed windows. Blocks until a window closes;
    /// ends when the manager is closed. The stream can be taken once; later
    /// calls yield an empty stream.
    pub fn closed_stream(&self) -> BoxStream<'static, MessageWindow> {
        match self.closed_rx.lock().unwrap().take() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => {
                warn!("closed-window stream requested more than once");
                stream::empty().boxed()
            }
        }
    }

    /// Number of currently open windows.
    pub fn open_windows(&self) -> usize {
        self.inner.open.lock().unwrap().len()
    }

    /// Stops the sweeper, closes every remaining open window, and ends the
    /// closed-window stream. Idempotent.
    pub fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.sweep_all();
        // Dropping the sender terminates the closed-window stream.
        self.inner.closed_tx.lock().unwrap().take();
    }
}

impl Inner {
    /// Evicts every window whose duration has fully elapsed. Runs under the
    /// open-table lock, so the sweep is linearised after all increments
    /// whose clock reading fell inside the evicted windows.
    fn sweep_expired(&self) {
        let now = self.clock.now();
        let expired = {
            let mut open = self.open.lock().unwrap();
            let keys: Vec<String> = open
                .iter()
                .filter(|(_, window)| window.start_time() + self.duration <= now)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| open.remove(&key))
                .collect::<Vec<_>>()
        };
        self.push_closed(expired);
    }

    fn sweep_all(&self) {
        let drained: Vec<MessageWindow> = {
            let mut open = self.open.lock().unwrap();
            open.drain().map(|(_, window)| window).collect()
        };
        self.push_closed(drained);
    }

    fn push_closed(&self, windows: Vec<MessageWindow>) {
        if windows.is_empty() {
            return;
        }
        let guard = self.closed_tx.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            for window in windows {
                // Receiver dropped means nobody consumes aggregates anymore.
                let _ = tx.send(window);
            }
        }
    }
}

impl Drop for WindowManager {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}
