//! Positioned file tailer
//!
//! Follows one file with a cooperative poll loop: detects appends,
//! rotations (the file shrank), truncation-with-rewrite (same length but a
//! newer modification time), and missing files, and reports every event
//! through a [`TailerListener`]. The listener also receives the byte
//! position after the last complete line, which the factory wires into the
//! position store for crash-safe resume.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::{StartPosition, TailerConfig};
use crate::error::{Result, TailError};
use crate::lines::LineSplitter;

type TailResult<T> = std::result::Result<T, TailError>;

/// Receives tailing events. Methods may suspend briefly (e.g. on a bounded
/// queue); the tailer loop awaits them in order.
#[async_trait]
pub trait TailerListener: Send {
    /// A complete line, without its terminator.
    async fn on_line(&mut self, line: String);

    /// The file shrank below the read position; the tailer reopens it and
    /// restarts from offset 0.
    async fn on_rotated(&mut self) {}

    /// The file does not exist at this poll; the tailer retries after one
    /// interval.
    async fn on_missing(&mut self) {}

    /// An I/O error other than a missing file. The tailer exits after this
    /// callback; the surrounding runtime decides whether to respawn.
    async fn on_error(&mut self, _error: &TailError) {}

    /// The read position advanced past a batch of complete lines.
    async fn on_position_advanced(&mut self, _position: u64) {}
}

/// Tails a single file. Construct with [`PositionTailer::new`], then drive
/// the loop with [`run`](PositionTailer::run), typically inside a spawned
/// task; cancel the token to stop it.
pub struct PositionTailer {
    path: PathBuf,
    config: TailerConfig,
    cancel: CancellationToken,
}

impl PositionTailer {
    pub fn new(
        path: impl Into<PathBuf>,
        config: TailerConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        Ok(PositionTailer {
            path: path.into(),
            config,
            cancel,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs the poll loop until cancelled or an I/O error occurs. Errors
    /// other than a missing file are surfaced through
    /// [`TailerListener::on_error`] before returning.
    pub async fn run(self, mut listener: Box<dyn TailerListener>) {
        debug!(path = %self.path.display(), "tailer starting");
        if let Err(error) = self.tail(listener.as_mut()).await {
            if !self.cancel.is_cancelled() {
                listener.on_error(&error).await;
            }
        }
        debug!(path = %self.path.display(), "tailer stopped");
    }

    async fn tail(&self, listener: &mut dyn TailerListener) -> TailResult<()> {
        let Some(mut file) = self.open_when_present(listener).await? else {
            return Ok(());
        };

        let metadata = self.metadata_of(&file).await?;
        let mut position = match self.config.start {
            StartPosition::Beginning => 0,
            StartPosition::Offset(offset) => offset,
            // Auto is resolved by the factory; standalone it reads new
            // lines only, like End.
            StartPosition::End | StartPosition::Auto => metadata.len(),
        };
        let mut last_seen = metadata.modified().ok();
        file.seek(SeekFrom::Start(position))
            .await
            .map_err(|source| self.io_error(source))?;

        while !self.cancel.is_cancelled() {
            let metadata = match tokio::fs::metadata(&self.path).await {
                Ok(metadata) => metadata,
                Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                    listener.on_missing().await;
                    self.sleep_one_interval().await;
                    continue;
                }
                Err(source) => return Err(self.io_error(source)),
            };
            // One stat samples modification time and length together, so an
            // update between the two reads cannot be missed.
            let newer = is_newer(&metadata, last_seen);
            let length = metadata.len();

            if length < position {
                // File was rotated: reopen and restart from the top.
                listener.on_rotated().await;
                match File::open(&self.path).await {
                    Ok(reopened) => {
                        file = reopened;
                        position = 0;
                    }
                    Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                        listener.on_missing().await;
                    }
                    Err(source) => return Err(self.io_error(source)),
                }
                continue;
            } else if length > position {
                position = self.read_lines(&mut file, position, listener).await?;
                listener.on_position_advanced(position).await;
                last_seen = metadata.modified().ok().or(last_seen);
            } else if newer {
                // Same length but touched: the file was overwritten with
                // content of the exact same size. Restart from the top.
                trace!(path = %self.path.display(), "same-length overwrite detected");
                position = self.read_lines(&mut file, 0, listener).await?;
                listener.on_position_advanced(position).await;
                last_seen = metadata.modified().ok().or(last_seen);
            }

            if self.config.reopen_each_poll {
                drop(file);
                self.sleep_one_interval().await;
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
                let Some(reopened) = self.open_when_present(listener).await? else {
                    return Ok(());
                };
                file = reopened;
                file.seek(SeekFrom::Start(position))
                    .await
                    .map_err(|source| self.io_error(source))?;
            } else {
                self.sleep_one_interval().await;
            }
        }
        Ok(())
    }

    /// Reads forward from `from` through the line splitter, emitting every
    /// complete line, and returns the position after the last one. Bytes of
    /// a trailing incomplete line are re-read next cycle.
    async fn read_lines(
        &self,
        file: &mut File,
        from: u64,
        listener: &mut dyn TailerListener,
    ) -> TailResult<u64> {
        file.seek(SeekFrom::Start(from))
            .await
            .map_err(|source| self.io_error(source))?;

        let mut splitter = LineSplitter::new();
        let mut buffer = vec![0u8; self.config.buffer_size];
        let mut lines = Vec::new();

        while !self.cancel.is_cancelled() {
            let read = file
                .read(&mut buffer)
                .await
                .map_err(|source| self.io_error(source))?;
            if read == 0 {
                break;
            }
            splitter.push(&buffer[..read], &mut lines);
            for line in lines.drain(..) {
                listener.on_line(line).await;
            }
        }

        Ok(from + splitter.consumed())
    }

    /// Opens the file, reporting and retrying once per interval while it is
    /// missing. Returns `None` when cancelled while waiting.
    async fn open_when_present(
        &self,
        listener: &mut dyn TailerListener,
    ) -> TailResult<Option<File>> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            match File::open(&self.path).await {
                Ok(file) => return Ok(Some(file)),
                Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                    listener.on_missing().await;
                    self.sleep_one_interval().await;
                }
                Err(source) => return Err(self.io_error(source)),
            }
        }
    }

    async fn metadata_of(&self, file: &File) -> TailResult<std::fs::Metadata> {
        file.metadata().await.map_err(|source| self.io_error(source))
    }

    async fn sleep_one_interval(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval()) => {}
        }
    }

    fn io_error(&self, source: std::io::Error) -> TailError {
        TailError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn is_newer(metadata: &std::fs::Metadata, last_seen: Option<SystemTime>) -> bool {
    match (metadata.modified(), last_seen) {
        (Ok(modified), Some(last_seen)) => modified > last_seen,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[derive(Debug, PartialEq)]
    enum Event {
        Line(String),
        Rotated,
        Missing,
        Position(u64),
    }

    struct ChannelListener {
        tx: mpsc::UnboundedSender<Event>,
    }

    #[async_trait]
    impl TailerListener for ChannelListener {
        async fn on_line(&mut self, line: String) {
            let _ = self.tx.send(Event::Line(line));
        }

        async fn on_rotated(&mut self) {
            let _ = self.tx.send(Event::Rotated);
        }

        async fn on_missing(&mut self) {
            let _ = self.tx.send(Event::Missing);
        }

        async fn on_position_advanced(&mut self, position: u64) {
            let _ = self.tx.send(Event::Position(position));
        }
    }

    fn fast_config(start: StartPosition) -> TailerConfig {
        TailerConfig {
            poll_interval_ms: 20,
            start,
            ..Default::default()
        }
    }

    fn spawn_tailer(
        path: &Path,
        config: TailerConfig,
    ) -> (mpsc::UnboundedReceiver<Event>, CancellationToken) {
        let cancel = CancellationToken::new();
        let tailer = PositionTailer::new(path, config, cancel.clone()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(tailer.run(Box::new(ChannelListener { tx })));
        (rx, cancel)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for tailer event")
            .expect("tailer event channel closed")
    }

    #[tokio::test]
    async fn test_lines_are_preserved_from_beginning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"a\nb\nc\n").unwrap();

        let (mut rx, cancel) = spawn_tailer(&path, fast_config(StartPosition::Beginning));

        assert_eq!(next_event(&mut rx).await, Event::Line("a".into()));
        assert_eq!(next_event(&mut rx).await, Event::Line("b".into()));
        assert_eq!(next_event(&mut rx).await, Event::Line("c".into()));
        assert_eq!(next_event(&mut rx).await, Event::Position(6));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_rotation_is_detected_and_restarts_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"a\nb\nc\n").unwrap();

        let (mut rx, cancel) = spawn_tailer(&path, fast_config(StartPosition::Beginning));
        for _ in 0..3 {
            next_event(&mut rx).await;
        }
        assert_eq!(next_event(&mut rx).await, Event::Position(6));

        // Truncate to zero and write fresh content: length < position.
        std::fs::write(&path, b"x\n").unwrap();

        assert_eq!(next_event(&mut rx).await, Event::Rotated);
        assert_eq!(next_event(&mut rx).await, Event::Line("x".into()));
        assert_eq!(next_event(&mut rx).await, Event::Position(2));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_missing_file_is_reported_then_read_when_it_appears() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.log");

        let (mut rx, cancel) = spawn_tailer(&path, fast_config(StartPosition::Beginning));
        assert_eq!(next_event(&mut rx).await, Event::Missing);

        std::fs::write(&path, b"here\n").unwrap();
        loop {
            match next_event(&mut rx).await {
                Event::Missing => continue,
                event => {
                    assert_eq!(event, Event::Line("here".into()));
                    break;
                }
            }
        }

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_appended_lines_are_picked_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"first\n").unwrap();

        let (mut rx, cancel) = spawn_tailer(&path, fast_config(StartPosition::End));

        // Give the tailer a moment to capture the end position before the
        // append.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"second\n").unwrap();
        file.flush().unwrap();

        assert_eq!(next_event(&mut rx).await, Event::Line("second".into()));
        assert_eq!(next_event(&mut rx).await, Event::Position(13));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_explicit_offset_skips_earlier_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"a\nb\nc\n").unwrap();

        let (mut rx, cancel) = spawn_tailer(&path, fast_config(StartPosition::Offset(2)));

        assert_eq!(next_event(&mut rx).await, Event::Line("b".into()));
        assert_eq!(next_event(&mut rx).await, Event::Line("c".into()));
        assert_eq!(next_event(&mut rx).await, Event::Position(6));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_partial_line_is_reread_after_completion() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"complete\npart").unwrap();

        let (mut rx, cancel) = spawn_tailer(&path, fast_config(StartPosition::Beginning));
        assert_eq!(next_event(&mut rx).await, Event::Line("complete".into()));
        assert_eq!(next_event(&mut rx).await, Event::Position(9));

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"ial\n").unwrap();
        file.flush().unwrap();

        // The partial tail is re-read every poll until it completes, so
        // skip the repeated position updates.
        loop {
            match next_event(&mut rx).await {
                Event::Position(9) => continue,
                event => {
                    assert_eq!(event, Event::Line("partial".into()));
                    break;
                }
            }
        }
        assert_eq!(next_event(&mut rx).await, Event::Position(17));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_multibyte_utf8_with_tiny_buffer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "héllo wörld\n".as_bytes()).unwrap();

        let config = TailerConfig {
            poll_interval_ms: 20,
            start: StartPosition::Beginning,
            buffer_size: 1,
            ..Default::default()
        };
        let (mut rx, cancel) = spawn_tailer(&path, config);

        assert_eq!(next_event(&mut rx).await, Event::Line("héllo wörld".into()));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancel_stops_the_loop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"a\n").unwrap();

        let cancel = CancellationToken::new();
        let tailer =
            PositionTailer::new(&path, fast_config(StartPosition::End), cancel.clone()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(tailer.run(Box::new(ChannelListener { tx })));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("tailer did not stop after cancel")
            .unwrap();
    }
}
