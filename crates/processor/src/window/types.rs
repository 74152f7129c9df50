//! Window state

use chrono::{DateTime, Utc};

use logalike_types::Message;

/// One open or closed window: the message that opened it, a count of how
/// many messages with the same fingerprint were seen, and the instant the
/// window started.
///
/// Windows hold only data. They are owned by the
/// [`WindowManager`](crate::WindowManager) while open and move into the
/// closed-window stream when evicted.
#[derive(Debug, Clone)]
pub struct MessageWindow {
    message: Message,
    count: u64,
    start_time: DateTime<Utc>,
}

impl MessageWindow {
    /// Creates a window with a count of one.
    pub fn new(message: Message, start_time: DateTime<Utc>) -> Self {
        MessageWindow {
            message,
            count: 1,
            start_time,
        }
    }

    /// The message that opened this window.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Consumes the window, yielding the opening message.
    pub fn into_message(self) -> Message {
        self.message
    }

    /// How many messages this window has counted. Always at least 1.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Bumps the counter, returning the new count.
    pub(crate) fn increment(&mut self) -> u64 {
        self.count += 1;
        self.count
    }

    /// Whether this window started before the given instant.
    pub fn is_older_than(&self, instant: DateTime<Utc>) -> bool {
        self.start_time < instant
    }
}
