//! Byte-level line splitting
//!
//! Splits raw file bytes into lines, treating `\n`, `\r`, and `\r\n` each
//! as a single terminator. Incomplete trailing bytes are carried across
//! feeds, so a multi-byte UTF-8 sequence split across two buffer reads is
//! never torn: decoding happens per complete line.

/// Stateful splitter used by a tailer for one read cycle.
///
/// `consumed` counts the bytes up to and including the last terminator seen
/// since construction; the bytes of a trailing incomplete line stay pending
/// and are not counted, so the tailer re-reads them on the next cycle.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
    consumed: u64,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes, appending every completed line to `lines`.
    pub fn push(&mut self, chunk: &[u8], lines: &mut Vec<String>) {
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        let mut cut = 0;
        let mut index = 0;
        let len = self.pending.len();

        while index < len {
            match self.pending[index] {
                b'\n' => {
                    lines.push(decode(&self.pending[start..index]));
                    index += 1;
                    start = index;
                    cut = index;
                }
                b'\r' => {
                    // A lone trailing CR might be the first half of a CRLF;
                    // leave it pending until the next byte arrives.
                    if index + 1 >= len {
                        break;
                    }
                    lines.push(decode(&self.pending[start..index]));
                    if self.pending[index + 1] == b'\n' {
                        index += 2;
                    } else {
                        index += 1;
                    }
                    start = index;
                    cut = index;
                }
                _ => index += 1,
            }
        }

        self.consumed += cut as u64;
        self.pending.drain(..cut);
    }

    /// Bytes consumed by complete lines since construction.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Whether bytes of an incomplete line are pending.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
