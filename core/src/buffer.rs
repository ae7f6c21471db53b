//! Buffer management for send and receive queues
//!
//! The send queue holds complete outbound lines and tracks their byte size so
//! the flow governor can compare it with the connect class ceilings. The
//! receive queue holds raw input bytes until a line terminator arrives.

use std::collections::VecDeque;

/// Maximum length of a protocol line, excluding the terminator
pub const MAX_LINE: usize = 512;

/// Maximum length of outbound line content before CRLF is appended
pub const MAX_OUTBOUND: usize = MAX_LINE - 2;

/// Send queue - outgoing lines with a running byte count
#[derive(Debug, Default)]
pub struct SendQueue {
    /// Buffer of outgoing lines
    buffer: VecDeque<String>,
    /// Current size in bytes
    current_size: usize,
}

impl SendQueue {
    /// Create an empty send queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a line. Ceilings are enforced by the owner before calling this.
    pub fn push(&mut self, line: String) {
        self.current_size += line.len();
        self.buffer.push_back(line);
    }

    /// Remove and return the next line from the queue
    pub fn pop(&mut self) -> Option<String> {
        let line = self.buffer.pop_front()?;
        self.current_size = self.current_size.saturating_sub(line.len());
        Some(line)
    }

    /// Remove everything, returning the lines in send order
    pub fn drain(&mut self) -> Vec<String> {
        self.current_size = 0;
        self.buffer.drain(..).collect()
    }

    /// Lines currently queued, oldest first
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.buffer.iter().map(String::as_str)
    }

    /// Get the number of lines in the queue
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get current buffer size in bytes
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Clear all lines from the queue
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.current_size = 0;
    }
}

/// Receive queue - raw input not yet split into lines
#[derive(Debug, Default)]
pub struct RecvQueue {
    buffer: Vec<u8>,
}

impl RecvQueue {
    /// Create an empty receive queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append data to the receive buffer
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pull the next complete line out of the buffer.
    ///
    /// NUL bytes read as spaces and carriage returns are dropped. Content past
    /// [`MAX_LINE`] is discarded up to the newline. Returns the line and the
    /// number of raw bytes consumed, or `None` (leaving the buffer untouched)
    /// when no newline has arrived yet.
    pub fn extract_line(&mut self) -> Option<(String, usize)> {
        let eol = self.buffer.iter().position(|&b| b == b'\n')?;

        let mut line = Vec::with_capacity(eol.min(MAX_LINE));
        for &byte in &self.buffer[..eol] {
            let byte = match byte {
                b'\0' => b' ',
                b'\r' => continue,
                other => other,
            };
            if line.len() < MAX_LINE {
                line.push(byte);
            }
        }

        let consumed = eol + 1;
        self.buffer.drain(..consumed);
        Some((String::from_utf8_lossy(&line).into_owned(), consumed))
    }

    /// Get current buffer size in bytes
    pub fn current_size(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the receive buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Check if buffer contains any incomplete data
    pub fn has_incomplete_data(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// Cut `text` to at most `max` bytes without splitting a character
pub fn truncate_on_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
