//! Rendering of received bytes for the terminal.

use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

/// Drain buffered bytes into displayable UTF-8 text without stalling on invalid bytes.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - An incomplete UTF-8 suffix is kept in `buffer` for the next chunk.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                    output.push_str(valid);
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push('\u{FFFD}');
                        let drain_to = valid_up_to.saturating_add(invalid_len).min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        buffer.drain(..valid_up_to);
                        break;
                    },
                }
            },
        }
    }

    output
}

/// `[HH:MM:SS.mmm]` of the current UTC wall clock.
fn timestamp_prefix() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let total_secs = now.as_secs();
    format!(
        "[{:02}:{:02}:{:02}.{:03}]",
        (total_secs / 3600) % 24,
        (total_secs / 60) % 60,
        total_secs % 60,
        now.subsec_millis()
    )
}

/// Turns a stream of received chunks into printable text.
///
/// Multi-byte characters split across chunks are reassembled. Line endings
/// are normalized; in raw terminal mode every newline becomes `\r\n`.
#[derive(Debug)]
pub struct MonitorFormatter {
    pending: Vec<u8>,
    timestamp: bool,
    raw_terminal: bool,
    colored: bool,
    at_line_start: bool,
    last_was_cr: bool,
}

impl MonitorFormatter {
    /// Create a formatter.
    pub fn new(timestamp: bool, raw_terminal: bool, colored: bool) -> Self {
        Self {
            pending: Vec::new(),
            timestamp,
            raw_terminal,
            colored,
            at_line_start: true,
            last_was_cr: false,
        }
    }

    /// Whether timestamps are currently shown.
    pub fn timestamp(&self) -> bool {
        self.timestamp
    }

    /// Flip timestamp display, returning the new setting.
    pub fn toggle_timestamp(&mut self) -> bool {
        self.timestamp = !self.timestamp;
        self.timestamp
    }

    /// Format one received chunk.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let text = drain_utf8_lossy(&mut self.pending);
        self.render(&text)
    }

    fn render(&mut self, text: &str) -> String {
        let newline = if self.raw_terminal { "\r\n" } else { "\n" };
        let mut out = String::with_capacity(text.len() + 16);

        for ch in text.chars() {
            match ch {
                '\n' if self.last_was_cr => {
                    // Second half of a CRLF already emitted as a newline
                    self.last_was_cr = false;
                },
                '\r' | '\n' => {
                    out.push_str(newline);
                    self.at_line_start = true;
                    self.last_was_cr = ch == '\r';
                },
                _ if ch.is_control() && ch != '\t' => {
                    self.last_was_cr = false;
                },
                _ => {
                    if self.at_line_start && self.timestamp {
                        let prefix = timestamp_prefix();
                        if self.colored {
                            let _ = write!(out, "\x1b[90m{prefix}\x1b[0m ");
                        } else {
                            let _ = write!(out, "{prefix} ");
                        }
                    }
                    self.at_line_start = false;
                    self.last_was_cr = false;
                    out.push(ch);
                },
            }
        }

        out
    }
}
