//! Line-oriented decoder for the event-tagged stream.
//!
//! The decoder starts unstructured: lines are passed through verbatim until
//! the first `event:` line switches it to structured mode for the rest of
//! the session.

use tracing::{trace, warn};

use crate::event::{StreamEvent, parse_event};

/// Output of the decoder for one complete record or line.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Event(StreamEvent),
    /// A raw line from a producer that has not sent any tag yet.
    Unstructured(String),
    /// A record that could not be parsed; never fatal.
    Malformed { tag: String, reason: String },
}

#[derive(Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
    structured: bool,
    active_tag: Option<String>,
    data_lines: Vec<String>,
}

impl EventDecoder {
    pub fn is_structured(&self) -> bool {
        self.structured
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=idx).collect();
            let line = String::from_utf8_lossy(&line_bytes[..idx]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.handle_line(line, true, &mut out);
        }
        out
    }

    /// Flushes the trailing partial line and any pending record.
    pub fn finish(&mut self) -> Vec<Decoded> {
        let mut out = Vec::new();
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&rest);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.handle_line(line, false, &mut out);
        }
        self.dispatch(&mut out);
        out
    }

    fn handle_line(&mut self, line: &str, terminated: bool, out: &mut Vec<Decoded>) {
        if let Some(tag) = line.strip_prefix("event:") {
            self.dispatch(out);
            self.structured = true;
            self.active_tag = Some(tag.trim().to_string());
            return;
        }
        // Comment lines only exist in the tagged protocol; legacy text such
        // as CSS `:root {` passes through untouched.
        if self.structured && line.starts_with(':') {
            return;
        }
        if self.active_tag.is_some() {
            if let Some(data) = line.strip_prefix("data:") {
                self.data_lines
                    .push(data.strip_prefix(' ').unwrap_or(data).to_string());
                return;
            }
            if line.is_empty() {
                self.dispatch(out);
                return;
            }
        }
        if !self.structured {
            let mut text = line.to_string();
            if terminated {
                text.push('\n');
            }
            out.push(Decoded::Unstructured(text));
            return;
        }
        if !line.is_empty() {
            trace!(line, "ignoring untagged line in structured stream");
        }
    }

    fn dispatch(&mut self, out: &mut Vec<Decoded>) {
        let Some(tag) = self.active_tag.take() else {
            return;
        };
        let data = std::mem::take(&mut self.data_lines).join("\n");
        match parse_event(&tag, &data) {
            Ok(event) => out.push(Decoded::Event(event)),
            Err(reason) => {
                warn!(tag = %tag, reason = %reason, "malformed stream record");
                out.push(Decoded::Malformed { tag, reason });
            }
        }
    }
}
