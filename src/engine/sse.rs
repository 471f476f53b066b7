//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks; complete lines are cut out of the buffer and
//! `data:` lines are joined until a blank line dispatches one message. A bare line
//! starting with `{` is dispatched on its own so newline-delimited JSON works too.

use bytes::BytesMut;

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every message it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            let text = String::from_utf8_lossy(&line[..pos]);
            let text = text.strip_suffix('\r').unwrap_or(&*text);
            self.handle_line(text, &mut out);
        }
        out
    }

    /// Flush whatever is left once the body has ended.
    pub fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.buf.is_empty() {
            let rest = self.buf.split();
            let text = String::from_utf8_lossy(&rest);
            let text = text.trim_end_matches(['\r', '\n']);
            self.handle_line(text, &mut out);
        }
        if !self.data.is_empty() {
            out.push(self.data.join("\n"));
            self.data.clear();
        }
        out
    }

    fn handle_line(&mut self, line: &str, out: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                out.push(self.data.join("\n"));
                self.data.clear();
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data
                .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            return;
        }
        if self.data.is_empty() && line.trim_start().starts_with('{') {
            out.push(line.to_string());
        }
        // event:, id:, retry: carry nothing we use.
    }
}
