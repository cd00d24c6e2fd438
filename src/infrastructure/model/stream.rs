//! Reassembly of chunked streaming bodies into complete lines.
//!
//! Ollama streams newline-delimited JSON; OpenAI-compatible APIs and Gemini
//! (`alt=sse`) stream server-sent events. Both arrive as arbitrary byte
//! chunks, so the clients buffer until a full line is available.

/// Accumulates body chunks and yields complete lines as they form. Trailing
/// partial data stays buffered until the next chunk or `take_remainder`.
///
/// Chunk boundaries are arbitrary and can fall inside a multi-byte UTF-8
/// character, so the buffer holds raw bytes and only decodes once a full
/// line (or the final remainder) is available.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&byte| byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Any unterminated final line once the stream is done.
    pub fn take_remainder(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

/// Extract the payload of an SSE `data:` line, if that is what this is.
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_lines_split_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"{\"done\":fal").is_empty());
        let lines = buffer.push(b"se}\n{\"done\":true}\n");
        assert_eq!(lines, vec!["{\"done\":false}", "{\"done\":true}"]);
        assert!(buffer.take_remainder().is_none());
    }

    #[test]
    fn handles_crlf_and_blank_lines() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"data: one\r\n\r\ndata: two\r\n");
        assert_eq!(lines, vec!["data: one", "data: two"]);
    }

    #[test]
    fn multibyte_char_split_across_chunks_stays_intact() {
        let mut buffer = LineBuffer::new();
        // 'é' is 0xC3 0xA9; the chunk boundary falls between its bytes.
        assert!(buffer.push(b"h\xC3").is_empty());
        assert_eq!(buffer.push(b"\xA9llo\n"), vec!["héllo"]);

        assert!(buffer.push(b"caf\xC3").is_empty());
        assert!(buffer.push(b"\xA9").is_empty());
        assert_eq!(buffer.take_remainder().as_deref(), Some("café"));
    }

    #[test]
    fn remainder_returns_unterminated_tail() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"tail without newline").is_empty());
        assert_eq!(
            buffer.take_remainder().as_deref(),
            Some("tail without newline")
        );
    }

    #[test]
    fn sse_data_strips_prefix_only_on_data_lines() {
        assert_eq!(sse_data("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data("event: ping"), None);
    }
}
