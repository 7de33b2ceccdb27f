//! Line buffering for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary slices; only complete `data:` lines are emitted.

#[derive(Default)]
pub(crate) struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    /// Append bytes and drain every complete `data:` payload.
    ///
    /// Lines are decoded only once their `\n` has arrived, so a multi-byte
    /// character split across slices stays intact.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(line_end) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=line_end).collect();
            if let Some(data) = data_payload(&raw[..line_end]) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// A trailing `data:` line that was never newline-terminated.
    pub(crate) fn finish(self) -> Option<String> {
        data_payload(&self.pending)
    }
}

fn data_payload(raw: &[u8]) -> Option<String> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => {
            tracing::trace!(error = %e, "Dropping SSE line that is not UTF-8");
            return None;
        }
    };
    let line = line.trim_end_matches('\r');

    // Blank separators, comments and other fields carry no payload
    line.strip_prefix("data:").map(|d| d.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_only_complete_lines() {
        let mut buf = SseBuffer::default();
        assert!(buf.push(b"data: {\"a\":").is_empty());
        let out = buf.push(b"1}\n\ndata: [DONE]\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn skips_comments_and_other_fields() {
        let mut buf = SseBuffer::default();
        let out = buf.push(b": keep-alive\r\nevent: message\r\ndata: x\r\n");
        assert_eq!(out, vec!["x".to_string()]);
    }

    #[test]
    fn multibyte_char_split_across_slices_survives() {
        let mut buf = SseBuffer::default();
        let line = "data: 港鐵\n".as_bytes();
        // byte 7 falls inside the first character
        assert!(buf.push(&line[..7]).is_empty());
        assert_eq!(buf.push(&line[7..]), vec!["港鐵".to_string()]);
    }

    #[test]
    fn finish_returns_unterminated_payload() {
        let mut buf = SseBuffer::default();
        assert!(buf.push(b"data: tail").is_empty());
        assert_eq!(buf.finish().as_deref(), Some("tail"));
    }
}
