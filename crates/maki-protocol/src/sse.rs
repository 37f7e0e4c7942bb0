//! Incremental server-sent-events parser. Upstream bodies arrive in
//! arbitrary byte chunks; events are only surfaced once their blank-line
//! terminator has been seen.

use bytes::Bytes;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    pending: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &Bytes) -> Vec<SseFrame> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.feed_str(text),
            // Non-UTF8 noise inside an SSE body is dropped wholesale.
            Err(_) => Vec::new(),
        }
    }

    pub fn feed_str(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.pending.push_str(chunk);
        let mut out = Vec::new();
        while let Some(nl) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=nl).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            self.take_line(line, &mut out);
        }
        out
    }

    /// Flush a trailing frame that was never terminated by a blank line.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut out = Vec::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.take_line(line.trim_end_matches('\r'), &mut out);
        }
        self.close_frame(&mut out);
        out
    }

    fn take_line(&mut self, line: &str, out: &mut Vec<SseFrame>) {
        if line.is_empty() {
            self.close_frame(out);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = (!value.is_empty()).then(|| value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id/retry and unknown fields are irrelevant to the proxy path.
            _ => {}
        }
    }

    fn close_frame(&mut self, out: &mut Vec<SseFrame>) {
        if self.event.is_none() && self.data.is_empty() {
            return;
        }
        out.push(SseFrame {
            event: self.event.take(),
            data: self.data.join("\n"),
        });
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::SseParser;

    #[test]
    fn split_across_chunks() {
        let mut p = SseParser::new();
        assert!(p.feed_str("data: {\"a\":").is_empty());
        let frames = p.feed_str("1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn named_events_and_comments() {
        let mut p = SseParser::new();
        let frames =
            p.feed_str(": keepalive\nevent: message_start\ndata: {}\n\ndata: [DONE]\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("message_start"));
        assert_eq!(frames[0].data, "{}");
        assert_eq!(frames[1].event, None);
        assert_eq!(frames[1].data, "[DONE]");
    }

    #[test]
    fn multiline_data_joins_with_newline() {
        let mut p = SseParser::new();
        let frames = p.feed_str("data: a\ndata: b\n\n");
        assert_eq!(frames[0].data, "a\nb");
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut p = SseParser::new();
        assert!(p.feed_str("data: tail").is_empty());
        let frames = p.finish();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "tail");
    }
}
