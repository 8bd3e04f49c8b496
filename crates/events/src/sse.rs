//! Incremental `text/event-stream` decoder.
//!
//! Transport chunks arrive at arbitrary byte boundaries (mid-line, even
//! mid-codepoint), so the decoder buffers raw bytes and only interprets
//! complete lines. A line or event that outgrows [`MAX_FRAME_BYTES`] is an
//! error; the stream it came from is not worth reading further.

use thiserror::Error;

/// Upper bound on one buffered line and on one event's accumulated data.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SseError {
    #[error("event stream line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("event stream frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Value of the last `id:` field, if any.
    pub id: Option<String>,
}

#[derive(Debug)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_bytes: usize,
    id: Option<String>,
    limit: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            event: None,
            data: Vec::new(),
            data_bytes: 0,
            id: None,
            limit,
        }
    }

    /// Feed a transport chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, SseError> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.len() > self.limit {
                return Err(SseError::LineTooLong { limit: self.limit });
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line)? {
                frames.push(frame);
            }
        }
        if self.pending.len() > self.limit {
            self.pending.clear();
            return Err(SseError::LineTooLong { limit: self.limit });
        }
        Ok(frames)
    }

    fn process_line(&mut self, line: &str) -> Result<Option<SseFrame>, SseError> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }
        if line.starts_with(':') {
            return Ok(None);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_bytes += value.len() + 1;
                if self.data_bytes > self.limit {
                    return Err(SseError::FrameTooLarge { limit: self.limit });
                }
                self.data.push(value.to_string());
            }
            "id" => self.id = Some(value.to_string()),
            // `retry` is a transport reconnection hint; reconnection is not ours.
            _ => {}
        }
        Ok(None)
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: self.data.join("\n"),
            id: self.id.clone(),
        };
        self.data.clear();
        self.data_bytes = 0;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_event_with_data() {
        let mut dec = SseDecoder::new();
        let frames = dec.push(b"event: scanEvent\ndata: {\"a\":1}\n\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("scanEvent"));
        assert_eq!(frames[0].data, "{\"a\":1}");
    }

    #[test]
    fn frames_split_across_chunks_are_reassembled() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"event: conn").unwrap().is_empty());
        assert!(dec.push(b"ected\r\ndata: hel").unwrap().is_empty());
        let frames = dec.push(b"lo\r\n\r\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("connected"));
        assert_eq!(frames[0].data, "hello");
    }

    #[test]
    fn multi_line_data_is_joined_and_comments_skipped() {
        let mut dec = SseDecoder::new();
        let frames = dec
            .push(b": keep-alive\n\ndata: one\ndata: two\nid: 7\n\n")
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, None);
        assert_eq!(frames[0].data, "one\ntwo");
        assert_eq!(frames[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn unterminated_line_past_the_limit_is_an_error() {
        let mut dec = SseDecoder::with_limit(16);
        assert!(dec.push(b"data: 0123456").unwrap().is_empty());
        assert_eq!(
            dec.push(b"789abcdef"),
            Err(SseError::LineTooLong { limit: 16 })
        );
    }

    #[test]
    fn oversized_event_data_is_an_error() {
        let mut dec = SseDecoder::with_limit(16);
        assert!(dec.push(b"data: 01234567\n").unwrap().is_empty());
        assert_eq!(
            dec.push(b"data: 89abcdef\n"),
            Err(SseError::FrameTooLarge { limit: 16 })
        );

        let mut dec = SseDecoder::with_limit(16);
        let frames = dec.push(b"data: 0123\n\ndata: 4567\n\n").unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn multibyte_characters_split_mid_codepoint_survive() {
        let mut dec = SseDecoder::new();
        let bytes = "data: Zürich\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(dec.push(&bytes[..split]).unwrap().is_empty());
        let frames = dec.push(&bytes[split..]).unwrap();
        assert_eq!(frames[0].data, "Zürich");
    }
}
