//! Server-sent events decoding for streaming provider responses
//!
//! Providers stream `data: {...}` lines separated by blank lines. The decoder
//! buffers raw bytes so multi-byte characters split across network chunks are
//! reassembled before being interpreted.

use crate::llm::provider::{LlmError, ProviderId};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;

/// Incremental decoder that extracts `data:` payloads from an SSE byte stream
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a `[DONE]` sentinel has been seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes, returning every complete data payload
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = self.parse_line(&line) {
                payloads.push(data);
            }
        }

        payloads
    }

    /// Flush a trailing line that arrived without a newline
    pub fn finish(&mut self) -> Vec<String> {
        let line = std::mem::take(&mut self.buffer);
        self.parse_line(&line).into_iter().collect()
    }

    fn parse_line(&mut self, raw: &[u8]) -> Option<String> {
        if self.done {
            return None;
        }

        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
        let data = line.strip_prefix("data:")?.trim_start();

        if data == "[DONE]" {
            self.done = true;
            return None;
        }
        if data.is_empty() {
            return None;
        }

        Some(data.to_string())
    }
}

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

/// Turn a streaming HTTP response into a stream of SSE data payloads
pub fn data_stream(
    provider: ProviderId,
    response: reqwest::Response,
) -> BoxStream<'static, Result<String, LlmError>> {
    let state = SseState {
        bytes: response.bytes_stream().boxed(),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, move |mut state| async move {
        loop {
            if let Some(data) = state.pending.pop_front() {
                return Some((Ok(data), state));
            }
            if state.finished || state.decoder.is_done() {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.pending.extend(state.decoder.feed(&chunk)),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(LlmError::from_transport(provider, &e)), state));
                }
                None => {
                    state.finished = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_extracts_data_lines() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.feed(b"event: ping\ndata: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"text\":\"mar").is_empty());
        let payloads = decoder.feed(b"haba\"}\r\n");
        assert_eq!(payloads, vec!["{\"text\":\"marhaba\"}"]);
    }

    #[test]
    fn test_decoder_reassembles_split_utf8() {
        let text = "data: مرحبا\n".as_bytes();
        let (first, second) = text.split_at(7);
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(first).is_empty());
        assert_eq!(decoder.feed(second), vec!["مرحبا"]);
    }

    #[test]
    fn test_decoder_stops_at_done_sentinel() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.feed(b"data: one\ndata: [DONE]\ndata: two\n");
        assert_eq!(payloads, vec!["one"]);
        assert!(decoder.is_done());
    }

    #[test]
    fn test_finish_flushes_trailing_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), vec!["tail"]);
    }
}
