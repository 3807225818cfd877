//! Line decoder for `data: <json>` server-sent-event bodies.
//!
//! Network buffers split lines (and multi-byte characters) anywhere, so bytes
//! are held until a newline arrives. Only `data:` lines are surfaced; the
//! OpenAI `[DONE]` sentinel is dropped rather than treated as an end marker.

use crate::error::ApiError;
use bytes::BytesMut;
use futures::stream::{BoxStream, StreamExt};

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network buffer; returns the payloads of every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            if let Some(data) = data_payload(&line[..pos]) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        data_payload(&rest)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == DONE_SENTINEL {
        return None;
    }
    Some(data.to_string())
}

/// Decode a streaming HTTP body into SSE `data` payloads, in receive order.
pub(crate) fn data_payloads(resp: reqwest::Response) -> BoxStream<'static, Result<String, ApiError>> {
    let s = async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut byte_stream = resp.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield Err(ApiError::network(e));
                    return;
                }
            };
            for payload in decoder.push(&chunk) {
                yield Ok(payload);
            }
        }

        if let Some(payload) = decoder.finish() {
            yield Ok(payload);
        }
    };
    Box::pin(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_buffers_are_joined() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"data: {\"a\":").is_empty());
        assert_eq!(d.push(b"1}\n\ndata: {\"b\":2}\n"), vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[test]
    fn multibyte_characters_survive_buffer_splits() {
        let line = "data: {\"t\":\"héllo\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut d = SseDecoder::new();
        assert!(d.push(&line[..split]).is_empty());
        assert_eq!(d.push(&line[split..]), vec![r#"{"t":"héllo"}"#]);
    }

    #[test]
    fn non_data_lines_and_done_are_skipped() {
        let mut d = SseDecoder::new();
        let out = d.push(b": keep-alive\r\nevent: message\r\ndata: {\"x\":1}\r\ndata: [DONE]\r\n");
        assert_eq!(out, vec![r#"{"x":1}"#]);
    }

    #[test]
    fn trailing_line_without_newline_is_flushed() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"data: {\"last\":true}").is_empty());
        assert_eq!(d.finish().as_deref(), Some(r#"{"last":true}"#));
        assert_eq!(d.finish(), None);
    }

    #[test]
    fn malformed_payloads_are_passed_through_for_the_adapter_to_skip() {
        let mut d = SseDecoder::new();
        assert_eq!(d.push(b"data: {not json\n"), vec!["{not json"]);
    }
}
