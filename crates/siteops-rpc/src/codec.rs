//! Newline-delimited framing for JSON-RPC envelopes.
//!
//! Every envelope is written as compact JSON followed by one `\n`. On the
//! read side bytes accumulate in a carry-over buffer; each complete line is
//! parsed on its own, so a malformed line never desynchronizes the lines
//! after it.

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

/// Message delimiter on the wire.
pub const DELIMITER: u8 = b'\n';

/// Default ceiling for an unterminated message held in the buffer.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("Inbound buffer holds {size} bytes without a delimiter (limit {max})")]
    BufferOverflow { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Line codec yielding one JSON object per complete line.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_message_bytes: usize,
    /// Bytes of the buffer already scanned without finding a delimiter.
    scanned: usize,
    dropped: u64,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::with_max_message_bytes(DEFAULT_MAX_MESSAGE_BYTES)
    }

    pub fn with_max_message_bytes(max_message_bytes: usize) -> Self {
        Self {
            max_message_bytes,
            scanned: 0,
            dropped: 0,
        }
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    /// Segments discarded because they were not a JSON object.
    pub fn dropped_segments(&self) -> u64 {
        self.dropped
    }

    /// Append `bytes` to `buffer` and extract every complete message.
    ///
    /// On return `buffer` holds only the undelimited tail.
    pub fn feed(&mut self, buffer: &mut BytesMut, bytes: &[u8]) -> Result<Vec<Value>, CodecError> {
        buffer.extend_from_slice(bytes);
        let mut messages = Vec::new();
        while let Some(message) = self.decode(buffer)? {
            messages.push(message);
        }
        Ok(messages)
    }

    fn parse_segment(&mut self, segment: &[u8]) -> Option<Value> {
        let line = trim_ascii(segment);
        if line.is_empty() {
            return None;
        }

        match serde_json::from_slice::<Value>(line) {
            Ok(value @ Value::Object(_)) => Some(value),
            Ok(other) => {
                self.dropped += 1;
                tracing::debug!(kind = json_kind(&other), "Dropping non-object segment");
                None
            }
            Err(e) => {
                self.dropped += 1;
                tracing::debug!(error = %e, len = line.len(), "Dropping unparsable segment");
                None
            }
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize a message to its framed wire form.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(DELIMITER);
    Ok(bytes)
}

impl Decoder for MessageCodec {
    type Item = Value;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, CodecError> {
        loop {
            let start = self.scanned.min(src.len());
            let Some(offset) = src[start..].iter().position(|b| *b == DELIMITER) else {
                self.scanned = src.len();
                if src.len() > self.max_message_bytes {
                    return Err(CodecError::BufferOverflow {
                        size: src.len(),
                        max: self.max_message_bytes,
                    });
                }
                return Ok(None);
            };

            let end = start + offset;
            self.scanned = 0;
            let segment = src.split_to(end + 1);
            if let Some(message) = self.parse_segment(&segment[..end]) {
                return Ok(Some(message));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Value>, CodecError> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }
        if !src.is_empty() {
            tracing::debug!(len = src.len(), "Discarding unterminated tail at EOF");
            src.clear();
            self.scanned = 0;
        }
        Ok(None)
    }
}

impl<T: Serialize> Encoder<T> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), CodecError> {
        let json = serde_json::to_vec(&item)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(DELIMITER);
        Ok(())
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{JsonRpcRequest, RequestId};
    use serde_json::json;

    fn sample_stream() -> (Vec<Value>, Vec<u8>) {
        let messages = vec![
            json!({"jsonrpc": "2.0", "method": "initialize", "params": {"clientInfo": {"name": "t", "version": "1"}}, "id": 0}),
            json!({"jsonrpc": "2.0", "method": "ping", "id": "a\nb"}),
            json!({"jsonrpc": "2.0", "method": "site/deploy", "params": ["blue", 2]}),
            json!({"jsonrpc": "2.0", "method": "ping", "id": 3}),
        ];
        let mut wire = Vec::new();
        for m in &messages {
            wire.extend(encode(m).unwrap());
        }
        (messages, wire)
    }

    #[test]
    fn test_encode_appends_single_delimiter() {
        let req = JsonRpcRequest::new("ping", None, Some(RequestId::from(1)));
        let bytes = encode(&req).unwrap();
        assert_eq!(bytes.last(), Some(&DELIMITER));
        assert_eq!(bytes.iter().filter(|b| **b == DELIMITER).count(), 1);
    }

    #[test]
    fn test_feed_recovers_sequence_at_every_split_point() {
        let (messages, wire) = sample_stream();
        let tail = br#"{"jsonrpc":"2.0","meth"#;
        let mut full = wire.clone();
        full.extend_from_slice(tail);

        for split in 0..=full.len() {
            let mut codec = MessageCodec::new();
            let mut buffer = BytesMut::new();
            let mut out = codec.feed(&mut buffer, &full[..split]).unwrap();
            out.extend(codec.feed(&mut buffer, &full[split..]).unwrap());
            assert_eq!(out, messages, "split at {split}");
            assert_eq!(&buffer[..], &tail[..], "split at {split}");
        }
    }

    #[test]
    fn test_feed_byte_by_byte() {
        let (messages, wire) = sample_stream();
        let mut codec = MessageCodec::new();
        let mut buffer = BytesMut::new();
        let mut out = Vec::new();
        for b in &wire {
            out.extend(codec.feed(&mut buffer, std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(out, messages);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_malformed_segment_dropped_without_desync() {
        let mut codec = MessageCodec::new();
        let mut buffer = BytesMut::new();
        let input = b"{\"broken\":\n{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}\n";
        let out = codec.feed(&mut buffer, input).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["method"], "ping");
        assert_eq!(codec.dropped_segments(), 1);
    }

    #[test]
    fn test_empty_segments_ignored_and_not_counted() {
        let mut codec = MessageCodec::new();
        let mut buffer = BytesMut::new();
        let out = codec
            .feed(&mut buffer, b"\n\n  \r\n{\"method\":\"ping\"}\r\n\n")
            .unwrap();
        assert_eq!(out, vec![json!({"method": "ping"})]);
        assert_eq!(codec.dropped_segments(), 0);
    }

    #[test]
    fn test_non_object_segments_dropped() {
        let mut codec = MessageCodec::new();
        let mut buffer = BytesMut::new();
        let out = codec
            .feed(&mut buffer, b"42\n[{\"method\":\"ping\"}]\n\"text\"\n")
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(codec.dropped_segments(), 3);
    }

    #[test]
    fn test_overflow_without_delimiter_is_reported() {
        let mut codec = MessageCodec::with_max_message_bytes(16);
        let mut buffer = BytesMut::new();
        assert!(codec.feed(&mut buffer, b"{\"method\":").unwrap().is_empty());
        let err = codec.feed(&mut buffer, b"\"aaaaaaaaaaaaa").unwrap_err();
        assert!(matches!(err, CodecError::BufferOverflow { max: 16, .. }));
    }

    #[test]
    fn test_long_message_with_delimiter_within_limit_passes() {
        let mut codec = MessageCodec::with_max_message_bytes(64);
        let mut buffer = BytesMut::new();
        let line = format!("{{\"method\":\"{}\"}}\n", "x".repeat(40));
        let out = codec.feed(&mut buffer, line.as_bytes()).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_decode_eof_discards_tail() {
        let mut codec = MessageCodec::new();
        let mut buffer = BytesMut::from(&b"{\"method\":\"ping\"}\n{\"method\""[..]);
        assert!(codec.decode_eof(&mut buffer).unwrap().is_some());
        assert!(codec.decode_eof(&mut buffer).unwrap().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_encoder_matches_encode() {
        let mut codec = MessageCodec::new();
        let mut dst = BytesMut::new();
        let value = json!({"jsonrpc": "2.0", "method": "progress"});
        codec.encode(&value, &mut dst).unwrap();
        assert_eq!(&dst[..], &encode(&value).unwrap()[..]);
    }
}
