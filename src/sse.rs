//! Event-stream framing for streamed turns.
//!
//! `data:` lines are grouped into events terminated by a blank line. Each
//! event payload is one JSON frame; the literal `[DONE]` marker is dropped
//! before decoding. Network chunks may split lines, events and multi-byte
//! characters anywhere.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const DONE_MARKER: &str = "[DONE]";

/// A decoded frame. Types this agent has no use for decode to `Other`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamFrame {
    TextDelta {
        delta: String,
    },
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolInputAvailable {
        tool_name: String,
        #[serde(default)]
        tool_call_id: Option<String>,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Parses one event payload. Malformed frames are logged and skipped.
pub fn decode_frame(payload: &str) -> Option<StreamFrame> {
    match serde_json::from_str(payload) {
        Ok(frame) => Some(frame),
        Err(err) => {
            debug!(%err, payload, "skipping malformed stream frame");
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes; an incomplete UTF-8 sequence at the end is held
    /// back until the next chunk completes it.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Truncated sequence: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
        self.push(&text)
    }

    /// Feeds decoded text and returns the payloads of every event it
    /// completed.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.extend(text.chars().filter(|c| *c != '\r'));
        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..end + 2).collect();
            payloads.extend(event_payload(&event));
        }
        payloads
    }

    /// Flushes a trailing event that was never terminated.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        self.pending.clear();
        event_payload(&rest).into_iter().collect()
    }
}

fn event_payload(event: &str) -> Option<String> {
    let data: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|d| d.strip_prefix(' ').unwrap_or(d))
        .collect();
    if data.is_empty() {
        return None;
    }
    let payload = data.join("\n");
    let trimmed = payload.trim();
    if trimmed.is_empty() || trimmed == DONE_MARKER {
        return None;
    }
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn groups_lines_into_events_across_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.push("data: {\"type\":\"text-del").is_empty());
        assert!(dec.push("ta\",\"delta\":\"Hi\"}\r\n").is_empty());
        let out = dec.push("\r\ndata: [DONE]\n\n");
        assert_eq!(out, vec![r#"{"type":"text-delta","delta":"Hi"}"#.to_string()]);
    }

    #[test]
    fn comments_and_ids_are_not_data() {
        let mut dec = SseDecoder::new();
        let out = dec.push(": keepalive\n\nid: 7\nevent: message\ndata:{\"type\":\"text\",\"text\":\"a\"}\n\n");
        assert_eq!(out.len(), 1);
        assert_eq!(
            decode_frame(&out[0]),
            Some(StreamFrame::Text { text: "a".into() })
        );
    }

    #[test]
    fn holds_split_multibyte_characters() {
        let mut dec = SseDecoder::new();
        let event = "data: {\"type\":\"text-delta\",\"delta\":\"héllo\"}\n\n".as_bytes();
        let split = event.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(dec.push_bytes(&event[..split]).is_empty());
        let out = dec.push_bytes(&event[split..]);
        assert_eq!(
            decode_frame(&out[0]),
            Some(StreamFrame::TextDelta { delta: "héllo".into() })
        );
    }

    #[test]
    fn unterminated_tail_is_flushed() {
        let mut dec = SseDecoder::new();
        assert!(dec.push("data: {\"type\":\"finish\"}").is_empty());
        let out = dec.finish();
        assert_eq!(decode_frame(&out[0]), Some(StreamFrame::Other));
    }

    #[test]
    fn decodes_tool_frames_and_skips_garbage() {
        let frame = decode_frame(
            r##"{"type":"tool-input-available","toolName":"moveButton","toolCallId":"c1","input":{"selector":"#a","x":1,"y":2}}"##,
        );
        assert_eq!(
            frame,
            Some(StreamFrame::ToolInputAvailable {
                tool_name: "moveButton".into(),
                tool_call_id: Some("c1".into()),
                input: json!({"selector": "#a", "x": 1, "y": 2}),
            })
        );
        assert_eq!(decode_frame("{not json"), None);
        assert_eq!(decode_frame(r#"{"delta":"no type"}"#), None);
    }
}
