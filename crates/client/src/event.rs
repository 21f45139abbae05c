//! Decoding SSE payloads into chat events.

use blocks_core::stream::StreamEvent;
use serde::Deserialize;
use tracing::trace;

/// One event surfaced to the chat reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Stream(StreamEvent),
    /// The sentinel closing every chat stream.
    Done,
}

#[derive(Deserialize)]
struct Tagged {
    #[serde(rename = "type")]
    kind: String,
}

impl ChatEvent {
    /// Decode one `data:` payload. Payloads that are not a known event
    /// (control tokens, malformed JSON) yield `None`.
    pub fn decode(payload: &str) -> Option<Self> {
        match serde_json::from_str::<Tagged>(payload) {
            Ok(tagged) if tagged.kind == "done" => return Some(Self::Done),
            Ok(_) => {}
            Err(e) => {
                trace!(payload, error = %e, "Ignoring non-JSON SSE payload");
                return None;
            }
        }

        match serde_json::from_str::<StreamEvent>(payload) {
            Ok(event) => Some(Self::Stream(event)),
            Err(e) => {
                trace!(payload, error = %e, "Ignoring unknown SSE event");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocks_core::stream::DONE_FRAME;

    #[test]
    fn decodes_done_sentinel() {
        assert_eq!(ChatEvent::decode(DONE_FRAME), Some(ChatEvent::Done));
    }

    #[test]
    fn decodes_stream_events() {
        assert_eq!(
            ChatEvent::decode(r#"{"type":"content_delta","content":"Hi"}"#),
            Some(ChatEvent::Stream(StreamEvent::ContentDelta { content: "Hi".into() }))
        );
    }

    #[test]
    fn ignores_garbage() {
        assert_eq!(ChatEvent::decode("[DONE]"), None);
        assert_eq!(ChatEvent::decode("{not json"), None);
        assert_eq!(ChatEvent::decode(r#"{"type":"mystery"}"#), None);
    }
}
