//! Unified LLM streaming event protocol.
//!
//! A streaming completion call emits a sequence of these over one bounded
//! channel: zero or more `Content`/`Reasoning`/`ToolCall`/`Usage` events,
//! terminated by exactly one `Done` (even on the error path, where an
//! `Error` event precedes it). Wire-format adapters (OpenAI-shaped,
//! Anthropic-shaped) each translate their own SSE frames into this set;
//! nothing downstream needs to know which provider produced a given event.

use serde::{Deserialize, Serialize};

/// One reconstructed tool call, assembled from provider-specific deltas.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id (e.g. OpenAI `tool_calls[].id`, Anthropic `tool_use.id`).
    pub id: String,
    /// Tool/function name.
    pub name: String,
    /// Complete JSON-encoded arguments string (concatenation of all deltas).
    pub arguments: String,
}

/// Token usage for one LLM call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Unified streaming event. Serialized as `{"type": ..., ...payload}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of assistant-visible text content.
    Content { delta: String },
    /// A chunk of reasoning/thinking text (Anthropic `thinking_delta`; absent on providers
    /// without extended thinking).
    Reasoning { delta: String },
    /// One batch of fully-reassembled tool calls, emitted once per stream when the
    /// provider signals the turn is done producing tool calls (OpenAI `[DONE]`,
    /// Anthropic `message_stop` after pending tool-use blocks were committed).
    ToolCall { calls: Vec<ToolCall> },
    /// Token usage, when the provider reports it.
    Usage(Usage),
    /// Always the last event on the channel, success or failure.
    Done,
    /// A provider or transport error occurred; `Done` always follows.
    Error { message: String },
}

impl StreamEvent {
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_event_serializes_with_type_tag() {
        let ev = StreamEvent::Content {
            delta: "hi".to_string(),
        };
        let v = ev.to_value().unwrap();
        assert_eq!(v["type"], "content");
        assert_eq!(v["delta"], "hi");
    }

    #[test]
    fn tool_call_event_carries_batch() {
        let ev = StreamEvent::ToolCall {
            calls: vec![ToolCall {
                id: "T1".into(),
                name: "search".into(),
                arguments: "{\"q\":\"foo\"}".into(),
            }],
        };
        let v = ev.to_value().unwrap();
        assert_eq!(v["type"], "tool_call");
        assert_eq!(v["calls"][0]["name"], "search");
    }

    #[test]
    fn done_and_error_events_round_trip() {
        let done = StreamEvent::Done;
        let v = done.to_value().unwrap();
        assert_eq!(v["type"], "done");

        let err = StreamEvent::Error {
            message: "boom".into(),
        };
        let v = err.to_value().unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["message"], "boom");
    }
}
