//! Envelope (call_id, role, sequence) attached to each streamed event for callers
//! that multiplex several concurrent LLM calls (e.g. the pipeline runner watching
//! several work orders at once).

use crate::event::StreamEvent;
use serde_json::Value;

/// Envelope fields merged into each event's JSON.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Identifies the logical call (e.g. a work-order id or agent key).
    pub call_id: Option<String>,
    /// The router role this call was dispatched under (`synthesizer`, `orchestrator`, ...).
    pub role: Option<String>,
    /// Per-event sequence number, monotonically increasing within one call.
    pub sequence: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_call_id(mut self, id: impl Into<String>) -> Self {
        self.call_id = Some(id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_sequence(mut self, seq: u64) -> Self {
        self.sequence = Some(seq);
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    /// Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.call_id {
            obj.entry("call_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref role) = self.role {
            obj.entry("role")
                .or_insert_with(|| Value::String(role.clone()));
        }
        if let Some(seq) = self.sequence {
            obj.entry("sequence")
                .or_insert_with(|| Value::Number(serde_json::Number::from(seq)));
        }
    }
}

/// Tracks per-call sequence numbers and injects the envelope into each event.
pub struct EnvelopeState {
    pub call_id: String,
    pub role: String,
    next_sequence: u64,
}

impl EnvelopeState {
    pub fn new(call_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            role: role.into(),
            next_sequence: 1,
        }
    }

    pub fn to_json(&mut self, event: &StreamEvent) -> Result<Value, serde_json::Error> {
        let mut value = event.to_value()?;
        let env = Envelope::new()
            .with_call_id(self.call_id.clone())
            .with_role(self.role.clone())
            .with_sequence(self.next_sequence);
        self.next_sequence += 1;
        env.inject_into(&mut value);
        Ok(value)
    }
}
