//! Unified LLM streaming event protocol: type + payload + envelope.
//!
//! Every wire format the router speaks (OpenAI-shaped SSE, Anthropic-shaped
//! SSE) is translated into [`StreamEvent`] before it reaches any caller; this
//! crate defines that wire-neutral shape plus envelope injection for
//! multiplexed consumers. It has no dependency on the router or the graph
//! store.

pub mod envelope;
pub mod event;

pub use envelope::{Envelope, EnvelopeState};
pub use event::{StreamEvent, ToolCall, Usage};
