//! Multi-provider LLM client: wire-format adapters for OpenAI-shaped and
//! Anthropic-shaped APIs, unified behind [`router::Router`] and the
//! [`weave_stream::StreamEvent`] protocol. Model/provider/role
//! configuration itself lives in `weave-model-registry`; this crate does
//! only the HTTP calls, SSE parsing, and streaming.

mod anthropic_adapter;
mod error;
mod message;
mod openai_adapter;
mod router;
mod sse;

pub use error::LlmError;
pub use message::{ChatMessage, ChatRole, CompletionRequest, ToolChoice, ToolSpec};
pub use router::{CompletionOutcome, Router, STREAM_CHANNEL_CAPACITY};
pub use sse::{SseFrame, SseFrameSplitter};
