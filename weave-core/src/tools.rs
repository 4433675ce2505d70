//! Tool registry and runner. Each tool is a named record of (JSON input
//! schema, handler, tag set, optional challenge predicate). The runner drives
//! every call through the same six-step pipeline: lookup, pre-observation,
//! challenge check (unless `confirm=true`), cancellable execute,
//! post-observation, and — on success for file-touching tools — a
//! SYSTEM.file node plus an edge-event from the session. Tools are the only
//! sanctioned external mutation path; internal subsystems call `GraphStore`
//! CRUD directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use weave_graph::{EventRelation, GraphStore, Layer};
use weave_ids::Id;

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub tags: Vec<String>,
    /// Whether a successful call should emit a SYSTEM.file node + edge-event.
    pub file_touching: bool,
}

/// Per-call context: cancellation and the session the call is attributed to.
pub struct ToolCallContext {
    pub session_id: Id,
    pub cancellation: CancellationToken,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    /// Returns a human-readable challenge description if this invocation
    /// should be confirmed before running; `None` means it never needs one.
    fn challenge(&self, _args: &serde_json::Value) -> Option<String> {
        None
    }

    async fn call(&self, args: serde_json::Value, ctx: &ToolCallContext) -> Result<serde_json::Value, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("call was cancelled")]
    Cancelled,
    #[error("tool execution failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Graph(#[from] weave_graph::GraphError),
}

#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Result(serde_json::Value),
    /// The tool has a matching challenge predicate and the caller didn't set
    /// `confirm=true`. No side effects were performed.
    Challenge(String),
}

/// Derives the file edge-event relation from the tool's name: read-like
/// tools observe, write-like tools modify, everything else merely triggers.
fn classify_relation(tool_name: &str) -> EventRelation {
    const READ_PREFIXES: &[&str] = &["read", "ls", "grep", "search", "show", "list", "cat"];
    const WRITE_PREFIXES: &[&str] = &["write", "edit", "delete", "create", "move", "append", "patch"];
    if READ_PREFIXES.iter().any(|p| tool_name.starts_with(p)) {
        EventRelation::Observed
    } else if WRITE_PREFIXES.iter().any(|p| tool_name.starts_with(p)) {
        EventRelation::Modified
    } else {
        EventRelation::Triggered
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(handler.spec().name.clone(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec().clone()).collect()
    }
}

pub struct ToolRunner {
    store: GraphStore,
}

impl ToolRunner {
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    pub async fn run(
        &self,
        registry: &ToolRegistry,
        session_id: Id,
        tool_name: &str,
        args: serde_json::Value,
        confirm: bool,
        cancellation: CancellationToken,
    ) -> Result<ToolOutcome, ToolError> {
        let handler = registry.get(tool_name).ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        self.store
            .create_observation(session_id, "tool.pre", None, serde_json::json!({"tool": tool_name, "args": args}), None)
            .await?;

        if let Some(description) = handler.challenge(&args) {
            if !confirm {
                return Ok(ToolOutcome::Challenge(description));
            }
        }

        let ctx = ToolCallContext { session_id, cancellation: cancellation.clone() };
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(ToolError::Cancelled),
            res = handler.call(args, &ctx) => res,
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        let success = result.is_ok();

        self.store
            .create_observation(
                session_id,
                "tool.post",
                Some(duration_ms as f64),
                serde_json::json!({"tool": tool_name, "success": success}),
                None,
            )
            .await?;

        let spec = handler.spec();
        if success && spec.file_touching {
            if let Some(path) = result.as_ref().ok().and_then(|v| v.get("path")).and_then(|v| v.as_str()) {
                let file_node = self.store.upsert_node(Layer::System, "file", path, serde_json::json!({})).await?;
                let relation = classify_relation(tool_name);
                self.store
                    .create_edge_event(session_id, file_node.id, relation, true, Some(duration_ms), serde_json::json!({"tool": tool_name}), None)
                    .await?;
            }
        }

        result.map(ToolOutcome::Result)
    }
}
