//! Prompt assembly: ordered named sources, concatenate non-empty sections.
//! Each [`PromptSource`] is a small, independently testable async function
//! over a [`PromptCtx`] snapshot; a [`PromptRecipe`] names which sources to
//! run, in what order, with what per-source item cap. Unknown source names
//! in a recipe are a typed error, never a silent skip.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use weave_git::GitClient;
use weave_graph::{GraphStore, Layer, Node};
use weave_ids::Id;
use weave_llm::Router;

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("unknown prompt source: {0}")]
    UnknownSource(String),
    #[error(transparent)]
    Graph(#[from] weave_graph::GraphError),
}

/// Read-only context a source renders against. Sources never mutate the
/// graph; any inputs they need beyond the store are threaded through here.
pub struct PromptCtx<'a> {
    pub store: &'a GraphStore,
    pub git: Option<&'a dyn GitClient>,
    pub router: Option<&'a Router>,
    pub now: DateTime<Utc>,
    pub repo_root: Option<String>,
    pub agent_key: Option<String>,
    pub task_id: Option<Id>,
    pub suggestion_id: Option<Id>,
    pub work_order_id: Option<Id>,
    pub query: Option<String>,
}

impl<'a> PromptCtx<'a> {
    pub fn new(store: &'a GraphStore, now: DateTime<Utc>) -> Self {
        Self {
            store,
            git: None,
            router: None,
            now,
            repo_root: None,
            agent_key: None,
            task_id: None,
            suggestion_id: None,
            work_order_id: None,
            query: None,
        }
    }
}

#[async_trait]
pub trait PromptSource: Send + Sync {
    /// Renders this source's section, or `None` if it has nothing to show
    /// (an empty section is omitted from the assembled prompt, never
    /// rendered as an empty header).
    async fn render(&self, ctx: &PromptCtx<'_>, max_items: Option<usize>) -> Result<Option<String>, PromptError>;
}

fn render_node_line(node: &Node) -> String {
    match node.data.get("status").and_then(|v| v.as_str()) {
        Some(status) => format!("- {} ({status})", node.name),
        None => format!("- {}", node.name),
    }
}

fn render_bulleted(header: &str, nodes: &[Node]) -> Option<String> {
    if nodes.is_empty() {
        return None;
    }
    let body = nodes.iter().map(render_node_line).collect::<Vec<_>>().join("\n");
    Some(format!("{header}:\n{body}"))
}

/// Lists the most recently updated nodes of a fixed `(layer, node_type)`,
/// capped at the smaller of the recipe's requested `max_items` and this
/// source's hard cap. Backs most of the named list sources: tasks,
/// constraints, insights, decisions, suggestions, files, work orders,
/// active agents.
struct BoundedNodeList {
    layer: Layer,
    node_type: &'static str,
    header: &'static str,
    hard_cap: usize,
}

#[async_trait]
impl PromptSource for BoundedNodeList {
    async fn render(&self, ctx: &PromptCtx<'_>, max_items: Option<usize>) -> Result<Option<String>, PromptError> {
        let limit = max_items.map(|n| n.min(self.hard_cap)).unwrap_or(self.hard_cap);
        let nodes = ctx.store.list_nodes_by_type(self.layer, self.node_type, limit).await?;
        Ok(render_bulleted(self.header, &nodes))
    }
}

struct PendingDecisions;

#[async_trait]
impl PromptSource for PendingDecisions {
    async fn render(&self, ctx: &PromptCtx<'_>, max_items: Option<usize>) -> Result<Option<String>, PromptError> {
        let limit = max_items.unwrap_or(10);
        let nodes = ctx.store.list_nodes_by_type(Layer::Context, "decision", limit * 4).await?;
        let pending: Vec<Node> = nodes
            .into_iter()
            .filter(|n| n.data.get("status").and_then(|v| v.as_str()) == Some("pending"))
            .take(limit)
            .collect();
        Ok(render_bulleted("Pending decisions", &pending))
    }
}

struct HeaderSource;

#[async_trait]
impl PromptSource for HeaderSource {
    async fn render(&self, ctx: &PromptCtx<'_>, _max_items: Option<usize>) -> Result<Option<String>, PromptError> {
        let project = ctx.repo_root.clone().unwrap_or_else(|| "(unknown project)".to_string());
        let git_line = match ctx.git {
            Some(git) => match git.repo_status().await {
                Ok(status) if status.clean => "clean".to_string(),
                Ok(status) => format!("{} file(s) changed", status.changed_paths.len()),
                Err(_) => "unavailable".to_string(),
            },
            None => "unavailable".to_string(),
        };
        Ok(Some(format!("Project: {project}\nGit status: {git_line}")))
    }
}

struct MissionSource;

#[async_trait]
impl PromptSource for MissionSource {
    async fn render(&self, ctx: &PromptCtx<'_>, _max_items: Option<usize>) -> Result<Option<String>, PromptError> {
        let missions = ctx.store.list_nodes_by_type(Layer::Context, "mission", 1).await?;
        Ok(missions.first().map(|n| {
            let summary = n.data.get("summary").and_then(|v| v.as_str());
            match summary {
                Some(s) => format!("Mission: {} — {s}", n.name),
                None => format!("Mission: {}", n.name),
            }
        }))
    }
}

struct NowSource;

#[async_trait]
impl PromptSource for NowSource {
    async fn render(&self, ctx: &PromptCtx<'_>, _max_items: Option<usize>) -> Result<Option<String>, PromptError> {
        let frames = ctx.store.list_nodes_by_type(Layer::Context, "context_frame", 1).await?;
        Ok(frames.first().and_then(|n| {
            n.data
                .get("card_text")
                .or_else(|| n.data.get("current_focus"))
                .and_then(|v| v.as_str())
                .map(|s| format!("Now: {s}"))
        }))
    }
}

struct TaskDetailSource;

#[async_trait]
impl PromptSource for TaskDetailSource {
    async fn render(&self, ctx: &PromptCtx<'_>, _max_items: Option<usize>) -> Result<Option<String>, PromptError> {
        let Some(task_id) = ctx.task_id else { return Ok(None) };
        let Some(node) = ctx.store.get_node(task_id).await? else { return Ok(None) };
        let description = node.data.get("description").and_then(|v| v.as_str()).unwrap_or("");
        let status = node.data.get("status").and_then(|v| v.as_str()).unwrap_or("unknown");
        let blocked_by = node
            .data
            .get("blocked_by")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        let mut section = format!("Task detail: {}\nStatus: {status}\nDescription: {description}", node.name);
        if !blocked_by.is_empty() {
            section.push_str(&format!("\nBlocked by: {blocked_by}"));
        }
        Ok(Some(section))
    }
}

struct SuggestionDetailSource;

#[async_trait]
impl PromptSource for SuggestionDetailSource {
    async fn render(&self, ctx: &PromptCtx<'_>, _max_items: Option<usize>) -> Result<Option<String>, PromptError> {
        let Some(id) = ctx.suggestion_id else { return Ok(None) };
        let Some(node) = ctx.store.get_node(id).await? else { return Ok(None) };
        let reasoning = node.data.get("reasoning").and_then(|v| v.as_str()).unwrap_or("");
        let score = node.data.get("score").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(Some(format!("Suggestion detail: {}\nScore: {score}\nReasoning: {reasoning}", node.name)))
    }
}

struct SiblingTasksSource;

#[async_trait]
impl PromptSource for SiblingTasksSource {
    async fn render(&self, ctx: &PromptCtx<'_>, max_items: Option<usize>) -> Result<Option<String>, PromptError> {
        let limit = max_items.unwrap_or(10);
        let nodes = ctx.store.list_nodes_by_type(Layer::Context, "task", limit + 1).await?;
        let siblings: Vec<Node> = nodes.into_iter().filter(|n| Some(n.id) != ctx.task_id).take(limit).collect();
        Ok(render_bulleted("Sibling tasks", &siblings))
    }
}

struct ContextPackSource;

#[async_trait]
impl PromptSource for ContextPackSource {
    async fn render(&self, ctx: &PromptCtx<'_>, max_items: Option<usize>) -> Result<Option<String>, PromptError> {
        let (Some(router), Some(query)) = (ctx.router, &ctx.query) else { return Ok(None) };
        let limit = max_items.unwrap_or(10);
        let Ok(mut vectors) = router.embed(&[query.clone()]).await else { return Ok(None) };
        let Some(vector) = vectors.pop() else { return Ok(None) };
        let results = ctx.store.search_by_embedding(&vector, None, limit).await?;
        if results.is_empty() {
            return Ok(None);
        }
        let body = results
            .iter()
            .map(|(node, score)| format!("- {} (relevance {:.2})", node.name, score))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(format!("Context pack:\n{body}")))
    }
}

struct PlanExecutionSource;

#[async_trait]
impl PromptSource for PlanExecutionSource {
    async fn render(&self, ctx: &PromptCtx<'_>, max_items: Option<usize>) -> Result<Option<String>, PromptError> {
        let Some(task_id) = ctx.task_id else { return Ok(None) };
        let Some(node) = ctx.store.get_node(task_id).await? else { return Ok(None) };
        let Some(steps) = node.data.get("plan_steps").and_then(|v| v.as_array()) else { return Ok(None) };
        let steps_text = steps.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>().join("\n");

        let file_limit = max_items.unwrap_or(10).min(10);
        const SNIPPET_CAP: usize = 4 * 1024;
        let mut snippets = Vec::new();
        if let Some(git) = ctx.git {
            if let Some(paths) = node.data.get("plan_files").and_then(|v| v.as_array()) {
                for path in paths.iter().filter_map(|v| v.as_str()).take(file_limit) {
                    if let Ok(Some(mut content)) = git.show_file_at_ref("HEAD", path).await {
                        if content.len() > SNIPPET_CAP {
                            content.truncate(SNIPPET_CAP);
                            content.push_str("\n... [truncated]");
                        }
                        snippets.push(format!("--- {path} ---\n{content}"));
                    }
                }
            }
        }
        let mut section = format!("Plan execution:\n{steps_text}");
        if !snippets.is_empty() {
            section.push_str("\n\n");
            section.push_str(&snippets.join("\n\n"));
        }
        Ok(Some(section))
    }
}

struct AgentEnvelopeSource;

#[async_trait]
impl PromptSource for AgentEnvelopeSource {
    async fn render(&self, ctx: &PromptCtx<'_>, _max_items: Option<usize>) -> Result<Option<String>, PromptError> {
        let Some(agent_key) = &ctx.agent_key else { return Ok(None) };
        let Some(node) = ctx.store.find_node_by_name(Layer::Automation, "agent", agent_key).await? else {
            return Ok(None);
        };
        let role = node.data.get("role").and_then(|v| v.as_str()).unwrap_or("agent");
        let situation = node.data.get("situation").and_then(|v| v.as_str()).unwrap_or("idle");
        Ok(Some(format!("Agent: {} ({role})\nSituation: {situation}", node.name)))
    }
}

struct PipelineStatusSource;

#[async_trait]
impl PromptSource for PipelineStatusSource {
    async fn render(&self, ctx: &PromptCtx<'_>, _max_items: Option<usize>) -> Result<Option<String>, PromptError> {
        let orders = ctx.store.list_nodes_by_type(Layer::Automation, "work_order", 200).await?;
        if orders.is_empty() {
            return Ok(None);
        }
        let mut counts: HashMap<String, usize> = HashMap::new();
        for order in &orders {
            let status = order.data.get("status").and_then(|v| v.as_str()).unwrap_or("unknown");
            *counts.entry(status.to_string()).or_insert(0) += 1;
        }
        let mut lines: Vec<String> = counts.into_iter().map(|(status, count)| format!("- {status}: {count}")).collect();
        lines.sort();
        Ok(Some(format!("Pipeline status:\n{}", lines.join("\n"))))
    }
}

struct ActiveWorkOrderSource;

#[async_trait]
impl PromptSource for ActiveWorkOrderSource {
    async fn render(&self, ctx: &PromptCtx<'_>, _max_items: Option<usize>) -> Result<Option<String>, PromptError> {
        let Some(id) = ctx.work_order_id else { return Ok(None) };
        let Some(node) = ctx.store.get_node(id).await? else { return Ok(None) };
        let status = node.data.get("status").and_then(|v| v.as_str()).unwrap_or("unknown");
        let attempt = node.data.get("attempt").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(Some(format!("Active work order: {} (status {status}, attempt {attempt})", node.name)))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SourceSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PromptRecipe {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    pub sources: Vec<SourceSpec>,
}

pub struct PromptRegistry {
    sources: HashMap<String, Arc<dyn PromptSource>>,
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PromptRegistry {
    pub fn empty() -> Self {
        Self { sources: HashMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, source: Arc<dyn PromptSource>) {
        self.sources.insert(name.into(), source);
    }

    /// Registers the full named-source catalogue a complete prompt pipeline
    /// needs: header, mission, now, tasks, constraints, insights, decisions,
    /// files, suggestions, promote, task_detail, suggestion_detail,
    /// sibling_tasks, context_pack, plan_execution, agent_envelope,
    /// recent_decisions, pending_decisions, active_agents, work_orders,
    /// pipeline_status, active_work_order.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("header", Arc::new(HeaderSource));
        registry.register("mission", Arc::new(MissionSource));
        registry.register("now", Arc::new(NowSource));
        registry.register(
            "tasks",
            Arc::new(BoundedNodeList { layer: Layer::Context, node_type: "task", header: "Tasks", hard_cap: 10 }),
        );
        registry.register(
            "constraints",
            Arc::new(BoundedNodeList { layer: Layer::Context, node_type: "constraint", header: "Constraints", hard_cap: 5 }),
        );
        registry.register(
            "insights",
            Arc::new(BoundedNodeList { layer: Layer::Context, node_type: "insight", header: "Insights", hard_cap: 10 }),
        );
        registry.register(
            "decisions",
            Arc::new(BoundedNodeList { layer: Layer::Context, node_type: "decision", header: "Decisions", hard_cap: 10 }),
        );
        registry.register(
            "recent_decisions",
            Arc::new(BoundedNodeList { layer: Layer::Context, node_type: "decision", header: "Recent decisions", hard_cap: 10 }),
        );
        registry.register("pending_decisions", Arc::new(PendingDecisions));
        registry.register(
            "files",
            Arc::new(BoundedNodeList { layer: Layer::System, node_type: "file", header: "Recently active files", hard_cap: 10 }),
        );
        registry.register(
            "suggestions",
            Arc::new(BoundedNodeList { layer: Layer::Context, node_type: "suggestion", header: "Suggestions", hard_cap: 10 }),
        );
        registry.register(
            "promote",
            Arc::new(BoundedNodeList { layer: Layer::Context, node_type: "session", header: "Promotion candidates", hard_cap: 3 }),
        );
        registry.register(
            "active_agents",
            Arc::new(BoundedNodeList { layer: Layer::Automation, node_type: "agent", header: "Active agents", hard_cap: 25 }),
        );
        registry.register(
            "work_orders",
            Arc::new(BoundedNodeList { layer: Layer::Automation, node_type: "work_order", header: "Work orders", hard_cap: 10 }),
        );
        registry.register("task_detail", Arc::new(TaskDetailSource));
        registry.register("suggestion_detail", Arc::new(SuggestionDetailSource));
        registry.register("sibling_tasks", Arc::new(SiblingTasksSource));
        registry.register("context_pack", Arc::new(ContextPackSource));
        registry.register("plan_execution", Arc::new(PlanExecutionSource));
        registry.register("agent_envelope", Arc::new(AgentEnvelopeSource));
        registry.register("pipeline_status", Arc::new(PipelineStatusSource));
        registry.register("active_work_order", Arc::new(ActiveWorkOrderSource));
        registry
    }

    /// Renders `recipe` against `ctx`, concatenating non-empty sections with
    /// a blank line between them. An optional leading instruction is
    /// prepended verbatim. Unknown source names are a typed error.
    pub async fn assemble(&self, recipe: &PromptRecipe, ctx: &PromptCtx<'_>) -> Result<String, PromptError> {
        let mut sections = Vec::new();
        if let Some(instruction) = &recipe.instruction {
            sections.push(instruction.clone());
        }
        for spec in &recipe.sources {
            let source = self.sources.get(&spec.name).ok_or_else(|| PromptError::UnknownSource(spec.name.clone()))?;
            if let Some(rendered) = source.render(ctx, spec.max_items).await? {
                sections.push(rendered);
            }
        }
        Ok(sections.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> (GraphStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::open(dir.path().join("graph.sqlite")).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn unknown_source_name_is_typed_error() {
        let (store, _dir) = store().await;
        let registry = PromptRegistry::with_defaults();
        let ctx = PromptCtx::new(&store, Utc::now());
        let recipe = PromptRecipe { instruction: None, sources: vec![SourceSpec { name: "nonexistent".to_string(), max_items: None, format: None }] };
        let err = registry.assemble(&recipe, &ctx).await.unwrap_err();
        assert!(matches!(err, PromptError::UnknownSource(ref name) if name == "nonexistent"));
    }

    #[tokio::test]
    async fn empty_sections_are_omitted_not_rendered_blank() {
        let (store, _dir) = store().await;
        let registry = PromptRegistry::with_defaults();
        let ctx = PromptCtx::new(&store, Utc::now());
        let recipe = PromptRecipe { instruction: None, sources: vec![SourceSpec { name: "tasks".to_string(), max_items: None, format: None }] };
        let rendered = registry.assemble(&recipe, &ctx).await.unwrap();
        assert_eq!(rendered, "");
    }

    #[tokio::test]
    async fn tasks_source_renders_bulleted_list_capped_at_hard_limit() {
        let (store, _dir) = store().await;
        for i in 0..15 {
            store.create_node(Layer::Context, "task", format!("task-{i}"), json!({"status": "open"}), None).await.unwrap();
        }
        let registry = PromptRegistry::with_defaults();
        let ctx = PromptCtx::new(&store, Utc::now());
        let recipe = PromptRecipe { instruction: None, sources: vec![SourceSpec { name: "tasks".to_string(), max_items: None, format: None }] };
        let rendered = registry.assemble(&recipe, &ctx).await.unwrap();
        assert_eq!(rendered.lines().filter(|l| l.starts_with("- ")).count(), 10);
    }

    #[tokio::test]
    async fn instruction_is_prepended_verbatim() {
        let (store, _dir) = store().await;
        let registry = PromptRegistry::with_defaults();
        let ctx = PromptCtx::new(&store, Utc::now());
        let recipe = PromptRecipe { instruction: Some("Be terse.".to_string()), sources: vec![] };
        let rendered = registry.assemble(&recipe, &ctx).await.unwrap();
        assert_eq!(rendered, "Be terse.");
    }

    #[tokio::test]
    async fn task_detail_renders_description_and_status() {
        let (store, _dir) = store().await;
        let node = store
            .create_node(Layer::Context, "task", "fix-bug", json!({"description": "fix the thing", "status": "open"}), None)
            .await
            .unwrap();
        let registry = PromptRegistry::with_defaults();
        let mut ctx = PromptCtx::new(&store, Utc::now());
        ctx.task_id = Some(node.id);
        let recipe = PromptRecipe { instruction: None, sources: vec![SourceSpec { name: "task_detail".to_string(), max_items: None, format: None }] };
        let rendered = registry.assemble(&recipe, &ctx).await.unwrap();
        assert!(rendered.contains("fix-bug"));
        assert!(rendered.contains("fix the thing"));
    }

    #[tokio::test]
    async fn pipeline_status_counts_work_orders_by_status() {
        let (store, _dir) = store().await;
        store.create_node(Layer::Automation, "work_order", "wo-1", json!({"status": "created"}), None).await.unwrap();
        store.create_node(Layer::Automation, "work_order", "wo-2", json!({"status": "created"}), None).await.unwrap();
        store.create_node(Layer::Automation, "work_order", "wo-3", json!({"status": "merged"}), None).await.unwrap();
        let registry = PromptRegistry::with_defaults();
        let ctx = PromptCtx::new(&store, Utc::now());
        let recipe = PromptRecipe { instruction: None, sources: vec![SourceSpec { name: "pipeline_status".to_string(), max_items: None, format: None }] };
        let rendered = registry.assemble(&recipe, &ctx).await.unwrap();
        assert!(rendered.contains("created: 2"));
        assert!(rendered.contains("merged: 1"));
    }
}
