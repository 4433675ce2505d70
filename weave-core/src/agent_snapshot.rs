//! Per-agent situational projection. Assembles everything a UI or the
//! agent's own continuation loop needs in one shot: mission, role,
//! situation, bounded slices of active tasks/recent decisions/peers,
//! constraints, live status, and the agent's current system prompt
//! re-rendered through [`crate::prompt`]. A revision number (max
//! `updated_at` across every contributing node, as epoch millis) lets a
//! caller cheaply tell whether a cached snapshot is stale.

use weave_git::GitClient;
use weave_graph::{GraphError, GraphStore, Layer, Node};
use weave_llm::Router;

use crate::prompt::{PromptCtx, PromptRecipe, PromptRegistry, SourceSpec};

const MAX_ACTIVE_TASKS: usize = 10;
const MAX_RECENT_DECISIONS: usize = 5;
const MAX_PEERS: usize = 10;
const MAX_CONSTRAINTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotProfile {
    AgentContinuous,
    Orchestrator,
}

impl SnapshotProfile {
    fn recipe(&self) -> PromptRecipe {
        let source = |name: &str| SourceSpec { name: name.to_string(), max_items: None, format: None };
        match self {
            SnapshotProfile::AgentContinuous => PromptRecipe {
                instruction: None,
                sources: vec![
                    source("header"),
                    source("mission"),
                    source("now"),
                    source("tasks"),
                    source("constraints"),
                    source("recent_decisions"),
                    source("agent_envelope"),
                ],
            },
            SnapshotProfile::Orchestrator => PromptRecipe {
                instruction: None,
                sources: vec![
                    source("header"),
                    source("mission"),
                    source("active_agents"),
                    source("work_orders"),
                    source("pipeline_status"),
                    source("suggestions"),
                ],
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveStatus {
    pub streaming: bool,
    pub current_tool: Option<String>,
    pub exchange_count: u64,
}

#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub agent_key: String,
    pub mission: Option<String>,
    pub role: String,
    pub situation: String,
    pub active_tasks: Vec<String>,
    pub recent_decisions: Vec<String>,
    pub peers: Vec<String>,
    pub peer_count: usize,
    pub constraints: Vec<String>,
    pub live_status: LiveStatus,
    pub system_prompt: String,
    pub revision: i64,
}

fn touch(revision: &mut i64, node: &Node) {
    *revision = (*revision).max(node.updated_at.timestamp_millis());
}

/// Builds the snapshot for `agent_key`. Returns `Ok(None)` if no agent node
/// with that key exists.
pub async fn build_snapshot(
    store: &GraphStore,
    registry: &PromptRegistry,
    git: Option<&dyn GitClient>,
    router: Option<&Router>,
    agent_key: &str,
    profile: SnapshotProfile,
) -> Result<Option<AgentSnapshot>, GraphError> {
    let Some(agent_node) = store.find_node_by_name(Layer::Automation, "agent", agent_key).await? else {
        return Ok(None);
    };

    let mut revision = 0i64;
    touch(&mut revision, &agent_node);

    let role = agent_node.data.get("role").and_then(|v| v.as_str()).unwrap_or("agent").to_string();
    let streaming = agent_node.data.get("streaming").and_then(|v| v.as_bool()).unwrap_or(false);
    let current_tool = agent_node.data.get("current_tool").and_then(|v| v.as_str()).map(|s| s.to_string());
    let exchange_count = agent_node.data.get("exchange_count").and_then(|v| v.as_u64()).unwrap_or(0);

    let missions = store.list_nodes_by_type(Layer::Context, "mission", 1).await?;
    let mission = missions.first().map(|n| {
        touch(&mut revision, n);
        n.data.get("summary").and_then(|v| v.as_str()).map(|s| format!("{}: {s}", n.name)).unwrap_or_else(|| n.name.clone())
    });

    let work_orders = store.list_nodes_by_type(Layer::Automation, "work_order", 50).await?;
    let own_active_wo = work_orders.into_iter().find(|wo| {
        let agent_matches = wo.data.get("agent_key").and_then(|v| v.as_str()) == Some(agent_key);
        let status = wo.data.get("status").and_then(|v| v.as_str()).unwrap_or("");
        agent_matches && !matches!(status, "merged" | "rejected")
    });
    let situation = match own_active_wo {
        Some(wo) => {
            touch(&mut revision, &wo);
            wo.data.get("description").and_then(|v| v.as_str()).unwrap_or("(no description)").to_string()
        }
        None => {
            let frames = store.list_nodes_by_type(Layer::Context, "context_frame", 1).await?;
            frames
                .first()
                .map(|f| {
                    touch(&mut revision, f);
                    f.data.get("current_focus").and_then(|v| v.as_str()).unwrap_or("idle").to_string()
                })
                .unwrap_or_else(|| "idle".to_string())
        }
    };

    let active_tasks: Vec<String> = {
        let tasks = store.list_nodes_by_type(Layer::Context, "task", 100).await?;
        tasks
            .into_iter()
            .filter(|t| t.data.get("status").and_then(|v| v.as_str()) == Some("open"))
            .take(MAX_ACTIVE_TASKS)
            .map(|t| {
                touch(&mut revision, &t);
                t.name
            })
            .collect()
    };

    let recent_decisions: Vec<String> = {
        let decisions = store.list_nodes_by_type(Layer::Context, "decision", MAX_RECENT_DECISIONS).await?;
        decisions
            .into_iter()
            .map(|d| {
                touch(&mut revision, &d);
                d.name
            })
            .collect()
    };

    let all_agents = store.list_nodes_by_type(Layer::Automation, "agent", 200).await?;
    let other_agents: Vec<Node> = all_agents.into_iter().filter(|a| a.name != agent_key).collect();
    let peer_count = other_agents.len();
    let peers: Vec<String> = other_agents
        .into_iter()
        .take(MAX_PEERS)
        .map(|a| {
            touch(&mut revision, &a);
            a.name
        })
        .collect();

    let constraints: Vec<String> = {
        let nodes = store.list_nodes_by_type(Layer::Context, "constraint", MAX_CONSTRAINTS).await?;
        nodes
            .into_iter()
            .map(|c| {
                touch(&mut revision, &c);
                c.name
            })
            .collect()
    };

    let ctx = {
        let mut ctx = PromptCtx::new(store, chrono::Utc::now());
        ctx.git = git;
        ctx.router = router;
        ctx.agent_key = Some(agent_key.to_string());
        ctx
    };
    let system_prompt = registry.assemble(&profile.recipe(), &ctx).await.map_err(|e| match e {
        crate::prompt::PromptError::Graph(g) => g,
        other => GraphError::Storage(other.to_string()),
    })?;

    Ok(Some(AgentSnapshot {
        agent_key: agent_key.to_string(),
        mission,
        role,
        situation,
        active_tasks,
        recent_decisions,
        peers,
        peer_count,
        constraints,
        live_status: LiveStatus { streaming, current_tool, exchange_count },
        system_prompt,
        revision,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_graph::Layer as L;

    async fn fixtures() -> (GraphStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::open(dir.path().join("graph.sqlite")).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn returns_none_for_unknown_agent() {
        let (store, _dir) = fixtures().await;
        let registry = PromptRegistry::with_defaults();
        let snapshot = build_snapshot(&store, &registry, None, None, "ghost", SnapshotProfile::AgentContinuous).await.unwrap();
        assert!(snapshot.is_none());
    }

    #[tokio::test]
    async fn assembles_role_and_active_tasks() {
        let (store, _dir) = fixtures().await;
        store
            .create_node(L::Automation, "agent", "a1", serde_json::json!({"role": "implementer", "exchange_count": 3}), None)
            .await
            .unwrap();
        store.create_node(L::Context, "task", "fix bug", serde_json::json!({"status": "open"}), None).await.unwrap();
        store.create_node(L::Context, "task", "done task", serde_json::json!({"status": "done"}), None).await.unwrap();

        let registry = PromptRegistry::with_defaults();
        let snapshot = build_snapshot(&store, &registry, None, None, "a1", SnapshotProfile::AgentContinuous).await.unwrap().unwrap();
        assert_eq!(snapshot.role, "implementer");
        assert_eq!(snapshot.active_tasks, vec!["fix bug".to_string()]);
        assert_eq!(snapshot.live_status.exchange_count, 3);
        assert!(snapshot.revision > 0);
    }

    #[tokio::test]
    async fn peer_count_excludes_self() {
        let (store, _dir) = fixtures().await;
        store.create_node(L::Automation, "agent", "a1", serde_json::json!({}), None).await.unwrap();
        store.create_node(L::Automation, "agent", "a2", serde_json::json!({}), None).await.unwrap();
        store.create_node(L::Automation, "agent", "a3", serde_json::json!({}), None).await.unwrap();

        let registry = PromptRegistry::with_defaults();
        let snapshot = build_snapshot(&store, &registry, None, None, "a1", SnapshotProfile::AgentContinuous).await.unwrap().unwrap();
        assert_eq!(snapshot.peer_count, 2);
        assert_eq!(snapshot.peers.len(), 2);
    }

    #[tokio::test]
    async fn active_work_order_description_overrides_context_frame_focus() {
        let (store, _dir) = fixtures().await;
        store.create_node(L::Automation, "agent", "a1", serde_json::json!({}), None).await.unwrap();
        store.create_node(L::Context, "context_frame", "now", serde_json::json!({"current_focus": "idle thoughts"}), None).await.unwrap();
        store
            .create_node(
                L::Automation,
                "work_order",
                "wo1",
                serde_json::json!({"agent_key": "a1", "status": "mutating", "description": "ship the thing"}),
                None,
            )
            .await
            .unwrap();

        let registry = PromptRegistry::with_defaults();
        let snapshot = build_snapshot(&store, &registry, None, None, "a1", SnapshotProfile::AgentContinuous).await.unwrap().unwrap();
        assert_eq!(snapshot.situation, "ship the thing");
    }
}
