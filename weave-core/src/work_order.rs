//! Work-order state machine: a fixed lifecycle declared once as a
//! state -> allowed-successors table and consulted at runtime, never
//! hardcoded in scattered conditionals. Every transition appends a
//! `work_order_event` observation and mirrors the latest event inline
//! in the node's data blob for cheap reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use weave_graph::{DataPatch, GraphError, GraphStore, Layer, Node};
use weave_ids::Id;

const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Created,
    Assigned,
    Mutating,
    BuildPassed,
    BuildFailed,
    SynthesisPending,
    MergePending,
    Merged,
    Rejected,
}

impl WorkOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Created => "created",
            WorkOrderStatus::Assigned => "assigned",
            WorkOrderStatus::Mutating => "mutating",
            WorkOrderStatus::BuildPassed => "build_passed",
            WorkOrderStatus::BuildFailed => "build_failed",
            WorkOrderStatus::SynthesisPending => "synthesis_pending",
            WorkOrderStatus::MergePending => "merge_pending",
            WorkOrderStatus::Merged => "merged",
            WorkOrderStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkOrderStatus::Merged | WorkOrderStatus::Rejected)
    }

    /// The static transition table. Consulted by [`advance`],
    /// never inlined as ad hoc conditionals.
    fn allowed_successors(&self) -> &'static [WorkOrderStatus] {
        use WorkOrderStatus::*;
        match self {
            Created => &[Assigned],
            Assigned => &[Mutating],
            Mutating => &[BuildPassed, BuildFailed],
            BuildPassed => &[SynthesisPending],
            BuildFailed => &[Mutating, Rejected],
            SynthesisPending => &[MergePending, BuildFailed, Rejected],
            MergePending => &[Merged, Rejected],
            Merged => &[],
            Rejected => &[],
        }
    }
}

impl std::str::FromStr for WorkOrderStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use WorkOrderStatus::*;
        Ok(match s {
            "created" => Created,
            "assigned" => Assigned,
            "mutating" => Mutating,
            "build_passed" => BuildPassed,
            "build_failed" => BuildFailed,
            "synthesis_pending" => SynthesisPending,
            "merge_pending" => MergePending,
            "merged" => Merged,
            "rejected" => Rejected,
            other => return Err(format!("unknown work order status: {other}")),
        })
    }
}

/// The graph data blob shape for an `AUTOMATION.work_order` node, per the
/// external-interfaces record shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrderData {
    pub status: WorkOrderStatus,
    pub revision: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    pub base_branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks_at: Option<DateTime<Utc>>,
    pub files_changed: Vec<String>,
    pub scope_paths: Vec<String>,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event: Option<serde_json::Value>,
    pub event_count: u32,
    pub allow_public_api_change: bool,
    pub description: String,
}

impl WorkOrderData {
    fn new(description: String, base_branch: String, scope_paths: Vec<String>, task_id: Option<Id>, allow_public_api_change: bool) -> Self {
        Self {
            status: WorkOrderStatus::Created,
            revision: 0,
            task_id,
            agent_key: None,
            branch_name: None,
            base_branch,
            repo_root: None,
            commit_hash: None,
            pr_id: None,
            pr_url: None,
            checks_status: None,
            checks_at: None,
            files_changed: Vec::new(),
            scope_paths,
            attempt: 0,
            last_error: None,
            last_error_at: None,
            worktree_path: None,
            last_event: None,
            event_count: 0,
            allow_public_api_change,
            description,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkOrderError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("work order {0} not found")]
    NotFound(Id),
    #[error("node {0} is not a work order (unparseable data blob: {1})")]
    Malformed(Id, String),
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("work order {0} is already assigned")]
    AlreadyAssigned(Id),
    #[error("unknown agent key: {0}")]
    UnknownAgentKey(String),
}

/// Divergence-check result: a structural audit of WO claims against
/// structured artifact fields only. No LLM reasoning text is ever
/// consulted here (a deliberate invariant, not an oversight).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DivergenceReport {
    pub passed: bool,
    pub build_tests_passed_matches: bool,
    pub files_changed_matches: bool,
    pub status_matches: bool,
    pub checks_status_matches: bool,
}

pub struct WorkOrderEngine {
    store: GraphStore,
}

fn node_to_data(node: &Node) -> Result<WorkOrderData, WorkOrderError> {
    serde_json::from_value(node.data.clone()).map_err(|e| WorkOrderError::Malformed(node.id, e.to_string()))
}

impl WorkOrderEngine {
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        description: impl Into<String>,
        base_branch: impl Into<String>,
        scope_paths: Vec<String>,
        task_id: Option<Id>,
        allow_public_api_change: bool,
    ) -> Result<Node, WorkOrderError> {
        let data = WorkOrderData::new(description.into(), base_branch.into(), scope_paths, task_id, allow_public_api_change);
        let name = Id::new().to_string();
        let node = self
            .store
            .create_node(Layer::Automation, "work_order", name, serde_json::to_value(&data)?, None)
            .await?;
        Ok(node)
    }

    pub async fn get(&self, id: Id) -> Result<(Node, WorkOrderData), WorkOrderError> {
        let node = self.store.get_node(id).await?.ok_or(WorkOrderError::NotFound(id))?;
        let data = node_to_data(&node)?;
        Ok((node, data))
    }

    /// Moves `created -> assigned` exactly once, issuing `agent/<agent-key>/<wo-id>`
    /// as the branch name unless the caller supplies one. `agent_key` must
    /// name an existing `AUTOMATION.agent` node.
    pub async fn assign(&self, id: Id, agent_key: &str, branch_name: Option<String>) -> Result<Node, WorkOrderError> {
        let (node, mut data) = self.get(id).await?;
        if data.status != WorkOrderStatus::Created {
            return Err(WorkOrderError::AlreadyAssigned(id));
        }
        if self.store.find_node_by_name(Layer::Automation, "agent", agent_key).await?.is_none() {
            return Err(WorkOrderError::UnknownAgentKey(agent_key.to_string()));
        }

        let branch = branch_name.unwrap_or_else(|| format!("agent/{agent_key}/{id}"));
        data.agent_key = Some(agent_key.to_string());
        data.branch_name = Some(branch.clone());
        data.status = WorkOrderStatus::Assigned;

        let updated = self.write_and_log(id, node, data, WorkOrderStatus::Assigned, agent_key, "assigned", serde_json::json!({"branch": branch})).await?;
        Ok(updated)
    }

    /// Drives the state machine toward `target`. Idempotent: calling with
    /// the work order's current status is a no-op returning the unchanged
    /// node. `detail` is recorded on the appended event and, for
    /// `build_failed`, becomes `last_error`.
    pub async fn advance(&self, id: Id, target: WorkOrderStatus, actor: &str, detail: serde_json::Value) -> Result<Node, WorkOrderError> {
        let (node, mut data) = self.get(id).await?;
        if data.status == target {
            return Ok(node);
        }
        if !data.status.allowed_successors().contains(&target) {
            return Err(WorkOrderError::InvalidTransition {
                from: data.status.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }

        let mut target = target;
        if target == WorkOrderStatus::BuildFailed {
            data.attempt += 1;
            data.last_error = detail.get("error").and_then(|v| v.as_str()).map(|s| s.to_string());
            data.last_error_at = Some(Utc::now());
            if data.attempt >= MAX_ATTEMPTS {
                target = WorkOrderStatus::Rejected;
                data.last_error = Some(format!("max attempts ({MAX_ATTEMPTS}) reached"));
            }
        }
        data.status = target;

        self.write_and_log(id, node, data, target, actor, "transition", detail).await
    }

    async fn write_and_log(
        &self,
        id: Id,
        node: Node,
        mut data: WorkOrderData,
        target: WorkOrderStatus,
        actor: &str,
        kind: &str,
        detail: serde_json::Value,
    ) -> Result<Node, WorkOrderError> {
        data.revision += 1;
        data.event_count += 1;
        let event = serde_json::json!({
            "status": target.as_str(),
            "revision": data.revision,
            "attempt": data.attempt,
            "event_num": data.event_count,
            "actor": actor,
            "kind": kind,
            "detail": detail,
            "branch": data.branch_name,
            "agent_key": data.agent_key,
        });
        data.last_event = Some(event.clone());

        self.store
            .create_observation(id, "work_order_event", None, event, None)
            .await?;
        let updated = self
            .store
            .update_node(node.id, DataPatch::Replace(serde_json::to_value(&data)?))
            .await?;
        Ok(updated)
    }

    /// Audits a work order's claimed final state against structured
    /// artifacts only (P-claim/artifact decoupling): build-gate result,
    /// the files it actually touched, its own status, and checks status.
    /// Never parses or weighs LLM-authored reasoning text.
    pub fn check_claims(
        &self,
        data: &WorkOrderData,
        build_tests_passed: bool,
        claimed_tests_passed: bool,
        actual_files_changed: &[String],
        expected_status: WorkOrderStatus,
        checks_status: Option<&str>,
    ) -> DivergenceReport {
        let build_tests_passed_matches = build_tests_passed == claimed_tests_passed;
        let files_changed_matches = {
            let mut expected: Vec<&str> = data.files_changed.iter().map(String::as_str).collect();
            let mut actual: Vec<&str> = actual_files_changed.iter().map(String::as_str).collect();
            expected.sort_unstable();
            actual.sort_unstable();
            expected == actual
        };
        let status_matches = data.status == expected_status;
        let checks_status_matches = match (&data.checks_status, checks_status) {
            (Some(a), Some(b)) => a == b,
            (None, None) => true,
            _ => false,
        };
        DivergenceReport {
            passed: build_tests_passed_matches && files_changed_matches && status_matches && checks_status_matches,
            build_tests_passed_matches,
            files_changed_matches,
            status_matches,
            checks_status_matches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn engine() -> (WorkOrderEngine, GraphStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = GraphStore::open(dir.path().join("graph.sqlite")).await.unwrap();
        (WorkOrderEngine::new(store.clone()), store, dir)
    }

    #[tokio::test]
    async fn create_starts_in_created_status() {
        let (engine, _store, _dir) = engine().await;
        let node = engine.create("do a thing", "main", vec!["/pkg/".to_string()], None, false).await.unwrap();
        let (_, data) = engine.get(node.id).await.unwrap();
        assert_eq!(data.status, WorkOrderStatus::Created);
        assert_eq!(data.attempt, 0);
    }

    #[tokio::test]
    async fn assign_requires_known_agent_key() {
        let (engine, _store, _dir) = engine().await;
        let node = engine.create("do a thing", "main", vec![], None, false).await.unwrap();
        let err = engine.assign(node.id, "ghost-agent", None).await.unwrap_err();
        assert!(matches!(err, WorkOrderError::UnknownAgentKey(_)));
    }

    #[tokio::test]
    async fn assign_moves_created_to_assigned_and_derives_branch_name() {
        let (engine, store, _dir) = engine().await;
        store.create_node(Layer::Automation, "agent", "a1", serde_json::json!({}), None).await.unwrap();
        let node = engine.create("do a thing", "main", vec![], None, false).await.unwrap();
        let updated = engine.assign(node.id, "a1", None).await.unwrap();
        let data = node_to_data(&updated).unwrap();
        assert_eq!(data.status, WorkOrderStatus::Assigned);
        assert_eq!(data.branch_name.as_deref(), Some(format!("agent/a1/{}", node.id).as_str()));
        assert_eq!(data.event_count, 1);
    }

    #[tokio::test]
    async fn assign_twice_fails() {
        let (engine, store, _dir) = engine().await;
        store.create_node(Layer::Automation, "agent", "a1", serde_json::json!({}), None).await.unwrap();
        let node = engine.create("do a thing", "main", vec![], None, false).await.unwrap();
        engine.assign(node.id, "a1", None).await.unwrap();
        let err = engine.assign(node.id, "a1", None).await.unwrap_err();
        assert!(matches!(err, WorkOrderError::AlreadyAssigned(_)));
    }

    #[tokio::test]
    async fn advance_with_same_target_twice_is_idempotent() {
        let (engine, store, _dir) = engine().await;
        store.create_node(Layer::Automation, "agent", "a1", serde_json::json!({}), None).await.unwrap();
        let node = engine.create("do a thing", "main", vec![], None, false).await.unwrap();
        engine.assign(node.id, "a1", None).await.unwrap();
        let first = engine.advance(node.id, WorkOrderStatus::Mutating, "agent", serde_json::json!({})).await.unwrap();
        let second = engine.advance(node.id, WorkOrderStatus::Mutating, "agent", serde_json::json!({})).await.unwrap();
        let (_, data) = engine.get(node.id).await.unwrap();
        assert_eq!(first.updated_at, second.updated_at);
        assert_eq!(data.event_count, 2);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let (engine, _store, _dir) = engine().await;
        let node = engine.create("do a thing", "main", vec![], None, false).await.unwrap();
        let err = engine.advance(node.id, WorkOrderStatus::Merged, "agent", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, WorkOrderError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn build_failed_increments_attempt_and_forces_rejected_at_cap() {
        let (engine, store, _dir) = engine().await;
        store.create_node(Layer::Automation, "agent", "a1", serde_json::json!({}), None).await.unwrap();
        let node = engine.create("do a thing", "main", vec![], None, false).await.unwrap();
        engine.assign(node.id, "a1", None).await.unwrap();
        engine.advance(node.id, WorkOrderStatus::Mutating, "agent", serde_json::json!({})).await.unwrap();

        engine.advance(node.id, WorkOrderStatus::BuildFailed, "gate", serde_json::json!({"error": "scope violation"})).await.unwrap();
        let (_, data) = engine.get(node.id).await.unwrap();
        assert_eq!(data.status, WorkOrderStatus::BuildFailed);
        assert_eq!(data.attempt, 1);

        engine.advance(node.id, WorkOrderStatus::Mutating, "agent", serde_json::json!({})).await.unwrap();
        engine.advance(node.id, WorkOrderStatus::BuildFailed, "gate", serde_json::json!({"error": "still failing"})).await.unwrap();
        engine.advance(node.id, WorkOrderStatus::Mutating, "agent", serde_json::json!({})).await.unwrap();
        let final_node = engine.advance(node.id, WorkOrderStatus::BuildFailed, "gate", serde_json::json!({"error": "still failing"})).await.unwrap();
        let data = node_to_data(&final_node).unwrap();
        assert_eq!(data.status, WorkOrderStatus::Rejected);
        assert!(data.last_error.unwrap().contains("max attempts"));
    }

    #[tokio::test]
    async fn terminal_states_reject_further_transitions() {
        let (engine, store, _dir) = engine().await;
        store.create_node(Layer::Automation, "agent", "a1", serde_json::json!({}), None).await.unwrap();
        let node = engine.create("do a thing", "main", vec![], None, false).await.unwrap();
        engine.assign(node.id, "a1", None).await.unwrap();
        engine.advance(node.id, WorkOrderStatus::Mutating, "agent", serde_json::json!({})).await.unwrap();
        engine.advance(node.id, WorkOrderStatus::BuildPassed, "gate", serde_json::json!({})).await.unwrap();
        engine.advance(node.id, WorkOrderStatus::SynthesisPending, "gate", serde_json::json!({})).await.unwrap();
        engine.advance(node.id, WorkOrderStatus::MergePending, "synth", serde_json::json!({})).await.unwrap();
        engine.advance(node.id, WorkOrderStatus::Merged, "ci", serde_json::json!({})).await.unwrap();

        let err = engine.advance(node.id, WorkOrderStatus::Rejected, "someone", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, WorkOrderError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn check_claims_detects_file_list_divergence() {
        let (engine, store, _dir) = engine().await;
        store.create_node(Layer::Automation, "agent", "a1", serde_json::json!({}), None).await.unwrap();
        let node = engine.create("do a thing", "main", vec![], None, false).await.unwrap();
        let (_, mut data) = engine.get(node.id).await.unwrap();
        data.files_changed = vec!["/pkg/foo.go".to_string()];
        data.status = WorkOrderStatus::Merged;

        let report = engine.check_claims(&data, true, true, &["/pkg/bar.go".to_string()], WorkOrderStatus::Merged, None);
        assert!(!report.passed);
        assert!(!report.files_changed_matches);
        assert!(report.build_tests_passed_matches);
        assert!(report.status_matches);
    }
}
