//! Second-opinion review of a work order's diff. Runs only on work orders
//! in `build_passed`, asks the `synthesizer` role for a strict JSON verdict,
//! and drives the work order onward: forced rejection on budget/scope
//! violation, dry-run-then-apply-then-rebuild on a revision, push/PR/poll/
//! merge on approval.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use weave_git::{ChecksStatus, GitClient, GitError};
use weave_graph::{GraphError, GraphStore};
use weave_ids::Id;
use weave_llm::{ChatMessage, CompletionRequest, LlmError, Router};
use weave_model_registry::well_known;

use crate::build_gate::{self, BuildGateConfig, BuildGateError};
use crate::work_order::{WorkOrderData, WorkOrderEngine, WorkOrderError, WorkOrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    Revise,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResponse {
    pub verdict: Verdict,
    pub reasoning: String,
    pub score: u8,
    #[serde(default)]
    pub patch: Option<String>,
    #[serde(default)]
    pub files_touched: Vec<String>,
    pub change_budget: u32,
    pub actual_changes: u32,
    pub reviewer_model: String,
}

#[derive(Debug, Clone)]
pub struct ContextPackEntry {
    pub node_name: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisOutcome {
    pub response: SynthesisResponse,
    pub forced_reject_reason: Option<String>,
    pub final_status: WorkOrderStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    WorkOrder(#[from] WorkOrderError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    BuildGate(#[from] BuildGateError),
    #[error("work order is not in build_passed (currently {0:?})")]
    NotBuildPassed(WorkOrderStatus),
    #[error("synthesizer response was not valid JSON: {0}")]
    MalformedResponse(String),
}

fn build_context_pack(entries: &[ContextPackEntry]) -> String {
    if entries.is_empty() {
        return "(no related files found)".to_string();
    }
    entries
        .iter()
        .map(|e| format!("- {} (relevance {:.2})", e.node_name, e.score))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_prompt(description: &str, diff: &str, context_pack: &str, scope_paths: &[String]) -> CompletionRequest {
    let system = ChatMessage::system(
        "You are a second-opinion reviewer for an automated code-change pipeline. \
         Reply with exactly one JSON object matching: \
         {\"verdict\":\"approve|revise|reject\",\"reasoning\":string,\"score\":0-100,\
         \"patch\":string|null,\"files_touched\":[string],\"change_budget\":number,\
         \"actual_changes\":number,\"reviewer_model\":string}. No prose outside the JSON.",
    );
    let user = ChatMessage::user(format!(
        "Task: {description}\n\nAllowed scope paths: {scope_paths:?}\n\nContext pack:\n{context_pack}\n\nUnified diff:\n{diff}"
    ));
    CompletionRequest::new(vec![system, user])
}

fn files_violate_scope(files: &[String], scope_paths: &[String]) -> bool {
    if scope_paths.is_empty() {
        return false;
    }
    files.iter().any(|f| !scope_paths.iter().any(|prefix| f.starts_with(prefix.as_str())))
}

pub struct SynthesisRunner<'a> {
    pub git: Arc<dyn GitClient>,
    pub store: &'a GraphStore,
    pub router: &'a Router,
    pub engine: &'a WorkOrderEngine,
    pub build_gate_config: BuildGateConfig,
}

impl<'a> SynthesisRunner<'a> {
    /// Ranks nodes by embedding similarity to the work order's description,
    /// for the context pack. Returns an empty pack if embedding fails —
    /// synthesis should degrade, not abort, when the embed role is down.
    async fn context_pack(&self, description: &str) -> Vec<ContextPackEntry> {
        let embedding = match self.router.embed(&[description.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            _ => return Vec::new(),
        };
        match self.store.search_by_embedding(&embedding, Some("file"), 10).await {
            Ok(results) => results.into_iter().map(|(node, score)| ContextPackEntry { node_name: node.name, score }).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub async fn run(&self, wo_id: Id) -> Result<SynthesisOutcome, SynthesisError> {
        let (_node, mut data) = self.engine.get(wo_id).await?;
        if data.status != WorkOrderStatus::BuildPassed {
            return Err(SynthesisError::NotBuildPassed(data.status));
        }

        let diff = self.git.diff_vs_base(&data.base_branch).await?;
        let context = self.context_pack(&data.description).await;
        let req = build_prompt(&data.description, &diff, &build_context_pack(&context), &data.scope_paths);

        let outcome = self.router.complete_role(well_known::SYNTHESIZER, req).await?;
        let response: SynthesisResponse =
            serde_json::from_str(&outcome.content).map_err(|e| SynthesisError::MalformedResponse(e.to_string()))?;

        self.engine
            .advance(
                wo_id,
                WorkOrderStatus::SynthesisPending,
                "synthesis",
                serde_json::json!({"score": response.score, "verdict": response.verdict}),
            )
            .await?;

        if response.actual_changes > response.change_budget {
            return self.reject(wo_id, response, "actual_changes exceeded change_budget").await;
        }
        if files_violate_scope(&response.files_touched, &data.scope_paths) {
            return self.reject(wo_id, response, "files_touched violates work order scope").await;
        }

        match response.verdict {
            Verdict::Reject => self.reject(wo_id, response, "synthesizer rejected the diff").await,
            Verdict::Revise => self.revise(wo_id, &mut data, response).await,
            Verdict::Approve => self.approve(wo_id, &data, response).await,
        }
    }

    async fn reject(&self, wo_id: Id, response: SynthesisResponse, reason: &str) -> Result<SynthesisOutcome, SynthesisError> {
        self.engine
            .advance(wo_id, WorkOrderStatus::Rejected, "synthesis", serde_json::json!({"error": reason}))
            .await?;
        Ok(SynthesisOutcome {
            response,
            forced_reject_reason: Some(reason.to_string()),
            final_status: WorkOrderStatus::Rejected,
        })
    }

    async fn revise(&self, wo_id: Id, data: &mut WorkOrderData, response: SynthesisResponse) -> Result<SynthesisOutcome, SynthesisError> {
        let Some(patch) = response.patch.clone() else {
            return self.reject(wo_id, response, "revise verdict carried no patch").await;
        };

        if !self.git.apply_patch_check(&patch).await? {
            return self.reject(wo_id, response, "revision patch did not apply cleanly").await;
        }
        self.git.apply_patch(&patch).await?;

        let gate_result = build_gate::run(Arc::clone(&self.git), data, wo_id, self.build_gate_config.clone(), None).await?;
        if !gate_result.passed {
            self.engine
                .advance(wo_id, WorkOrderStatus::BuildFailed, "synthesis", serde_json::json!({"error": "revision failed the rebuilt gate"}))
                .await?;
            return Ok(SynthesisOutcome {
                response,
                forced_reject_reason: Some("revision failed the rebuilt gate".to_string()),
                final_status: WorkOrderStatus::BuildFailed,
            });
        }

        let commit_message = format!("synthesis revision: {}", response.reasoning);
        data.commit_hash = Some(self.git.commit_all(&commit_message).await?);
        self.approve(wo_id, data, response).await
    }

    async fn approve(&self, wo_id: Id, data: &WorkOrderData, response: SynthesisResponse) -> Result<SynthesisOutcome, SynthesisError> {
        let branch = data.branch_name.clone().unwrap_or_else(|| format!("agent/unknown/{wo_id}"));
        self.git.push(&branch).await?;
        let pr = self
            .git
            .create_pr(&format!("weave: {}", data.description), &response.reasoning, &data.base_branch, &branch)
            .await?;

        self.engine
            .advance(
                wo_id,
                WorkOrderStatus::MergePending,
                "synthesis",
                serde_json::json!({"pr_id": pr.number, "pr_url": pr.url}),
            )
            .await?;

        let final_status = match self.git.pr_checks_status(pr.number).await? {
            ChecksStatus::Passing | ChecksStatus::NoChecks => {
                self.git.merge_pr(pr.number).await?;
                self.engine
                    .advance(wo_id, WorkOrderStatus::Merged, "synthesis", serde_json::json!({"pr_id": pr.number}))
                    .await?;
                WorkOrderStatus::Merged
            }
            ChecksStatus::Pending | ChecksStatus::Failing => WorkOrderStatus::MergePending,
        };

        Ok(SynthesisOutcome {
            response,
            forced_reject_reason: None,
            final_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_graph::Layer;
    use weave_model_registry::{ModelRegistry, Provider, Role, WireFormat};

    async fn fixtures() -> (GraphStore, WorkOrderEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::open(dir.path().join("graph.sqlite")).await.unwrap();
        store.create_node(Layer::Automation, "agent", "a1", serde_json::json!({}), None).await.unwrap();
        let engine = WorkOrderEngine::new(store.clone());
        (store, engine, dir)
    }

    fn router() -> Router {
        Router::new(
            ModelRegistry::new()
                .with_provider(Provider::new("openai", WireFormat::OpenAiShaped, "https://api.openai.com/v1", "OPENAI_API_KEY_TEST_SYNTH").with_tools(true))
                .with_role(Role::new(well_known::SYNTHESIZER, "openai", "gpt-4o-mini")),
        )
    }

    #[tokio::test]
    async fn rejects_if_not_build_passed() {
        let (_store, engine, _dir) = fixtures().await;
        let wo = engine.create("x", "main", vec![], None, false).await.unwrap();
        let git = Arc::new(weave_git::FakeGitClient::new());
        let router = router();
        let runner = SynthesisRunner {
            git,
            store: &_store,
            router: &router,
            engine: &engine,
            build_gate_config: BuildGateConfig::default(),
        };
        let err = runner.run(wo.id).await.unwrap_err();
        assert!(matches!(err, SynthesisError::NotBuildPassed(_)));
    }

    #[test]
    fn files_violate_scope_detects_out_of_scope_file() {
        assert!(files_violate_scope(&["/outside/x.rs".to_string()], &["/pkg/".to_string()]));
        assert!(!files_violate_scope(&["/pkg/x.rs".to_string()], &["/pkg/".to_string()]));
    }

    #[test]
    fn build_context_pack_renders_empty_marker() {
        assert_eq!(build_context_pack(&[]), "(no related files found)");
    }
}
