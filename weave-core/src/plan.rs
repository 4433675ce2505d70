//! Plan lifecycle: a fixed `outline -> plan -> prereqs -> review -> approved`
//! table (`review` may revert to `plan`), the same "state machine as a
//! static successor table" idiom as [`crate::work_order`] generalized from a
//! work-order's linear pipeline to a lifecycle that can step backward.
//! `review` additionally runs a deterministic critic and a risk gate — no
//! LLM judgement anywhere in this module.

use serde::{Deserialize, Serialize};
use weave_graph::{DataPatch, GraphError, GraphStore, Layer, Node};
use weave_ids::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStage {
    Outline,
    Plan,
    Prereqs,
    Review,
    Approved,
}

impl PlanStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStage::Outline => "outline",
            PlanStage::Plan => "plan",
            PlanStage::Prereqs => "prereqs",
            PlanStage::Review => "review",
            PlanStage::Approved => "approved",
        }
    }

    fn allowed_successors(&self) -> &'static [PlanStage] {
        use PlanStage::*;
        match self {
            Outline => &[Plan],
            Plan => &[Prereqs],
            Prereqs => &[Review],
            Review => &[Plan, Approved],
            Approved => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub estimated_lines: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    AutoRun,
    UserApprove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanData {
    pub stage: PlanStage,
    pub goal: String,
    pub scope: String,
    #[serde(default)]
    pub non_goals: Vec<String>,
    #[serde(default)]
    pub milestones: Vec<String>,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub test_strategy: String,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub prereqs: Vec<String>,
    #[serde(default)]
    pub review_score: Option<u8>,
    #[serde(default)]
    pub risk: Option<u8>,
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
}

impl PlanData {
    fn new(goal: String, scope: String, non_goals: Vec<String>) -> Self {
        Self {
            stage: PlanStage::Outline,
            goal,
            scope,
            non_goals,
            milestones: Vec::new(),
            steps: Vec::new(),
            acceptance_criteria: Vec::new(),
            test_strategy: String::new(),
            risks: Vec::new(),
            prereqs: Vec::new(),
            review_score: None,
            risk: None,
            execution_mode: None,
        }
    }

    fn total_estimated_lines(&self) -> u32 {
        self.steps.iter().map(|s| s.estimated_lines).sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("plan {0} not found")]
    NotFound(Id),
    #[error("node {0} is not a plan (unparseable data blob: {1})")]
    Malformed(Id, String),
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("outline incomplete: {0}")]
    OutlineIncomplete(String),
    #[error("plan incomplete: {0}")]
    PlanIncomplete(String),
}

/// Keywords that mark a scope statement as unbounded — the critic can't
/// tell "implement X" from "implement X and anything else needed", so
/// presence of any of these is treated as a scope-control failure.
const UNBOUNDED_SCOPE_KEYWORDS: &[&str] = &["etc", "anything", "whatever", "everything", "and so on", "among other things"];

const MAX_REASONABLE_LINES: u32 = 500;
const RISK_LINE_THRESHOLD: u32 = 300;
const REVIEW_PASS_THRESHOLD: u8 = 60;
const RISK_AUTO_RUN_THRESHOLD: u8 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    Revise,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticResult {
    pub score: u8,
    pub deductions: Vec<(String, i32)>,
    pub verdict: ReviewVerdict,
    pub all_checks_passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub critic: CriticResult,
    pub risk: Option<u8>,
    pub execution_mode: Option<ExecutionMode>,
}

/// Deterministic critic: starts at 100 and deducts fixed amounts for each
/// missing element. Scaled deductions (steps without target files) are
/// proportional to the fraction of affected steps, capped at their stated
/// maximum.
pub fn run_critic(plan: &PlanData) -> CriticResult {
    let mut score: i32 = 100;
    let mut deductions = Vec::new();
    let mut all_checks_passed = true;

    if plan.acceptance_criteria.is_empty() {
        score -= 30;
        deductions.push(("missing acceptance criteria".to_string(), -30));
        all_checks_passed = false;
    }

    if !plan.steps.is_empty() {
        let without_files = plan.steps.iter().filter(|s| s.files.is_empty()).count();
        if without_files > 0 {
            let fraction = without_files as f32 / plan.steps.len() as f32;
            let penalty = (fraction * 25.0).round() as i32;
            score -= penalty;
            deductions.push(("steps without target files".to_string(), -penalty));
            all_checks_passed = false;
        }
    }

    if plan.test_strategy.trim().is_empty() {
        score -= 20;
        deductions.push(("missing test strategy".to_string(), -20));
        all_checks_passed = false;
    }

    if plan.risks.is_empty() {
        score -= 10;
        deductions.push(("unidentified risks".to_string(), -10));
        all_checks_passed = false;
    }

    let scope_lower = plan.scope.to_lowercase();
    if UNBOUNDED_SCOPE_KEYWORDS.iter().any(|kw| scope_lower.contains(kw)) {
        score -= 15;
        deductions.push(("unbounded scope keywords".to_string(), -15));
        all_checks_passed = false;
    }

    if plan.total_estimated_lines() > MAX_REASONABLE_LINES {
        score -= 10;
        deductions.push(("oversized steps".to_string(), -10));
    }

    if plan.prereqs.is_empty() {
        score -= 10;
        deductions.push(("missing prereqs".to_string(), -10));
        all_checks_passed = false;
    }

    let score = score.clamp(0, 100) as u8;
    let verdict = if score < REVIEW_PASS_THRESHOLD { ReviewVerdict::Revise } else { ReviewVerdict::Approved };
    CriticResult { score, deductions, verdict, all_checks_passed }
}

/// Risk gate run only when the critic approves: `risk = 100 - score`, +20 if
/// the plan's total estimated lines exceed [`RISK_LINE_THRESHOLD`].
/// `auto_run` iff risk < 40 and all critic checks passed and total lines
/// stay within budget; otherwise a human approves.
fn run_gate(plan: &PlanData, critic: &CriticResult) -> (u8, ExecutionMode) {
    let mut risk: i32 = 100 - critic.score as i32;
    let total_lines = plan.total_estimated_lines();
    if total_lines > RISK_LINE_THRESHOLD {
        risk += 20;
    }
    let risk = risk.clamp(0, 100) as u8;

    let execution_mode = if risk < RISK_AUTO_RUN_THRESHOLD && critic.all_checks_passed && total_lines <= MAX_REASONABLE_LINES.min(300) {
        ExecutionMode::AutoRun
    } else {
        ExecutionMode::UserApprove
    };
    (risk, execution_mode)
}

fn node_to_data(node: &Node) -> Result<PlanData, PlanError> {
    serde_json::from_value(node.data.clone()).map_err(|e| PlanError::Malformed(node.id, e.to_string()))
}

pub struct PlanEngine {
    store: GraphStore,
}

impl PlanEngine {
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    pub async fn create(&self, name: impl Into<String>, goal: impl Into<String>, scope: impl Into<String>, non_goals: Vec<String>) -> Result<Node, PlanError> {
        if non_goals.is_empty() {
            return Err(PlanError::OutlineIncomplete("at least one non-goal is required".to_string()));
        }
        let goal = goal.into();
        let scope = scope.into();
        if goal.trim().is_empty() || scope.trim().is_empty() {
            return Err(PlanError::OutlineIncomplete("goal and scope must be non-empty".to_string()));
        }
        let data = PlanData::new(goal, scope, non_goals);
        let node = self.store.create_node(Layer::Context, "plan", name.into(), serde_json::to_value(&data)?, None).await?;
        Ok(node)
    }

    pub async fn get(&self, id: Id) -> Result<(Node, PlanData), PlanError> {
        let node = self.store.get_node(id).await?.ok_or(PlanError::NotFound(id))?;
        let data = node_to_data(&node)?;
        Ok((node, data))
    }

    async fn write(&self, node: Node, data: PlanData) -> Result<Node, PlanError> {
        let updated = self.store.update_node(node.id, DataPatch::Replace(serde_json::to_value(&data)?)).await?;
        Ok(updated)
    }

    fn require_stage_transition(current: PlanStage, target: PlanStage) -> Result<(), PlanError> {
        if !current.allowed_successors().contains(&target) {
            return Err(PlanError::InvalidTransition { from: current.as_str().to_string(), to: target.as_str().to_string() });
        }
        Ok(())
    }

    /// Fills in milestones/steps/acceptance-criteria/test-strategy and
    /// advances `outline -> plan`. All four are required; none are
    /// auto-filled.
    pub async fn submit_plan(
        &self,
        id: Id,
        milestones: Vec<String>,
        steps: Vec<PlanStep>,
        acceptance_criteria: Vec<String>,
        test_strategy: String,
        risks: Vec<String>,
    ) -> Result<Node, PlanError> {
        let (node, mut data) = self.get(id).await?;
        Self::require_stage_transition(data.stage, PlanStage::Plan)?;
        if milestones.is_empty() || steps.is_empty() || acceptance_criteria.is_empty() || test_strategy.trim().is_empty() {
            return Err(PlanError::PlanIncomplete("milestones, steps, acceptance criteria, and test strategy are all required".to_string()));
        }
        data.milestones = milestones;
        data.steps = steps;
        data.acceptance_criteria = acceptance_criteria;
        data.test_strategy = test_strategy;
        data.risks = risks;
        data.stage = PlanStage::Plan;
        self.write(node, data).await
    }

    /// `plan -> prereqs`. Tolerant: missing prereqs become an empty list
    /// rather than blocking the advance.
    pub async fn submit_prereqs(&self, id: Id, prereqs: Option<Vec<String>>) -> Result<Node, PlanError> {
        let (node, mut data) = self.get(id).await?;
        Self::require_stage_transition(data.stage, PlanStage::Prereqs)?;
        data.prereqs = prereqs.unwrap_or_default();
        data.stage = PlanStage::Prereqs;
        self.write(node, data).await
    }

    /// `prereqs -> review`, running the deterministic critic and (on pass)
    /// the risk gate. A failing critic reverts the stage to `plan`.
    pub async fn run_review(&self, id: Id) -> Result<(Node, ReviewOutcome), PlanError> {
        let (node, mut data) = self.get(id).await?;
        Self::require_stage_transition(data.stage, PlanStage::Review)?;

        let critic = run_critic(&data);
        let outcome = match critic.verdict {
            ReviewVerdict::Revise => {
                data.stage = PlanStage::Plan;
                data.review_score = Some(critic.score);
                data.risk = None;
                data.execution_mode = None;
                ReviewOutcome { critic, risk: None, execution_mode: None }
            }
            ReviewVerdict::Approved => {
                let (risk, execution_mode) = run_gate(&data, &critic);
                data.stage = PlanStage::Approved;
                data.review_score = Some(critic.score);
                data.risk = Some(risk);
                data.execution_mode = Some(execution_mode);
                ReviewOutcome { critic, risk: Some(risk), execution_mode: Some(execution_mode) }
            }
        };

        let updated = self.write(node, data).await?;
        Ok((updated, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_plan() -> PlanData {
        let mut plan = PlanData::new("ship feature".to_string(), "the payments module".to_string(), vec!["not touching auth".to_string()]);
        plan.milestones = vec!["m1".to_string()];
        plan.steps = vec![
            PlanStep { description: "implement".to_string(), files: vec!["/pkg/a.rs".to_string()], estimated_lines: 80 },
            PlanStep { description: "test".to_string(), files: vec!["/pkg/a_test.rs".to_string()], estimated_lines: 60 },
        ];
        plan.acceptance_criteria = vec!["a1".to_string(), "a2".to_string()];
        plan.test_strategy = "unit".to_string();
        plan.risks = vec!["r1".to_string()];
        plan.prereqs = vec!["env ready".to_string()];
        plan.stage = PlanStage::Prereqs;
        plan
    }

    #[test]
    fn critic_scores_complete_plan_at_one_hundred() {
        let result = run_critic(&complete_plan());
        assert_eq!(result.score, 100);
        assert_eq!(result.verdict, ReviewVerdict::Approved);
        assert!(result.all_checks_passed);
    }

    #[test]
    fn critic_deducts_for_missing_acceptance_criteria() {
        let mut plan = complete_plan();
        plan.acceptance_criteria.clear();
        let result = run_critic(&plan);
        assert_eq!(result.score, 70);
        assert!(!result.all_checks_passed);
    }

    #[test]
    fn critic_scales_deduction_by_fraction_of_steps_missing_files() {
        let mut plan = complete_plan();
        plan.steps[0].files.clear();
        let result = run_critic(&plan);
        assert_eq!(result.score, 100 - 13);
    }

    #[test]
    fn critic_reverts_to_revise_below_threshold() {
        let mut plan = complete_plan();
        plan.acceptance_criteria.clear();
        plan.test_strategy.clear();
        plan.risks.clear();
        plan.prereqs.clear();
        let result = run_critic(&plan);
        assert!(result.score < REVIEW_PASS_THRESHOLD);
        assert_eq!(result.verdict, ReviewVerdict::Revise);
    }

    #[test]
    fn unbounded_scope_keyword_is_penalised() {
        let mut plan = complete_plan();
        plan.scope = "the payments module and anything else needed".to_string();
        let result = run_critic(&plan);
        assert!(result.deductions.iter().any(|(name, _)| name.contains("unbounded")));
    }

    #[test]
    fn gate_grants_auto_run_for_low_risk_small_plan() {
        let plan = complete_plan();
        let critic = run_critic(&plan);
        let (risk, mode) = run_gate(&plan, &critic);
        assert_eq!(risk, 0);
        assert_eq!(mode, ExecutionMode::AutoRun);
    }

    #[test]
    fn gate_requires_user_approval_for_large_plans() {
        let mut plan = complete_plan();
        plan.steps.push(PlanStep { description: "big".to_string(), files: vec!["/pkg/b.rs".to_string()], estimated_lines: 400 });
        let critic = run_critic(&plan);
        let (risk, mode) = run_gate(&plan, &critic);
        assert!(risk >= RISK_AUTO_RUN_THRESHOLD);
        assert_eq!(mode, ExecutionMode::UserApprove);
    }

    async fn store_fixture() -> (GraphStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::open(dir.path().join("graph.sqlite")).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn create_rejects_missing_non_goals() {
        let (store, _dir) = store_fixture().await;
        let engine = PlanEngine::new(store);
        let err = engine.create("p1", "goal", "scope", vec![]).await.unwrap_err();
        assert!(matches!(err, PlanError::OutlineIncomplete(_)));
    }

    #[tokio::test]
    async fn full_lifecycle_reaches_approved() {
        let (store, _dir) = store_fixture().await;
        let engine = PlanEngine::new(store);
        let node = engine.create("p1", "ship feature", "the payments module", vec!["not touching auth".to_string()]).await.unwrap();

        let node = engine
            .submit_plan(
                node.id,
                vec!["m1".to_string()],
                vec![PlanStep { description: "do".to_string(), files: vec!["/pkg/a.rs".to_string()], estimated_lines: 80 }],
                vec!["a1".to_string()],
                "unit".to_string(),
                vec!["r1".to_string()],
            )
            .await
            .unwrap();

        let node = engine.submit_prereqs(node.id, Some(vec!["ready".to_string()])).await.unwrap();
        let (node, outcome) = engine.run_review(node.id).await.unwrap();
        assert_eq!(outcome.critic.verdict, ReviewVerdict::Approved);

        let (_, data) = engine.get(node.id).await.unwrap();
        assert_eq!(data.stage, PlanStage::Approved);
        assert_eq!(data.execution_mode, Some(ExecutionMode::AutoRun));
    }

    #[tokio::test]
    async fn failing_review_reverts_to_plan_stage() {
        let (store, _dir) = store_fixture().await;
        let engine = PlanEngine::new(store);
        let node = engine.create("p1", "ship feature", "the payments module", vec!["not touching auth".to_string()]).await.unwrap();
        let node = engine
            .submit_plan(
                node.id,
                vec!["m1".to_string()],
                vec![PlanStep { description: "do".to_string(), files: vec![], estimated_lines: 10 }],
                vec!["a1".to_string()],
                "unit".to_string(),
                vec![],
            )
            .await
            .unwrap();
        let node = engine.submit_prereqs(node.id, None).await.unwrap();
        let (node, outcome) = engine.run_review(node.id).await.unwrap();
        assert_eq!(outcome.critic.verdict, ReviewVerdict::Revise);
        let (_, data) = engine.get(node.id).await.unwrap();
        assert_eq!(data.stage, PlanStage::Plan);
        let _ = node;
    }
}
