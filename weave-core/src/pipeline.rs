//! Composes branch prep -> build gate -> synthesis into one call, and
//! aggregates work-order event history into per-period metrics: per-step
//! durations, per-agent counters, and mean time to merge.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use weave_git::{GitClient, GitError};
use weave_graph::{GraphError, GraphStore, Layer};
use weave_ids::Id;
use weave_llm::Router;

use crate::build_gate::{self, BuildGateConfig, BuildGateError, BuildGateResult};
use crate::synthesis::{SynthesisError, SynthesisOutcome, SynthesisRunner};
use crate::work_order::{WorkOrderEngine, WorkOrderError, WorkOrderStatus};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    WorkOrder(#[from] WorkOrderError),
    #[error(transparent)]
    BuildGate(#[from] BuildGateError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}

#[derive(Debug)]
pub enum PipelineOutcome {
    BuildFailed(BuildGateResult),
    Synthesized(SynthesisOutcome),
}

pub struct PipelineRunner<'a> {
    pub git: Arc<dyn GitClient>,
    pub store: &'a GraphStore,
    pub router: &'a Router,
    pub engine: &'a WorkOrderEngine,
    pub build_gate_config: BuildGateConfig,
}

impl<'a> PipelineRunner<'a> {
    /// Drives one work order from `assigned` through the build gate and, on
    /// a pass, into synthesis. Any failing phase returns early with the
    /// work order already advanced to its failure state.
    pub async fn run(&self, wo_id: Id) -> Result<PipelineOutcome, PipelineError> {
        let (_node, data) = self.engine.get(wo_id).await?;
        let branch = data.branch_name.clone().unwrap_or_else(|| format!("agent/unassigned/{wo_id}"));

        if data.status == WorkOrderStatus::Assigned {
            let _ = self.git.create_branch(&branch, &data.base_branch).await;
            self.engine.advance(wo_id, WorkOrderStatus::Mutating, "pipeline", serde_json::json!({})).await?;
        }

        let (_node, data) = self.engine.get(wo_id).await?;
        let gate_result = build_gate::run(Arc::clone(&self.git), &data, wo_id, self.build_gate_config.clone(), None).await?;

        if !gate_result.passed {
            self.engine
                .advance(
                    wo_id,
                    WorkOrderStatus::BuildFailed,
                    "pipeline",
                    serde_json::json!({"error": "build gate failed", "scope_passed": gate_result.scope.passed, "ast_passed": gate_result.ast.passed, "build_passed": gate_result.build.passed, "test_passed": gate_result.test.passed}),
                )
                .await?;
            return Ok(PipelineOutcome::BuildFailed(gate_result));
        }

        self.engine.advance(wo_id, WorkOrderStatus::BuildPassed, "pipeline", serde_json::json!({})).await?;

        let synthesis = SynthesisRunner {
            git: Arc::clone(&self.git),
            store: self.store,
            router: self.router,
            engine: self.engine,
            build_gate_config: self.build_gate_config.clone(),
        };
        let outcome = synthesis.run(wo_id).await?;
        Ok(PipelineOutcome::Synthesized(outcome))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepDurations {
    pub mutating: Option<Duration>,
    pub build_gate: Option<Duration>,
    pub synthesis: Option<Duration>,
    pub merge_pending: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct AgentCounters {
    pub agent_key: String,
    pub work_order_count: u32,
    pub merged: u32,
    pub rejected: u32,
    pub average_synthesis_score: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct PeriodMetrics {
    pub step_durations: HashMap<Id, StepDurations>,
    pub agent_counters: Vec<AgentCounters>,
    pub mean_time_to_merge: Option<Duration>,
}

struct StatusEvent {
    status: String,
    occurred_at: DateTime<Utc>,
    detail: serde_json::Value,
}

fn first_occurrence(events: &[StatusEvent], status: &str) -> Option<DateTime<Utc>> {
    events.iter().find(|e| e.status == status).map(|e| e.occurred_at)
}

fn last_occurrence_before(events: &[StatusEvent], status: &str, before: DateTime<Utc>) -> Option<DateTime<Utc>> {
    events.iter().filter(|e| e.status == status && e.occurred_at < before).map(|e| e.occurred_at).max()
}

/// Derives the four named step durations from one work order's
/// chronologically-ordered `work_order_event` history. Any step whose
/// endpoints weren't both reached is `None`.
fn compute_step_durations(events: &[StatusEvent]) -> StepDurations {
    let assigned_at = first_occurrence(events, "assigned");
    let build_passed_at = first_occurrence(events, "build_passed");
    let merge_pending_at = first_occurrence(events, "merge_pending");
    let merged_at = first_occurrence(events, "merged");
    let mutating_last_before_build = build_passed_at.and_then(|bp| last_occurrence_before(events, "mutating", bp));

    StepDurations {
        mutating: assigned_at.zip(build_passed_at).map(|(a, b)| b - a),
        build_gate: mutating_last_before_build.zip(build_passed_at).map(|(m, b)| b - m),
        synthesis: build_passed_at.zip(merge_pending_at).map(|(b, g)| g - b),
        merge_pending: merge_pending_at.zip(merged_at).map(|(g, e)| e - g),
    }
}

/// Aggregates every `AUTOMATION.work_order` node's event history (within
/// `[since, until]`) into step durations per work order, counters per
/// agent, and the window's mean time to merge.
pub async fn compute_period_metrics(store: &GraphStore, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<PeriodMetrics, GraphError> {
    let work_orders = store.list_nodes_by_type(Layer::Automation, "work_order", 1000).await?;

    let mut step_durations = HashMap::new();
    let mut per_agent: HashMap<String, AgentCounters> = HashMap::new();
    let mut merge_times = Vec::new();

    for wo in &work_orders {
        let observations = store.list_observations_in_range(wo.id, since, until).await?;
        let events: Vec<StatusEvent> = observations
            .into_iter()
            .filter(|o| o.observation_type == "work_order_event")
            .filter_map(|o| {
                let status = o.data.get("status").and_then(|v| v.as_str())?.to_string();
                Some(StatusEvent { status, occurred_at: o.observed_at, detail: o.data })
            })
            .collect();
        if events.is_empty() {
            continue;
        }

        step_durations.insert(wo.id, compute_step_durations(&events));

        let Some(agent_key) = wo.data.get("agent_key").and_then(|v| v.as_str()) else {
            continue;
        };
        let counters = per_agent.entry(agent_key.to_string()).or_insert_with(|| AgentCounters {
            agent_key: agent_key.to_string(),
            work_order_count: 0,
            merged: 0,
            rejected: 0,
            average_synthesis_score: None,
        });
        counters.work_order_count += 1;

        let synthesis_scores: Vec<f64> = events
            .iter()
            .filter(|e| e.status == "synthesis_pending")
            .filter_map(|e| e.detail.get("detail").and_then(|d| d.get("score")).and_then(|v| v.as_f64()))
            .collect();
        if !synthesis_scores.is_empty() {
            let sum: f64 = synthesis_scores.iter().sum();
            let avg = (sum / synthesis_scores.len() as f64) as f32;
            counters.average_synthesis_score = Some(match counters.average_synthesis_score {
                Some(existing) => (existing + avg) / 2.0,
                None => avg,
            });
        }

        if events.iter().any(|e| e.status == "merged") {
            counters.merged += 1;
            if let (Some(merged_at), created_at) = (first_occurrence(&events, "merged"), wo.created_at) {
                merge_times.push(merged_at - created_at);
            }
        }
        if events.iter().any(|e| e.status == "rejected") {
            counters.rejected += 1;
        }
    }

    let mean_time_to_merge = if merge_times.is_empty() {
        None
    } else {
        let total_ms: i64 = merge_times.iter().map(|d| d.num_milliseconds()).sum();
        Some(Duration::milliseconds(total_ms / merge_times.len() as i64))
    };

    Ok(PeriodMetrics {
        step_durations,
        agent_counters: per_agent.into_values().collect(),
        mean_time_to_merge,
    })
}
