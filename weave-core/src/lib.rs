//! The orchestration core: the work-order state machine, the build/AST
//! gates that mutations must clear, the synthesis reviewer, the prompt
//! assembly pipeline, the tool runner, the pattern/proposal engine, the
//! plan state machine, per-agent snapshots, and the pipeline runner that
//! composes them with event-derived metrics.

pub mod agent_snapshot;
pub mod ast_gate;
pub mod build_gate;
pub mod embed;
pub mod patterns;
pub mod pipeline;
pub mod plan;
pub mod prompt;
pub mod synthesis;
pub mod tools;
pub mod work_order;

pub use agent_snapshot::{build_snapshot, AgentSnapshot, LiveStatus, SnapshotProfile};
pub use ast_gate::{AstError, AstResult, FileDiff, Policy, Violation, ViolationKind};
pub use build_gate::{BuildGateConfig, BuildGateError, BuildGateResult, PhaseResult};
pub use embed::{content_hash, derive_embeddable_text, Embedder};
pub use patterns::{
    CoEditPattern, DetectedPatterns, FileChurnPattern, PatternEngine, ScoredSuggestion, SuggestionCandidate, SuggestionKind, ToolSequencePattern,
};
pub use pipeline::{compute_period_metrics, AgentCounters, PeriodMetrics, PipelineError, PipelineOutcome, PipelineRunner, StepDurations};
pub use plan::{CriticResult, ExecutionMode, PlanData, PlanEngine, PlanError, PlanStage, PlanStep, ReviewOutcome, ReviewVerdict};
pub use prompt::{PromptCtx, PromptError, PromptRecipe, PromptRegistry, SourceSpec};
pub use synthesis::{SynthesisError, SynthesisOutcome, SynthesisResponse, SynthesisRunner, Verdict};
pub use tools::{ToolCallContext, ToolError, ToolOutcome, ToolRegistry, ToolRunner, ToolSpec};
pub use work_order::{DivergenceReport, WorkOrderData, WorkOrderEngine, WorkOrderError, WorkOrderStatus};
