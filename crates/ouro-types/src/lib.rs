#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ouro-types** – Shared primitive data structures for the Ouroboros runtime.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It holds the entities that flow through the generation pipeline and the
//! feedback subsystem, the runtime configuration, and the injected filesystem
//! capability. It intentionally makes no assumptions about subprocesses,
//! language models, or the coordination kernel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod config;
pub mod fs;
pub mod learning;
pub mod quality;

pub use config::{ConfigError, CoreConfig, ThunderdomeConfig};
pub use fs::{Filesystem, OsFilesystem};
pub use learning::{pattern_confidence, DetectedPattern, ToolLearning};
pub use quality::{
    CachePolicy, CustomDimension, ExecutionFeedback, IssueKind, OutputExpectations, OutputFormat,
    PerformanceExpectations, QualityAssessment, QualityIssue, ScalingBehavior, ToolQualityProfile,
    ToolType, UsagePattern,
};

//─────────────────────────────
//  Resource constants
//─────────────────────────────

/// Maximum raw bytes delivered to a tool binary on standard input.
pub const MAX_TOOL_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Maximum size of generated tool source accepted by the compiler.
pub const MAX_TOOL_SOURCE_BYTES: usize = 100 * 1024;

/// Maximum tool name length; names are stable identifiers and land in facts.
pub const MAX_TOOL_NAME_LEN: usize = 128;

//─────────────────────────────
//  Tool generation entities
//─────────────────────────────

/// Broad category of a tool inferred from the user's request.
///
/// Drives prompt selection and the fallback test template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Validates or checks an input against rules.
    Validator,
    /// Converts between representations or formats.
    Converter,
    /// Extracts structure out of raw text.
    Parser,
    /// Inspects input and reports findings.
    Analyzer,
    /// Re-renders input in a canonical presentation.
    Formatter,
    /// Anything that fits none of the above.
    Utility,
}

impl ToolCategory {
    /// Stable lowercase identifier used in prompts and facts.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Validator => "validator",
            ToolCategory::Converter => "converter",
            ToolCategory::Parser => "parser",
            ToolCategory::Analyzer => "analyzer",
            ToolCategory::Formatter => "formatter",
            ToolCategory::Utility => "utility",
        }
    }
}

/// A detected capability gap: the request for a tool that does not exist yet.
///
/// Created by detection or by a kernel delegation, consumed by the loop,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolNeed {
    /// Stable snake_case tool name, unique within a workspace.
    pub name: String,
    /// One-sentence statement of what the tool must do.
    pub purpose: String,
    /// Descriptor of the input the tool accepts (e.g. "string", "json").
    pub input_type: String,
    /// Descriptor of the output the tool produces.
    pub output_type: String,
    /// Evidence strings that triggered the detection.
    pub triggers: Vec<String>,
    /// Priority in [0, 1]; orders actions in an analysis result.
    pub priority: f64,
    /// Detection confidence in [0, 1]; gates admission to the loop.
    pub confidence: f64,
    /// Free-form reasoning recorded for the audit trail.
    pub reasoning: String,
    /// Inferred category.
    pub category: ToolCategory,
}

impl ToolNeed {
    /// Validate the need before it enters the pipeline.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("tool name cannot be empty".to_string());
        }
        if self.name.len() > MAX_TOOL_NAME_LEN {
            return Err(format!(
                "tool name too long: {} > {}",
                self.name.len(),
                MAX_TOOL_NAME_LEN
            ));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            || !self.name.starts_with(|c: char| c.is_ascii_lowercase())
        {
            return Err(format!("tool name must be snake_case: {:?}", self.name));
        }
        if !(0.0..=1.0).contains(&self.priority) {
            return Err(format!("priority out of range: {}", self.priority));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence out of range: {}", self.confidence));
        }
        Ok(())
    }

    /// Strong evidence overrides the elevated confidence gate and the
    /// cooldown: a trigger referencing a prior failure, or at least two
    /// independent triggers.
    pub fn has_strong_evidence(&self) -> bool {
        self.triggers.iter().any(|t| {
            let t = t.to_lowercase();
            t.contains("failed") || t.contains("previous attempt failed")
        }) || self.triggers.len() >= 2
    }
}

/// Source artifacts produced for one tool need.
///
/// Mutated by retry-with-feedback, handed to the safety checker and the
/// compiler, then discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedTool {
    /// Tool name, matching the need.
    pub name: String,
    /// Package the source belongs to.
    pub package: String,
    /// Human description embedded in the registry entry.
    pub description: String,
    /// Generated tool source.
    pub source: String,
    /// Generated test source.
    pub test_source: String,
    /// Input/output schema for the tool.
    pub schema: serde_json::Value,
    /// Path the source is intended to land at.
    pub file_path: PathBuf,
    /// Set once structural validation has run without hard errors.
    pub validated: bool,
    /// Accumulated non-fatal validation warnings.
    pub warnings: Vec<String>,
}

/// A compiled, registered tool available for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeTool {
    /// Registry key.
    pub name: String,
    /// Content hash of the final source (hex-encoded SHA-256).
    pub hash: String,
    /// Human description.
    pub description: String,
    /// Path of the compiled executable.
    pub binary_path: PathBuf,
    /// Registration timestamp.
    pub registered_at: DateTime<Utc>,
    /// Monotone version, bumped on hot-reload with a differing hash.
    pub version: u32,
}

//─────────────────────────────
//  Loop result
//─────────────────────────────

/// Pipeline stages of the Ouroboros loop, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStage {
    /// Incoming need recorded.
    Detection,
    /// Source synthesized by the generator.
    Specification,
    /// Static policy check, with retry-with-feedback.
    SafetyCheck,
    /// Harness wrapping and native compilation.
    Compilation,
    /// Adversarial harness run.
    Thunderdome,
    /// Registry mutation and callback.
    Registration,
    /// Terminal success.
    Done,
}

impl LoopStage {
    /// Stable name used in loop results and traces.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStage::Detection => "detection",
            LoopStage::Specification => "specification",
            LoopStage::SafetyCheck => "safety_check",
            LoopStage::Compilation => "compilation",
            LoopStage::Thunderdome => "thunderdome",
            LoopStage::Registration => "registration",
            LoopStage::Done => "done",
        }
    }
}

/// Wall-clock spent in one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    /// The stage measured.
    pub stage: LoopStage,
    /// Time spent inside it, retries included.
    pub duration: Duration,
}

/// Outcome of one loop invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopResult {
    /// Whether the pipeline reached registration.
    pub success: bool,
    /// Last stage the pipeline reached.
    pub stage: LoopStage,
    /// Registered tool handle on success.
    pub tool: Option<RuntimeTool>,
    /// Terminal error message on failure.
    pub error: Option<String>,
    /// Per-stage timing, in pipeline order.
    pub stage_timings: Vec<StageTiming>,
}

impl LoopResult {
    /// A failure result terminating at `stage`.
    pub fn failure(stage: LoopStage, error: impl Into<String>) -> Self {
        Self {
            success: false,
            stage,
            tool: None,
            error: Some(error.into()),
            stage_timings: Vec::new(),
        }
    }
}

//─────────────────────────────
//  Analysis actions
//─────────────────────────────

/// Request to start an external campaign; the orchestrator only relays it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRequest {
    /// Campaign objective in the user's words.
    pub objective: String,
    /// Target the campaign operates on.
    pub target: String,
}

/// Schedule under which an agent runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum AgentSchedule {
    /// Runs only when explicitly invoked.
    OnDemand,
    /// Runs on a fixed interval.
    Interval(Duration),
    /// Runs whenever one of its triggers fires.
    Reactive,
}

impl AgentSchedule {
    /// Stable identifier asserted as the `agent_schedule` fact argument.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentSchedule::OnDemand => "on_demand",
            AgentSchedule::Interval(_) => "interval",
            AgentSchedule::Reactive => "reactive",
        }
    }
}

/// Blueprint for a persistent agent; writing the spec file is an external
/// surface, the orchestrator only fills the blueprint in and asserts facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Agent name.
    pub name: String,
    /// Agent flavor (e.g. "monitor", "assistant").
    pub agent_type: String,
    /// What the agent exists to do.
    pub purpose: String,
    /// When the agent runs.
    pub schedule: AgentSchedule,
    /// Trigger phrases that wake a reactive agent.
    pub triggers: Vec<String>,
}

/// Delegation of work to another shard through the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardDelegation {
    /// Target shard type constant (e.g. "/tool_generator").
    pub shard: String,
    /// Capability being requested.
    pub capability: String,
}

/// One action the analysis proposes; the dispatch is exhaustive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Action {
    /// Start a campaign (delegated, never executed in the core).
    StartCampaign(CampaignRequest),
    /// Create a persistent agent.
    CreateAgent(AgentSpec),
    /// Generate a new tool.
    GenerateTool(ToolNeed),
    /// Hand work to another shard.
    DelegateToShard(ShardDelegation),
    /// Explicit no-op.
    None,
}

/// An action with the priority the analysis assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    /// Priority in [0, 1]; the action list is sorted by this, descending.
    pub priority: f64,
    /// The action itself.
    pub action: Action,
}

/// Complexity signal for a user request, produced by an external analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityAssessment {
    /// Overall complexity in [0, 1].
    pub score: f64,
    /// Code elements in scope, when known.
    pub element_count: u64,
    /// Files in scope, when known.
    pub file_count: u64,
    /// Analyzer summary.
    pub summary: String,
}

/// Persistence signal: does the request describe recurring work?
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceAssessment {
    /// True when the request should outlive the current session.
    pub persistent: bool,
    /// Analyzer reasoning.
    pub reasoning: String,
}

/// Outcome of analyzing one user request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Complexity signal.
    pub complexity: ComplexityAssessment,
    /// Persistence signal.
    pub persistence: PersistenceAssessment,
    /// Proposed actions, sorted by priority descending.
    pub actions: Vec<PlannedAction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn need(name: &str) -> ToolNeed {
        ToolNeed {
            name: name.to_string(),
            purpose: "test".to_string(),
            input_type: "string".to_string(),
            output_type: "string".to_string(),
            triggers: vec![],
            priority: 0.5,
            confidence: 0.8,
            reasoning: String::new(),
            category: ToolCategory::Utility,
        }
    }

    #[test]
    fn tool_need_name_must_be_snake_case() {
        assert!(need("json_pretty").validate().is_ok());
        assert!(need("jsonPretty").validate().is_err());
        assert!(need("Json-pretty").validate().is_err());
        assert!(need("").validate().is_err());
        assert!(need("9lives").validate().is_err());
    }

    #[test]
    fn tool_need_bounds_are_checked() {
        let mut n = need("ok_tool");
        n.confidence = 1.3;
        assert!(n.validate().is_err());
        n.confidence = 0.9;
        n.priority = -0.1;
        assert!(n.validate().is_err());
    }

    #[test]
    fn strong_evidence_from_failure_trigger() {
        let mut n = need("t");
        n.triggers = vec!["previous attempt failed with exit 1".to_string()];
        assert!(n.has_strong_evidence());
    }

    #[test]
    fn strong_evidence_from_multiple_triggers() {
        let mut n = need("t");
        n.triggers = vec!["user asked twice".to_string(), "no tool matched".to_string()];
        assert!(n.has_strong_evidence());
        n.triggers.truncate(1);
        assert!(!n.has_strong_evidence());
    }

    #[test]
    fn loop_result_failure_helper() {
        let r = LoopResult::failure(LoopStage::SafetyCheck, "unsafe");
        assert!(!r.success);
        assert_eq!(r.stage, LoopStage::SafetyCheck);
        assert_eq!(r.error.as_deref(), Some("unsafe"));
        assert!(r.tool.is_none());
    }

    #[test]
    fn action_serde_round_trip() {
        let a = Action::GenerateTool(need("round_trip"));
        let json = serde_json::to_string(&a).unwrap();
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
