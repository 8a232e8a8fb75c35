//! Execution feedback, quality assessments, and per-tool quality profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

//─────────────────────────────
//  Execution feedback
//─────────────────────────────

/// Everything recorded about one execution of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFeedback {
    /// Tool that ran.
    pub tool_name: String,
    /// Unique execution id.
    pub execution_id: String,
    /// When the execution started.
    pub timestamp: DateTime<Utc>,
    /// Input delivered to the tool.
    pub input: String,
    /// Output the tool produced.
    pub output: String,
    /// Output size in bytes.
    pub output_size: usize,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Retries before this outcome.
    pub retry_count: u32,
    /// Whether the execution succeeded.
    pub success: bool,
    /// Error classification when it did not.
    pub error_kind: Option<String>,
    /// Error detail when it did not.
    pub error_message: Option<String>,
    /// Quality assessment, attached by the evaluator.
    pub quality: Option<QualityAssessment>,
    /// Free-form user feedback, when offered.
    pub user_feedback: Option<String>,
    /// Task the execution served, when known.
    pub task_context: Option<String>,
}

impl ExecutionFeedback {
    /// Feedback for a completed execution.
    pub fn completed(
        tool_name: impl Into<String>,
        execution_id: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let output = output.into();
        Self {
            tool_name: tool_name.into(),
            execution_id: execution_id.into(),
            timestamp: Utc::now(),
            input: input.into(),
            output_size: output.len(),
            output,
            duration,
            retry_count: 0,
            success: true,
            error_kind: None,
            error_message: None,
            quality: None,
            user_feedback: None,
            task_context: None,
        }
    }

    /// Feedback for a failed execution.
    pub fn failed(
        tool_name: impl Into<String>,
        execution_id: impl Into<String>,
        input: impl Into<String>,
        error_kind: impl Into<String>,
        error_message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let mut fb = Self::completed(tool_name, execution_id, input, "", duration);
        fb.success = false;
        fb.error_kind = Some(error_kind.into());
        fb.error_message = Some(error_message.into());
        fb
    }
}

//─────────────────────────────
//  Quality assessment
//─────────────────────────────

/// Classification of a quality issue observed on an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Output looks truncated by pagination.
    PaginationTruncated,
    /// Output admits it is partial or limited.
    PartialResults,
    /// Output embeds an error or exception report.
    ErrorInOutput,
    /// Output is empty or a trivial placeholder.
    EmptyOrMinimal,
    /// Upstream rate limiting detected.
    RateLimited,
    /// The execution itself failed.
    PartialFailure,
    /// Duration far beyond expectations.
    Slow,
    /// A field the profile requires is missing from the output.
    MissingRequiredField,
    /// A string the profile requires is absent.
    MissingContent,
    /// A string the profile forbids is present.
    ForbiddenContent,
    /// A custom dimension fell outside its tolerance.
    OffExpectation,
}

impl IssueKind {
    /// Stable identifier used in facts, learnings, and pattern keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::PaginationTruncated => "pagination_truncated",
            IssueKind::PartialResults => "partial_results",
            IssueKind::ErrorInOutput => "error_in_output",
            IssueKind::EmptyOrMinimal => "empty_or_minimal",
            IssueKind::RateLimited => "rate_limited",
            IssueKind::PartialFailure => "partial_failure",
            IssueKind::Slow => "slow",
            IssueKind::MissingRequiredField => "missing_required_field",
            IssueKind::MissingContent => "missing_content",
            IssueKind::ForbiddenContent => "forbidden_content",
            IssueKind::OffExpectation => "off_expectation",
        }
    }
}

impl IssueKind {
    /// Remediation suggestions associated with this issue kind.
    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            IssueKind::PaginationTruncated => &["add-pagination"],
            IssueKind::PartialResults => &["increase-limit"],
            IssueKind::RateLimited => &["add-retry"],
            IssueKind::Slow => &["caching", "parallelize"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One issue found on an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    /// Issue classification.
    pub kind: IssueKind,
    /// Severity in [0, 1].
    pub severity: f64,
    /// Human-readable detail.
    pub description: String,
}

/// Derived quality of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// Overall score in [0, 1].
    pub overall_score: f64,
    /// Did the output cover what was asked?
    pub completeness: f64,
    /// Is the output correct as far as heuristics can tell?
    pub accuracy: f64,
    /// Was the execution fast enough?
    pub efficiency: f64,
    /// Does the output address the request?
    pub relevance: f64,
    /// Issues found.
    pub issues: Vec<QualityIssue>,
    /// Improvement suggestions keyed off the issues.
    pub suggestions: Vec<String>,
    /// Which evaluator produced this assessment.
    pub evaluator: String,
    /// When the assessment was made.
    pub timestamp: DateTime<Utc>,
}

//─────────────────────────────
//  Quality profiles
//─────────────────────────────

/// Behavioral archetype of a tool; selects default expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    /// Sub-second, pure computation.
    QuickCalculation,
    /// Fetches data from elsewhere.
    DataFetch,
    /// Long-running background work.
    BackgroundTask,
    /// Walks a structure recursively.
    RecursiveAnalysis,
    /// Answers must be fresh.
    RealTimeQuery,
    /// Runs once to set something up.
    OneTimeSetup,
    /// Processes inputs in bulk.
    BatchProcessor,
    /// Watches something and reports.
    Monitor,
    /// No better classification.
    Generic,
}

/// How a tool's duration scales with input size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingBehavior {
    /// Independent of input size.
    Constant,
    /// Proportional to input size.
    Linear,
    /// Worse than linear; treat big inputs with suspicion.
    Exponential,
}

/// Duration expectations for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceExpectations {
    /// Fastest plausible execution.
    pub expected_min: Duration,
    /// Typical execution.
    pub typical: Duration,
    /// Slow but acceptable.
    pub expected_max: Duration,
    /// Hard deadline.
    pub timeout: Duration,
    /// Retries budgeted per invocation.
    pub max_retries: u32,
    /// Duration scaling with input size.
    pub scaling: ScalingBehavior,
}

/// Required output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// A single JSON document.
    Json,
    /// Free text.
    Text,
    /// Newline-delimited records.
    Lines,
}

/// Output expectations for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputExpectations {
    /// Below this size the output is suspicious.
    pub min_size: usize,
    /// Typical output size.
    pub typical_size: usize,
    /// Above this size the output is suspicious.
    pub max_size: usize,
    /// Shape the output must have, when constrained.
    pub required_format: Option<OutputFormat>,
    /// Substrings that must appear.
    pub must_contain: Vec<String>,
    /// Substrings that must not appear.
    pub must_not_contain: Vec<String>,
    /// Fields a JSON output must expose.
    pub required_fields: Vec<String>,
    /// Whether the tool is expected to paginate instead of truncating.
    pub pagination_expected: bool,
}

/// How often the tool is expected to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsagePattern {
    /// Invoked directly by the user, latency-sensitive.
    Interactive,
    /// Invoked in bulk pipelines.
    Batch,
    /// Invoked by schedulers and monitors.
    Background,
}

/// Whether results may be served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Results must always be recomputed.
    Never,
    /// Results may be reused briefly.
    Short,
    /// Results are stable; cache aggressively.
    Aggressive,
}

/// A numeric expectation extracted from the output by regex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomDimension {
    /// Dimension name, reported on issues.
    pub name: String,
    /// Regex with one capture group yielding the numeric value.
    pub pattern: String,
    /// Expected value.
    pub expected_value: f64,
    /// Acceptable absolute deviation.
    pub tolerance: f64,
    /// Weight of this dimension in the overall score.
    pub weight: f64,
}

/// Per-tool expectations used to translate raw execution data into quality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolQualityProfile {
    /// Tool the profile describes.
    pub tool_name: String,
    /// Behavioral archetype.
    pub tool_type: ToolType,
    /// Duration expectations.
    pub performance: PerformanceExpectations,
    /// Output expectations.
    pub output: OutputExpectations,
    /// Expected invocation pattern.
    pub usage: UsagePattern,
    /// Cache policy.
    pub cache: CachePolicy,
    /// Extra numeric expectations.
    pub custom_dimensions: Vec<CustomDimension>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_helpers_set_flags() {
        let ok = ExecutionFeedback::completed("t", "e1", "in", "out", Duration::from_millis(5));
        assert!(ok.success);
        assert_eq!(ok.output_size, 3);
        assert!(ok.error_kind.is_none());

        let bad = ExecutionFeedback::failed(
            "t",
            "e2",
            "in",
            "timeout",
            "deadline exceeded",
            Duration::from_secs(30),
        );
        assert!(!bad.success);
        assert_eq!(bad.error_kind.as_deref(), Some("timeout"));
        assert_eq!(bad.output_size, 0);
    }

    #[test]
    fn issue_kind_identifiers_are_stable() {
        assert_eq!(IssueKind::PaginationTruncated.as_str(), "pagination_truncated");
        assert_eq!(IssueKind::RateLimited.to_string(), "rate_limited");
    }

    #[test]
    fn profile_serde_round_trip() {
        let profile = ToolQualityProfile {
            tool_name: "fetcher".to_string(),
            tool_type: ToolType::DataFetch,
            performance: PerformanceExpectations {
                expected_min: Duration::from_millis(50),
                typical: Duration::from_millis(400),
                expected_max: Duration::from_secs(5),
                timeout: Duration::from_secs(30),
                max_retries: 2,
                scaling: ScalingBehavior::Linear,
            },
            output: OutputExpectations {
                min_size: 64,
                typical_size: 2048,
                max_size: 1 << 20,
                required_format: Some(OutputFormat::Json),
                must_contain: vec!["results".to_string()],
                must_not_contain: vec!["error".to_string()],
                required_fields: vec!["items".to_string()],
                pagination_expected: true,
            },
            usage: UsagePattern::Interactive,
            cache: CachePolicy::Short,
            custom_dimensions: vec![],
        };
        let json = serde_json::to_string(&profile).unwrap();
        let back: ToolQualityProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(profile, back);
    }
}
