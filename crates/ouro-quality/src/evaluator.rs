//! Heuristic and profile-driven execution scoring.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

use ouro_types::{
    CustomDimension, ExecutionFeedback, IssueKind, QualityAssessment, QualityIssue,
    ToolQualityProfile,
};

//─────────────────────────────
//  Heuristic rule battery
//─────────────────────────────

struct HeuristicRule {
    kind: IssueKind,
    severity: f64,
    description: &'static str,
    pattern: &'static Lazy<Regex>,
}

static PAGINATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)page \d+ of \d+|has_more=true|next_page|truncated").expect("static regex")
});
static PARTIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(partial|incomplete|limited)\b").expect("static regex"));
static ERROR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(error|failed|exception|timeout)\b").expect("static regex"));
static EMPTY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\[\s*\]|\{\s*\}|null|none|empty)\s*$").expect("static regex")
});
static RATE_LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)rate limit|429|throttl").expect("static regex"));

static RULES: &[HeuristicRule] = &[
    HeuristicRule {
        kind: IssueKind::PaginationTruncated,
        severity: 0.6,
        description: "output appears truncated by pagination",
        pattern: &PAGINATION_RE,
    },
    HeuristicRule {
        kind: IssueKind::PartialResults,
        severity: 0.5,
        description: "output admits it is partial or limited",
        pattern: &PARTIAL_RE,
    },
    HeuristicRule {
        kind: IssueKind::ErrorInOutput,
        severity: 0.7,
        description: "output embeds an error report",
        pattern: &ERROR_RE,
    },
    HeuristicRule {
        kind: IssueKind::EmptyOrMinimal,
        severity: 0.8,
        description: "output is empty or a trivial placeholder",
        pattern: &EMPTY_RE,
    },
    HeuristicRule {
        kind: IssueKind::RateLimited,
        severity: 0.7,
        description: "upstream rate limiting detected",
        pattern: &RATE_LIMIT_RE,
    },
];

//─────────────────────────────
//  Completeness hints
//─────────────────────────────

struct CompletenessHint {
    name_pattern: &'static Lazy<Regex>,
    expected_min_bytes: usize,
}

static FETCHY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"search|list|fetch|query|scan").expect("static regex"));
static REPORTY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"analy|report|summar").expect("static regex"));

static HINTS: &[CompletenessHint] = &[
    CompletenessHint {
        name_pattern: &FETCHY_NAME_RE,
        expected_min_bytes: 500,
    },
    CompletenessHint {
        name_pattern: &REPORTY_NAME_RE,
        expected_min_bytes: 200,
    },
];

/// Duration above which an execution earns a `slow` issue.
const SLOW_THRESHOLD: Duration = Duration::from_secs(30);

//─────────────────────────────
//  Evaluator
//─────────────────────────────

/// Scores executions against heuristic rules and per-tool profiles.
#[derive(Debug, Default, Clone)]
pub struct QualityEvaluator;

impl QualityEvaluator {
    /// Create an evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Heuristic assessment of one execution.
    pub fn evaluate(&self, feedback: &ExecutionFeedback) -> QualityAssessment {
        if !feedback.success {
            return failure_assessment(feedback);
        }

        let mut issues: Vec<QualityIssue> = RULES
            .iter()
            .filter(|rule| rule.pattern.is_match(&feedback.output))
            .map(|rule| QualityIssue {
                kind: rule.kind,
                severity: rule.severity,
                description: rule.description.to_string(),
            })
            .collect();
        if feedback.duration >= SLOW_THRESHOLD {
            issues.push(QualityIssue {
                kind: IssueKind::Slow,
                severity: 0.5,
                description: format!("execution took {:?}", feedback.duration),
            });
        }

        let completeness = hint_completeness(&feedback.tool_name, feedback.output_size);
        let efficiency = bucket_efficiency(feedback.duration);
        let issue_impact = issue_impact(&issues);
        let score = (completeness * 0.4 + efficiency * 0.2 + 0.4 - issue_impact).clamp(0.0, 1.0);

        QualityAssessment {
            overall_score: score,
            completeness,
            accuracy: (1.0 - issue_impact).clamp(0.0, 1.0),
            efficiency,
            relevance: if issues.iter().any(|i| i.kind == IssueKind::EmptyOrMinimal) {
                0.3
            } else {
                1.0
            },
            suggestions: suggestions_for(&issues),
            issues,
            evaluator: "heuristic".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Profile-driven assessment; supersedes the heuristics with the tool's
    /// own expectations.
    pub fn evaluate_with_profile(
        &self,
        feedback: &ExecutionFeedback,
        profile: &ToolQualityProfile,
    ) -> QualityAssessment {
        if !feedback.success {
            return failure_assessment(feedback);
        }

        let mut issues = Vec::new();
        validate_output(feedback, profile, &mut issues);

        let efficiency = profile_efficiency(feedback.duration, profile);
        if efficiency <= 0.3 {
            issues.push(QualityIssue {
                kind: IssueKind::Slow,
                severity: 0.5,
                description: format!(
                    "duration {:?} beyond expected maximum {:?}",
                    feedback.duration, profile.performance.expected_max
                ),
            });
        }
        let completeness = profile_completeness(feedback.output_size, profile);
        let issue_impact = issue_impact(&issues);
        let base = (completeness * 0.4 + efficiency * 0.2 + 0.4 - issue_impact).clamp(0.0, 1.0);

        let score = match dimension_score(&feedback.output, &profile.custom_dimensions, &mut issues)
        {
            Some(dims) => (base * 0.8 + dims * 0.2).clamp(0.0, 1.0),
            None => base,
        };

        QualityAssessment {
            overall_score: score,
            completeness,
            accuracy: (1.0 - issue_impact).clamp(0.0, 1.0),
            efficiency,
            relevance: 1.0,
            suggestions: suggestions_for(&issues),
            issues,
            evaluator: "profile".to_string(),
            timestamp: Utc::now(),
        }
    }
}

fn failure_assessment(feedback: &ExecutionFeedback) -> QualityAssessment {
    QualityAssessment {
        overall_score: 0.1,
        completeness: 0.0,
        accuracy: 0.0,
        efficiency: 0.0,
        relevance: 0.0,
        issues: vec![QualityIssue {
            kind: IssueKind::PartialFailure,
            severity: 1.0,
            description: feedback
                .error_message
                .clone()
                .unwrap_or_else(|| "execution failed".to_string()),
        }],
        suggestions: Vec::new(),
        evaluator: "heuristic".to_string(),
        timestamp: Utc::now(),
    }
}

/// Duration buckets: <1 s full marks, then 0.8, 0.6, 0.3.
fn bucket_efficiency(duration: Duration) -> f64 {
    if duration < Duration::from_secs(1) {
        1.0
    } else if duration < Duration::from_secs(5) {
        0.8
    } else if duration < Duration::from_secs(30) {
        0.6
    } else {
        0.3
    }
}

/// Completeness from the name-keyed hints; only undersized output degrades.
fn hint_completeness(tool_name: &str, output_size: usize) -> f64 {
    for hint in HINTS {
        if hint.name_pattern.is_match(tool_name) {
            if output_size < hint.expected_min_bytes {
                return (output_size as f64 / hint.expected_min_bytes as f64).clamp(0.1, 0.9);
            }
            return 1.0;
        }
    }
    1.0
}

fn issue_impact(issues: &[QualityIssue]) -> f64 {
    issues
        .iter()
        .map(|i| i.severity * 0.2)
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

/// Piecewise-linear efficiency against the profile's duration expectations:
/// full marks up to the typical duration, 1.0→0.7 to the expected maximum,
/// 0.7→0.3 to the timeout, 0.1 beyond.
fn profile_efficiency(duration: Duration, profile: &ToolQualityProfile) -> f64 {
    let d = duration.as_secs_f64();
    let acceptable = profile.performance.typical.as_secs_f64();
    let max = profile.performance.expected_max.as_secs_f64();
    let timeout = profile.performance.timeout.as_secs_f64();

    if d <= acceptable {
        1.0
    } else if d <= max {
        let span = (max - acceptable).max(f64::EPSILON);
        1.0 - 0.3 * (d - acceptable) / span
    } else if d <= timeout {
        let span = (timeout - max).max(f64::EPSILON);
        0.7 - 0.4 * (d - max) / span
    } else {
        0.1
    }
}

fn profile_completeness(output_size: usize, profile: &ToolQualityProfile) -> f64 {
    let min = profile.output.min_size;
    let typical = profile.output.typical_size.max(min + 1);
    if output_size >= typical {
        1.0
    } else if output_size >= min {
        0.5 + 0.5 * (output_size - min) as f64 / (typical - min) as f64
    } else if min == 0 {
        1.0
    } else {
        ((output_size as f64 / min as f64) * 0.5).clamp(0.1, 0.5)
    }
}

fn validate_output(
    feedback: &ExecutionFeedback,
    profile: &ToolQualityProfile,
    issues: &mut Vec<QualityIssue>,
) {
    for field in &profile.output.required_fields {
        let present = serde_json::from_str::<serde_json::Value>(&feedback.output)
            .ok()
            .and_then(|v| v.get(field).cloned())
            .is_some();
        if !present {
            issues.push(QualityIssue {
                kind: IssueKind::MissingRequiredField,
                severity: 0.6,
                description: format!("required field `{field}` missing from output"),
            });
        }
    }
    for needle in &profile.output.must_contain {
        if !feedback.output.contains(needle) {
            issues.push(QualityIssue {
                kind: IssueKind::MissingContent,
                severity: 0.5,
                description: format!("expected content `{needle}` not found"),
            });
        }
    }
    for needle in &profile.output.must_not_contain {
        if feedback.output.contains(needle) {
            issues.push(QualityIssue {
                kind: IssueKind::ForbiddenContent,
                severity: 0.6,
                description: format!("forbidden content `{needle}` present"),
            });
        }
    }
    if profile.output.pagination_expected && PAGINATION_RE.is_match(&feedback.output) {
        issues.push(QualityIssue {
            kind: IssueKind::PaginationTruncated,
            severity: 0.6,
            description: "tool truncated instead of paginating".to_string(),
        });
    }
}

/// Weighted custom-dimension score; `None` when the profile defines none.
fn dimension_score(
    output: &str,
    dimensions: &[CustomDimension],
    issues: &mut Vec<QualityIssue>,
) -> Option<f64> {
    if dimensions.is_empty() {
        return None;
    }
    let mut total_weight = 0.0;
    let mut weighted = 0.0;
    for dim in dimensions {
        let value = Regex::new(&dim.pattern)
            .ok()
            .and_then(|re| re.captures(output))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok());
        let score = match value {
            Some(v) if (v - dim.expected_value).abs() <= dim.tolerance => 1.0,
            Some(v) => {
                issues.push(QualityIssue {
                    kind: IssueKind::OffExpectation,
                    severity: dim.weight.min(1.0),
                    description: format!(
                        "dimension `{}` = {v}, expected {} ± {}",
                        dim.name, dim.expected_value, dim.tolerance
                    ),
                });
                0.3
            }
            None => {
                issues.push(QualityIssue {
                    kind: IssueKind::OffExpectation,
                    severity: dim.weight.min(1.0),
                    description: format!("dimension `{}` not found in output", dim.name),
                });
                0.0
            }
        };
        total_weight += dim.weight;
        weighted += score * dim.weight;
    }
    if total_weight <= 0.0 {
        return None;
    }
    Some(weighted / total_weight)
}

/// Suggestions keyed off the issue kinds present, de-duplicated in order.
fn suggestions_for(issues: &[QualityIssue]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for issue in issues {
        for s in issue.kind.suggestions() {
            if !out.iter().any(|existing| existing == s) {
                out.push((*s).to_string());
            }
        }
    }
    out
}
