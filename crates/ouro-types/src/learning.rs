//! Recurring defect patterns and persisted per-tool learnings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quality::IssueKind;

/// Confidence as a pure function of how often a pattern has been observed.
pub fn pattern_confidence(occurrences: u32) -> f64 {
    match occurrences {
        0 | 1 => 0.3,
        2 => 0.5,
        3 | 4 => 0.7,
        _ => 0.9,
    }
}

/// Confidence above which a pattern counts as an anti-pattern.
pub const ANTI_PATTERN_CONFIDENCE: f64 = 0.7;

/// A recurring issue observed across executions of one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    /// Tool the pattern belongs to.
    pub tool_name: String,
    /// Issue kind forming the pattern key together with the tool name.
    pub issue_kind: IssueKind,
    /// Times the issue has been observed.
    pub occurrences: u32,
    /// First observation.
    pub first_seen: DateTime<Utc>,
    /// Most recent observation.
    pub last_seen: DateTime<Utc>,
    /// Confidence derived from `occurrences`.
    pub confidence: f64,
    /// Bounded example descriptions.
    pub examples: Vec<String>,
    /// Merged, de-duplicated suggestions.
    pub suggestions: Vec<String>,
}

impl DetectedPattern {
    /// Stable identifier, used for anti-pattern bookkeeping.
    pub fn id(&self) -> String {
        format!("{}:{}", self.tool_name, self.issue_kind.as_str())
    }
}

/// Persisted accumulated knowledge about one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolLearning {
    /// Tool the learning describes.
    pub tool_name: String,
    /// Executions recorded so far.
    pub total_executions: u64,
    /// Running mean of per-execution success booleans.
    pub success_rate: f64,
    /// Running mean of per-execution quality scores.
    pub average_quality: f64,
    /// De-duplicated issue kinds ever observed.
    pub known_issues: Vec<String>,
    /// De-duplicated ids of high-confidence patterns.
    pub anti_patterns: Vec<String>,
    /// When the learning was created.
    pub created_at: DateTime<Utc>,
    /// When the learning last changed.
    pub updated_at: DateTime<Utc>,
}

impl ToolLearning {
    /// Fresh learning for a tool with no recorded executions.
    pub fn new(tool_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            tool_name: tool_name.into(),
            total_executions: 0,
            success_rate: 0.0,
            average_quality: 0.0,
            known_issues: Vec::new(),
            anti_patterns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold one execution into the running means.
    pub fn record(&mut self, success: bool, quality_score: Option<f64>) {
        let n = self.total_executions as f64;
        self.success_rate =
            (self.success_rate * n + if success { 1.0 } else { 0.0 }) / (n + 1.0);
        if let Some(score) = quality_score {
            self.average_quality = (self.average_quality * n + score) / (n + 1.0);
        } else {
            self.average_quality = self.average_quality * n / (n + 1.0);
        }
        self.total_executions += 1;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_steps_match_occurrences() {
        assert_eq!(pattern_confidence(1), 0.3);
        assert_eq!(pattern_confidence(2), 0.5);
        assert_eq!(pattern_confidence(3), 0.7);
        assert_eq!(pattern_confidence(4), 0.7);
        assert_eq!(pattern_confidence(5), 0.9);
        assert_eq!(pattern_confidence(50), 0.9);
    }

    #[test]
    fn learning_running_means() {
        let mut l = ToolLearning::new("t");
        l.record(true, Some(0.8));
        l.record(false, Some(0.2));
        l.record(true, Some(0.5));
        assert_eq!(l.total_executions, 3);
        assert!((l.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((l.average_quality - 0.5).abs() < 1e-9);
    }

    #[test]
    fn missing_quality_counts_as_zero() {
        let mut l = ToolLearning::new("t");
        l.record(true, Some(1.0));
        l.record(true, None);
        assert!((l.average_quality - 0.5).abs() < 1e-9);
    }

    #[test]
    fn pattern_id_is_tool_and_kind() {
        let p = DetectedPattern {
            tool_name: "fetcher".to_string(),
            issue_kind: IssueKind::RateLimited,
            occurrences: 2,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            confidence: pattern_confidence(2),
            examples: vec![],
            suggestions: vec![],
        };
        assert_eq!(p.id(), "fetcher:rate_limited");
    }
}
