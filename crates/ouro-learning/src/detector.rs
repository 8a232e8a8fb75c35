//! Aggregation of execution issues into recurring patterns.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use ouro_types::{pattern_confidence, DetectedPattern, ExecutionFeedback, IssueKind};

/// Execution history cap across all tools.
pub const HISTORY_CAP: usize = 1000;

/// Entries discarded when the cap is hit (the oldest tenth).
pub const HISTORY_DRAIN: usize = HISTORY_CAP / 10;

/// Examples kept per pattern.
pub const EXAMPLE_CAP: usize = 5;

#[derive(Default)]
struct DetectorState {
    history: Vec<ExecutionFeedback>,
    patterns: HashMap<(String, IssueKind), DetectedPattern>,
}

/// Keeps a bounded execution history and mines `(tool, issue)` patterns.
#[derive(Default)]
pub struct PatternDetector {
    state: RwLock<DetectorState>,
}

impl PatternDetector {
    /// Create an empty detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one execution into the history and its issues into patterns.
    pub async fn record_execution(&self, feedback: &ExecutionFeedback) {
        let mut state = self.state.write().await;

        state.history.push(feedback.clone());
        if state.history.len() > HISTORY_CAP {
            state.history.drain(..HISTORY_DRAIN);
            debug!(drained = HISTORY_DRAIN, "execution history trimmed");
        }

        let Some(quality) = &feedback.quality else {
            return;
        };
        let now = Utc::now();
        for issue in &quality.issues {
            let key = (feedback.tool_name.clone(), issue.kind);
            let pattern = state.patterns.entry(key).or_insert_with(|| DetectedPattern {
                tool_name: feedback.tool_name.clone(),
                issue_kind: issue.kind,
                occurrences: 0,
                first_seen: now,
                last_seen: now,
                confidence: 0.0,
                examples: Vec::new(),
                suggestions: Vec::new(),
            });
            pattern.occurrences += 1;
            pattern.last_seen = now;
            pattern.confidence = pattern_confidence(pattern.occurrences);
            if pattern.examples.len() < EXAMPLE_CAP {
                pattern.examples.push(issue.description.clone());
            }
            for s in issue.kind.suggestions() {
                if !pattern.suggestions.iter().any(|existing| existing == s) {
                    pattern.suggestions.push((*s).to_string());
                }
            }
        }
    }

    /// Patterns at or above `min_confidence`, across all tools.
    pub async fn patterns(&self, min_confidence: f64) -> Vec<DetectedPattern> {
        let state = self.state.read().await;
        let mut out: Vec<_> = state
            .patterns
            .values()
            .filter(|p| p.confidence >= min_confidence)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        out
    }

    /// All patterns for one tool.
    pub async fn tool_patterns(&self, tool_name: &str) -> Vec<DetectedPattern> {
        let state = self.state.read().await;
        let mut out: Vec<_> = state
            .patterns
            .values()
            .filter(|p| p.tool_name == tool_name)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        out
    }

    /// Most recent feedback entries for one tool, newest last.
    pub async fn tool_history(&self, tool_name: &str, limit: usize) -> Vec<ExecutionFeedback> {
        let state = self.state.read().await;
        let matching: Vec<_> = state
            .history
            .iter()
            .filter(|f| f.tool_name == tool_name)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).collect()
    }

    /// Current history length, across all tools.
    pub async fn history_len(&self) -> usize {
        self.state.read().await.history.len()
    }
}
