//! Feedback-driven tool refinement.

use serde::{Deserialize, Serialize};
use tracing::debug;

use ouro_llm::{extract_code_block, extract_json};
use ouro_types::{DetectedPattern, ExecutionFeedback, ToolLearning};

/// Executions required before refinement is ever considered.
pub const MIN_EXECUTIONS_FOR_REFINEMENT: u64 = 3;

/// Average quality below which refinement triggers unconditionally.
pub const LOW_QUALITY_THRESHOLD: f64 = 0.5;

/// Pattern confidence that makes its suggestions actionable.
pub const ACTIONABLE_CONFIDENCE: f64 = 0.7;

/// Example feedbacks embedded into the refinement prompt.
pub const MAX_EXAMPLE_FEEDBACKS: usize = 3;

/// System prompt for refinement calls.
pub const REFINE_SYSTEM_PROMPT: &str = "\
You improve an existing Rust tool using observed execution feedback. Focus \
on: pagination over truncation, sensible limits, retries on transient \
failures, error handling on every fallible call, and input validation. Keep \
the entry function signature unchanged. Reply with a single JSON object: \
{\"improved_code\": \"...\", \"changes\": [\"...\"], \"expected_gain\": 0.2, \
\"test_cases\": [\"...\"]}.";

/// Outcome of a refinement call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementResult {
    /// The rewritten tool source.
    pub improved_code: String,
    /// What changed, in the model's words.
    #[serde(default)]
    pub changes: Vec<String>,
    /// Predicted quality gain in [0, 1].
    #[serde(default)]
    pub expected_gain: f64,
    /// Test inputs the model suggests exercising.
    #[serde(default)]
    pub test_cases: Vec<String>,
}

/// Decide whether a tool should be refined, and with which suggestions.
///
/// Never before three recorded executions; then either degraded average
/// quality, or known issues backed by a high-confidence pattern that carries
/// suggestions.
pub fn should_refine(
    learning: Option<&ToolLearning>,
    patterns: &[DetectedPattern],
) -> (bool, Vec<String>) {
    let Some(learning) = learning else {
        return (false, Vec::new());
    };
    if learning.total_executions < MIN_EXECUTIONS_FOR_REFINEMENT {
        return (false, Vec::new());
    }

    if learning.average_quality < LOW_QUALITY_THRESHOLD {
        let mut suggestions: Vec<String> = Vec::new();
        for pattern in patterns {
            for s in &pattern.suggestions {
                if !suggestions.contains(s) {
                    suggestions.push(s.clone());
                }
            }
        }
        return (true, suggestions);
    }

    if !learning.known_issues.is_empty() {
        let actionable: Vec<String> = patterns
            .iter()
            .filter(|p| p.confidence > ACTIONABLE_CONFIDENCE && !p.suggestions.is_empty())
            .flat_map(|p| p.suggestions.iter().cloned())
            .collect();
        if !actionable.is_empty() {
            let mut deduped = Vec::new();
            for s in actionable {
                if !deduped.contains(&s) {
                    deduped.push(s);
                }
            }
            return (true, deduped);
        }
    }

    (false, Vec::new())
}

/// Build the refinement user prompt.
pub fn refinement_prompt(
    tool_name: &str,
    original_code: &str,
    examples: &[ExecutionFeedback],
    patterns: &[DetectedPattern],
    suggestions: &[String],
) -> String {
    let mut prompt = format!(
        "Improve the tool `{tool_name}`.\n\nOriginal code:\n```rust\n{original_code}\n```\n"
    );

    if !examples.is_empty() {
        prompt.push_str("\nRecent executions:\n");
        for fb in examples.iter().take(MAX_EXAMPLE_FEEDBACKS) {
            prompt.push_str(&format!(
                "- success={}, duration={:?}, output_size={}",
                fb.success, fb.duration, fb.output_size
            ));
            if let Some(quality) = &fb.quality {
                for issue in &quality.issues {
                    prompt.push_str(&format!("; issue[{}]: {}", issue.kind, issue.description));
                }
            }
            prompt.push('\n');
        }
    }

    if !patterns.is_empty() {
        prompt.push_str("\nRecurring patterns:\n");
        for p in patterns {
            prompt.push_str(&format!(
                "- {} (seen {} times, confidence {:.1})\n",
                p.issue_kind, p.occurrences, p.confidence
            ));
        }
    }

    if !suggestions.is_empty() {
        prompt.push_str(&format!("\nApply these suggestions: {}\n", suggestions.join(", ")));
    }
    prompt
}

/// Parse a refinement reply: the JSON object first, a bare code block as the
/// fallback when the model ignored the format.
pub fn parse_refinement(reply: &str) -> Option<RefinementResult> {
    if let Some(json) = extract_json(reply) {
        if let Ok(result) = serde_json::from_str::<RefinementResult>(json) {
            if !result.improved_code.trim().is_empty() {
                return Some(result);
            }
        }
    }
    debug!("refinement reply was not the expected JSON, extracting code block");
    let code = extract_code_block(reply);
    if code.trim().is_empty() {
        return None;
    }
    Some(RefinementResult {
        improved_code: code,
        changes: Vec::new(),
        expected_gain: 0.0,
        test_cases: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ouro_types::{pattern_confidence, IssueKind};

    fn learning(executions: u64, avg_quality: f64, issues: Vec<&str>) -> ToolLearning {
        let mut l = ToolLearning::new("t");
        l.total_executions = executions;
        l.average_quality = avg_quality;
        l.known_issues = issues.into_iter().map(String::from).collect();
        l
    }

    fn pattern(kind: IssueKind, occurrences: u32, suggestions: Vec<&str>) -> DetectedPattern {
        DetectedPattern {
            tool_name: "t".to_string(),
            issue_kind: kind,
            occurrences,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            confidence: pattern_confidence(occurrences),
            examples: vec![],
            suggestions: suggestions.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn never_refines_under_three_executions() {
        let l = learning(2, 0.1, vec!["slow"]);
        let p = vec![pattern(IssueKind::Slow, 9, vec!["caching"])];
        assert_eq!(should_refine(Some(&l), &p), (false, vec![]));
        assert_eq!(should_refine(None, &p), (false, vec![]));
    }

    #[test]
    fn low_quality_triggers_with_all_pattern_suggestions() {
        let l = learning(3, 0.4, vec![]);
        let p = vec![
            pattern(IssueKind::Slow, 2, vec!["caching"]),
            pattern(IssueKind::RateLimited, 1, vec!["add-retry"]),
        ];
        let (refine, suggestions) = should_refine(Some(&l), &p);
        assert!(refine);
        assert_eq!(suggestions, vec!["caching", "add-retry"]);
    }

    #[test]
    fn known_issues_need_a_high_confidence_pattern() {
        let l = learning(5, 0.8, vec!["rate_limited"]);
        let weak = vec![pattern(IssueKind::RateLimited, 2, vec!["add-retry"])];
        assert_eq!(should_refine(Some(&l), &weak), (false, vec![]));

        let strong = vec![pattern(IssueKind::RateLimited, 6, vec!["add-retry"])];
        let (refine, suggestions) = should_refine(Some(&l), &strong);
        assert!(refine);
        assert_eq!(suggestions, vec!["add-retry"]);
    }

    #[test]
    fn healthy_tool_is_left_alone() {
        let l = learning(10, 0.9, vec![]);
        assert_eq!(should_refine(Some(&l), &[]), (false, vec![]));
    }

    #[test]
    fn refinement_json_parses() {
        let reply = r#"Here you go: {"improved_code": "pub fn t() {}", "changes": ["added retry"], "expected_gain": 0.25, "test_cases": ["x"]}"#;
        let result = parse_refinement(reply).unwrap();
        assert_eq!(result.improved_code, "pub fn t() {}");
        assert_eq!(result.changes, vec!["added retry"]);
        assert!((result.expected_gain - 0.25).abs() < 1e-9);
    }

    #[test]
    fn bare_code_block_is_the_fallback() {
        let reply = "Sure:\n```rust\npub fn improved() {}\n```";
        let result = parse_refinement(reply).unwrap();
        assert_eq!(result.improved_code, "pub fn improved() {}");
        assert!(result.changes.is_empty());
    }

    #[test]
    fn useless_reply_yields_none() {
        assert!(parse_refinement("").is_none());
        assert!(parse_refinement("   ").is_none());
    }

    #[test]
    fn prompt_embeds_code_examples_and_patterns() {
        use std::time::Duration;
        let mut fb = ExecutionFeedback::completed("t", "e", "in", "out", Duration::from_secs(1));
        fb.success = false;
        let prompt = refinement_prompt(
            "t",
            "pub fn t() {}",
            &[fb],
            &[pattern(IssueKind::Slow, 4, vec!["caching"])],
            &["caching".to_string()],
        );
        assert!(prompt.contains("pub fn t() {}"));
        assert!(prompt.contains("success=false"));
        assert!(prompt.contains("slow"));
        assert!(prompt.contains("Apply these suggestions: caching"));
    }
}
