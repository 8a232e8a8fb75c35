//! Capability-gap detection and tool-need classification.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use ouro_types::{ToolCategory, ToolNeed};

/// Confidence of a heuristic need when the model is unavailable.
pub const HEURISTIC_CONFIDENCE: f64 = 0.4;

static GAP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bneed (a |an |some )?(new )?tool\b",
        r"(?i)\bno (existing |such )?tool (for|to|can)\b",
        r"(?i)\bcan'?t (do|find|handle|parse|convert)\b",
        r"(?i)\bwish (i|we) (could|had)\b",
        r"(?i)\b(generate|create|build) (a |an )?tool\b",
        r"(?i)\bmissing (a |the )?capability\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

static CATEGORY_PATTERNS: Lazy<Vec<(Regex, ToolCategory)>> = Lazy::new(|| {
    [
        (r"(?i)validat|verify|check", ToolCategory::Validator),
        (r"(?i)convert|transform|translate|encode|decode", ToolCategory::Converter),
        (r"(?i)pars|extract", ToolCategory::Parser),
        (r"(?i)analy|inspect|measure|count", ToolCategory::Analyzer),
        (r"(?i)format|pretty|beautif|indent", ToolCategory::Formatter),
    ]
    .iter()
    .map(|(p, c)| (Regex::new(p).expect("static regex"), *c))
    .collect()
});

/// Whether `input` matches a capability-gap pattern.
pub fn matches_gap(input: &str) -> Option<String> {
    GAP_PATTERNS
        .iter()
        .find_map(|re| re.find(input))
        .map(|m| m.as_str().to_string())
}

/// Classify the tool category out of the request text.
pub fn classify(input: &str) -> ToolCategory {
    CATEGORY_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(input))
        .map(|(_, category)| *category)
        .unwrap_or(ToolCategory::Utility)
}

/// Derive a snake_case tool name from the request text.
///
/// Prefers the verb phrase after "tool to/for/that"; falls back to the first
/// few content words.
pub fn derive_name(input: &str) -> String {
    static PHRASE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)tool (?:to|for|that) ([a-z0-9 _-]+)").expect("static regex"));
    let source = PHRASE
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| input.to_string());

    let words: Vec<String> = source
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .filter(|w| !is_stopword(w))
        .take(4)
        .collect();

    let mut name = words.join("_");
    if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        name = format!("tool_{name}");
    }
    name
}

fn is_stopword(word: &str) -> bool {
    matches!(
        word,
        "a" | "an" | "the" | "i" | "we" | "my" | "our" | "need" | "want" | "please" | "tool"
            | "to" | "for" | "that" | "of" | "and" | "with" | "some" | "new"
    )
}

/// Build the heuristic fallback need out of a request.
pub fn heuristic_need(input: &str, trigger: String, failed_attempt: Option<&str>) -> ToolNeed {
    let category = classify(input);
    let mut triggers = vec![trigger];
    if let Some(attempt) = failed_attempt {
        triggers.push(format!("previous attempt failed: {attempt}"));
    }
    ToolNeed {
        name: derive_name(input),
        purpose: input.trim().to_string(),
        input_type: "string".to_string(),
        output_type: "string".to_string(),
        triggers,
        priority: 0.5,
        confidence: HEURISTIC_CONFIDENCE,
        reasoning: "heuristic gap detection".to_string(),
        category,
    }
}

/// Shape of the JSON a model returns when refining a detected need.
#[derive(Debug, Deserialize)]
pub struct RefinedNeed {
    /// Refined snake_case name.
    pub name: Option<String>,
    /// Refined purpose.
    pub purpose: Option<String>,
    /// Refined input descriptor.
    pub input_type: Option<String>,
    /// Refined output descriptor.
    pub output_type: Option<String>,
    /// Refined priority.
    pub priority: Option<f64>,
    /// Refined confidence.
    pub confidence: Option<f64>,
    /// Model reasoning.
    pub reasoning: Option<String>,
}

impl RefinedNeed {
    /// Merge the refinement onto the heuristic baseline.
    pub fn apply(self, mut need: ToolNeed) -> ToolNeed {
        if let Some(name) = self.name {
            let candidate = ToolNeed {
                name: name.clone(),
                ..need.clone()
            };
            if candidate.validate().is_ok() {
                need.name = name;
            } else {
                debug!(%name, "model-proposed tool name rejected");
            }
        }
        if let Some(p) = self.purpose {
            need.purpose = p;
        }
        if let Some(t) = self.input_type {
            need.input_type = t;
        }
        if let Some(t) = self.output_type {
            need.output_type = t;
        }
        if let Some(p) = self.priority {
            need.priority = p.clamp(0.0, 1.0);
        }
        if let Some(c) = self.confidence {
            need.confidence = c.clamp(0.0, 1.0);
        }
        if let Some(r) = self.reasoning {
            need.reasoning = r;
        }
        need
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_patterns_match_tool_requests() {
        assert!(matches_gap("I need a tool to pretty-print JSON").is_some());
        assert!(matches_gap("there is no tool for counting lines").is_some());
        assert!(matches_gap("please build a tool that validates YAML").is_some());
        assert!(matches_gap("what is the weather today").is_none());
    }

    #[test]
    fn categories_follow_keywords() {
        assert_eq!(classify("validate email addresses"), ToolCategory::Validator);
        assert_eq!(classify("convert csv to json"), ToolCategory::Converter);
        assert_eq!(classify("parse the changelog"), ToolCategory::Parser);
        assert_eq!(classify("analyze log volume"), ToolCategory::Analyzer);
        assert_eq!(classify("pretty-print this"), ToolCategory::Formatter);
        assert_eq!(classify("do the thing"), ToolCategory::Utility);
    }

    #[test]
    fn derived_names_are_snake_case() {
        let name = derive_name("I need a tool to pretty-print JSON documents");
        assert_eq!(name, "pretty_print_json_documents");
        let need = heuristic_need("I need a tool to pretty-print JSON documents", "t".into(), None);
        assert!(need.validate().is_ok());
    }

    #[test]
    fn name_falls_back_to_content_words() {
        let name = derive_name("need a tool: CSV summarizer!");
        assert!(name.starts_with("csv") || name.starts_with("tool_"));
        assert!(!name.contains(' '));
    }

    #[test]
    fn heuristic_need_records_failed_attempt_trigger() {
        let need = heuristic_need(
            "I need a tool to parse dates",
            "matched: need a tool".to_string(),
            Some("exit status 1"),
        );
        assert_eq!(need.confidence, HEURISTIC_CONFIDENCE);
        assert_eq!(need.triggers.len(), 2);
        assert!(need.has_strong_evidence());
        assert_eq!(need.category, ToolCategory::Parser);
    }

    #[test]
    fn refinement_merges_and_clamps() {
        let base = heuristic_need("need a tool to parse dates", "t".into(), None);
        let refined = RefinedNeed {
            name: Some("date_parser".to_string()),
            purpose: None,
            input_type: Some("string".to_string()),
            output_type: Some("json".to_string()),
            priority: Some(1.7),
            confidence: Some(0.85),
            reasoning: Some("clear request".to_string()),
        };
        let need = refined.apply(base);
        assert_eq!(need.name, "date_parser");
        assert_eq!(need.priority, 1.0);
        assert_eq!(need.confidence, 0.85);
        assert_eq!(need.output_type, "json");
    }

    #[test]
    fn invalid_model_name_is_ignored() {
        let base = heuristic_need("need a tool to parse dates", "t".into(), None);
        let original_name = base.name.clone();
        let refined = RefinedNeed {
            name: Some("Bad Name!".to_string()),
            purpose: None,
            input_type: None,
            output_type: None,
            priority: None,
            confidence: None,
            reasoning: None,
        };
        assert_eq!(refined.apply(base).name, original_name);
    }
}
