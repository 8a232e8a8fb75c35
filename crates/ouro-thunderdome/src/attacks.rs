//! Attack input generation: model-driven with a fixed heuristic battery.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use ouro_llm::{extract_json, LanguageModel};

/// Family an attack input belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackCategory {
    /// Empty / absent input.
    NilInput,
    /// Input near or past the size cap.
    Oversized,
    /// Syntactically broken structured input.
    MalformedJson,
    /// Pathologically nested structure.
    DeepNesting,
    /// Unicode edge cases and direction overrides.
    UnicodeBoundary,
    /// Raw control bytes.
    ControlBytes,
    /// Numbers that overflow native widths.
    NumericOverflow,
    /// Inputs whose newlines must survive the pipe.
    Newlines,
    /// Supplied by the language model.
    ModelGenerated,
}

/// One adversarial input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackInput {
    /// Attack family.
    pub category: AttackCategory,
    /// Bytes delivered on standard input.
    pub payload: String,
    /// What the attack probes for.
    pub description: String,
}

const ATTACK_SYSTEM_PROMPT: &str = "\
You design adversarial inputs for a tool that reads a string from standard \
input. Given its source, reply with a JSON array of up to 8 strings, each an \
input likely to crash, hang, or exhaust the tool.";

/// Generates attack inputs for a tool source.
pub struct PanicMaker {
    model: Arc<dyn LanguageModel>,
    max_attacks: usize,
}

impl PanicMaker {
    /// Build an attack generator bounded at `max_attacks` inputs.
    pub fn new(model: Arc<dyn LanguageModel>, max_attacks: usize) -> Self {
        Self { model, max_attacks }
    }

    /// Generate a bounded attack set for `source`.
    ///
    /// Asks the model first; on failure or unusable output the fixed
    /// heuristic battery stands in. The result never exceeds the bound.
    pub async fn generate_attacks(&self, source: &str) -> Vec<AttackInput> {
        let mut attacks = match self.model_attacks(source).await {
            Some(model_attacks) if !model_attacks.is_empty() => model_attacks,
            _ => {
                debug!("falling back to the heuristic attack battery");
                Vec::new()
            }
        };
        // The battery always runs; model attacks come on top of it.
        attacks.extend(heuristic_battery());
        attacks.truncate(self.max_attacks.max(1));
        attacks
    }

    async fn model_attacks(&self, source: &str) -> Option<Vec<AttackInput>> {
        let reply = self
            .model
            .complete_with_system(ATTACK_SYSTEM_PROMPT, source)
            .await
            .ok()?;
        let json = extract_json(&reply)?;
        let payloads: Vec<String> = serde_json::from_str(json).ok()?;
        Some(
            payloads
                .into_iter()
                .map(|payload| AttackInput {
                    category: AttackCategory::ModelGenerated,
                    payload,
                    description: "model-proposed adversarial input".to_string(),
                })
                .collect(),
        )
    }
}

/// The fixed battery run against every tool.
pub fn heuristic_battery() -> Vec<AttackInput> {
    let mut rng = rand::thread_rng();
    let oversized_len = 1 << 20;
    let mut oversized = "x".repeat(oversized_len);
    // A random tail defeats tools that special-case uniform padding.
    for _ in 0..64 {
        oversized.push(rng.gen_range('a'..='z'));
    }

    vec![
        AttackInput {
            category: AttackCategory::NilInput,
            payload: String::new(),
            description: "empty input".to_string(),
        },
        AttackInput {
            category: AttackCategory::Oversized,
            payload: oversized,
            description: "one-mebibyte input".to_string(),
        },
        AttackInput {
            category: AttackCategory::MalformedJson,
            payload: r#"{"unclosed": [1, 2"#.to_string(),
            description: "truncated JSON document".to_string(),
        },
        AttackInput {
            category: AttackCategory::DeepNesting,
            payload: "[".repeat(10_000),
            description: "ten thousand unclosed brackets".to_string(),
        },
        AttackInput {
            category: AttackCategory::UnicodeBoundary,
            payload: "\u{FFFF}\u{10FFFF}\u{202E}reversed\u{202C} 🦀".to_string(),
            description: "unicode boundary and direction override".to_string(),
        },
        AttackInput {
            category: AttackCategory::ControlBytes,
            payload: "\u{0}\u{1}\u{7}\u{1b}[31mred\u{7f}".to_string(),
            description: "raw control bytes".to_string(),
        },
        AttackInput {
            category: AttackCategory::NumericOverflow,
            payload: "999999999999999999999999999999".to_string(),
            description: "number past every native width".to_string(),
        },
        AttackInput {
            category: AttackCategory::Newlines,
            payload: "line one\nline two\r\nline three\n\n".to_string(),
            description: "mixed newlines that must survive the pipe".to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ouro_llm::MockModel;

    #[tokio::test]
    async fn failing_model_yields_the_battery() {
        let maker = PanicMaker::new(Arc::new(MockModel::failing()), 8);
        let attacks = maker.generate_attacks("pub fn t() {}").await;
        assert_eq!(attacks.len(), 8);
        assert_eq!(attacks[0].category, AttackCategory::NilInput);
        assert!(attacks
            .iter()
            .any(|a| a.category == AttackCategory::Newlines));
    }

    #[tokio::test]
    async fn model_attacks_come_first_and_bound_holds() {
        let model = MockModel::completing(r#"[" boom", "{{{{"]"#);
        let maker = PanicMaker::new(Arc::new(model), 4);
        let attacks = maker.generate_attacks("pub fn t() {}").await;
        assert_eq!(attacks.len(), 4);
        assert_eq!(attacks[0].category, AttackCategory::ModelGenerated);
        assert_eq!(attacks[1].category, AttackCategory::ModelGenerated);
        assert_eq!(attacks[2].category, AttackCategory::NilInput);
    }

    #[tokio::test]
    async fn unusable_model_reply_falls_back() {
        let model = MockModel::completing("I refuse to answer with JSON");
        let maker = PanicMaker::new(Arc::new(model), 3);
        let attacks = maker.generate_attacks("pub fn t() {}").await;
        assert_eq!(attacks.len(), 3);
        assert_eq!(attacks[0].category, AttackCategory::NilInput);
    }

    #[test]
    fn battery_covers_the_documented_categories() {
        let battery = heuristic_battery();
        for category in [
            AttackCategory::NilInput,
            AttackCategory::Oversized,
            AttackCategory::MalformedJson,
            AttackCategory::DeepNesting,
            AttackCategory::UnicodeBoundary,
            AttackCategory::ControlBytes,
            AttackCategory::NumericOverflow,
            AttackCategory::Newlines,
        ] {
            assert!(battery.iter().any(|a| a.category == category));
        }
    }
}
