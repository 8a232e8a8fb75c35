//! Persisted per-tool learnings and their kernel fact projection.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use ouro_kernel_core::{Fact, FactArg};
use ouro_types::{DetectedPattern, ExecutionFeedback, Filesystem, ToolLearning};
use ouro_types::learning::ANTI_PATTERN_CONFIDENCE;

/// File the learning map is persisted into, under the learnings directory.
pub const LEARNINGS_FILE: &str = "tool_learnings.json";

/// Persisted map of per-tool learnings.
///
/// Updates are serialized per store; the whole map is rewritten atomically
/// (write-temp + rename) on every recorded learning.
pub struct LearningStore {
    path: PathBuf,
    fs: Arc<dyn Filesystem>,
    learnings: RwLock<HashMap<String, ToolLearning>>,
}

impl LearningStore {
    /// Open the store, loading any existing file from `learnings_dir`.
    pub async fn open(learnings_dir: &std::path::Path, fs: Arc<dyn Filesystem>) -> Result<Self> {
        let path = learnings_dir.join(LEARNINGS_FILE);
        let learnings = if fs.exists(&path).await {
            let raw = fs.read_file(&path).await?;
            match serde_json::from_slice(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "learnings file unreadable, starting empty");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };
        debug!(count = learnings.len(), "learning store opened");
        Ok(Self {
            path,
            fs,
            learnings: RwLock::new(learnings),
        })
    }

    /// Fold one execution and the tool's current patterns into its learning,
    /// then persist the whole map.
    pub async fn record_learning(
        &self,
        tool_name: &str,
        feedback: &ExecutionFeedback,
        patterns: &[DetectedPattern],
    ) -> Result<ToolLearning> {
        let (learning, snapshot) = {
            let mut learnings = self.learnings.write().await;
            let learning = learnings
                .entry(tool_name.to_string())
                .or_insert_with(|| ToolLearning::new(tool_name));

            let quality_score = feedback.quality.as_ref().map(|q| q.overall_score);
            learning.record(feedback.success, quality_score);

            if let Some(quality) = &feedback.quality {
                for issue in &quality.issues {
                    let kind = issue.kind.as_str().to_string();
                    if !learning.known_issues.contains(&kind) {
                        learning.known_issues.push(kind);
                    }
                }
                learning.known_issues.sort();
            }
            for pattern in patterns {
                if pattern.confidence > ANTI_PATTERN_CONFIDENCE {
                    let id = pattern.id();
                    if !learning.anti_patterns.contains(&id) {
                        learning.anti_patterns.push(id);
                    }
                }
            }
            (learning.clone(), learnings.clone())
        };
        self.persist(&snapshot).await?;
        Ok(learning)
    }

    /// Learning for one tool.
    pub async fn get_learning(&self, tool_name: &str) -> Option<ToolLearning> {
        self.learnings.read().await.get(tool_name).cloned()
    }

    /// All learnings, sorted by tool name.
    pub async fn all_learnings(&self) -> Vec<ToolLearning> {
        let mut out: Vec<_> = self.learnings.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
        out
    }

    /// Facts mirroring the current learnings: one `tool_learning` per tool
    /// plus one `tool_known_issue` per known issue kind.
    ///
    /// Rates are formatted to two decimals; the kernel's argument tuple
    /// carries strings, booleans, and integers only.
    pub async fn generate_mangle_facts(&self) -> Vec<Fact> {
        let mut facts = Vec::new();
        for learning in self.all_learnings().await {
            facts.push(Fact::new(
                "tool_learning",
                vec![
                    FactArg::from(learning.tool_name.clone()),
                    FactArg::Int(learning.total_executions as i64),
                    FactArg::from(format!("{:.2}", learning.success_rate)),
                    FactArg::from(format!("{:.2}", learning.average_quality)),
                ],
            ));
            for issue in &learning.known_issues {
                facts.push(Fact::new(
                    "tool_known_issue",
                    vec![
                        FactArg::from(learning.tool_name.clone()),
                        FactArg::from(issue.clone()),
                    ],
                ));
            }
        }
        facts
    }

    async fn persist(&self, snapshot: &HashMap<String, ToolLearning>) -> Result<()> {
        let blob = serde_json::to_vec_pretty(snapshot)?;
        self.fs.replace_file(&self.path, &blob).await
    }
}

/// Render accumulated learnings as a prompt fragment for the generator.
///
/// Components read this context, never write it; the orchestrator rebuilds
/// it from `all_learnings` on demand.
pub fn render_learnings_context(learnings: &[ToolLearning]) -> String {
    if learnings.is_empty() {
        return String::new();
    }
    let mut out = String::from("Accumulated learnings from previously generated tools:\n");
    for l in learnings {
        out.push_str(&format!(
            "- {}: {} executions, {:.0}% success, avg quality {:.2}",
            l.tool_name,
            l.total_executions,
            l.success_rate * 100.0,
            l.average_quality
        ));
        if !l.known_issues.is_empty() {
            out.push_str(&format!("; known issues: {}", l.known_issues.join(", ")));
        }
        if !l.anti_patterns.is_empty() {
            out.push_str(&format!("; avoid: {}", l.anti_patterns.join(", ")));
        }
        out.push('\n');
    }
    out
}
