//! Narrow surfaces to external collaborators.
//!
//! Complexity and persistence analysis, agent spec writing, reasoning traces,
//! and campaign starts belong to other subsystems; the orchestrator consumes
//! them through these traits. The default implementations are the heuristic
//! path used when no richer collaborator is attached.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use ouro_types::{
    AgentSpec, CampaignRequest, ComplexityAssessment, Filesystem, PersistenceAssessment,
};

//─────────────────────────────
//  Request analyzers
//─────────────────────────────

/// Estimates how complex a request is.
pub trait ComplexityAnalyzer: Send + Sync {
    /// Assess `request` against `target`.
    fn analyze(&self, request: &str, target: &str) -> ComplexityAssessment;
}

/// Decides whether a request describes recurring work.
pub trait PersistenceAnalyzer: Send + Sync {
    /// Assess `request`.
    fn analyze(&self, request: &str) -> PersistenceAssessment;
}

/// Keyword-driven complexity estimate.
#[derive(Debug, Default, Clone)]
pub struct HeuristicComplexity;

impl ComplexityAnalyzer for HeuristicComplexity {
    fn analyze(&self, request: &str, target: &str) -> ComplexityAssessment {
        let lower = request.to_lowercase();
        let mut score: f64 = 0.2;
        score += (request.len() as f64 / 1000.0).min(0.2);
        for keyword in ["refactor", "migrate", "every", "all ", "entire", "across"] {
            if lower.contains(keyword) {
                score += 0.15;
            }
        }
        ComplexityAssessment {
            score: score.min(1.0),
            element_count: 0,
            file_count: 0,
            summary: format!("heuristic estimate for target {target}"),
        }
    }
}

/// Keyword-driven persistence estimate.
#[derive(Debug, Default, Clone)]
pub struct HeuristicPersistence;

impl PersistenceAnalyzer for HeuristicPersistence {
    fn analyze(&self, request: &str) -> PersistenceAssessment {
        let lower = request.to_lowercase();
        let persistent = [
            "every time",
            "always",
            "whenever",
            "daily",
            "weekly",
            "keep ",
            "monitor",
            "watch for",
        ]
        .iter()
        .any(|k| lower.contains(k));
        PersistenceAssessment {
            persistent,
            reasoning: if persistent {
                "request describes recurring work".to_string()
            } else {
                "one-shot request".to_string()
            },
        }
    }
}

//─────────────────────────────
//  Agent spec writer
//─────────────────────────────

/// Writes persistent-agent specs to disk; the spec format belongs to the
/// agent subsystem, the orchestrator only fills blueprints in.
#[async_trait]
pub trait AgentSpecWriter: Send + Sync {
    /// Persist `spec` and return where it landed.
    async fn write_spec(&self, spec: &AgentSpec) -> Result<PathBuf>;
}

/// Default writer: one YAML file per agent under the agents directory.
pub struct YamlAgentSpecWriter {
    agents_dir: PathBuf,
    fs: Arc<dyn Filesystem>,
}

impl YamlAgentSpecWriter {
    /// Build a writer rooted at `agents_dir`.
    pub fn new(agents_dir: PathBuf, fs: Arc<dyn Filesystem>) -> Self {
        Self { agents_dir, fs }
    }
}

#[async_trait]
impl AgentSpecWriter for YamlAgentSpecWriter {
    async fn write_spec(&self, spec: &AgentSpec) -> Result<PathBuf> {
        let path = self.agents_dir.join(&spec.name).join("spec.yaml");
        let body = serde_yaml::to_string(spec)?;
        self.fs.write_file(&path, body.as_bytes()).await?;
        debug!(agent = %spec.name, path = %path.display(), "agent spec written");
        Ok(path)
    }
}

//─────────────────────────────
//  Trace recorder and campaign delegate
//─────────────────────────────

/// Reasoning-trace sink; recording is fire-and-forget.
pub trait TraceRecorder: Send + Sync {
    /// Record one trace event.
    fn record(&self, phase: &str, detail: &str);
}

/// Default recorder: drops everything.
#[derive(Debug, Default, Clone)]
pub struct NoopTraceRecorder;

impl TraceRecorder for NoopTraceRecorder {
    fn record(&self, _phase: &str, _detail: &str) {}
}

/// Campaign starts are delegated out of the core entirely.
#[async_trait]
pub trait CampaignDelegate: Send + Sync {
    /// Hand the campaign to its owner.
    async fn start_campaign(&self, request: &CampaignRequest) -> Result<()>;
}
