//! Runtime configuration for the Ouroboros core.
//!
//! `CoreConfig` carries every tunable the orchestrator consults: on-disk
//! roots, admission thresholds, session caps, subprocess deadlines, and the
//! adversarial-harness parameters. Defaults match the documented behavior;
//! `validate` fails fast on unusable values so configuration errors surface
//! at startup rather than mid-pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration failure raised at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configured directory path is empty or otherwise unusable.
    #[error("invalid directory for {role}: {path:?}")]
    InvalidDirectory {
        /// Which root the path was meant to serve.
        role: &'static str,
        /// The offending path.
        path: PathBuf,
    },
    /// A threshold fell outside its documented range.
    #[error("{name} out of range: {value} not in [0, 1]")]
    ThresholdOutOfRange {
        /// Option name.
        name: &'static str,
        /// The offending value.
        value: f64,
    },
    /// The configuration file could not be read or parsed.
    #[error("failed to load configuration from {path:?}: {reason}")]
    Unloadable {
        /// File the configuration was read from.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },
}

/// Parameters of the adversarial harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThunderdomeConfig {
    /// Upper bound on generated attacks per tool.
    pub max_attacks: usize,
    /// Wall-clock deadline for a single attack subprocess.
    pub attack_timeout: Duration,
    /// RSS ceiling for an attack subprocess, in bytes.
    pub memory_cap_bytes: u64,
    /// Concurrent attack subprocesses.
    pub parallelism: usize,
    /// Interval between RSS samples.
    pub sample_interval: Duration,
}

impl Default for ThunderdomeConfig {
    fn default() -> Self {
        Self {
            max_attacks: 8,
            attack_timeout: Duration::from_secs(5),
            memory_cap_bytes: 100 * 1024 * 1024,
            parallelism: 2,
            sample_interval: Duration::from_millis(100),
        }
    }
}

/// Top-level configuration consumed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Root for generated sources and compiled binaries.
    pub tools_dir: PathBuf,
    /// Root for agent spec files.
    pub agents_dir: PathBuf,
    /// Root for the persisted learnings file.
    pub learnings_dir: PathBuf,
    /// Root for the persisted quality profiles file.
    pub profiles_dir: PathBuf,
    /// Root for reasoning traces (surface only).
    pub traces_dir: PathBuf,
    /// Baseline admission gate for any autopoiesis action.
    pub min_confidence: f64,
    /// Elevated gate for tool generation absent strong evidence.
    pub min_tool_confidence: f64,
    /// Session-level cap on generated tools; 0 disables.
    pub max_tools_per_session: u32,
    /// Minimum interval between generations absent strong evidence.
    pub tool_generation_cooldown: Duration,
    /// When false, analyzers and detectors use heuristics only.
    pub enable_llm: bool,
    /// Master switch for the generation pipeline.
    pub enable_tool_generation: bool,
    /// Upper bound on learning-event facts held in the kernel.
    pub max_learning_facts: usize,
    /// Cross-compile target OS (e.g. "linux").
    pub target_os: String,
    /// Cross-compile target architecture (e.g. "x86_64").
    pub target_arch: String,
    /// Deadline for one compile subprocess.
    pub compile_timeout: Duration,
    /// Deadline for one tool execution subprocess.
    pub execute_timeout: Duration,
    /// Retry-with-feedback bound for safety-check failures.
    pub max_panic_retries: u32,
    /// Adversarial harness toggle.
    pub enable_thunderdome: bool,
    /// Adversarial harness parameters.
    pub thunderdome: ThunderdomeConfig,
    /// Cap on generated source size, in bytes.
    pub max_tool_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::for_workspace(Path::new("."))
    }
}

impl CoreConfig {
    /// Build a configuration rooted at `workspace`, using the standard
    /// `.nerd/` on-disk layout.
    pub fn for_workspace(workspace: &Path) -> Self {
        let nerd = workspace.join(".nerd");
        let tools = nerd.join("tools");
        Self {
            agents_dir: nerd.join("agents"),
            learnings_dir: tools.join(".learnings"),
            profiles_dir: tools.join(".profiles"),
            traces_dir: tools.join(".traces"),
            tools_dir: tools,
            min_confidence: 0.6,
            min_tool_confidence: 0.75,
            max_tools_per_session: 3,
            tool_generation_cooldown: Duration::ZERO,
            enable_llm: true,
            enable_tool_generation: true,
            max_learning_facts: 1000,
            target_os: std::env::consts::OS.to_string(),
            target_arch: std::env::consts::ARCH.to_string(),
            compile_timeout: Duration::from_secs(60),
            execute_timeout: Duration::from_secs(30),
            max_panic_retries: 2,
            enable_thunderdome: true,
            thunderdome: ThunderdomeConfig::default(),
            max_tool_size: crate::MAX_TOOL_SOURCE_BYTES,
        }
    }

    /// Directory compiled binaries are installed into.
    pub fn compiled_dir(&self) -> PathBuf {
        self.tools_dir.join(".compiled")
    }

    /// Load a configuration from a JSON file; absent keys keep defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unloadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Unloadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check thresholds and directory paths; fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("min_confidence", self.min_confidence),
            ("min_tool_confidence", self.min_tool_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        for (role, path) in [
            ("tools_dir", &self.tools_dir),
            ("agents_dir", &self.agents_dir),
            ("learnings_dir", &self.learnings_dir),
            ("profiles_dir", &self.profiles_dir),
            ("traces_dir", &self.traces_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidDirectory {
                    role,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Create every configured directory through the injected filesystem.
    pub async fn ensure_layout(&self, fs: &dyn crate::Filesystem) -> anyhow::Result<()> {
        for dir in [
            &self.tools_dir,
            &self.agents_dir,
            &self.learnings_dir,
            &self.profiles_dir,
            &self.traces_dir,
            &self.compiled_dir(),
        ] {
            fs.ensure_dir(dir).await?;
        }
        Ok(())
    }
}
