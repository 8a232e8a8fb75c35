//! Persisted per-tool quality profiles with per-type defaults.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use ouro_types::{
    CachePolicy, Filesystem, OutputExpectations, PerformanceExpectations, ScalingBehavior,
    ToolQualityProfile, ToolType, UsagePattern,
};

/// File the profile map is persisted into, under the profiles directory.
pub const PROFILES_FILE: &str = "quality_profiles.json";

/// Default profile for a tool of the given type.
pub fn default_profile(tool_name: &str, tool_type: ToolType) -> ToolQualityProfile {
    let (performance, output, usage, cache) = type_defaults(tool_type);
    ToolQualityProfile {
        tool_name: tool_name.to_string(),
        tool_type,
        performance,
        output,
        usage,
        cache,
        custom_dimensions: Vec::new(),
    }
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn perf(
    min: Duration,
    typical: Duration,
    max: Duration,
    timeout: Duration,
    retries: u32,
    scaling: ScalingBehavior,
) -> PerformanceExpectations {
    PerformanceExpectations {
        expected_min: min,
        typical,
        expected_max: max,
        timeout,
        max_retries: retries,
        scaling,
    }
}

fn out(min: usize, typical: usize, max: usize, pagination: bool) -> OutputExpectations {
    OutputExpectations {
        min_size: min,
        typical_size: typical,
        max_size: max,
        required_format: None,
        must_contain: Vec::new(),
        must_not_contain: Vec::new(),
        required_fields: Vec::new(),
        pagination_expected: pagination,
    }
}

fn type_defaults(
    tool_type: ToolType,
) -> (
    PerformanceExpectations,
    OutputExpectations,
    UsagePattern,
    CachePolicy,
) {
    use ScalingBehavior::*;
    use ToolType::*;
    match tool_type {
        QuickCalculation => (
            perf(millis(1), millis(50), secs(1), secs(5), 0, Constant),
            out(1, 64, 4096, false),
            UsagePattern::Interactive,
            CachePolicy::Aggressive,
        ),
        DataFetch => (
            perf(millis(50), millis(500), secs(5), secs(30), 2, Linear),
            out(64, 2048, 1 << 20, true),
            UsagePattern::Interactive,
            CachePolicy::Short,
        ),
        BackgroundTask => (
            perf(secs(1), secs(30), secs(300), secs(1800), 1, Linear),
            out(0, 512, 1 << 22, false),
            UsagePattern::Background,
            CachePolicy::Never,
        ),
        RecursiveAnalysis => (
            perf(millis(100), secs(2), secs(30), secs(120), 0, Exponential),
            out(32, 4096, 1 << 22, false),
            UsagePattern::Batch,
            CachePolicy::Short,
        ),
        RealTimeQuery => (
            perf(millis(10), millis(200), secs(1), secs(5), 1, Constant),
            out(8, 256, 1 << 16, false),
            UsagePattern::Interactive,
            CachePolicy::Never,
        ),
        OneTimeSetup => (
            perf(millis(100), secs(5), secs(60), secs(300), 0, Constant),
            out(0, 256, 1 << 16, false),
            UsagePattern::Background,
            CachePolicy::Never,
        ),
        BatchProcessor => (
            perf(millis(500), secs(10), secs(120), secs(600), 1, Linear),
            out(32, 8192, 1 << 24, true),
            UsagePattern::Batch,
            CachePolicy::Short,
        ),
        Monitor => (
            perf(millis(10), millis(100), secs(1), secs(10), 2, Constant),
            out(8, 256, 1 << 16, false),
            UsagePattern::Background,
            CachePolicy::Never,
        ),
        Generic => (
            perf(millis(10), secs(1), secs(10), secs(30), 1, Linear),
            out(1, 512, 1 << 20, false),
            UsagePattern::Interactive,
            CachePolicy::Short,
        ),
    }
}

/// A partial profile a language model may return at generation time.
///
/// Absent fields keep the per-type defaults; the model is never trusted with
/// the whole structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProfileOverride {
    /// Behavioral archetype override.
    pub tool_type: Option<ToolType>,
    /// Typical duration override, in milliseconds.
    pub typical_duration_ms: Option<u64>,
    /// Timeout override, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Minimum acceptable output size.
    pub min_output_size: Option<usize>,
    /// Whether pagination is expected.
    pub pagination_expected: Option<bool>,
    /// Substrings the output must carry.
    pub must_contain: Option<Vec<String>>,
}

impl ProfileOverride {
    /// Apply the override on top of the per-type defaults.
    pub fn apply(self, tool_name: &str) -> ToolQualityProfile {
        let tool_type = self.tool_type.unwrap_or(ToolType::Generic);
        let mut profile = default_profile(tool_name, tool_type);
        if let Some(ms) = self.typical_duration_ms {
            profile.performance.typical = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timeout_ms {
            profile.performance.timeout = Duration::from_millis(ms);
        }
        if let Some(size) = self.min_output_size {
            profile.output.min_size = size;
        }
        if let Some(p) = self.pagination_expected {
            profile.output.pagination_expected = p;
        }
        if let Some(needles) = self.must_contain {
            profile.output.must_contain = needles;
        }
        profile
    }
}

/// Concurrent profile map persisted as one JSON blob keyed by tool name.
pub struct ProfileStore {
    path: PathBuf,
    fs: Arc<dyn Filesystem>,
    profiles: RwLock<HashMap<String, ToolQualityProfile>>,
}

impl ProfileStore {
    /// Open the store, loading any existing blob from `profiles_dir`.
    pub async fn open(profiles_dir: &std::path::Path, fs: Arc<dyn Filesystem>) -> Result<Self> {
        let path = profiles_dir.join(PROFILES_FILE);
        let profiles = if fs.exists(&path).await {
            let raw = fs.read_file(&path).await?;
            match serde_json::from_slice(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "profile blob unreadable, starting empty");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };
        debug!(count = profiles.len(), "profile store opened");
        Ok(Self {
            path,
            fs,
            profiles: RwLock::new(profiles),
        })
    }

    /// Profile for `name`, when one has been stored.
    pub async fn get(&self, name: &str) -> Option<ToolQualityProfile> {
        self.profiles.read().await.get(name).cloned()
    }

    /// Stored profile for `name`, or a fresh default of `tool_type`.
    pub async fn get_or_default(&self, name: &str, tool_type: ToolType) -> ToolQualityProfile {
        match self.get(name).await {
            Some(profile) => profile,
            None => default_profile(name, tool_type),
        }
    }

    /// Store `profile` and persist the whole map.
    pub async fn put(&self, profile: ToolQualityProfile) -> Result<()> {
        let snapshot = {
            let mut profiles = self.profiles.write().await;
            profiles.insert(profile.tool_name.clone(), profile);
            profiles.clone()
        };
        self.persist(&snapshot).await
    }

    /// Parse a model-supplied profile JSON and store the resulting profile.
    ///
    /// Returns `None` without storing when the JSON is unusable; defaults
    /// are always a safe fallback.
    pub async fn put_model_override(
        &self,
        tool_name: &str,
        json: &str,
    ) -> Result<Option<ToolQualityProfile>> {
        let parsed: ProfileOverride = match serde_json::from_str(json) {
            Ok(p) => p,
            Err(e) => {
                debug!(tool = tool_name, error = %e, "model profile JSON rejected");
                return Ok(None);
            }
        };
        let profile = parsed.apply(tool_name);
        self.put(profile.clone()).await?;
        Ok(Some(profile))
    }

    /// Number of stored profiles.
    pub async fn len(&self) -> usize {
        self.profiles.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn persist(&self, snapshot: &HashMap<String, ToolQualityProfile>) -> Result<()> {
        let blob = serde_json::to_vec_pretty(snapshot)?;
        self.fs.replace_file(&self.path, &blob).await
    }
}
