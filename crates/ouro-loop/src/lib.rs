#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ouro-loop** – The Ouroboros generation pipeline.
//!
//! One loop invocation drives a [`ToolNeed`] through the strictly ordered
//! stages: detection, specification, safety check (with retry-with-feedback),
//! compilation, the optional adversarial harness, and registration. Every
//! stage updates the [`LoopResult`]; the registry callback fires before the
//! loop returns success.
//!
//! ```text
//! Detection -> Specification -> SafetyCheck -> [retry] -> Compilation
//!     -> (Thunderdome) -> Registration -> Done
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use ouro_compiler::{CompileError, CompiledTool, ToolCompiler};
use ouro_generator::ToolGenerator;
use ouro_registry::RuntimeRegistry;
use ouro_safety::SafetyChecker;
use ouro_thunderdome::{PanicMaker, Thunderdome};
use ouro_types::{
    GeneratedTool, LoopResult, LoopStage, RuntimeTool, StageTiming, ToolNeed,
};

/// Seam between the loop and the native toolchain.
///
/// Production uses the real [`ToolCompiler`]; tests substitute a stub so the
/// pipeline is exercisable without a toolchain.
#[async_trait]
pub trait ToolBuilder: Send + Sync {
    /// Produce an installed executable for `tool`.
    async fn build(&self, tool: &GeneratedTool) -> Result<CompiledTool, CompileError>;
}

#[async_trait]
impl ToolBuilder for ToolCompiler {
    async fn build(&self, tool: &GeneratedTool) -> Result<CompiledTool, CompileError> {
        self.compile(tool).await
    }
}

/// Counters accumulated across loop invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopStats {
    /// Pipeline invocations.
    pub runs: u64,
    /// Invocations that reached registration.
    pub successes: u64,
    /// Invocations that failed at any stage.
    pub failures: u64,
    /// Safety-check regenerations performed.
    pub retries: u64,
    /// Adversarial attacks executed.
    pub attacks_run: u64,
    /// When the last invocation finished.
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Configuration owned by the loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Retry-with-feedback bound for safety failures.
    pub max_panic_retries: u32,
    /// Whether the adversarial harness runs before registration.
    pub enable_thunderdome: bool,
}

/// The pipeline state machine.
pub struct OuroborosLoop {
    generator: Arc<ToolGenerator>,
    checker: SafetyChecker,
    builder: Arc<dyn ToolBuilder>,
    registry: Arc<RuntimeRegistry>,
    panic_maker: Arc<PanicMaker>,
    thunderdome: Thunderdome,
    config: LoopConfig,
    stats: RwLock<LoopStats>,
    compiled_cache: RwLock<HashMap<String, CompiledTool>>,
}

impl OuroborosLoop {
    /// Compose a loop over its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        generator: Arc<ToolGenerator>,
        checker: SafetyChecker,
        builder: Arc<dyn ToolBuilder>,
        registry: Arc<RuntimeRegistry>,
        panic_maker: Arc<PanicMaker>,
        thunderdome: Thunderdome,
        config: LoopConfig,
    ) -> Self {
        Self {
            generator,
            checker,
            builder,
            registry,
            panic_maker,
            thunderdome,
            config,
            stats: RwLock::new(LoopStats::default()),
            compiled_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Run the full pipeline for `need`.
    pub async fn execute(&self, need: ToolNeed) -> LoopResult {
        let result = self.execute_inner(need).await;
        let mut stats = self.stats.write().await;
        stats.runs += 1;
        if result.success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        stats.last_run_at = Some(Utc::now());
        result
    }

    async fn execute_inner(&self, mut need: ToolNeed) -> LoopResult {
        let mut timings = Vec::new();

        // Detection: record the incoming need.
        let started = Instant::now();
        if let Err(reason) = need.validate() {
            return finish_failure(LoopStage::Detection, reason, timings);
        }
        debug!(tool = %need.name, confidence = need.confidence, "need entered the loop");
        push_timing(&mut timings, LoopStage::Detection, started);

        // Specification.
        let started = Instant::now();
        let mut tool = match self.generator.generate_tool(&need).await {
            Ok(tool) => tool,
            Err(e) => {
                return finish_failure(LoopStage::Specification, e.to_string(), timings);
            }
        };
        push_timing(&mut timings, LoopStage::Specification, started);

        // Safety check with retry-with-feedback.
        let started = Instant::now();
        let mut report = self.checker.check(&tool.source);
        let mut attempts = 0u32;
        while !report.safe && attempts < self.config.max_panic_retries {
            attempts += 1;
            info!(
                tool = %need.name,
                attempt = attempts,
                "safety check failed, regenerating with feedback"
            );
            self.stats.write().await.retries += 1;
            tool = match self
                .generator
                .regenerate_with_feedback(&mut need, &tool, &report.violations)
                .await
            {
                Ok(tool) => tool,
                Err(e) => {
                    push_timing(&mut timings, LoopStage::SafetyCheck, started);
                    return finish_failure(LoopStage::Specification, e.to_string(), timings);
                }
            };
            report = self.checker.check(&tool.source);
        }
        if !report.safe {
            push_timing(&mut timings, LoopStage::SafetyCheck, started);
            return finish_failure(
                LoopStage::SafetyCheck,
                format!(
                    "unsafe after {} regeneration(s):\n{}",
                    attempts,
                    report.format_report()
                ),
                timings,
            );
        }
        push_timing(&mut timings, LoopStage::SafetyCheck, started);

        // Compilation; terminal on failure, the caller may re-invoke.
        let started = Instant::now();
        let compiled = match self.builder.build(&tool).await {
            Ok(compiled) => compiled,
            Err(e) => {
                return finish_failure(LoopStage::Compilation, e.to_string(), timings);
            }
        };
        self.compiled_cache
            .write()
            .await
            .insert(compiled.name.clone(), compiled.clone());
        push_timing(&mut timings, LoopStage::Compilation, started);

        // Thunderdome, when enabled.
        if self.config.enable_thunderdome {
            let started = Instant::now();
            let attacks = self.panic_maker.generate_attacks(&tool.source).await;
            let attack_count = attacks.len() as u64;
            let report = self.thunderdome.run(&compiled.binary_path, attacks).await;
            self.stats.write().await.attacks_run += attack_count;
            push_timing(&mut timings, LoopStage::Thunderdome, started);
            if report.fatal {
                warn!(tool = %need.name, "tool defeated in the thunderdome");
                return finish_failure(LoopStage::Thunderdome, report.format_report(), timings);
            }
        }

        // Registration.
        let started = Instant::now();
        let registered = self
            .registry
            .register(RuntimeTool {
                name: tool.name.clone(),
                hash: compiled.source_hash.clone(),
                description: tool.description.clone(),
                binary_path: compiled.binary_path.clone(),
                registered_at: Utc::now(),
                version: 1,
            })
            .await;
        push_timing(&mut timings, LoopStage::Registration, started);

        info!(tool = %registered.name, version = registered.version, "loop completed");
        LoopResult {
            success: true,
            stage: LoopStage::Done,
            tool: Some(registered),
            error: None,
            stage_timings: timings,
        }
    }

    /// Current counters.
    pub async fn stats(&self) -> LoopStats {
        self.stats.read().await.clone()
    }

    /// Compiled-tool cache lookup.
    pub async fn cached(&self, name: &str) -> Option<CompiledTool> {
        self.compiled_cache.read().await.get(name).cloned()
    }
}

fn push_timing(timings: &mut Vec<StageTiming>, stage: LoopStage, started: Instant) {
    timings.push(StageTiming {
        stage,
        duration: started.elapsed(),
    });
}

fn finish_failure(stage: LoopStage, error: String, timings: Vec<StageTiming>) -> LoopResult {
    warn!(stage = stage.as_str(), %error, "loop failed");
    LoopResult {
        success: false,
        stage,
        tool: None,
        error: Some(error),
        stage_timings: timings,
    }
}
