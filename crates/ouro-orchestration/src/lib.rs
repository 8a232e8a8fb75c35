#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ouro-orchestration** – Root composition layer of the Ouroboros runtime.
//!
//! The [`Orchestrator`] holds the configuration, composes every subsystem
//! (generator, safety checker, compiler, registry, loop, evaluator, stores),
//! owns the throttling state and the kernel bridge, and exposes the public
//! surface: request analysis, the generation loop, the feedback path, and
//! the kernel delegation listener.
//!
//! Locking: configuration and throttle counters live behind one
//! readers/writer lock; the lock is never held across a language-model call,
//! a subprocess spawn, or file I/O.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ouro_compiler::{CompilerConfig, ToolCompiler};
use ouro_generator::ToolGenerator;
use ouro_kernel_core::{fact, Kernel};
use ouro_learning::{render_learnings_context, LearningStore, PatternDetector};
use ouro_llm::{extract_json, LanguageModel};
use ouro_loop::{LoopConfig, OuroborosLoop, ToolBuilder};
use ouro_quality::{ProfileStore, QualityEvaluator};
use ouro_registry::{RegistrationEvent, RegistryError, RuntimeRegistry};
use ouro_safety::{SafetyChecker, SafetyPolicy};
use ouro_thunderdome::{PanicMaker, Thunderdome};
use ouro_types::{
    Action, AgentSchedule, AgentSpec, AnalysisResult, CampaignRequest, ComplexityAssessment,
    CoreConfig, ExecutionFeedback, Filesystem, GeneratedTool, LoopResult, LoopStage,
    OsFilesystem, PlannedAction, RuntimeTool, ToolLearning, ToolNeed,
};

pub mod bridge;
pub mod refine;
pub mod surfaces;
pub mod throttle;

pub use bridge::KernelBridge;
pub use refine::{should_refine, RefinementResult};
pub use surfaces::{
    AgentSpecWriter, CampaignDelegate, ComplexityAnalyzer, HeuristicComplexity,
    HeuristicPersistence, NoopTraceRecorder, PersistenceAnalyzer, TraceRecorder,
    YamlAgentSpecWriter,
};
pub use throttle::{admit, Rejection, ThrottleState};

/// What executing one action produced.
#[derive(Debug)]
pub enum ActionOutcome {
    /// A loop ran for a tool need.
    ToolGenerated(LoopResult),
    /// An agent spec was written.
    AgentCreated(PathBuf),
    /// The campaign was handed to its owner.
    CampaignDelegated,
    /// A delegation fact was asserted.
    ShardDelegated,
    /// Nothing to do.
    Nothing,
}

/// System prompt asking the model for a quality-profile override for a
/// freshly generated tool.
const PROFILE_SYSTEM_PROMPT: &str = "\
You estimate quality expectations for a freshly generated tool. Reply with \
a single JSON object; every key is optional: tool_type (one of \
quick_calculation, data_fetch, background_task, recursive_analysis, \
real_time_query, one_time_setup, batch_processor, monitor, generic), \
typical_duration_ms, timeout_ms, min_output_size, pagination_expected, \
must_contain.";

/// A derived action signal read back out of the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelSignal {
    /// The kernel derived that a tool should be generated.
    GenerateTool,
    /// The kernel flagged a specific tool for refinement.
    RefineTool(String),
}

struct Shared {
    config: CoreConfig,
    throttle: ThrottleState,
}

/// Builds an [`Orchestrator`] with optional collaborator overrides.
pub struct OrchestratorBuilder {
    config: CoreConfig,
    model: Arc<dyn LanguageModel>,
    fs: Arc<dyn Filesystem>,
    tool_builder: Option<Arc<dyn ToolBuilder>>,
    complexity: Arc<dyn ComplexityAnalyzer>,
    persistence: Arc<dyn PersistenceAnalyzer>,
    traces: Arc<dyn TraceRecorder>,
    campaign: Option<Arc<dyn CampaignDelegate>>,
}

impl OrchestratorBuilder {
    /// Start a builder from a configuration and a model client.
    pub fn new(config: CoreConfig, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            config,
            model,
            fs: Arc::new(OsFilesystem),
            tool_builder: None,
            complexity: Arc::new(HeuristicComplexity),
            persistence: Arc::new(HeuristicPersistence),
            traces: Arc::new(NoopTraceRecorder),
            campaign: None,
        }
    }

    /// Override the filesystem capability.
    pub fn filesystem(mut self, fs: Arc<dyn Filesystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Override the native toolchain seam.
    pub fn tool_builder(mut self, builder: Arc<dyn ToolBuilder>) -> Self {
        self.tool_builder = Some(builder);
        self
    }

    /// Override the complexity analyzer.
    pub fn complexity_analyzer(mut self, analyzer: Arc<dyn ComplexityAnalyzer>) -> Self {
        self.complexity = analyzer;
        self
    }

    /// Override the persistence analyzer.
    pub fn persistence_analyzer(mut self, analyzer: Arc<dyn PersistenceAnalyzer>) -> Self {
        self.persistence = analyzer;
        self
    }

    /// Attach a trace recorder.
    pub fn trace_recorder(mut self, traces: Arc<dyn TraceRecorder>) -> Self {
        self.traces = traces;
        self
    }

    /// Attach a campaign delegate.
    pub fn campaign_delegate(mut self, campaign: Arc<dyn CampaignDelegate>) -> Self {
        self.campaign = Some(campaign);
        self
    }

    /// Validate the configuration, prepare the on-disk layout, open the
    /// stores, and compose the subsystems.
    pub async fn build(self) -> Result<Arc<Orchestrator>> {
        let Self {
            config,
            model,
            fs,
            tool_builder,
            complexity,
            persistence,
            traces,
            campaign,
        } = self;

        config.validate().context("configuration rejected")?;
        config.ensure_layout(fs.as_ref()).await?;

        let generator = Arc::new(ToolGenerator::new(
            model.clone(),
            fs.clone(),
            config.tools_dir.clone(),
            config.enable_llm,
        ));
        let registry = Arc::new(RuntimeRegistry::new(config.execute_timeout));
        let builder: Arc<dyn ToolBuilder> = match tool_builder {
            Some(builder) => builder,
            None => Arc::new(ToolCompiler::new(
                CompilerConfig {
                    tools_dir: config.tools_dir.clone(),
                    compiled_dir: config.compiled_dir(),
                    target_os: config.target_os.clone(),
                    target_arch: config.target_arch.clone(),
                    compile_timeout: config.compile_timeout,
                    max_source_bytes: config.max_tool_size,
                },
                fs.clone(),
            )),
        };
        let panic_maker = Arc::new(PanicMaker::new(
            model.clone(),
            config.thunderdome.max_attacks,
        ));
        let looper = Arc::new(OuroborosLoop::new(
            generator.clone(),
            SafetyChecker::new(SafetyPolicy::default()),
            builder.clone(),
            registry.clone(),
            panic_maker,
            Thunderdome::new(config.thunderdome.clone()),
            LoopConfig {
                max_panic_retries: config.max_panic_retries,
                enable_thunderdome: config.enable_thunderdome,
            },
        ));

        let profiles = Arc::new(ProfileStore::open(&config.profiles_dir, fs.clone()).await?);
        let learnings = Arc::new(LearningStore::open(&config.learnings_dir, fs.clone()).await?);
        let detector = Arc::new(PatternDetector::new());
        let bridge = Arc::new(KernelBridge::new(config.max_learning_facts));
        let agent_writer = Arc::new(YamlAgentSpecWriter::new(config.agents_dir.clone(), fs.clone()));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        registry
            .set_on_registered(Arc::new(move |event: &RegistrationEvent| {
                let _ = events_tx.send(event.clone());
            }))
            .await;

        info!(tools_dir = %config.tools_dir.display(), "orchestrator ready");
        Ok(Arc::new(Orchestrator {
            shared: RwLock::new(Shared {
                config,
                throttle: ThrottleState::default(),
            }),
            bridge,
            fs,
            model,
            generator,
            builder,
            registry,
            looper,
            evaluator: QualityEvaluator::new(),
            profiles,
            detector,
            learnings,
            complexity,
            persistence,
            agent_writer,
            traces,
            campaign,
            registration_events: Mutex::new(events_rx),
        }))
    }
}

/// Root of the Ouroboros core.
pub struct Orchestrator {
    shared: RwLock<Shared>,
    bridge: Arc<KernelBridge>,
    fs: Arc<dyn Filesystem>,
    model: Arc<dyn LanguageModel>,
    generator: Arc<ToolGenerator>,
    builder: Arc<dyn ToolBuilder>,
    registry: Arc<RuntimeRegistry>,
    looper: Arc<OuroborosLoop>,
    evaluator: QualityEvaluator,
    profiles: Arc<ProfileStore>,
    detector: Arc<PatternDetector>,
    learnings: Arc<LearningStore>,
    complexity: Arc<dyn ComplexityAnalyzer>,
    persistence: Arc<dyn PersistenceAnalyzer>,
    agent_writer: Arc<dyn AgentSpecWriter>,
    traces: Arc<dyn TraceRecorder>,
    campaign: Option<Arc<dyn CampaignDelegate>>,
    registration_events: Mutex<mpsc::UnboundedReceiver<RegistrationEvent>>,
}

impl Orchestrator {
    /// Snapshot of the current configuration.
    pub async fn config(&self) -> CoreConfig {
        self.shared.read().await.config.clone()
    }

    /// The runtime registry, for embedders that execute tools directly.
    pub fn registry(&self) -> Arc<RuntimeRegistry> {
        self.registry.clone()
    }

    /// The profile store.
    pub fn profiles(&self) -> Arc<ProfileStore> {
        self.profiles.clone()
    }

    /// Whether a tool exists, by registry entry or on-disk source.
    pub async fn has_tool(&self, name: &str) -> bool {
        self.registry.has(name).await || self.generator.has_tool(name).await
    }

    //─────────────────────────────
    //  Analysis surface
    //─────────────────────────────

    /// Analyze a request and propose prioritized actions.
    pub async fn analyze(&self, request: &str, target: &str) -> AnalysisResult {
        let complexity = self.complexity.analyze(request, target);
        let persistence = self.persistence.analyze(request);
        self.traces.record("analyze", request);

        let mut actions: Vec<PlannedAction> = Vec::new();
        if complexity.score >= 0.7 {
            actions.push(PlannedAction {
                priority: complexity.score,
                action: Action::StartCampaign(CampaignRequest {
                    objective: request.to_string(),
                    target: target.to_string(),
                }),
            });
        }
        if persistence.persistent {
            actions.push(PlannedAction {
                priority: 0.65,
                action: Action::CreateAgent(AgentSpec {
                    name: format!("{}_agent", ouro_generator::detect::derive_name(request)),
                    agent_type: "assistant".to_string(),
                    purpose: request.to_string(),
                    schedule: AgentSchedule::Reactive,
                    triggers: vec![request.to_string()],
                }),
            });
        }

        let (config, throttle) = {
            let shared = self.shared.read().await;
            (shared.config.clone(), shared.throttle.clone())
        };
        if config.enable_tool_generation {
            if let Some(need) = self.generator.detect_tool_need(request, None).await {
                let intent_id = Uuid::new_v4().to_string();
                self.bridge.assert_capability_gap(&intent_id, &need.name).await;
                let exists = self.has_tool(&need.name).await;
                match admit(&need, &config, &throttle, exists) {
                    Ok(()) => actions.push(PlannedAction {
                        priority: need.priority,
                        action: Action::GenerateTool(need),
                    }),
                    Err(rejection) => {
                        debug!(tool = %need.name, %rejection, "tool need dropped at the gate");
                    }
                }
            }
        }

        actions.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        AnalysisResult {
            complexity,
            persistence,
            actions,
        }
    }

    /// Heuristic-only analysis augmented with kernel-derived scope counts.
    pub async fn quick_analyze(&self, request: &str, target: &str) -> ComplexityAssessment {
        let mut assessment = self.complexity.analyze(request, target);
        assessment.element_count = self.bridge.query("code_element").await.len() as u64;
        assessment.file_count = (self.bridge.query("active_file").await.len()
            + self.bridge.query("file_in_scope").await.len()) as u64;
        assessment
    }

    /// Dispatch one action; the match is exhaustive.
    pub async fn execute_action(&self, action: Action) -> Result<ActionOutcome> {
        match action {
            Action::GenerateTool(need) => {
                let result = self.execute_ouroboros_loop(need).await;
                Ok(ActionOutcome::ToolGenerated(result))
            }
            Action::CreateAgent(spec) => {
                let path = self.agent_writer.write_spec(&spec).await?;
                self.bridge.assert_agent_created(&spec).await;
                Ok(ActionOutcome::AgentCreated(path))
            }
            Action::StartCampaign(request) => {
                match &self.campaign {
                    Some(delegate) => delegate.start_campaign(&request).await?,
                    None => info!(objective = %request.objective, "no campaign delegate attached"),
                }
                Ok(ActionOutcome::CampaignDelegated)
            }
            Action::DelegateToShard(delegation) => {
                self.bridge
                    .assert(fact!(
                        "delegate_task",
                        delegation.shard.clone(),
                        delegation.capability.clone(),
                        "/pending"
                    ))
                    .await;
                Ok(ActionOutcome::ShardDelegated)
            }
            Action::None => Ok(ActionOutcome::Nothing),
        }
    }

    //─────────────────────────────
    //  Generation surface
    //─────────────────────────────

    /// Run the full generation pipeline for `need`.
    pub async fn execute_ouroboros_loop(&self, need: ToolNeed) -> LoopResult {
        let enabled = self.shared.read().await.config.enable_tool_generation;
        if !enabled {
            return LoopResult::failure(LoopStage::Detection, "tool generation is disabled");
        }

        let purpose = need.purpose.clone();
        let result = self.looper.execute(need).await;
        self.flush_registration_facts().await;
        if result.success {
            self.shared.write().await.throttle.record_generation();
            if let Some(tool) = &result.tool {
                self.seed_quality_profile(&tool.name, &purpose).await;
            }
        }
        result
    }

    /// Ask the model for a profile override for a freshly registered tool.
    ///
    /// An unusable or failed reply leaves the store untouched; the per-type
    /// defaults stand in at evaluation time.
    async fn seed_quality_profile(&self, name: &str, purpose: &str) {
        if !self.shared.read().await.config.enable_llm {
            return;
        }
        let user = format!("Tool `{name}`: {purpose}");
        match self
            .model
            .complete_with_system(PROFILE_SYSTEM_PROMPT, &user)
            .await
        {
            Ok(reply) => {
                let stored = match extract_json(&reply) {
                    Some(json) => self
                        .profiles
                        .put_model_override(name, json)
                        .await
                        .ok()
                        .flatten(),
                    None => None,
                };
                match stored {
                    Some(profile) => {
                        debug!(tool = name, tool_type = ?profile.tool_type, "quality profile seeded")
                    }
                    None => debug!(tool = name, "no usable profile override, defaults apply"),
                }
            }
            Err(e) => debug!(tool = name, error = %e, "profile call failed, defaults apply"),
        }
    }

    /// Execute an already-registered tool.
    pub async fn execute_generated_tool(&self, name: &str, input: &str) -> Result<String> {
        Ok(self.registry.execute_tool(name, input).await?)
    }

    /// Compile a tool whose source already lives on disk, then register it.
    pub async fn compile_tool(&self, name: &str) -> Result<RuntimeTool> {
        let path = self.generator.tool_source_path(name);
        let raw = self.fs.read_file(&path).await?;
        let source = String::from_utf8_lossy(&raw).into_owned();

        let report = SafetyChecker::new(SafetyPolicy::default()).check(&source);
        if !report.safe {
            anyhow::bail!("source for '{name}' is unsafe:\n{}", report.format_report());
        }

        let tool = GeneratedTool {
            name: name.to_string(),
            package: ouro_generator::TOOL_PACKAGE.to_string(),
            description: format!("compiled from {}", path.display()),
            source,
            test_source: String::new(),
            schema: serde_json::json!({}),
            file_path: path,
            validated: true,
            warnings: Vec::new(),
        };
        let compiled = self.builder.build(&tool).await?;
        let registered = self
            .registry
            .register(RuntimeTool {
                name: tool.name.clone(),
                hash: compiled.source_hash.clone(),
                description: tool.description.clone(),
                binary_path: compiled.binary_path.clone(),
                registered_at: chrono::Utc::now(),
                version: 1,
            })
            .await;
        self.flush_registration_facts().await;
        Ok(registered)
    }

    //─────────────────────────────
    //  Feedback surface
    //─────────────────────────────

    /// Record one execution: evaluate when no assessment is attached, update
    /// patterns and learnings, mirror facts, refresh the learnings context.
    pub async fn record_execution(
        &self,
        mut feedback: ExecutionFeedback,
    ) -> Result<ExecutionFeedback> {
        if feedback.quality.is_none() {
            let assessment = match self.profiles.get(&feedback.tool_name).await {
                Some(profile) => self.evaluator.evaluate_with_profile(&feedback, &profile),
                None => self.evaluator.evaluate(&feedback),
            };
            feedback.quality = Some(assessment);
        }

        self.detector.record_execution(&feedback).await;
        let patterns = self.detector.tool_patterns(&feedback.tool_name).await;
        let learning = self
            .learnings
            .record_learning(&feedback.tool_name, &feedback, &patterns)
            .await?;
        self.bridge.sync_learning(&learning).await;

        let context = render_learnings_context(&self.learnings.all_learnings().await);
        self.generator.set_learnings_context(context).await;
        Ok(feedback)
    }

    /// Execute a tool and run its result through the feedback path.
    pub async fn execute_and_evaluate(&self, name: &str, input: &str) -> Result<ExecutionFeedback> {
        let execution_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let feedback = match self.registry.execute_tool(name, input).await {
            Ok(output) => {
                ExecutionFeedback::completed(name, execution_id, input, output, started.elapsed())
            }
            Err(e) => ExecutionFeedback::failed(
                name,
                execution_id,
                input,
                error_kind(&e),
                e.to_string(),
                started.elapsed(),
            ),
        };
        self.record_execution(feedback).await
    }

    /// Learning for one tool, when recorded.
    pub async fn tool_learning(&self, name: &str) -> Option<ToolLearning> {
        self.learnings.get_learning(name).await
    }

    /// Whether `name` has degraded enough to warrant regeneration, with the
    /// suggestions drawn from its patterns.
    pub async fn should_refine_tool(&self, name: &str) -> (bool, Vec<String>) {
        let learning = self.learnings.get_learning(name).await;
        let patterns = self.detector.tool_patterns(name).await;
        refine::should_refine(learning.as_ref(), &patterns)
    }

    /// Regenerate `name` from accumulated feedback.
    pub async fn refine_tool(&self, name: &str, original_code: &str) -> Result<RefinementResult> {
        let examples = self
            .detector
            .tool_history(name, refine::MAX_EXAMPLE_FEEDBACKS)
            .await;
        let patterns = self.detector.tool_patterns(name).await;
        let (_, suggestions) = self.should_refine_tool(name).await;
        let prompt = refine::refinement_prompt(name, original_code, &examples, &patterns, &suggestions);

        let reply = self
            .model
            .complete_with_system(refine::REFINE_SYSTEM_PROMPT, &prompt)
            .await
            .context("refinement model call failed")?;
        refine::parse_refinement(&reply)
            .ok_or_else(|| anyhow::anyhow!("refinement reply for '{name}' was unusable"))
    }

    //─────────────────────────────
    //  Kernel surface
    //─────────────────────────────

    /// Attach the kernel and bulk-sync all current registry facts.
    pub async fn set_kernel(&self, kernel: Arc<dyn Kernel>) {
        self.bridge.attach(kernel).await;
        let tools = self.registry.list().await;
        self.bridge.sync_registry(&tools).await;
    }

    /// One pass over pending `/tool_generator` delegations.
    ///
    /// Returns how many new tools were registered. Idempotent: an already
    /// registered capability only re-asserts completion, and a capability
    /// that already failed is not retried until its failure fact clears.
    pub async fn process_kernel_delegations(&self) -> Result<usize> {
        let delegations = self.bridge.query("delegate_task").await;
        if delegations.is_empty() {
            return Ok(0);
        }
        let failed: Vec<String> = self
            .bridge
            .query("tool_generation_failed")
            .await
            .into_iter()
            .filter_map(|f| f.args.first().and_then(|a| a.as_str().map(String::from)))
            .collect();

        let mut generated = 0;
        for delegation in delegations {
            let (shard, capability, status) = match (
                delegation.args.first().and_then(|a| a.as_str()),
                delegation.args.get(1).and_then(|a| a.as_str()),
                delegation.args.get(2).and_then(|a| a.as_str()),
            ) {
                (Some(shard), Some(capability), Some(status)) => (shard, capability, status),
                _ => continue,
            };
            if shard != "/tool_generator" || status != "/pending" {
                continue;
            }

            let name = capability_to_name(capability);
            if self.registry.has(&name).await {
                self.bridge
                    .assert(fact!("tool_delegation_complete", capability, name.clone()))
                    .await;
                continue;
            }
            if failed.iter().any(|f| f == capability) {
                debug!(capability, "delegation already failed, not retrying");
                continue;
            }

            info!(capability, "processing kernel delegation");
            let need = ToolNeed {
                name: name.clone(),
                purpose: format!("delegated capability: {capability}"),
                input_type: "string".to_string(),
                output_type: "string".to_string(),
                triggers: vec!["kernel delegation".to_string()],
                priority: 1.0,
                confidence: 1.0,
                reasoning: "kernel_delegation".to_string(),
                category: ouro_generator::detect::classify(capability),
            };
            let result = self.execute_ouroboros_loop(need).await;
            if let (true, Some(tool)) = (result.success, &result.tool) {
                self.bridge
                    .assert(fact!("tool_delegation_complete", capability, tool.name.clone()))
                    .await;
                generated += 1;
            } else {
                let message = result.error.unwrap_or_else(|| "unknown failure".to_string());
                warn!(capability, %message, "delegated generation failed");
                self.bridge
                    .assert(fact!("tool_generation_failed", capability, message))
                    .await;
            }
        }
        Ok(generated)
    }

    /// Poll the kernel's derived action signals.
    ///
    /// `next_action` facts carry `/generate_tool` or `/refine_tool`
    /// constants; refinement candidates are confirmed per registered tool
    /// with a `tool_needs_refinement` query.
    pub async fn poll_kernel_signals(&self) -> Vec<KernelSignal> {
        let mut signals = Vec::new();
        for derived in self.bridge.query("next_action").await {
            match derived.args.first().and_then(|a| a.as_str()) {
                Some("/generate_tool") => signals.push(KernelSignal::GenerateTool),
                Some("/refine_tool") => {
                    for tool in self.registry.list().await {
                        let query = format!("tool_needs_refinement(\"{}\")", tool.name);
                        if self.bridge.query_bool(&query).await
                            && !signals.contains(&KernelSignal::RefineTool(tool.name.clone()))
                        {
                            signals.push(KernelSignal::RefineTool(tool.name.clone()));
                        }
                    }
                }
                _ => {}
            }
        }
        signals
    }

    /// Counters from the generation pipeline.
    pub async fn loop_stats(&self) -> ouro_loop::LoopStats {
        self.looper.stats().await
    }

    /// Start the long-running delegation listener.
    ///
    /// One worker polls on `interval`; a tick that overruns is not coalesced
    /// with the next. The handle cancels cooperatively and `join` is the
    /// completion signal.
    pub fn start_kernel_listener(self: &Arc<Self>, interval: Duration) -> ListenerHandle {
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let orchestrator = self.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = worker_token.cancelled() => {
                        debug!("kernel listener cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = orchestrator.process_kernel_delegations().await {
                            warn!(error = %e, "delegation pass failed");
                        }
                    }
                }
            }
        });
        ListenerHandle { token, join }
    }

    async fn flush_registration_facts(&self) {
        let mut events = self.registration_events.lock().await;
        while let Ok(event) = events.try_recv() {
            self.bridge.assert_registration(&event).await;
        }
    }
}

/// Handle to the delegation listener worker.
pub struct ListenerHandle {
    token: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl ListenerHandle {
    /// Request cooperative shutdown.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel and wait for the worker to exit.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}

/// Classify a registry error for feedback records.
fn error_kind(error: &RegistryError) -> &'static str {
    match error {
        RegistryError::NotFound(_) => "not_found",
        RegistryError::Spawn { .. } => "spawn_failure",
        RegistryError::Timeout(_, _) => "timeout",
        RegistryError::HarnessFailure { .. } => "harness_failure",
        RegistryError::BadEnvelope(_) => "bad_envelope",
        RegistryError::ToolReported { .. } => "tool_error",
        RegistryError::Io(_) => "io",
    }
}

/// Map a delegated capability string onto a valid tool name.
fn capability_to_name(capability: &str) -> String {
    let mut name: String = capability
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    while name.contains("__") {
        name = name.replace("__", "_");
    }
    let name = name.trim_matches('_').to_string();
    if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        format!("cap_{name}")
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_names_are_sanitized() {
        assert_eq!(capability_to_name("summarize"), "summarize");
        assert_eq!(capability_to_name("Fetch PR-Stats!"), "fetch_pr_stats");
        assert_eq!(capability_to_name("9lives"), "cap_9lives");
        assert_eq!(capability_to_name("--"), "cap_");
    }

    #[test]
    fn registry_errors_classify_stably() {
        assert_eq!(error_kind(&RegistryError::NotFound("x".into())), "not_found");
        assert_eq!(
            error_kind(&RegistryError::Timeout("x".into(), Duration::from_secs(1))),
            "timeout"
        );
        assert_eq!(
            error_kind(&RegistryError::ToolReported {
                name: "x".into(),
                message: "m".into()
            }),
            "tool_error"
        );
    }
}
