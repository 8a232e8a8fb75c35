//! Fact assertion and querying against the coordination kernel.
//!
//! The kernel is never the source of truth: the core commits locally first,
//! then mirrors. An absent kernel handle makes every assertion a no-op and
//! every query empty; kernel failures are tolerated the same way.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use ouro_kernel_core::{fact, Fact, FactArg, Kernel};
use ouro_registry::RegistrationEvent;
use ouro_types::{AgentSpec, RuntimeTool, ToolLearning};

/// Mirrors local events into the kernel.
pub struct KernelBridge {
    kernel: Mutex<Option<Arc<dyn Kernel>>>,
    /// Learning facts previously asserted per tool, retracted before the
    /// fresh ones go in (functional update = retract-then-assert).
    asserted_learnings: Mutex<HashMap<String, Vec<Fact>>>,
    max_learning_facts: usize,
}

impl KernelBridge {
    /// Build a bridge with no kernel attached.
    pub fn new(max_learning_facts: usize) -> Self {
        Self {
            kernel: Mutex::new(None),
            asserted_learnings: Mutex::new(HashMap::new()),
            max_learning_facts,
        }
    }

    /// Attach (or replace) the kernel handle.
    pub async fn attach(&self, kernel: Arc<dyn Kernel>) {
        *self.kernel.lock().await = Some(kernel);
    }

    /// Current kernel handle, if any.
    pub async fn kernel(&self) -> Option<Arc<dyn Kernel>> {
        self.kernel.lock().await.clone()
    }

    /// Registration facts for one tool.
    pub fn registration_facts(tool: &RuntimeTool) -> Vec<Fact> {
        let mut facts = vec![
            fact!("tool_registered", tool.name.clone(), tool.registered_at.timestamp()),
            fact!("tool_hash", tool.name.clone(), tool.hash.clone()),
            fact!("has_capability", tool.name.clone()),
        ];
        if !tool.description.is_empty() {
            facts.push(fact!("tool_description", tool.name.clone(), tool.description.clone()));
        }
        facts.push(fact!(
            "tool_binary_path",
            tool.name.clone(),
            tool.binary_path.display().to_string()
        ));
        facts
    }

    /// Assert the registration fact set; hot-reloads additionally get the
    /// current-marker facts (`tool_version` is rewritten, the true version
    /// lives on the registry entry).
    pub async fn assert_registration(&self, event: &RegistrationEvent) {
        let mut facts = Self::registration_facts(&event.tool);
        if event.hot_reload {
            facts.push(fact!("tool_hot_loaded", event.tool.name.clone(), Utc::now().timestamp()));
            facts.push(fact!("tool_version", event.tool.name.clone(), 1i64));
        }
        self.assert_batch(facts).await;
    }

    /// Bulk-sync every currently registered tool, used on attach.
    pub async fn sync_registry(&self, tools: &[RuntimeTool]) {
        let mut facts = Vec::new();
        for tool in tools {
            facts.extend(Self::registration_facts(tool));
        }
        debug!(tools = tools.len(), facts = facts.len(), "bulk-syncing registry facts");
        self.assert_batch(facts).await;
    }

    /// Mirror one learning update: retract the facts previously asserted for
    /// the tool, then assert the fresh set, in `tool_learning` then
    /// `tool_known_issue` order.
    pub async fn sync_learning(&self, learning: &ToolLearning) {
        let Some(kernel) = self.kernel().await else {
            return;
        };

        let mut asserted = self.asserted_learnings.lock().await;
        if !asserted.contains_key(&learning.tool_name) && asserted.len() >= self.max_learning_facts
        {
            warn!(
                tool = %learning.tool_name,
                cap = self.max_learning_facts,
                "learning-fact cap reached, not mirroring"
            );
            return;
        }

        if let Some(previous) = asserted.remove(&learning.tool_name) {
            for old in previous {
                if let Err(e) = kernel.retract_fact(old).await {
                    warn!(error = %e, "learning fact retraction failed");
                }
            }
        }

        let mut facts = vec![Fact::new(
            "tool_learning",
            vec![
                FactArg::from(learning.tool_name.clone()),
                FactArg::Int(learning.total_executions as i64),
                FactArg::from(format!("{:.2}", learning.success_rate)),
                FactArg::from(format!("{:.2}", learning.average_quality)),
            ],
        )];
        for issue in &learning.known_issues {
            facts.push(fact!("tool_known_issue", learning.tool_name.clone(), issue.clone()));
        }
        for f in &facts {
            if let Err(e) = kernel.assert_fact(f.clone()).await {
                warn!(error = %e, "learning fact assertion failed");
            }
        }
        asserted.insert(learning.tool_name.clone(), facts);
    }

    /// Record an observed capability gap.
    pub async fn assert_capability_gap(&self, intent_id: &str, capability: &str) {
        self.assert_batch(vec![fact!("missing_tool_for", intent_id, capability)])
            .await;
    }

    /// Record an agent creation.
    pub async fn assert_agent_created(&self, spec: &AgentSpec) {
        let mut facts = vec![
            fact!("agent_created", spec.name.clone(), spec.agent_type.clone(), Utc::now().timestamp()),
            fact!("agent_purpose", spec.name.clone(), spec.purpose.clone()),
            fact!("agent_schedule", spec.name.clone(), spec.schedule.as_str()),
        ];
        for trigger in &spec.triggers {
            facts.push(fact!("agent_trigger", spec.name.clone(), trigger.clone()));
        }
        self.assert_batch(facts).await;
    }

    /// Assert an arbitrary fact, tolerating an absent or failing kernel.
    pub async fn assert(&self, fact: Fact) {
        self.assert_batch(vec![fact]).await;
    }

    async fn assert_batch(&self, facts: Vec<Fact>) {
        let Some(kernel) = self.kernel().await else {
            return;
        };
        if let Err(e) = kernel.assert_fact_batch(facts).await {
            warn!(error = %e, "kernel assertion failed");
        }
    }

    /// All facts under `predicate`; empty without a kernel.
    pub async fn query(&self, predicate: &str) -> Vec<Fact> {
        match self.kernel().await {
            Some(kernel) => kernel.query_predicate(predicate).await.unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Boolean query; false without a kernel.
    pub async fn query_bool(&self, query: &str) -> bool {
        match self.kernel().await {
            Some(kernel) => kernel.query_bool(query).await.unwrap_or(false),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ouro_kernel_core::InMemoryKernel;
    use std::path::PathBuf;

    fn tool(name: &str) -> RuntimeTool {
        RuntimeTool {
            name: name.to_string(),
            hash: "abc123".to_string(),
            description: "a tool".to_string(),
            binary_path: PathBuf::from("/bin/tool"),
            registered_at: Utc::now(),
            version: 1,
        }
    }

    fn learning(name: &str) -> ToolLearning {
        let mut l = ToolLearning::new(name);
        l.record(true, Some(0.8));
        l.known_issues = vec!["slow".to_string()];
        l
    }

    #[tokio::test]
    async fn absent_kernel_short_circuits() {
        let bridge = KernelBridge::new(10);
        bridge
            .assert_registration(&RegistrationEvent {
                tool: tool("t"),
                hot_reload: false,
            })
            .await;
        assert!(bridge.query("tool_registered").await.is_empty());
        assert!(!bridge.query_bool("has_capability(\"t\")").await);
    }

    #[tokio::test]
    async fn registration_asserts_the_five_facts() {
        let kernel = Arc::new(InMemoryKernel::new());
        let bridge = KernelBridge::new(10);
        bridge.attach(kernel.clone()).await;

        bridge
            .assert_registration(&RegistrationEvent {
                tool: tool("json_pretty"),
                hot_reload: false,
            })
            .await;

        for predicate in [
            "tool_registered",
            "tool_hash",
            "has_capability",
            "tool_description",
            "tool_binary_path",
        ] {
            let facts = kernel.query_predicate(predicate).await.unwrap();
            assert_eq!(facts.len(), 1, "missing {predicate}");
            assert_eq!(facts[0].args[0].as_str(), Some("json_pretty"));
        }
        assert!(kernel.query_predicate("tool_hot_loaded").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hot_reload_adds_current_markers() {
        let kernel = Arc::new(InMemoryKernel::new());
        let bridge = KernelBridge::new(10);
        bridge.attach(kernel.clone()).await;

        bridge
            .assert_registration(&RegistrationEvent {
                tool: tool("t"),
                hot_reload: true,
            })
            .await;

        assert_eq!(kernel.query_predicate("tool_hot_loaded").await.unwrap().len(), 1);
        let version = kernel.query_predicate("tool_version").await.unwrap();
        assert_eq!(version[0].args[1].as_int(), Some(1));
    }

    #[tokio::test]
    async fn learning_update_is_retract_then_assert() {
        let kernel = Arc::new(InMemoryKernel::new());
        let bridge = KernelBridge::new(10);
        bridge.attach(kernel.clone()).await;

        let mut l = learning("t");
        bridge.sync_learning(&l).await;
        assert_eq!(kernel.query_predicate("tool_learning").await.unwrap().len(), 1);

        l.record(false, Some(0.2));
        bridge.sync_learning(&l).await;

        let facts = kernel.query_predicate("tool_learning").await.unwrap();
        assert_eq!(facts.len(), 1, "stale learning fact not retracted");
        assert_eq!(facts[0].args[1].as_int(), Some(2));
    }

    #[tokio::test]
    async fn learning_cap_skips_new_tools_only() {
        let kernel = Arc::new(InMemoryKernel::new());
        let bridge = KernelBridge::new(1);
        bridge.attach(kernel.clone()).await;

        bridge.sync_learning(&learning("first")).await;
        bridge.sync_learning(&learning("second")).await;

        let facts = kernel.query_predicate("tool_learning").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].args[0].as_str(), Some("first"));

        // An already-tracked tool still updates past the cap.
        let mut first = learning("first");
        first.record(true, Some(1.0));
        bridge.sync_learning(&first).await;
        assert_eq!(kernel.query_predicate("tool_learning").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn agent_facts_cover_triggers() {
        use ouro_types::AgentSchedule;
        let kernel = Arc::new(InMemoryKernel::new());
        let bridge = KernelBridge::new(10);
        bridge.attach(kernel.clone()).await;

        bridge
            .assert_agent_created(&AgentSpec {
                name: "watcher".to_string(),
                agent_type: "monitor".to_string(),
                purpose: "watch".to_string(),
                schedule: AgentSchedule::Reactive,
                triggers: vec!["on build".to_string(), "on deploy".to_string()],
            })
            .await;

        assert_eq!(kernel.query_predicate("agent_created").await.unwrap().len(), 1);
        assert_eq!(kernel.query_predicate("agent_trigger").await.unwrap().len(), 2);
        let schedule = kernel.query_predicate("agent_schedule").await.unwrap();
        assert_eq!(schedule[0].args[1].as_str(), Some("reactive"));
    }
}
