#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ouro-registry** – In-memory index of compiled tools.
//!
//! The registry maps tool names onto [`RuntimeTool`] handles behind a
//! readers/writer lock. Registration resolves name collisions by content
//! hash: a differing hash bumps the version (hot-reload), an identical hash
//! is idempotent. A registration callback fires exactly once per successful
//! `register`, after the mutation is visible; the orchestrator uses it to
//! mirror registration facts into the kernel.
//!
//! Execution spawns the compiled binary as a subprocess, pipes the input to
//! its standard input under the 10 MiB cap, and reads back the single JSON
//! envelope `{"output": ..., "error": ...}`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use ouro_types::{RuntimeTool, MAX_TOOL_INPUT_BYTES};

/// Registration outcome delivered to the on-registered callback.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationEvent {
    /// The tool as now registered.
    pub tool: RuntimeTool,
    /// True when an existing entry was replaced with a differing hash.
    pub hot_reload: bool,
}

/// Callback invoked once per successful registration.
pub type OnRegistered = Arc<dyn Fn(&RegistrationEvent) + Send + Sync>;

/// Registry and execution failure modes.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No tool with that name is registered.
    #[error("tool '{0}' not found in registry")]
    NotFound(String),
    /// The binary could not be spawned.
    #[error("failed to spawn tool '{name}': {reason}")]
    Spawn {
        /// Tool name.
        name: String,
        /// Underlying reason.
        reason: String,
    },
    /// The execution overran its deadline.
    #[error("tool '{0}' timed out after {1:?}")]
    Timeout(String, Duration),
    /// The harness exited non-zero.
    #[error("tool '{name}' harness failure (exit {code:?}): {stderr}")]
    HarnessFailure {
        /// Tool name.
        name: String,
        /// Exit code, when the process was not killed by signal.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// Standard output was not the expected envelope.
    #[error("tool '{0}' produced a malformed result envelope")]
    BadEnvelope(String),
    /// The tool itself reported an error.
    #[error("tool '{name}' reported: {message}")]
    ToolReported {
        /// Tool name.
        name: String,
        /// The tool's error string.
        message: String,
    },
    /// Subprocess plumbing failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct ResultEnvelope {
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: String,
}

/// Thread-safe index of registered tools.
pub struct RuntimeRegistry {
    tools: Arc<RwLock<HashMap<String, RuntimeTool>>>,
    on_registered: RwLock<Option<OnRegistered>>,
    execute_timeout: Duration,
}

impl RuntimeRegistry {
    /// Create an empty registry with the given per-execution deadline.
    pub fn new(execute_timeout: Duration) -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
            on_registered: RwLock::new(None),
            execute_timeout,
        }
    }

    /// Install the on-registered callback.
    pub async fn set_on_registered(&self, callback: OnRegistered) {
        *self.on_registered.write().await = Some(callback);
    }

    /// Register `tool`, resolving a name collision by content hash.
    ///
    /// Returns the tool as registered (version possibly bumped). The
    /// callback fires after the mutation is visible and before return.
    pub async fn register(&self, mut tool: RuntimeTool) -> RuntimeTool {
        let mut hot_reload = false;
        {
            let mut tools = self.tools.write().await;
            if let Some(existing) = tools.get(&tool.name) {
                if existing.hash == tool.hash {
                    // Two paths to the same source converge on one entry;
                    // the registration timestamp stays with the original.
                    tool.version = existing.version;
                    tool.registered_at = existing.registered_at;
                    debug!(tool = %tool.name, "idempotent re-registration");
                } else {
                    tool.version = existing.version + 1;
                    tool.registered_at = Utc::now();
                    hot_reload = true;
                    info!(tool = %tool.name, version = tool.version, "hot-reloading tool");
                }
            } else {
                tool.version = 1;
                tool.registered_at = Utc::now();
            }
            tools.insert(tool.name.clone(), tool.clone());
        }

        info!(tool = %tool.name, version = tool.version, "registered tool");
        let event = RegistrationEvent {
            tool: tool.clone(),
            hot_reload,
        };
        if let Some(callback) = self.on_registered.read().await.clone() {
            callback(&event);
        }
        tool
    }

    /// Fetch a tool by name.
    pub async fn get(&self, name: &str) -> Option<RuntimeTool> {
        self.tools.read().await.get(name).cloned()
    }

    /// Whether a tool with `name` is registered.
    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// All registered tools, in no particular order.
    pub async fn list(&self) -> Vec<RuntimeTool> {
        self.tools.read().await.values().cloned().collect()
    }

    /// Remove a tool; returns whether it existed.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.tools.write().await.remove(name).is_some();
        if removed {
            info!(tool = name, "unregistered tool");
        }
        removed
    }

    /// Execute a registered tool with `input` on its standard input.
    ///
    /// The input is truncated to the 10 MiB cap; every byte below the cap,
    /// newlines included, reaches the subprocess unchanged.
    pub async fn execute_tool(&self, name: &str, input: &str) -> Result<String, RegistryError> {
        let tool = self
            .get(name)
            .await
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        let mut child = Command::new(&tool.binary_path)
            .env(
                "TOOL_DEADLINE_MS",
                self.execute_timeout.as_millis().to_string(),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RegistryError::Spawn {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let payload = truncate_input(input);
        let mut stdin = child.stdin.take().ok_or_else(|| RegistryError::Spawn {
            name: name.to_string(),
            reason: "stdin pipe unavailable".to_string(),
        })?;
        // Feed stdin from a separate task so a tool that writes before
        // reading to completion cannot deadlock against us.
        let writer = tokio::spawn(async move {
            let _ = stdin.write_all(payload.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let output = tokio::time::timeout(self.execute_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!(tool = name, "execution timed out");
                RegistryError::Timeout(name.to_string(), self.execute_timeout)
            })??;
        writer.abort();

        if !output.status.success() {
            return Err(RegistryError::HarnessFailure {
                name: name.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let envelope: ResultEnvelope = serde_json::from_slice(&output.stdout)
            .map_err(|_| RegistryError::BadEnvelope(name.to_string()))?;
        if !envelope.error.is_empty() {
            return Err(RegistryError::ToolReported {
                name: name.to_string(),
                message: envelope.error,
            });
        }
        Ok(envelope.output)
    }
}

/// Truncate to the input cap on a byte boundary.
fn truncate_input(input: &str) -> String {
    if input.len() <= MAX_TOOL_INPUT_BYTES {
        return input.to_string();
    }
    let bytes = &input.as_bytes()[..MAX_TOOL_INPUT_BYTES];
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runtime_tool(name: &str, hash: &str) -> RuntimeTool {
        RuntimeTool {
            name: name.to_string(),
            hash: hash.to_string(),
            description: String::new(),
            binary_path: PathBuf::from("/nonexistent"),
            registered_at: Utc::now(),
            version: 1,
        }
    }

    #[cfg(unix)]
    fn fake_binary(dir: &Path, name: &str, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn register_get_list_unregister() {
        let registry = RuntimeRegistry::new(Duration::from_secs(5));
        registry.register(runtime_tool("a", "h1")).await;
        registry.register(runtime_tool("b", "h2")).await;

        assert!(registry.has("a").await);
        assert_eq!(registry.list().await.len(), 2);
        assert!(registry.unregister("a").await);
        assert!(!registry.unregister("a").await);
        assert!(registry.get("a").await.is_none());
    }

    #[tokio::test]
    async fn same_hash_is_idempotent_differing_hash_bumps_version() {
        let registry = RuntimeRegistry::new(Duration::from_secs(5));
        let first = registry.register(runtime_tool("t", "h1")).await;
        assert_eq!(first.version, 1);

        let same = registry.register(runtime_tool("t", "h1")).await;
        assert_eq!(same.version, 1);
        assert_eq!(same.registered_at, first.registered_at);

        let reloaded = registry.register(runtime_tool("t", "h2")).await;
        assert_eq!(reloaded.version, 2);
        assert_ne!(reloaded.registered_at, first.registered_at);
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn callback_fires_once_per_registration() {
        let registry = RuntimeRegistry::new(Duration::from_secs(5));
        let count = Arc::new(AtomicUsize::new(0));
        let hot = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            let hot = hot.clone();
            registry
                .set_on_registered(Arc::new(move |event: &RegistrationEvent| {
                    count.fetch_add(1, Ordering::SeqCst);
                    if event.hot_reload {
                        hot.fetch_add(1, Ordering::SeqCst);
                    }
                }))
                .await;
        }

        registry.register(runtime_tool("t", "h1")).await;
        registry.register(runtime_tool("t", "h2")).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(hot.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn executing_missing_tool_fails_cleanly() {
        let registry = RuntimeRegistry::new(Duration::from_secs(1));
        match registry.execute_tool("ghost", "input").await {
            Err(RegistryError::NotFound(name)) => assert_eq!(name, "ghost"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_surfaces_the_output_field() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(
            dir.path(),
            "echoer",
            r#"cat > /dev/null; printf '{"output":"hello","error":""}'"#,
        );
        let registry = RuntimeRegistry::new(Duration::from_secs(5));
        let mut tool = runtime_tool("echoer", "h");
        tool.binary_path = bin;
        registry.register(tool).await;

        let out = registry.execute_tool("echoer", "{\"a\":1}").await.unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_surfaces_the_error_field() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(
            dir.path(),
            "failer",
            r#"cat > /dev/null; printf '{"output":"","error":"bad input"}'"#,
        );
        let registry = RuntimeRegistry::new(Duration::from_secs(5));
        let mut tool = runtime_tool("failer", "h");
        tool.binary_path = bin;
        registry.register(tool).await;

        match registry.execute_tool("failer", "x").await {
            Err(RegistryError::ToolReported { message, .. }) => assert_eq!(message, "bad input"),
            other => panic!("expected ToolReported, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_a_harness_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(dir.path(), "crasher", "cat > /dev/null; exit 3");
        let registry = RuntimeRegistry::new(Duration::from_secs(5));
        let mut tool = runtime_tool("crasher", "h");
        tool.binary_path = bin;
        registry.register(tool).await;

        match registry.execute_tool("crasher", "x").await {
            Err(RegistryError::HarnessFailure { code: Some(3), .. }) => {}
            other => panic!("expected HarnessFailure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_tool_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(dir.path(), "sleeper", "sleep 30");
        let registry = RuntimeRegistry::new(Duration::from_millis(200));
        let mut tool = runtime_tool("sleeper", "h");
        tool.binary_path = bin;
        registry.register(tool).await;

        match registry.execute_tool("sleeper", "x").await {
            Err(RegistryError::Timeout(name, _)) => assert_eq!(name, "sleeper"),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn newlines_reach_the_subprocess_intact() {
        let dir = tempfile::tempdir().unwrap();
        // The fake tool reports how many lines it saw on stdin.
        let bin = fake_binary(
            dir.path(),
            "line_counter",
            r#"n=$(wc -l); printf '{"output":"%s","error":""}' "$(echo $n)""#,
        );
        let registry = RuntimeRegistry::new(Duration::from_secs(5));
        let mut tool = runtime_tool("line_counter", "h");
        tool.binary_path = bin;
        registry.register(tool).await;

        let out = registry
            .execute_tool("line_counter", "one\ntwo\nthree\n")
            .await
            .unwrap();
        assert_eq!(out.trim(), "3");
    }

    #[test]
    fn truncation_preserves_the_first_cap_bytes() {
        let long = "a".repeat(MAX_TOOL_INPUT_BYTES + 1);
        let truncated = truncate_input(&long);
        assert_eq!(truncated.len(), MAX_TOOL_INPUT_BYTES);
        let short = "b".repeat(16);
        assert_eq!(truncate_input(&short), short);
    }
}
