//! Resource-capped execution of attacks against a compiled tool.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::attacks::AttackInput;
use ouro_types::ThunderdomeConfig;

/// Outcome of one attack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AttackOutcome {
    /// The tool handled the input.
    Survived,
    /// The tool crashed; the excerpt carries the stack trace.
    Panic {
        /// Standard-error excerpt including the panic message.
        stderr: String,
    },
    /// The tool exceeded the memory cap and was killed.
    Oom {
        /// RSS observed at the kill, in bytes.
        rss_bytes: u64,
    },
    /// The tool overran the wall-clock deadline while making progress.
    Timeout,
    /// The tool overran the deadline asleep with no CPU progress.
    Deadlock,
}

impl AttackOutcome {
    /// Whether this outcome defeats the tool.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AttackOutcome::Survived)
    }
}

/// One attack with its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    /// The attack that ran.
    pub attack: AttackInput,
    /// How the tool fared.
    pub outcome: AttackOutcome,
    /// Wall-clock spent on the attack.
    pub duration: Duration,
}

/// Outcome of a full harness run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThunderdomeReport {
    /// Per-attack results, in input order.
    pub results: Vec<AttackResult>,
    /// True when any attack defeated the tool.
    pub fatal: bool,
}

impl ThunderdomeReport {
    /// Render the report for loop errors and regeneration feedback.
    pub fn format_report(&self) -> String {
        let mut out = String::from("thunderdome report:\n");
        for r in &self.results {
            out.push_str(&format!(
                "- [{:?}] {} -> ",
                r.attack.category, r.attack.description
            ));
            match &r.outcome {
                AttackOutcome::Survived => out.push_str("survived\n"),
                AttackOutcome::Panic { stderr } => {
                    out.push_str(&format!("panic\n{stderr}\n"));
                }
                AttackOutcome::Oom { rss_bytes } => {
                    out.push_str(&format!("oom ({rss_bytes} bytes)\n"));
                }
                AttackOutcome::Timeout => out.push_str("timeout\n"),
                AttackOutcome::Deadlock => out.push_str("deadlock\n"),
            }
        }
        out
    }
}

/// Runs attacks against a compiled tool under memory and time caps.
pub struct Thunderdome {
    config: ThunderdomeConfig,
}

impl Thunderdome {
    /// Build a harness with the given caps.
    pub fn new(config: ThunderdomeConfig) -> Self {
        Self { config }
    }

    /// Run every attack against `binary`, with bounded parallelism.
    pub async fn run(&self, binary: &Path, attacks: Vec<AttackInput>) -> ThunderdomeReport {
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let binary = binary.to_path_buf();

        let futures = attacks.into_iter().map(|attack| {
            let semaphore = semaphore.clone();
            let binary = binary.clone();
            let config = self.config.clone();
            async move {
                // A closed semaphore cannot happen; it lives on the stack above.
                let _permit = semaphore.acquire_owned().await;
                run_attack(&binary, attack, &config).await
            }
        });

        let results = join_all(futures).await;
        let fatal = results.iter().any(|r| r.outcome.is_fatal());
        if fatal {
            warn!(attacks = results.len(), "thunderdome found fatal outcomes");
        }
        ThunderdomeReport { results, fatal }
    }
}

async fn run_attack(
    binary: &PathBuf,
    attack: AttackInput,
    config: &ThunderdomeConfig,
) -> AttackResult {
    let started = Instant::now();
    let outcome = execute_attack(binary, &attack, config).await;
    debug!(category = ?attack.category, outcome = ?outcome, "attack finished");
    AttackResult {
        attack,
        outcome,
        duration: started.elapsed(),
    }
}

async fn execute_attack(
    binary: &PathBuf,
    attack: &AttackInput,
    config: &ThunderdomeConfig,
) -> AttackOutcome {
    let mut child = match Command::new(binary)
        .env(
            "TOOL_DEADLINE_MS",
            config.attack_timeout.as_millis().to_string(),
        )
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return AttackOutcome::Panic {
                stderr: format!("failed to spawn tool: {e}"),
            }
        }
    };
    let pid = child.id();

    if let Some(mut stdin) = child.stdin.take() {
        let payload = attack.payload.clone();
        tokio::spawn(async move {
            let _ = stdin.write_all(payload.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });
    }

    let mut stderr = child.stderr.take();
    let stderr_reader = tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        if let Some(pipe) = stderr.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    });

    let deadline = Instant::now() + config.attack_timeout;
    let mut sampler = tokio::time::interval(config.sample_interval);
    sampler.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            status = child.wait() => {
                let stderr_text = stderr_reader.await.unwrap_or_default();
                return classify_exit(status.ok(), &stderr_text);
            }
            _ = sampler.tick() => {
                if let Some(pid) = pid {
                    if let Some(rss) = sample_rss(pid) {
                        if rss > config.memory_cap_bytes {
                            let _ = child.kill().await;
                            return AttackOutcome::Oom { rss_bytes: rss };
                        }
                    }
                }
                if Instant::now() >= deadline {
                    let outcome = classify_overrun(pid);
                    let _ = child.kill().await;
                    return outcome;
                }
            }
        }
    }
}

fn classify_exit(status: Option<std::process::ExitStatus>, stderr: &str) -> AttackOutcome {
    let panicked = stderr.contains("panicked at") || stderr.contains("stack backtrace");
    match status {
        Some(status) if status.success() && !panicked => AttackOutcome::Survived,
        _ => AttackOutcome::Panic {
            stderr: excerpt(stderr, 2000),
        },
    }
}

/// Deadline overrun: a sleeping process with no accumulated CPU time is
/// deadlocked (typically blocked on a pipe); anything still burning CPU is a
/// plain timeout.
fn classify_overrun(pid: Option<u32>) -> AttackOutcome {
    if let Some(pid) = pid {
        if let Some((state, cpu_ticks)) = probe_proc_stat(pid) {
            if state == 'S' && cpu_ticks <= 2 {
                return AttackOutcome::Deadlock;
            }
        }
    }
    AttackOutcome::Timeout
}

fn excerpt(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(target_os = "linux")]
fn sample_rss(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
fn sample_rss(_pid: u32) -> Option<u64> {
    None
}

/// Parse the VmRSS line of a /proc status file into bytes.
fn parse_vm_rss(status: &str) -> Option<u64> {
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn probe_proc_stat(pid: u32) -> Option<(char, u64)> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_proc_stat(&stat)
}

#[cfg(not(target_os = "linux"))]
fn probe_proc_stat(_pid: u32) -> Option<(char, u64)> {
    None
}

/// Parse state and utime+stime ticks out of a /proc stat line. The comm
/// field may embed spaces, so fields are counted after the closing paren.
fn parse_proc_stat(stat: &str) -> Option<(char, u64)> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    let state = fields.first()?.chars().next()?;
    // utime and stime are fields 14 and 15 overall; 11 and 12 after comm.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some((state, utime + stime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attacks::AttackCategory;

    fn attack(payload: &str) -> AttackInput {
        AttackInput {
            category: AttackCategory::NilInput,
            payload: payload.to_string(),
            description: "test attack".to_string(),
        }
    }

    fn config() -> ThunderdomeConfig {
        ThunderdomeConfig {
            max_attacks: 8,
            attack_timeout: Duration::from_millis(500),
            memory_cap_bytes: 100 * 1024 * 1024,
            parallelism: 2,
            sample_interval: Duration::from_millis(50),
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

    #[test]
    fn vm_rss_parses_kilobytes() {
        let status = "Name:\ttool\nVmPeak:\t  2048 kB\nVmRSS:\t  1024 kB\n";
        assert_eq!(parse_vm_rss(status), Some(1024 * 1024));
        assert_eq!(parse_vm_rss("Name:\ttool\n"), None);
    }

    #[test]
    fn proc_stat_parses_state_and_ticks() {
        let stat = "1234 (my tool) S 1 1234 1234 0 -1 4194304 100 0 0 0 7 3 0 0 20 0 1 0 100 1000000 200";
        let (state, ticks) = parse_proc_stat(stat).unwrap();
        assert_eq!(state, 'S');
        assert_eq!(ticks, 10);
    }

    #[test]
    fn fatal_outcomes_are_everything_but_survival() {
        assert!(!AttackOutcome::Survived.is_fatal());
        assert!(AttackOutcome::Timeout.is_fatal());
        assert!(AttackOutcome::Deadlock.is_fatal());
        assert!(AttackOutcome::Oom { rss_bytes: 1 }.is_fatal());
        assert!(AttackOutcome::Panic {
            stderr: String::new()
        }
        .is_fatal());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn surviving_tool_survives() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(
            dir.path(),
            "survivor",
            r#"cat > /dev/null; printf '{"output":"ok","error":""}'"#,
        );
        let harness = Thunderdome::new(config());
        let report = harness.run(&bin, vec![attack(""), attack("data")]).await;
        assert!(!report.fatal);
        assert!(report
            .results
            .iter()
            .all(|r| r.outcome == AttackOutcome::Survived));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn panicking_tool_is_classified_with_stack_trace() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(
            dir.path(),
            "panicker",
            r#"cat > /dev/null; echo "thread 'main' panicked at 'boom', tool.rs:3" >&2; exit 101"#,
        );
        let harness = Thunderdome::new(config());
        let report = harness.run(&bin, vec![attack("")]).await;
        assert!(report.fatal);
        match &report.results[0].outcome {
            AttackOutcome::Panic { stderr } => assert!(stderr.contains("panicked at")),
            other => panic!("expected panic, got {other:?}"),
        }
        assert!(report.format_report().contains("panicked at"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn sleeping_tool_is_a_deadlock() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(dir.path(), "sleeper", "sleep 30");
        let harness = Thunderdome::new(config());
        let report = harness.run(&bin, vec![attack("x")]).await;
        assert!(report.fatal);
        assert_eq!(report.results[0].outcome, AttackOutcome::Deadlock);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn busy_tool_is_a_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(
            dir.path(),
            "spinner",
            "cat > /dev/null; while true; do :; done",
        );
        let harness = Thunderdome::new(config());
        let report = harness.run(&bin, vec![attack("x")]).await;
        assert!(report.fatal);
        assert_eq!(report.results[0].outcome, AttackOutcome::Timeout);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_without_panic_marker_is_a_crash() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(dir.path(), "crasher", "cat > /dev/null; exit 7");
        let harness = Thunderdome::new(config());
        let report = harness.run(&bin, vec![attack("x")]).await;
        assert!(matches!(
            report.results[0].outcome,
            AttackOutcome::Panic { .. }
        ));
    }
}
