#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ouro-safety** – Static policy check on generated tool source.
//!
//! Generated code is screened before it reaches the compiler: forbidden
//! imports, forbidden calls, spawned tasks with no cancellation path, and
//! explicit aborts all block registration. The check is a source-level scan,
//! not an execution sandbox; subprocess-level resource caps are enforced
//! downstream by the compiler and the adversarial harness.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

//─────────────────────────────
//  Policy and report types
//─────────────────────────────

/// Capabilities the generated tool is allowed to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyPolicy {
    /// Allow reading and writing the filesystem.
    pub allow_filesystem: bool,
    /// Allow opening network connections.
    pub allow_networking: bool,
    /// Allow spawning subprocesses.
    pub allow_exec: bool,
}

/// Classification of a policy violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A module the policy forbids is imported or referenced.
    ForbiddenImport,
    /// A call the policy forbids, including any `unsafe` code.
    ForbiddenCall,
    /// A spawned task with no reachable cancellation handle.
    TaskLeak,
    /// An explicit abort of the process.
    Panic,
    /// Non-blocking style hazard; degrades the score only.
    Warning,
}

impl ViolationKind {
    /// Whether this kind forces `safe = false`.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, ViolationKind::Warning)
    }
}

/// One finding of the checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Finding classification.
    pub kind: ViolationKind,
    /// What was found and why it is a problem.
    pub description: String,
    /// 1-based source line.
    pub line: usize,
}

/// Outcome of checking one source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    /// True when no blocking violation was found.
    pub safe: bool,
    /// 1.0 for clean source, degraded by warnings, 0.0 when unsafe.
    pub score: f64,
    /// Findings, in source order.
    pub violations: Vec<Violation>,
}

impl SafetyReport {
    /// Render the violations as feedback for regeneration.
    pub fn format_report(&self) -> String {
        if self.violations.is_empty() {
            return "no violations".to_string();
        }
        let mut out = String::new();
        for v in &self.violations {
            out.push_str(&format!("- line {}: [{:?}] {}\n", v.line, v.kind, v.description));
        }
        out
    }
}

//─────────────────────────────
//  Rule tables
//─────────────────────────────

/// Modules forbidden under every policy.
const ALWAYS_FORBIDDEN_MODULES: &[&str] =
    &["libc", "std::arch", "core::arch", "std::intrinsics"];

/// Network modules, forbidden unless networking is allowed.
const NETWORK_MODULES: &[&str] = &["std::net", "tokio::net", "reqwest", "hyper", "ureq"];

static PANIC_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(panic!|unreachable!|todo!|unimplemented!)\s*\(").expect("static regex")
});

static UNWRAP_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(unwrap|expect)\s*\(").expect("static regex"));

static SPAWN_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:std::)?thread::spawn|\btokio::(?:task::)?spawn(?:_blocking)?\b")
        .expect("static regex")
});

static CANCEL_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bctx\b|is_cancelled|cancelled\s*\(\)|deadline_exceeded").expect("static regex")
});

/// Destructive filesystem calls, forbidden unless filesystem is allowed.
const FS_DESTRUCTION_CALLS: &[&str] =
    &["remove_dir_all", "set_permissions", "remove_file"];

/// Calls forbidden under every policy; bare paths also match their
/// fully-qualified `std::` spellings by substring.
const ALWAYS_FORBIDDEN_CALLS: &[&str] = &[
    "process::exit",
    "process::abort",
    "mem::transmute",
    "ptr::write",
    "ptr::read",
];

//─────────────────────────────
//  Checker
//─────────────────────────────

/// Static policy checker for generated source.
#[derive(Debug, Clone, Default)]
pub struct SafetyChecker {
    policy: SafetyPolicy,
}

impl SafetyChecker {
    /// Build a checker enforcing `policy`.
    pub fn new(policy: SafetyPolicy) -> Self {
        Self { policy }
    }

    /// Scan `source` and produce a report.
    pub fn check(&self, source: &str) -> SafetyReport {
        let mut violations = Vec::new();

        for (idx, raw_line) in source.lines().enumerate() {
            let line_no = idx + 1;
            let line = strip_line_comment(raw_line);
            if line.trim().is_empty() {
                continue;
            }

            self.check_imports(line, line_no, &mut violations);
            self.check_calls(line, line_no, &mut violations);

            if PANIC_CALL.is_match(line) {
                violations.push(Violation {
                    kind: ViolationKind::Panic,
                    description: "explicit process abort (panic family)".to_string(),
                    line: line_no,
                });
            }
            if UNWRAP_CALL.is_match(line) {
                violations.push(Violation {
                    kind: ViolationKind::Warning,
                    description: "unwrap/expect can abort at runtime; return an error instead"
                        .to_string(),
                    line: line_no,
                });
            }
        }

        self.check_task_leaks(source, &mut violations);

        violations.sort_by_key(|v| v.line);
        let safe = !violations.iter().any(|v| v.kind.is_blocking());
        let score = if safe {
            let warnings = violations.len() as f64;
            (1.0 - warnings * 0.1).max(0.5)
        } else {
            0.0
        };
        if !safe {
            tracing::debug!(
                violations = violations.len(),
                "source rejected by safety policy"
            );
        }
        SafetyReport {
            safe,
            score,
            violations,
        }
    }

    fn check_imports(&self, line: &str, line_no: usize, out: &mut Vec<Violation>) {
        let mut forbidden: Vec<&str> = ALWAYS_FORBIDDEN_MODULES.to_vec();
        if !self.policy.allow_networking {
            forbidden.extend_from_slice(NETWORK_MODULES);
        }
        if !self.policy.allow_exec {
            forbidden.push("std::process::Command");
        }
        if !self.policy.allow_filesystem {
            forbidden.push("std::fs");
            forbidden.push("tokio::fs");
        }
        for module in forbidden {
            // Both `use` declarations and fully qualified paths count.
            if line.contains(&format!("use {}", module)) || line.contains(&format!("{}::", module))
            {
                out.push(Violation {
                    kind: ViolationKind::ForbiddenImport,
                    description: format!("forbidden module `{}`", module),
                    line: line_no,
                });
            }
        }
    }

    fn check_calls(&self, line: &str, line_no: usize, out: &mut Vec<Violation>) {
        for call in ALWAYS_FORBIDDEN_CALLS {
            if line.contains(call) {
                out.push(Violation {
                    kind: ViolationKind::ForbiddenCall,
                    description: format!("forbidden call `{}`", call),
                    line: line_no,
                });
            }
        }
        if !self.policy.allow_filesystem {
            for call in FS_DESTRUCTION_CALLS {
                if line.contains(call) {
                    out.push(Violation {
                        kind: ViolationKind::ForbiddenCall,
                        description: format!("destructive filesystem call `{}`", call),
                        line: line_no,
                    });
                }
            }
        }
        if line.contains("unsafe ") || line.contains("unsafe{") {
            out.push(Violation {
                kind: ViolationKind::ForbiddenCall,
                description: "unsafe code is not permitted in generated tools".to_string(),
                line: line_no,
            });
        }
    }

    /// A spawned task must receive or reference a cancellation handle; a
    /// spawn whose closure body never mentions one will outlive its caller.
    fn check_task_leaks(&self, source: &str, out: &mut Vec<Violation>) {
        for m in SPAWN_CALL.find_iter(source) {
            let line_no = source[..m.start()].bytes().filter(|&b| b == b'\n').count() + 1;
            let body = closure_body_after(source, m.end());
            if !CANCEL_REF.is_match(body) {
                out.push(Violation {
                    kind: ViolationKind::TaskLeak,
                    description:
                        "spawned task has no cancellation path (no ctx reference in its body)"
                            .to_string(),
                    line: line_no,
                });
            }
        }
    }
}

/// Slice out the brace-delimited body following a spawn call site.
///
/// Returns an empty slice when no opening brace is found within the call.
fn closure_body_after(source: &str, from: usize) -> &str {
    let bytes = source.as_bytes();
    let Some(open_rel) = bytes[from..].iter().position(|&b| b == b'{') else {
        return "";
    };
    let open = from + open_rel;
    let mut depth = 0usize;
    for (offset, &b) in bytes[open..].iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return &source[open..=open + offset];
                }
            }
            _ => {}
        }
    }
    &source[open..]
}

/// Drop a `//` line comment, leaving string contents untouched when the
/// marker sits inside a literal is not attempted; this is a heuristic scan.
fn strip_line_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}
