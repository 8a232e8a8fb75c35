//! Generated-package templates: runtime wrapper, context, and manifest.
//!
//! The wrapper binary is dependency-free so an offline `cargo build` never
//! touches a registry. Standard input is read as a byte stream with a hard
//! 10 MiB cap; every byte up to the cap, newlines included, reaches the tool
//! unchanged. The JSON envelope is hand-rolled inside the wrapper for the
//! same no-dependency reason.

/// Rust version pinned into every generated manifest.
pub const PINNED_RUST_VERSION: &str = "1.74";

/// Manifest for a generated tool package.
pub fn manifest(name: &str) -> String {
    format!(
        r#"[package]
name = "{name}"
version = "0.1.0"
edition = "2021"
rust-version = "{rust}"

[[bin]]
name = "{name}"
path = "src/main.rs"

[profile.release]
opt-level = 2
strip = true
"#,
        name = name,
        rust = PINNED_RUST_VERSION,
    )
}

/// The `ToolContext` module compiled into every tool package.
///
/// The deadline arrives through `TOOL_DEADLINE_MS` so the wrapper needs no
/// argument parsing; tools poll `is_cancelled`/`checkpoint` from loops.
pub fn context_module() -> &'static str {
    r#"//! Cancellation and deadline handle passed to the tool entry function.

use std::time::{Duration, Instant};

pub struct ToolContext {
    deadline: Option<Instant>,
}

impl ToolContext {
    pub fn from_env() -> Self {
        let deadline = std::env::var("TOOL_DEADLINE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        Self { deadline }
    }

    pub fn is_cancelled(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    pub fn checkpoint(&self) -> Result<(), String> {
        if self.is_cancelled() {
            Err("deadline exceeded".to_string())
        } else {
            Ok(())
        }
    }
}
"#
}

/// The wrapper `main.rs` for a tool whose entry function is `entry`.
pub fn main_module(entry: &str) -> String {
    WRAPPER_TEMPLATE.replace("__TOOL_ENTRY__", entry)
}

const WRAPPER_TEMPLATE: &str = r#"//! Runtime wrapper: stdin -> tool entry -> stdout JSON envelope.

mod context;
mod tool;

use context::ToolContext;
use std::io::{Read, Write};

const MAX_INPUT: u64 = 10 * 1024 * 1024;

fn main() {
    let mut buf = Vec::new();
    let stdin = std::io::stdin();
    // Byte-streamed with a hard cap; newlines survive intact.
    if stdin.lock().take(MAX_INPUT).read_to_end(&mut buf).is_err() {
        emit("", "failed to read standard input");
        return;
    }
    let raw = String::from_utf8_lossy(&buf).into_owned();
    let input = match envelope_input(&raw) {
        Some(inner) => inner,
        None => raw,
    };

    let ctx = ToolContext::from_env();
    match tool::__TOOL_ENTRY__(&ctx, &input) {
        Ok(output) => emit(&output, ""),
        Err(error) => emit("", &error),
    }
}

fn emit(output: &str, error: &str) {
    let mut doc = String::with_capacity(output.len() + error.len() + 32);
    doc.push_str("{\"output\":");
    push_json_string(&mut doc, output);
    doc.push_str(",\"error\":");
    push_json_string(&mut doc, error);
    doc.push('}');
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(doc.as_bytes());
    let _ = stdout.flush();
}

fn push_json_string(doc: &mut String, s: &str) {
    doc.push('"');
    for c in s.chars() {
        match c {
            '"' => doc.push_str("\\\""),
            '\\' => doc.push_str("\\\\"),
            '\n' => doc.push_str("\\n"),
            '\r' => doc.push_str("\\r"),
            '\t' => doc.push_str("\\t"),
            c if (c as u32) < 0x20 => doc.push_str(&format!("\\u{:04x}", c as u32)),
            c => doc.push(c),
        }
    }
    doc.push('"');
}

/// If the raw input is a JSON object with an `input` string field, return
/// that field; otherwise the caller falls back to the raw bytes.
fn envelope_input(raw: &str) -> Option<String> {
    let trimmed = raw.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    let key = trimmed.find("\"input\"")?;
    let after_key = &trimmed[key + "\"input\"".len()..];
    let colon = after_key.find(':')?;
    let value = after_key[colon + 1..].trim_start();
    parse_json_string(value)
}

fn parse_json_string(value: &str) -> Option<String> {
    let mut chars = value.chars();
    if chars.next() != Some('"') {
        return None;
    }
    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Some(out),
            '\\' => match chars.next()? {
                '"' => out.push('"'),
                '\\' => out.push('\\'),
                '/' => out.push('/'),
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                'b' => out.push('\u{0008}'),
                'f' => out.push('\u{000c}'),
                'u' => {
                    let hex: String = chars.by_ref().take(4).collect();
                    let code = u32::from_str_radix(&hex, 16).ok()?;
                    out.push(char::from_u32(code)?);
                }
                _ => return None,
            },
            c => out.push(c),
        }
    }
    None
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_pins_language_version() {
        let m = manifest("json_pretty");
        assert!(m.contains("name = \"json_pretty\""));
        assert!(m.contains(&format!("rust-version = \"{}\"", PINNED_RUST_VERSION)));
        assert!(m.contains("edition = \"2021\""));
    }

    #[test]
    fn wrapper_calls_the_entry_function() {
        let main = main_module("json_pretty");
        assert!(main.contains("tool::json_pretty(&ctx, &input)"));
        assert!(!main.contains("__TOOL_ENTRY__"));
    }

    #[test]
    fn wrapper_caps_input_at_ten_mib() {
        assert!(main_module("x").contains("10 * 1024 * 1024"));
    }

    #[test]
    fn context_module_offers_cancellation() {
        let ctx = context_module();
        assert!(ctx.contains("pub fn is_cancelled"));
        assert!(ctx.contains("pub fn checkpoint"));
        assert!(ctx.contains("TOOL_DEADLINE_MS"));
    }
}
