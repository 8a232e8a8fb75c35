//! Structural validation of generated tool source.
//!
//! Hard errors abort generation: source that cannot be a Rust module at all
//! (empty, unbalanced delimiters, no function items). Everything else
//! accumulates as warnings on the tool; warnings never abort the pipeline.

use once_cell::sync::Lazy;
use regex::Regex;

/// Hard validation failures.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidateError {
    /// The source is empty or whitespace.
    #[error("generated source is empty")]
    EmptySource,
    /// Delimiters do not balance; the source cannot parse.
    #[error("generated source is unparseable: unbalanced delimiters")]
    Unbalanced,
    /// No function items at all.
    #[error("generated source declares no functions")]
    NoFunctions,
}

static FN_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bfn\s+[a-zA-Z_][a-zA-Z0-9_]*\s*\(").expect("static regex"));
static USE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*use\s+([a-zA-Z0-9_:{}, *]+);").expect("static regex"));
static PANIC_FAMILY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(panic!|unreachable!|todo!|unimplemented!)\s*\(").expect("static regex")
});

/// Dangerous modules that earn a warning at validation time; the safety
/// checker decides whether they block.
const DANGEROUS_IMPORTS: &[&str] = &["std::fs", "std::net", "std::process", "libc"];

/// Validate `source` for the tool named `tool_name`.
///
/// Returns the accumulated warnings; hard errors abort.
pub fn validate_source(tool_name: &str, source: &str) -> Result<Vec<String>, ValidateError> {
    if source.trim().is_empty() {
        return Err(ValidateError::EmptySource);
    }
    if !delimiters_balance(source) {
        return Err(ValidateError::Unbalanced);
    }
    if !FN_ITEM.is_match(source) {
        return Err(ValidateError::NoFunctions);
    }

    let mut warnings = Vec::new();

    let entry_re = Regex::new(&format!(
        r"pub\s+fn\s+{}\s*\(\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*:\s*&\s*ToolContext",
        regex::escape(tool_name)
    ))
    .expect("entry regex");
    match entry_re.captures(source) {
        None => {
            let named = Regex::new(&format!(
                r"pub\s+fn\s+{}\s*\(",
                regex::escape(tool_name)
            ))
            .expect("name regex");
            if named.is_match(source) {
                warnings.push(format!(
                    "entry function `{tool_name}` does not take `ctx: &ToolContext` first"
                ));
            } else {
                warnings.push(format!("expected entry function `pub fn {tool_name}` not found"));
            }
        }
        Some(caps) => {
            // Signature shape is right; still insist on the error return.
            let _ = caps;
        }
    }

    if !source.contains("-> Result<") {
        warnings.push("entry function does not return a Result".to_string());
    }

    if PANIC_FAMILY.is_match(source) && !source.contains("catch_unwind") {
        warnings.push("panic without recover".to_string());
    }
    if source.contains("process::exit") || source.contains("process::abort") {
        warnings.push("process exit call".to_string());
    }

    for module in DANGEROUS_IMPORTS {
        if source.contains(&format!("use {module}")) {
            warnings.push(format!("dangerous import `{module}`"));
        }
    }

    warnings.extend(unused_imports(source));

    if !source.contains('?') && !source.contains("map_err") && !source.contains("match ") {
        warnings.push("no error handling found".to_string());
    }

    Ok(warnings)
}

/// Imports whose final segment never appears again in the source.
///
/// Usage is inferred from path expressions: `use std::fmt::Write;` is used
/// when `Write` occurs anywhere outside that use line.
fn unused_imports(source: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    for line in source.lines() {
        let Some(caps) = USE_LINE.captures(line) else {
            continue;
        };
        let path = caps[1].trim();
        // Grouped or glob imports are not tracked.
        if path.contains('{') || path.contains('*') {
            continue;
        }
        let Some(last) = path.rsplit("::").next().map(str::trim) else {
            continue;
        };
        let uses = source
            .lines()
            .filter(|l| !l.trim_start().starts_with("use "))
            .any(|l| l.contains(last));
        if !uses {
            warnings.push(format!("unused import `{path}`"));
        }
    }
    warnings
}

/// Balance check over `()`, `[]`, `{}`, skipping string literals, char
/// literals, and line comments.
fn delimiters_balance(source: &str) -> bool {
    let mut stack = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                // Consume the string literal, escapes included.
                while let Some(s) = chars.next() {
                    match s {
                        '\\' => {
                            chars.next();
                        }
                        '"' => break,
                        _ => {}
                    }
                }
            }
            '\'' => {
                // Char literal or lifetime; consume a short span.
                if let Some(&next) = chars.peek() {
                    if next == '\\' {
                        chars.next();
                        chars.next();
                        chars.next();
                    } else {
                        let mut lookahead = chars.clone();
                        lookahead.next();
                        if lookahead.peek() == Some(&'\'') {
                            chars.next();
                            chars.next();
                        }
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                while let Some(&s) = chars.peek() {
                    if s == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"use crate::context::ToolContext;

pub fn json_pretty(ctx: &ToolContext, input: &str) -> Result<String, String> {
    ctx.checkpoint()?;
    let value: i64 = input.trim().parse().map_err(|e| format!("{e}"))?;
    Ok(value.to_string())
}
"#;

    #[test]
    fn clean_source_validates_without_warnings() {
        let warnings = validate_source("json_pretty", GOOD).unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn empty_source_is_a_hard_error() {
        assert_eq!(validate_source("t", "   \n"), Err(ValidateError::EmptySource));
    }

    #[test]
    fn unbalanced_source_is_a_hard_error() {
        assert_eq!(
            validate_source("t", "pub fn t() { if x { }"),
            Err(ValidateError::Unbalanced)
        );
    }

    #[test]
    fn source_without_functions_is_a_hard_error() {
        assert_eq!(
            validate_source("t", "pub const X: i32 = 1;"),
            Err(ValidateError::NoFunctions)
        );
    }

    #[test]
    fn missing_entry_function_warns() {
        let warnings = validate_source("expected_name", GOOD).unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.contains("expected entry function")));
    }

    #[test]
    fn missing_context_parameter_warns() {
        let src = "pub fn t(input: &str) -> Result<String, String> { Ok(input.to_string()) }";
        let warnings = validate_source("t", src).unwrap();
        assert!(warnings.iter().any(|w| w.contains("&ToolContext")));
    }

    #[test]
    fn missing_result_return_warns() {
        let src = "use crate::context::ToolContext;\npub fn t(ctx: &ToolContext, input: &str) -> String { input.to_string() }";
        let warnings = validate_source("t", src).unwrap();
        assert!(warnings.iter().any(|w| w.contains("Result")));
    }

    #[test]
    fn panic_and_exit_warn_but_do_not_abort() {
        let src = "pub fn t(ctx: &ToolContext, input: &str) -> Result<String, String> { panic!(\"x\"); }";
        let warnings = validate_source("t", src).unwrap();
        assert!(warnings.iter().any(|w| w.contains("panic")));
    }

    #[test]
    fn unused_import_is_reported() {
        let src = "use std::collections::HashMap;\npub fn t(ctx: &ToolContext, input: &str) -> Result<String, String> { Ok(input.into()) }";
        let warnings = validate_source("t", src).unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.contains("unused import `std::collections::HashMap`")));
    }

    #[test]
    fn used_import_is_not_reported() {
        let src = "use std::collections::HashMap;\npub fn t(ctx: &ToolContext, input: &str) -> Result<String, String> {\n    let m: HashMap<u8, u8> = HashMap::new();\n    Ok(format!(\"{}\", m.len()))\n}";
        let warnings = validate_source("t", src).unwrap();
        assert!(!warnings.iter().any(|w| w.contains("unused import")));
    }

    #[test]
    fn braces_inside_strings_do_not_unbalance() {
        let src = r#"pub fn t(ctx: &ToolContext, input: &str) -> Result<String, String> { Ok("{".to_string()) }"#;
        assert!(validate_source("t", src).is_ok());
    }

    #[test]
    fn no_error_handling_warns() {
        let src = "use crate::context::ToolContext;\npub fn t(ctx: &ToolContext, input: &str) -> Result<String, String> { Ok(input.to_uppercase()) }";
        let warnings = validate_source("t", src).unwrap();
        assert!(warnings.iter().any(|w| w.contains("no error handling")));
    }
}
