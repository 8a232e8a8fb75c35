//! Prompt assembly for tool synthesis, regeneration, and test generation.

use ouro_safety::Violation;
use ouro_types::ToolNeed;

/// External just-in-time prompt assembler surface.
///
/// When one is attached and ready, its system prompt supersedes the legacy
/// template; otherwise the generator falls back silently.
pub trait PromptAssembler: Send + Sync {
    /// Whether the assembler can serve prompts right now.
    fn ready(&self) -> bool;

    /// Assemble a system prompt for the given need.
    fn assemble_system_prompt(&self, need: &ToolNeed) -> Option<String>;
}

/// Legacy system prompt used when no assembler is attached.
pub const LEGACY_SYSTEM_PROMPT: &str = "\
You write small, self-contained Rust tool modules.

Contract for every tool:
- Define exactly one public entry function named after the tool, with the \
signature `pub fn NAME(ctx: &ToolContext, input: &str) -> Result<String, String>`.
- Start the file with `use crate::context::ToolContext;`.
- Return errors with `Err(String)`; never panic, never call `unwrap` or \
`expect`, never call `std::process::exit`.
- Do not read files, open sockets, or spawn processes.
- Poll `ctx.checkpoint()?` inside any loop that may run long.
- Use only the standard library.

Reply with a single fenced Rust code block containing the whole module.";

/// System prompt for test synthesis.
pub const TEST_SYSTEM_PROMPT: &str = "\
You write Rust unit tests for a tool module. Cover the empty input, a \
typical input, and one malformed input. Use only assertions on the returned \
Result. Reply with a single fenced Rust code block.";

/// User prompt for a fresh generation.
pub fn generation_prompt(need: &ToolNeed, learnings_context: &str) -> String {
    let mut prompt = String::new();
    if !learnings_context.is_empty() {
        prompt.push_str(learnings_context);
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "Write the tool `{name}`.\n\
         Purpose: {purpose}\n\
         Category: {category}\n\
         Input: {input}\n\
         Output: {output}\n\
         The entry function must be `pub fn {name}(ctx: &ToolContext, input: &str) -> Result<String, String>`.",
        name = need.name,
        purpose = need.purpose,
        category = need.category.as_str(),
        input = need.input_type,
        output = need.output_type,
    ));
    prompt
}

/// User prompt for regeneration after a failed safety check.
pub fn regeneration_prompt(
    need: &ToolNeed,
    previous_source: &str,
    violations: &[Violation],
) -> String {
    let mut report = String::new();
    for v in violations {
        report.push_str(&format!("- line {}: [{:?}] {}\n", v.line, v.kind, v.description));
    }
    format!(
        "The previous version of `{name}` was rejected by the safety policy.\n\
         Violations:\n{report}\n\
         Previous source:\n```rust\n{previous_source}\n```\n\
         Rewrite the tool so every violation is gone. Purpose: {purpose}\n\
         Keep the entry function `pub fn {name}(ctx: &ToolContext, input: &str) -> Result<String, String>`.",
        name = need.name,
        report = report,
        previous_source = previous_source,
        purpose = need.purpose,
    )
}

/// User prompt for test synthesis.
pub fn test_prompt(need: &ToolNeed, source: &str) -> String {
    format!(
        "Write unit tests for this tool. Entry function: `{name}`. \
         Input type: {input}.\n```rust\n{source}\n```",
        name = need.name,
        input = need.input_type,
    )
}
