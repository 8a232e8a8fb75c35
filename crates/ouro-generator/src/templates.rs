//! Schema computation and fallback test templates.

use ouro_types::ToolNeed;

/// Input/output schema recorded alongside a generated tool.
pub fn compute_schema(need: &ToolNeed) -> serde_json::Value {
    serde_json::json!({
        "name": need.name,
        "description": need.purpose,
        "category": need.category.as_str(),
        "input": { "type": need.input_type },
        "output": { "type": need.output_type },
        "version": 1,
    })
}

/// Fallback test file used when model-based test synthesis fails.
///
/// Keyed by the declared input type so the typical-input case is at least
/// shaped right.
pub fn fallback_tests(need: &ToolNeed) -> String {
    let name = &need.name;
    let typical_input = match need.input_type.as_str() {
        "json" => r#"{\"items\": [1, 2, 3]}"#,
        "number" => "42",
        "lines" => r#"alpha\nbeta\ngamma"#,
        _ => "typical input",
    };
    format!(
        r#"use crate::context::ToolContext;

#[cfg(test)]
mod tests {{
    use super::*;

    fn ctx() -> ToolContext {{
        ToolContext::from_env()
    }}

    #[test]
    fn handles_empty_input() {{
        // Empty input must produce a Result, never abort.
        let _ = {name}(&ctx(), "");
    }}

    #[test]
    fn handles_typical_input() {{
        let result = {name}(&ctx(), "{typical_input}");
        assert!(result.is_ok() || result.is_err());
    }}

    #[test]
    fn rejects_garbage_gracefully() {{
        let _ = {name}(&ctx(), "\u{{0}}\u{{1}}garbage\u{{7f}}");
    }}
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ouro_types::ToolCategory;

    fn need(input_type: &str) -> ToolNeed {
        ToolNeed {
            name: "sample_tool".to_string(),
            purpose: "does sample things".to_string(),
            input_type: input_type.to_string(),
            output_type: "string".to_string(),
            triggers: vec![],
            priority: 0.5,
            confidence: 0.8,
            reasoning: String::new(),
            category: ToolCategory::Utility,
        }
    }

    #[test]
    fn schema_carries_types_and_version() {
        let schema = compute_schema(&need("json"));
        assert_eq!(schema["name"], "sample_tool");
        assert_eq!(schema["input"]["type"], "json");
        assert_eq!(schema["version"], 1);
    }

    #[test]
    fn fallback_tests_call_the_entry_function() {
        let tests = fallback_tests(&need("json"));
        assert!(tests.contains("sample_tool(&ctx()"));
        assert!(tests.contains("handles_empty_input"));
        assert!(tests.contains("items"));
    }

    #[test]
    fn fallback_tests_vary_by_input_type() {
        assert!(fallback_tests(&need("number")).contains("\"42\""));
        assert!(fallback_tests(&need("string")).contains("typical input"));
    }
}
