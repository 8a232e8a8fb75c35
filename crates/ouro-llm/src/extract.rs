//! Extraction of structured payloads out of raw model replies.
//!
//! Models wrap code in fences and JSON in prose; these helpers recover the
//! payload without trusting the reply's framing. `extract_json` walks the
//! text with a brace/bracket counter that is string- and escape-aware, so a
//! `}` inside a string literal never closes the document early.

/// Extract the first fenced code block from `reply`.
///
/// The opening fence may carry a language tag (```` ```rust ````). When no
/// fence is present the trimmed reply itself is returned, since models often
/// answer with bare code.
pub fn extract_code_block(reply: &str) -> String {
    let Some(open) = reply.find("```") else {
        return reply.trim().to_string();
    };
    let after_fence = &reply[open + 3..];
    // Skip the language tag, if any, up to the first newline.
    let body_start = match after_fence.find('\n') {
        Some(idx) => idx + 1,
        None => return reply.trim().to_string(),
    };
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim_end().to_string(),
        None => body.trim_end().to_string(),
    }
}

/// Extract the first complete JSON object or array from `reply`.
///
/// Scans for the first `{` or `[`, then tracks nesting depth while honoring
/// string literals and backslash escapes. Returns `None` when no balanced
/// document exists.
pub fn extract_json(reply: &str) -> Option<&str> {
    let bytes = reply.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{' || b == b'[')?;
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&reply[start..start + offset + 1]);
                }
            }
            b'{' | b'[' | b'}' | b']' => {
                // Mixed nesting inside the document; the outer counter only
                // tracks the opening delimiter kind, inner pairs of the other
                // kind are balanced by construction in valid JSON.
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_block_with_language_tag() {
        let reply = "Here you go:\n```rust\npub fn x() {}\n```\nEnjoy!";
        assert_eq!(extract_code_block(reply), "pub fn x() {}");
    }

    #[test]
    fn code_block_without_tag() {
        let reply = "```\nline one\nline two\n```";
        assert_eq!(extract_code_block(reply), "line one\nline two");
    }

    #[test]
    fn bare_reply_is_returned_trimmed() {
        assert_eq!(extract_code_block("  fn main() {}  "), "fn main() {}");
    }

    #[test]
    fn unterminated_fence_takes_rest() {
        let reply = "```rust\nfn x() {}\n";
        assert_eq!(extract_code_block(reply), "fn x() {}");
    }

    #[test]
    fn json_object_with_prose_around() {
        let reply = r#"Sure! {"a": 1, "b": [2, 3]} hope that helps"#;
        assert_eq!(extract_json(reply), Some(r#"{"a": 1, "b": [2, 3]}"#));
    }

    #[test]
    fn json_braces_inside_strings_do_not_close() {
        let reply = r#"{"code": "if x { y } else { z }", "n": 1}"#;
        assert_eq!(extract_json(reply), Some(reply));
    }

    #[test]
    fn json_escaped_quotes_are_honored() {
        let reply = r#"{"s": "she said \"}\" loudly"}"#;
        assert_eq!(extract_json(reply), Some(reply));
    }

    #[test]
    fn json_array_document() {
        let reply = "prefix [1, 2, {\"k\": \"v\"}] suffix";
        assert_eq!(extract_json(reply), Some("[1, 2, {\"k\": \"v\"}]"));
    }

    #[test]
    fn unbalanced_json_yields_none() {
        assert_eq!(extract_json(r#"{"a": 1"#), None);
        assert_eq!(extract_json("no json here"), None);
    }
}
