//! Token estimation.
//!
//! Character-based heuristic: ~3.5 characters per token, plus a small
//! per-message overhead for role markers and a per-tool-call overhead
//! for the call envelope. Close enough for budget decisions; the
//! provider reports exact usage after the fact.

use ironquill_core::message::Message;
use ironquill_core::provider::ToolDefinition;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() as f64 / 3.5) as usize
}

/// Per-message estimate: role overhead plus content plus tool calls.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let mut tokens = 3 + estimate_tokens(&message.content);
    for call in &message.tool_calls {
        tokens += 10;
        tokens += estimate_tokens(&call.name);
        tokens += estimate_tokens(&call.arguments.to_string());
    }
    tokens
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| estimate_tokens(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironquill_core::message::ToolCall;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn seven_chars_is_two_tokens() {
        assert_eq!(estimate_tokens("1234567"), 2);
    }

    #[test]
    fn hundred_chars() {
        assert_eq!(estimate_tokens(&"a".repeat(100)), 28);
    }

    #[test]
    fn message_includes_role_overhead() {
        let msg = Message::user("1234567"); // 2 tokens + 3 overhead
        assert_eq!(estimate_message_tokens(&msg), 5);
    }

    #[test]
    fn tool_calls_add_envelope_overhead() {
        let plain = Message::assistant("x");
        let with_call = Message::assistant("x").with_tool_calls(vec![ToolCall {
            id: "tc_1".into(),
            name: "file_read".into(),
            arguments: serde_json::json!({"file_path": "./README.md"}),
        }]);
        assert!(estimate_message_tokens(&with_call) > estimate_message_tokens(&plain) + 10);
    }

    #[test]
    fn tool_definitions_estimate_nonzero() {
        let tools = vec![ToolDefinition {
            name: "shell".into(),
            description: "Run a command".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }];
        assert!(estimate_tools_tokens(&tools) > 0);
        assert_eq!(estimate_tools_tokens(&[]), 0);
    }
}
