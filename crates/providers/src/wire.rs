//! Shared outbound-formatting rules all adapters must honor.
//!
//! The tool-call integrity contract: collect every tool-call id issued
//! by an Assistant message, drop Tool messages whose id is not in that
//! set (orphans), and preserve Assistant→Tool ordering. Providers
//! reject histories that violate this, so it is enforced here once.

use std::collections::{HashMap, HashSet};

use ironquill_core::message::{Message, Role};

/// Ids of every tool call issued by an Assistant message in the history.
pub fn valid_tool_call_ids(messages: &[Message]) -> HashSet<String> {
    let mut ids = HashSet::new();
    for message in messages {
        if message.role == Role::Assistant {
            for call in &message.tool_calls {
                ids.insert(call.id.clone());
            }
        }
    }
    ids
}

/// Map from tool-call id to tool name, for providers that key tool
/// results by function name rather than call id.
pub fn tool_call_names(messages: &[Message]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for message in messages {
        if message.role == Role::Assistant {
            for call in &message.tool_calls {
                names.insert(call.id.clone(), call.name.clone());
            }
        }
    }
    names
}

/// Whether a Tool message is an orphan (its id was never issued).
pub fn is_orphan(message: &Message, valid_ids: &HashSet<String>) -> bool {
    if message.role != Role::Tool {
        return false;
    }
    match &message.tool_call_id {
        Some(id) => !valid_ids.contains(id),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironquill_core::message::ToolCall;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "file_read".into(),
            arguments: serde_json::json!({}),
        }
    }

    #[test]
    fn collects_ids_from_assistant_messages_only() {
        let messages = vec![
            Message::user("hi"),
            Message::assistant("").with_tool_calls(vec![call("tc_1"), call("tc_2")]),
            Message::tool_result("tc_1", "ok"),
        ];
        let ids = valid_tool_call_ids(&messages);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("tc_1"));
        assert!(ids.contains("tc_2"));
    }

    #[test]
    fn orphan_detection() {
        let messages = vec![Message::assistant("").with_tool_calls(vec![call("tc_1")])];
        let ids = valid_tool_call_ids(&messages);

        assert!(!is_orphan(&Message::tool_result("tc_1", "ok"), &ids));
        assert!(is_orphan(&Message::tool_result("tc_X", "ok"), &ids));
        assert!(!is_orphan(&Message::user("not a tool message"), &ids));

        let mut no_id = Message::tool_result("tc_1", "ok");
        no_id.tool_call_id = None;
        assert!(is_orphan(&no_id, &ids));
    }

    #[test]
    fn name_lookup() {
        let messages = vec![Message::assistant("").with_tool_calls(vec![call("tc_7")])];
        let names = tool_call_names(&messages);
        assert_eq!(names.get("tc_7").map(String::as_str), Some("file_read"));
    }
}
