use forge_core::ToolCallId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One durable entry in a session's conversation (`spec.md` §3's
/// "Message"), persisted as part of [`crate::store::SessionRecord`].
///
/// Distinct from [`crate::prompt::Block`]: the prompt stream also
/// carries file and ephemeral blocks that exist only for the
/// model-facing content stream and are rebuilt fresh from this
/// conversation (plus whatever files the session re-opens) at the
/// start of each turn rather than persisted themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRecord>,
        /// Set when this message is the partially-streamed text of a
        /// turn that was cancelled mid-stream, rather than a turn that
        /// ran to completion — `spec.md` §4.6/Scenario E.
        #[serde(default)]
        cancelled: bool,
    },
    Tool {
        tool_call_id: ToolCallId,
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
}

/// A bound tool invocation as recorded on an [`Message::Assistant`]
/// entry — the `{role, content, tool_calls?, tool_call_id?}` shape in
/// `spec.md` §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: ToolCallId,
    pub name: String,
    pub input: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_round_trips() {
        let msg = Message::User { content: "fix the bug".into() };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Message::User { content } if content == "fix the bug"));
    }

    #[test]
    fn assistant_message_with_tool_calls_round_trips() {
        let msg = Message::Assistant {
            content: "let me check".into(),
            tool_calls: vec![ToolCallRecord {
                id: ToolCallId("call-1".into()),
                name: "scout".into(),
                input: serde_json::json!({}),
            }],
            cancelled: false,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        match back {
            Message::Assistant { tool_calls, .. } => assert_eq!(tool_calls.len(), 1),
            _ => panic!("expected an assistant message"),
        }
    }

    #[test]
    fn missing_cancelled_field_defaults_to_false_for_old_records() {
        let json = r#"{"role":"assistant","content":"partial output"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        match msg {
            Message::Assistant { cancelled, .. } => assert!(!cancelled),
            _ => panic!("expected an assistant message"),
        }
    }

    #[test]
    fn cancelled_assistant_message_round_trips() {
        let msg = Message::Assistant { content: "partial".into(), tool_calls: Vec::new(), cancelled: true };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        match back {
            Message::Assistant { cancelled, .. } => assert!(cancelled),
            _ => panic!("expected an assistant message"),
        }
    }
}
