use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fields of an unread email that a triage conversation works from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailContent {
    pub id: String,
    pub subject: String,
    pub preview: String,
    pub from_address: String,
    pub text: String,
}

/// Last known classification for a sender address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub classification: String,
    pub last_processed: DateTime<Utc>,
}

/// Conversation role. System text travels separately from the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A typed block inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// Message content is either plain text or a list of typed blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
            }]),
        }
    }

    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Tool invocation blocks carried by this message, in order.
    pub fn tool_uses(&self) -> Vec<ToolCall> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// A model-issued request to run a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text_message_serializes_as_string() {
        let message = Message::user_text("hello");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn test_tool_result_message_shape() {
        let message = Message::tool_result("toolu_01", "Email moved successfully");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": "toolu_01",
                    "content": "Email moved successfully"
                }]
            })
        );
    }

    #[test]
    fn test_assistant_blocks_deserialize() {
        let raw = json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Moving it."},
                {"type": "tool_use", "id": "toolu_9", "name": "moveEmail", "input": {"emailId": "m1"}}
            ]
        });
        let message: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(message.role, Role::Assistant);

        let calls = message.tool_uses();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "moveEmail");
        assert_eq!(calls[0].input["emailId"], "m1");
    }

    #[test]
    fn test_classification_record_roundtrip() {
        let record = ClassificationRecord {
            classification: "Finance".to_string(),
            last_processed: Utc::now(),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: ClassificationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
