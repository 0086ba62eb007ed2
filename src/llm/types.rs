//! Wire types for the Messages and Message Batches APIs

use serde::{Deserialize, Serialize};

use crate::models::{ContentBlock, Message};
use crate::tools::ToolDefinition;

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// A completed model turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub id: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub usage: Usage,
}

impl InferenceResponse {
    pub fn wants_tool(&self) -> bool {
        self.stop_reason == Some(StopReason::ToolUse)
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ToolChoice {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub disable_parallel_tool_use: bool,
}

impl ToolChoice {
    pub fn auto_sequential() -> Self {
        Self {
            kind: "auto",
            disable_parallel_tool_use: true,
        }
    }
}

/// Body of a Messages API call, also used as the `params` of a batch item
#[derive(Debug, Clone, Serialize)]
pub(crate) struct MessagesRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub system: &'a str,
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchCreateRequest<'a> {
    pub requests: Vec<BatchItemParams<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchItemParams<'a> {
    pub custom_id: &'a str,
    pub params: MessagesRequest<'a>,
}

/// One conversation submitted as part of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub custom_id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    InProgress,
    Canceling,
    Ended,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    #[serde(default)]
    pub processing: u64,
    #[serde(default)]
    pub succeeded: u64,
    #[serde(default)]
    pub errored: u64,
    #[serde(default)]
    pub canceled: u64,
    #[serde(default)]
    pub expired: u64,
}

/// Server-side state of a batch job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchHandle {
    pub id: String,
    pub processing_status: ProcessingStatus,
    #[serde(default)]
    pub request_counts: RequestCounts,
    #[serde(default)]
    pub results_url: Option<String>,
}

impl BatchHandle {
    pub fn is_ended(&self) -> bool {
        self.processing_status == ProcessingStatus::Ended
    }
}

/// One line of a batch results file
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BatchResultLine {
    #[serde(default)]
    pub custom_id: Option<String>,
    pub result: BatchResultBody,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum BatchResultBody {
    Succeeded { message: InferenceResponse },
    Errored { error: serde_json::Value },
    Canceled,
    Expired,
}

/// Per-item outcome of a batch job
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItemResult {
    Succeeded(InferenceResponse),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub custom_id: Option<String>,
    pub result: BatchItemResult,
}

impl From<BatchResultLine> for BatchOutcome {
    fn from(line: BatchResultLine) -> Self {
        let result = match line.result {
            BatchResultBody::Succeeded { message } => BatchItemResult::Succeeded(message),
            BatchResultBody::Errored { error } => BatchItemResult::Failed(error.to_string()),
            BatchResultBody::Canceled => BatchItemResult::Failed("canceled".to_string()),
            BatchResultBody::Expired => BatchItemResult::Failed("expired".to_string()),
        };
        Self {
            custom_id: line.custom_id,
            result,
        }
    }
}
