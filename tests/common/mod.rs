//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use mail_triage::client::{MailGateway, MailboxInfo};
use mail_triage::error::{Result, TriageError};
use mail_triage::llm::{
    BatchHandle, BatchItemResult, BatchOutcome, BatchRequest, InferenceClient, InferenceResponse,
    ProcessingStatus, RequestCounts, StopReason, Usage,
};
use mail_triage::models::{ContentBlock, EmailContent, Message, MessageContent};
use mail_triage::rules::{MailboxCatalog, Rule, RuleCatalog};
use mockall::mock;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

pub const FINANCE_ID: &str = "Label_Finance";
pub const NEWSLETTER_ID: &str = "Label_Newsletters";
pub const SOURCE_ID: &str = "Label_Screener";

/// Create a test email with an empty body
pub fn create_test_email(id: &str, from: &str, subject: &str) -> EmailContent {
    EmailContent {
        id: id.to_string(),
        subject: subject.to_string(),
        preview: format!("Preview of {}", subject),
        from_address: from.to_string(),
        text: String::new(),
    }
}

pub fn create_test_rules() -> RuleCatalog {
    RuleCatalog::new(vec![
        Rule {
            name: "Invoices".to_string(),
            classification: "Finance".to_string(),
            actions: vec!["move:AI/Finance".to_string()],
        },
        Rule {
            name: "Newsletters".to_string(),
            classification: "Newsletter".to_string(),
            actions: vec!["move:AI/Newsletters".to_string()],
        },
    ])
}

pub fn create_test_mailboxes() -> MailboxCatalog {
    let mut ids = BTreeMap::new();
    ids.insert("AI/Finance".to_string(), FINANCE_ID.to_string());
    ids.insert("AI/Newsletters".to_string(), NEWSLETTER_ID.to_string());
    ids.insert("Screener".to_string(), SOURCE_ID.to_string());
    MailboxCatalog::new("AI/", ids)
}

/// moveEmail input as the model would send it
pub fn move_input(email_id: &str, target: &str, address: &str, classification: &str) -> serde_json::Value {
    json!({
        "emailId": email_id,
        "targetMailbox": target,
        "emailAddress": address,
        "classification": classification
    })
}

/// Plain text of a message, panicking on block content
pub fn text_of(message: &Message) -> &str {
    match &message.content {
        MessageContent::Text(text) => text,
        MessageContent::Blocks(_) => panic!("expected a plain text message"),
    }
}

/// Content of the tool result carried by a message
pub fn tool_result_of(message: &Message) -> Option<&str> {
    match &message.content {
        MessageContent::Blocks(blocks) => blocks.iter().find_map(|block| match block {
            ContentBlock::ToolResult { content, .. } => Some(content.as_str()),
            _ => None,
        }),
        MessageContent::Text(_) => None,
    }
}

// Mock implementation of MailGateway for testing
mock! {
    pub Gateway {}

    #[async_trait::async_trait]
    impl MailGateway for Gateway {
        async fn list_unread(&self, mailbox_id: &str, limit: u32) -> Result<Vec<EmailContent>>;
        async fn move_message(&self, message_id: &str, target_mailbox_id: &str) -> Result<()>;
        async fn list_mailboxes(&self) -> Result<Vec<MailboxInfo>>;
    }
}

/// One scripted model turn
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Tool { name: String, input: serde_json::Value },
    Fail(String),
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Reply::Text(text.to_string())
    }

    pub fn tool(name: &str, input: serde_json::Value) -> Self {
        Reply::Tool {
            name: name.to_string(),
            input,
        }
    }

    pub fn fail(reason: &str) -> Self {
        Reply::Fail(reason.to_string())
    }
}

/// How batch result files should be corrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    MissingCustomId,
    UnknownCustomId,
}

/// Inference client answering from per-email reply scripts
///
/// Conversations are matched to their script by the email id embedded in
/// the triage prompt. Batches end as soon as they are submitted unless
/// `never_ending` is set.
#[derive(Default)]
pub struct ScriptedInference {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    batches: Mutex<Vec<Vec<BatchRequest>>>,
    results: Mutex<HashMap<String, Vec<BatchOutcome>>>,
    completions: Mutex<Vec<Vec<Message>>>,
    corruption: Option<Corruption>,
    never_ending: bool,
    responses: AtomicU32,
    pub cancels: AtomicU32,
}

impl ScriptedInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, email_id: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(email_id.to_string(), replies.into());
        self
    }

    pub fn with_corruption(mut self, corruption: Corruption) -> Self {
        self.corruption = Some(corruption);
        self
    }

    pub fn never_ending(mut self) -> Self {
        self.never_ending = true;
        self
    }

    /// Every submitted batch, in order
    pub fn batches(&self) -> Vec<Vec<BatchRequest>> {
        self.batches.lock().unwrap().clone()
    }

    /// Every synchronous call, in order
    pub fn completions(&self) -> Vec<Vec<Message>> {
        self.completions.lock().unwrap().clone()
    }

    fn next_reply(&self, messages: &[Message]) -> Reply {
        let email_id = email_id_of(messages);
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&email_id)
            .and_then(|replies| replies.pop_front())
            .unwrap_or_else(|| panic!("no scripted reply left for email {}", email_id))
    }

    fn respond(&self, reply: Reply) -> std::result::Result<InferenceResponse, String> {
        let n = self.responses.fetch_add(1, Ordering::SeqCst);
        let id = format!("msg_{}", n);
        match reply {
            Reply::Text(text) => Ok(InferenceResponse {
                id,
                content: vec![ContentBlock::Text { text }],
                stop_reason: Some(StopReason::EndTurn),
                usage: Usage::default(),
            }),
            Reply::Tool { name, input } => Ok(InferenceResponse {
                id,
                content: vec![ContentBlock::ToolUse {
                    id: format!("toolu_{}", n),
                    name,
                    input,
                }],
                stop_reason: Some(StopReason::ToolUse),
                usage: Usage::default(),
            }),
            Reply::Fail(reason) => Err(reason),
        }
    }

    fn handle(id: &str, status: ProcessingStatus) -> BatchHandle {
        BatchHandle {
            id: id.to_string(),
            processing_status: status,
            request_counts: RequestCounts::default(),
            results_url: None,
        }
    }
}

/// Email id named in the opening triage prompt
fn email_id_of(messages: &[Message]) -> String {
    let first = messages.first().expect("conversation has no messages");
    text_of(first)
        .split("with the id ")
        .nth(1)
        .and_then(|rest| rest.split('.').next())
        .expect("opening turn names no email id")
        .to_string()
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn complete(&self, messages: &[Message]) -> Result<InferenceResponse> {
        self.completions.lock().unwrap().push(messages.to_vec());
        let reply = self.next_reply(messages);
        self.respond(reply).map_err(TriageError::InferenceFailure)
    }

    async fn submit_batch(&self, requests: &[BatchRequest]) -> Result<BatchHandle> {
        let mut batches = self.batches.lock().unwrap();
        let batch_id = format!("msgbatch_{}", batches.len());
        batches.push(requests.to_vec());
        drop(batches);

        let mut outcomes = Vec::new();
        for request in requests {
            let reply = self.next_reply(&request.messages);
            let result = match self.respond(reply) {
                Ok(response) => BatchItemResult::Succeeded(response),
                Err(reason) => BatchItemResult::Failed(reason),
            };
            let custom_id = match self.corruption {
                Some(Corruption::MissingCustomId) => None,
                Some(Corruption::UnknownCustomId) => Some("not-a-session".to_string()),
                None => Some(request.custom_id.clone()),
            };
            outcomes.push(BatchOutcome { custom_id, result });
        }
        self.results.lock().unwrap().insert(batch_id.clone(), outcomes);

        let status = if self.never_ending {
            ProcessingStatus::InProgress
        } else {
            ProcessingStatus::Ended
        };
        Ok(Self::handle(&batch_id, status))
    }

    async fn batch_status(&self, batch_id: &str) -> Result<BatchHandle> {
        let status = if self.never_ending {
            ProcessingStatus::InProgress
        } else {
            ProcessingStatus::Ended
        };
        Ok(Self::handle(batch_id, status))
    }

    async fn batch_results(&self, handle: &BatchHandle) -> Result<Vec<BatchOutcome>> {
        Ok(self
            .results
            .lock()
            .unwrap()
            .remove(&handle.id)
            .unwrap_or_default())
    }

    async fn cancel_batch(&self, batch_id: &str) -> Result<BatchHandle> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(Self::handle(batch_id, ProcessingStatus::Canceling))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_email() {
        let email = create_test_email("m-1", "a@x.com", "Invoice");
        assert_eq!(email.id, "m-1");
        assert_eq!(email.from_address, "a@x.com");
        assert!(email.text.is_empty());
    }

    #[test]
    fn test_email_id_of_triage_prompt() {
        let messages = vec![Message::user_text(
            "This email has been sent from email address a@x.com with the id m-1.\n\nPlease",
        )];
        assert_eq!(email_id_of(&messages), "m-1");
    }

    #[test]
    fn test_mailboxes_fixture() {
        let mailboxes = create_test_mailboxes();
        assert_eq!(mailboxes.resolve_target("AI/Finance"), Some(FINANCE_ID));
        assert_eq!(mailboxes.resolve_target("Screener"), None);
    }
}
