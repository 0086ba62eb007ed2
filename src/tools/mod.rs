//! Tool catalog and dispatcher
//!
//! The dispatcher turns a model-issued [`ToolCall`] into a side effect on the
//! mail gateway or the classification store and returns the short string
//! that becomes the tool-result content.

mod lookup;
mod move_email;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::client::MailGateway;
use crate::error::{Result, TriageError};
use crate::models::ToolCall;
use crate::rules::{MailboxCatalog, RuleCatalog};
use crate::store::ClassificationStore;

pub use lookup::{LookupInput, NO_CLASSIFICATION};
pub use move_email::{MoveEmailInput, INVALID_MAILBOX, MOVED};

pub const MOVE_EMAIL: &str = "moveEmail";
pub const PREVIOUS_CLASSIFICATION: &str = "getPreviousClassification";

/// A tool as advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Tools advertised to the model
///
/// The lookup tool is always dispatchable but only advertised on request.
pub fn catalog(include_lookup: bool) -> Vec<ToolDefinition> {
    let mut tools = vec![ToolDefinition {
        name: MOVE_EMAIL.to_string(),
        description: "Move an email to a different mailbox".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "emailId": {
                    "type": "string",
                    "description": "The ID of the email to move"
                },
                "targetMailbox": {
                    "type": "string",
                    "description": "The mailbox to move the email to"
                },
                "emailAddress": {
                    "type": "string",
                    "description": "The address of the email to move"
                },
                "classification": {
                    "type": "string",
                    "description": "The classification of the email"
                }
            },
            "required": ["emailId", "targetMailbox", "emailAddress", "classification"]
        }),
    }];

    if include_lookup {
        tools.push(ToolDefinition {
            name: PREVIOUS_CLASSIFICATION.to_string(),
            description: "Get the previous classification of an email".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "emailAddress": {
                        "type": "string",
                        "description": "The address of the email to get the previous classification of"
                    }
                },
                "required": ["emailAddress"]
            }),
        });
    }

    tools
}

/// Result of one tool execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Tool-result text returned to the model
    pub content: String,
    /// Whether a message was moved
    pub moved: bool,
}

impl ToolOutcome {
    fn reply(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            moved: false,
        }
    }
}

/// Executes tool invocations against the gateway and the store
pub struct ToolDispatcher {
    gateway: Arc<dyn MailGateway>,
    mailboxes: MailboxCatalog,
    rules: RuleCatalog,
}

impl ToolDispatcher {
    pub fn new(gateway: Arc<dyn MailGateway>, mailboxes: MailboxCatalog, rules: RuleCatalog) -> Self {
        Self {
            gateway,
            mailboxes,
            rules,
        }
    }

    pub fn rules(&self) -> &RuleCatalog {
        &self.rules
    }

    /// Run one tool invocation
    ///
    /// Unknown tool names and malformed input are errors; a rejected mailbox
    /// name is not, it comes back as the tool result.
    pub async fn execute(
        &self,
        call: &ToolCall,
        store: &mut dyn ClassificationStore,
    ) -> Result<ToolOutcome> {
        tracing::debug!("Executing tool {} ({})", call.name, call.id);

        match call.name.as_str() {
            MOVE_EMAIL => {
                let input: MoveEmailInput = parse_input(call)?;
                move_email::run(
                    self.gateway.as_ref(),
                    &self.mailboxes,
                    &self.rules,
                    &input,
                    store,
                )
                .await
            }
            PREVIOUS_CLASSIFICATION => {
                let input: LookupInput = parse_input(call)?;
                Ok(lookup::run(&input, store))
            }
            other => {
                tracing::error!("Model requested unknown tool {}", other);
                Err(TriageError::UnknownTool(other.to_string()))
            }
        }
    }
}

fn parse_input<T: DeserializeOwned>(call: &ToolCall) -> Result<T> {
    serde_json::from_value(call.input.clone()).map_err(|e| TriageError::InvalidToolInput {
        tool: call.name.clone(),
        reason: e.to_string(),
    })
}
