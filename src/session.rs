//! Per-email conversation state
//!
//! A [`Session`] owns the action queue and message history of one email's
//! conversation and moves through an explicit [`SessionState`]:
//!
//! ```text
//! Pending ──step──────────────▶ AwaitingInference ──response──▶ Pending | Done
//!    │                                  ▲                    └─failed──▶ Stalled
//!    └──tool──▶ AwaitingTool ──result───┘
//! ```
//!
//! The queue and the history are append/pop only.

use std::collections::VecDeque;

use crate::error::{Result, TriageError};
use crate::llm::InferenceResponse;
use crate::models::{ClassificationRecord, ContentBlock, EmailContent, Message, Role, ToolCall};

/// A queued unit of work for a session
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// A named conversation step, resolved against the step catalog
    Step(String),
    /// A tool invocation issued by the model
    Tool(ToolCall),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Actions are queued and none is in flight
    Pending,
    /// The last history entry is a user turn waiting for the model
    AwaitingInference,
    /// A tool invocation has been popped and is being executed
    AwaitingTool,
    /// Nothing queued and nothing unresolved
    Done,
    /// Inference failed too often; excluded from further rounds
    Stalled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Stalled)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    email: EmailContent,
    prior: Option<ClassificationRecord>,
    actions: VecDeque<Action>,
    history: Vec<Message>,
    state: SessionState,
    failed_attempts: u32,
}

impl Session {
    /// Start a session with the given named steps queued
    pub fn new(email: EmailContent, prior: Option<ClassificationRecord>, steps: &[String]) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), email, prior, steps)
    }

    pub fn with_id(
        id: String,
        email: EmailContent,
        prior: Option<ClassificationRecord>,
        steps: &[String],
    ) -> Self {
        let actions: VecDeque<Action> = steps.iter().cloned().map(Action::Step).collect();
        let state = if actions.is_empty() {
            SessionState::Done
        } else {
            SessionState::Pending
        };

        Self {
            id,
            email,
            prior,
            actions,
            history: Vec::new(),
            state,
            failed_attempts: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn email(&self) -> &EmailContent {
        &self.email
    }

    pub fn prior(&self) -> Option<&ClassificationRecord> {
        self.prior.as_ref()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn queued_actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// Number of tool invocations waiting in the queue
    pub fn queued_tool_calls(&self) -> usize {
        self.actions
            .iter()
            .filter(|action| matches!(action, Action::Tool(_)))
            .count()
    }

    pub fn has_pending_actions(&self) -> bool {
        self.state == SessionState::Pending
    }

    pub fn is_awaiting_inference(&self) -> bool {
        self.state == SessionState::AwaitingInference
    }

    /// Still able to make progress this run
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Pop the head action
    ///
    /// A popped tool invocation moves the session to `AwaitingTool`; a popped
    /// step leaves it `Pending` until its turn is appended.
    pub fn pop_action(&mut self) -> Result<Action> {
        self.expect_state(SessionState::Pending, "pop an action")?;

        let action = self.actions.pop_front().ok_or_else(|| self.invalid("no queued action to pop"))?;
        if matches!(action, Action::Tool(_)) {
            self.state = SessionState::AwaitingTool;
        }
        Ok(action)
    }

    /// Append the user turn materialized from a named step
    pub fn push_step_turn(&mut self, message: Message) -> Result<()> {
        self.expect_state(SessionState::Pending, "append a step turn")?;
        self.push_user_turn(message)
    }

    /// Append the result of the tool invocation that was popped last
    pub fn push_tool_result(&mut self, tool_use_id: &str, content: &str) -> Result<()> {
        self.expect_state(SessionState::AwaitingTool, "append a tool result")?;
        self.push_user_turn(Message::tool_result(tool_use_id, content))
    }

    fn push_user_turn(&mut self, message: Message) -> Result<()> {
        if message.role != Role::User {
            return Err(self.invalid("step and tool turns must carry the user role"));
        }
        if self.history.last().map(|m| m.role) == Some(Role::User) {
            return Err(self.invalid("two consecutive user turns"));
        }

        self.history.push(message);
        self.state = SessionState::AwaitingInference;
        Ok(())
    }

    /// Append a model response and queue its tool invocation, if any
    ///
    /// A tool invocation is queued ahead of any remaining named steps so its
    /// result directly follows the assistant turn that requested it.
    pub fn apply_response(&mut self, response: &InferenceResponse) -> Result<()> {
        self.expect_state(SessionState::AwaitingInference, "apply a response")?;

        self.history.push(Message::assistant(response.content.clone()));

        if response.wants_tool() {
            let call = response
                .content
                .iter()
                .find_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    _ => None,
                })
                .ok_or_else(|| TriageError::MissingToolCall {
                    response_id: response.id.clone(),
                })?;

            if call.name.trim().is_empty() {
                return Err(TriageError::MissingToolName);
            }

            tracing::debug!("Session {} queued tool call {}", self.id, call.name);
            self.actions.push_front(Action::Tool(call));
        }

        self.state = if self.actions.is_empty() {
            SessionState::Done
        } else {
            SessionState::Pending
        };
        Ok(())
    }

    /// Count a failed inference attempt
    ///
    /// Returns `true` when the session stalled; below `max_attempts` it stays
    /// awaiting inference and is resubmitted in the next round.
    pub fn record_failed_inference(&mut self, max_attempts: u32) -> Result<bool> {
        self.expect_state(SessionState::AwaitingInference, "record a failed inference")?;

        self.failed_attempts += 1;
        if self.failed_attempts >= max_attempts {
            self.state = SessionState::Stalled;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect_state(&self, expected: SessionState, operation: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid(&format!(
                "cannot {} while {:?}",
                operation, self.state
            )))
        }
    }

    fn invalid(&self, reason: &str) -> TriageError {
        TriageError::InvalidTransition {
            session_id: self.id.clone(),
            reason: reason.to_string(),
        }
    }
}
