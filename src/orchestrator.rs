//! Drives triage sessions through inference and tool rounds
//!
//! Both variants run on a single logical thread of control. The batched
//! variant resolves one action per session, then sends every session that is
//! awaiting inference in one batch job, so a round costs one provider
//! round-trip however many emails are in flight. Any error aborts the whole
//! run and nothing of it is persisted.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Result, TriageError};
use crate::llm::{wait_for_batch, BatchItemResult, BatchRequest, InferenceClient};
use crate::models::{EmailContent, Message};
use crate::prompt::{render_step, StepKind};
use crate::session::{Action, Session, SessionState};
use crate::store::{ClassificationStore, ConversationArchive};
use crate::tools::ToolDispatcher;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Named steps queued on every new session
    pub initial_steps: Vec<String>,
    /// Delay between batch status polls
    pub poll_interval: Duration,
    /// Failed batch items a session tolerates before it stalls
    pub max_item_attempts: u32,
}

impl OrchestratorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_steps: config.inference.initial_steps.clone(),
            poll_interval: Duration::from_secs(config.inference.poll_interval_secs),
            max_item_attempts: config.batch.max_item_attempts,
        }
    }
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            initial_steps: vec![StepKind::Triage.to_string()],
            poll_interval: Duration::from_secs(5),
            max_item_attempts: 1,
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sessions: usize,
    pub done: usize,
    /// Subjects of sessions that stalled on failed inference
    pub stalled: Vec<String>,
    pub moves: usize,
    /// Inference rounds (batch jobs or synchronous calls)
    pub rounds: usize,
    pub archive_path: Option<PathBuf>,
}

impl RunReport {
    /// Fold another run's numbers into this one
    pub fn absorb(&mut self, other: RunReport) {
        self.sessions += other.sessions;
        self.done += other.done;
        self.stalled.extend(other.stalled);
        self.moves += other.moves;
        self.rounds += other.rounds;
        if other.archive_path.is_some() {
            self.archive_path = other.archive_path;
        }
    }
}

pub struct Orchestrator {
    inference: Arc<dyn InferenceClient>,
    dispatcher: ToolDispatcher,
    store: Box<dyn ClassificationStore>,
    archive: ConversationArchive,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        dispatcher: ToolDispatcher,
        store: Box<dyn ClassificationStore>,
        archive: ConversationArchive,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            inference,
            dispatcher,
            store,
            archive,
            options,
        }
    }

    pub fn store(&self) -> &dyn ClassificationStore {
        self.store.as_ref()
    }

    /// Start a session, injecting the sender's prior classification
    pub fn open_session(&self, email: EmailContent) -> Session {
        let prior = self.store.get(&email.from_address);
        Session::new(email, prior, &self.options.initial_steps)
    }

    /// Pop and resolve the head action of a pending session
    ///
    /// Leaves the session awaiting inference. Returns whether a message was
    /// moved.
    pub async fn advance(&mut self, session: &mut Session) -> Result<bool> {
        match session.pop_action()? {
            Action::Step(name) => {
                let step: StepKind = name.parse().map_err(|e| {
                    error!("Session {} queued unknown step '{}'", session.id(), name);
                    e
                })?;
                debug!("Session {}: step {}", session.id(), step);

                let message = render_step(step, session.email(), session.prior(), self.dispatcher.rules());
                session.push_step_turn(message)?;
                Ok(false)
            }
            Action::Tool(call) => {
                debug!("Session {}: tool {}", session.id(), call.name);

                let outcome = self.dispatcher.execute(&call, self.store.as_mut()).await?;
                session.push_tool_result(&call.id, &outcome.content)?;
                Ok(outcome.moved)
            }
        }
    }

    /// Drive one email end to end with synchronous inference calls
    pub async fn run_single(&mut self, email: EmailContent) -> Result<RunReport> {
        let mut session = self.open_session(email);
        let mut moves = 0;
        let mut rounds = 0;

        info!("Triaging '{}' from {}", session.email().subject, session.email().from_address);

        while session.has_pending_actions() {
            if self.advance(&mut session).await? {
                moves += 1;
            }

            let response = self.inference.complete(session.history()).await?;
            rounds += 1;
            session.apply_response(&response)?;
        }

        let sessions = [session];
        let archive_path = self.persist(&sessions).await?;

        Ok(Self::report(&sessions, moves, rounds, archive_path))
    }

    /// Drive many emails together, one batch job per round
    ///
    /// Polling for each batch job stops with [`TriageError::BatchCancelled`]
    /// when `cancel` fires.
    pub async fn run_batched(
        &mut self,
        emails: Vec<EmailContent>,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let mut sessions: Vec<Session> = emails.into_iter().map(|email| self.open_session(email)).collect();
        let index: HashMap<String, usize> = sessions
            .iter()
            .enumerate()
            .map(|(i, session)| (session.id().to_string(), i))
            .collect();

        let mut moves = 0;
        let mut rounds = 0;

        loop {
            for session in sessions.iter_mut().filter(|s| s.has_pending_actions()) {
                if self.advance(session).await? {
                    moves += 1;
                }
            }

            let requests: Vec<BatchRequest> = sessions
                .iter()
                .filter(|session| session.is_awaiting_inference())
                .map(|session| BatchRequest {
                    custom_id: session.id().to_string(),
                    messages: session.history().to_vec(),
                })
                .collect();

            if requests.is_empty() {
                info!("No sessions awaiting inference, finishing after {} rounds", rounds);
                break;
            }

            rounds += 1;
            info!("Round {}: submitting {} conversations", rounds, requests.len());

            let handle = self.inference.submit_batch(&requests).await?;
            let handle = wait_for_batch(
                self.inference.as_ref(),
                handle,
                self.options.poll_interval,
                cancel,
            )
            .await?;
            let outcomes = self.inference.batch_results(&handle).await?;

            let mut answered = HashSet::new();
            for outcome in outcomes {
                let custom_id = outcome.custom_id.ok_or_else(|| {
                    error!("Batch {} returned a result without custom_id", handle.id);
                    TriageError::MissingCorrelationId
                })?;
                let position = *index
                    .get(&custom_id)
                    .ok_or_else(|| TriageError::UnknownCorrelationId(custom_id.clone()))?;

                match outcome.result {
                    BatchItemResult::Succeeded(response) => {
                        sessions[position].apply_response(&response)?;
                        answered.insert(position);
                    }
                    BatchItemResult::Failed(reason) => {
                        warn!(
                            "Inference failed for '{}' (session {}): {}",
                            sessions[position].email().subject,
                            custom_id,
                            reason
                        );
                    }
                }
            }

            for request in &requests {
                let position = index[&request.custom_id];
                if answered.contains(&position) {
                    continue;
                }
                let session = &mut sessions[position];
                if session.record_failed_inference(self.options.max_item_attempts)? {
                    warn!(
                        "Session {} for '{}' stalled after {} failed attempts",
                        session.id(),
                        session.email().subject,
                        session.failed_attempts()
                    );
                }
            }
        }

        let archive_path = self.persist(&sessions).await?;
        Ok(Self::report(&sessions, moves, rounds, archive_path))
    }

    /// Write classification records and archive the run's conversations
    async fn persist(&self, sessions: &[Session]) -> Result<Option<PathBuf>> {
        self.store.flush().await?;

        let conversations: Vec<(String, Vec<Message>)> = sessions
            .iter()
            .filter(|session| !session.history().is_empty())
            .map(|session| (session.email().subject.clone(), session.history().to_vec()))
            .collect();

        if conversations.is_empty() {
            return Ok(None);
        }

        let path = self
            .archive
            .record(Utc::now().date_naive(), &conversations)
            .await?;
        Ok(Some(path))
    }

    fn report(sessions: &[Session], moves: usize, rounds: usize, archive_path: Option<PathBuf>) -> RunReport {
        RunReport {
            sessions: sessions.len(),
            done: sessions
                .iter()
                .filter(|s| s.state() == SessionState::Done)
                .count(),
            stalled: sessions
                .iter()
                .filter(|s| s.state() == SessionState::Stalled)
                .map(|s| s.email().subject.clone())
                .collect(),
            moves,
            rounds,
            archive_path,
        }
    }
}
