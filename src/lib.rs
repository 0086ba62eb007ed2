//! Mail Triage
//!
//! Sorts unread mail out of a screening mailbox by holding a short tool-using
//! conversation with a language model for every email.
//!
//! # Overview
//!
//! - **Authentication**: OAuth2 authentication with token caching
//! - **Sessions**: One conversation per email with an explicit action queue
//! - **Orchestration**: Batched rounds (one batch job per round) or a
//!   synchronous single-email loop
//! - **Tools**: `moveEmail` and the opt-in `getPreviousClassification`
//! - **Storage**: Per-sender classification records and a per-day
//!   conversation archive
//!
//! # Example Usage
//!
//! ```no_run
//! use mail_triage::{auth, client::ProductionGmailClient, config::Config, MailGateway};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".mail-triage/token.json".as_ref()
//!     ).await?;
//!
//!     let client = ProductionGmailClient::new(hub, config.scan.max_concurrent_requests);
//!     for mailbox in client.list_mailboxes().await? {
//!         println!("{} -> {}", mailbox.name, mailbox.id);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - Mail gateway trait and the Gmail implementation
//! - [`cli`] - Command-line interface and run wiring
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`llm`] - Model client, batch jobs and response types
//! - [`models`] - Emails, conversation messages and classification records
//! - [`orchestrator`] - Batched and single-session drivers
//! - [`prompt`] - Named steps and their rendered prompts
//! - [`rules`] - Rule and mailbox catalogs
//! - [`secrets`] - API key resolution
//! - [`session`] - Per-email conversation state machine
//! - [`store`] - Classification store and conversation archive
//! - [`tools`] - Tool catalog and dispatcher

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod rules;
pub mod secrets;
pub mod session;
pub mod store;
pub mod tools;

pub use error::{Result, TriageError};

pub use models::{ClassificationRecord, ContentBlock, EmailContent, Message, ToolCall};

pub use config::{BatchConfig, Config, ExecutionConfig, InferenceConfig, MailboxConfig, RunMode};

pub use client::{DryRunGateway, MailGateway, MailboxInfo, ProductionGmailClient};

pub use llm::{AnthropicClient, InferenceClient, InferenceResponse};

pub use orchestrator::{Orchestrator, OrchestratorOptions, RunReport};
pub use session::{Action, Session, SessionState};

pub use rules::{MailboxCatalog, Rule, RuleCatalog};
pub use store::{ClassificationStore, ConversationArchive, JsonClassificationStore};
pub use tools::ToolDispatcher;

pub use cli::{Cli, Commands, ProgressReporter, RunOptions};
