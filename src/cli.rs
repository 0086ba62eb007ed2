//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth;
use crate::client::{DryRunGateway, MailGateway, ProductionGmailClient};
use crate::config::{Config, RunMode};
use crate::error::{Result, TriageError};
use crate::llm::{AnthropicClient, InferenceSettings};
use crate::orchestrator::{Orchestrator, OrchestratorOptions, RunReport};
use crate::rules::{MailboxCatalog, RuleCatalog};
use crate::secrets;
use crate::store::{ConversationArchive, JsonClassificationStore};
use crate::tools::{self, ToolDispatcher};

#[derive(Parser, Debug)]
#[command(name = "mail-triage")]
#[command(version)]
#[command(about = "Language-model email triage for Gmail", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".mail-triage/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Triage unread mail in the source mailbox
    Run {
        /// Process emails one at a time with synchronous model calls
        #[arg(long)]
        single: bool,

        /// Maximum number of unread emails to fetch
        #[arg(short, long)]
        limit: Option<u32>,

        /// Dry run mode (classify but don't move anything)
        #[arg(long)]
        dry_run: bool,
    },

    /// Refresh the mailbox name -> id table in the config file
    SyncMailboxes,

    /// Show stored sender classifications
    Status,

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a MultiProgress with the tracing writer so log lines print above spinners
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Flags of the `run` command
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub single: bool,
    pub limit: Option<u32>,
    pub dry_run: bool,
}

/// Cancel `token` on Ctrl-C, and after `deadline` when one is given
pub fn spawn_cancel_triggers(token: CancellationToken, deadline: Option<Duration>) {
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling batch wait");
            on_signal.cancel();
        }
    });

    if let Some(deadline) = deadline {
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    warn!("Batch wait deadline of {:?} reached", deadline);
                    token.cancel();
                }
            }
        });
    }
}

/// Fetch unread mail from the source mailbox and triage it
///
/// # Steps
/// 1. Load configuration and resolve the model API key
/// 2. Authenticate with Gmail and resolve the source mailbox
/// 3. Fetch unread messages
/// 4. Run the batched or single-session orchestrator
pub async fn run_triage(
    cli: &Cli,
    options: RunOptions,
    multi: MultiProgress,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let reporter = ProgressReporter::with_multi_progress(multi);

    // Step 1: configuration and credentials
    let config_spinner = reporter.add_spinner("Loading configuration...");
    let mut config = Config::load(&cli.config).await?;
    if options.dry_run {
        config.execution.dry_run = true;
    }
    if options.single {
        config.execution.mode = RunMode::Single;
    }
    if let Some(limit) = options.limit {
        config.scan.max_unread = limit;
    }
    config.validate()?;
    let api_key = secrets::load_anthropic_key(&config.secrets).await?;
    reporter.finish_spinner(&config_spinner, &format!("Configuration loaded from {:?}", cli.config));

    // Step 2: Gmail
    let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    reporter.finish_spinner(&auth_spinner, "Gmail API authenticated");

    let mailboxes = MailboxCatalog::from_config(&config.mailboxes);
    let source_id = mailboxes
        .id_of(&config.mailboxes.source)
        .ok_or_else(|| {
            TriageError::ConfigError(format!(
                "Source mailbox '{}' has no id; run `mail-triage sync-mailboxes` first",
                config.mailboxes.source
            ))
        })?
        .to_string();

    let rules = RuleCatalog::new(config.rules.clone());
    for rule in rules.rules() {
        if let Some(target) = rule.target_mailbox() {
            if mailboxes.resolve_target(target).is_none() {
                warn!("Rule '{}' targets '{}', which moves will reject", rule.name, target);
            }
        }
    }

    let production: Arc<dyn MailGateway> = Arc::new(
        ProductionGmailClient::new(hub, config.scan.max_concurrent_requests)
            .with_source_mailbox(source_id.clone()),
    );
    let gateway: Arc<dyn MailGateway> = if config.execution.dry_run {
        Arc::new(DryRunGateway::new(production))
    } else {
        production
    };

    // Step 3: unread mail
    let fetch_spinner = reporter.add_spinner(&format!(
        "Fetching unread mail from {}...",
        config.mailboxes.source
    ));
    let emails = gateway.list_unread(&source_id, config.scan.max_unread).await?;
    reporter.finish_spinner(&fetch_spinner, &format!("Found {} unread emails", emails.len()));

    if emails.is_empty() {
        info!("Nothing to triage");
        return Ok(RunReport::default());
    }

    // Step 4: orchestrate
    let tools = tools::catalog(config.inference.enable_lookup_tool);
    let settings = InferenceSettings::from_config(&config.inference, tools);
    let inference = Arc::new(AnthropicClient::new(
        api_key,
        &config.inference.api_base,
        Duration::from_secs(config.inference.request_timeout_secs),
        settings,
    )?);

    let store = JsonClassificationStore::load(&config.storage.classifications_path()).await?;
    let mut orchestrator = Orchestrator::new(
        inference,
        ToolDispatcher::new(gateway, mailboxes, rules),
        Box::new(store),
        ConversationArchive::new(config.storage.data_dir.clone()),
        OrchestratorOptions::from_config(&config),
    );

    let triage_spinner = reporter.add_spinner(&format!("Triaging {} emails...", emails.len()));
    let report = match config.execution.mode {
        RunMode::Batched => {
            spawn_cancel_triggers(
                cancel.clone(),
                config.batch.wait_timeout_secs.map(Duration::from_secs),
            );
            orchestrator.run_batched(emails, &cancel).await?
        }
        RunMode::Single => {
            let mut total = RunReport::default();
            for email in emails {
                total.absorb(orchestrator.run_single(email).await?);
            }
            total
        }
    };
    reporter.finish_spinner(&triage_spinner, &format!("Triaged {} emails", report.sessions));

    Ok(report)
}

/// List provider mailboxes and store the name -> id table in the config file
pub async fn sync_mailboxes(cli: &Cli, multi: MultiProgress) -> Result<BTreeMap<String, String>> {
    let reporter = ProgressReporter::with_multi_progress(multi);

    let mut config = Config::load(&cli.config).await?;

    let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    reporter.finish_spinner(&auth_spinner, "Gmail API authenticated");

    let list_spinner = reporter.add_spinner("Listing mailboxes...");
    let client = ProductionGmailClient::new(hub, config.scan.max_concurrent_requests);
    let ids = mailbox_table(client.list_mailboxes().await?.into_iter().map(|m| (m.name, m.id)));
    reporter.finish_spinner(&list_spinner, &format!("Found {} mailboxes", ids.len()));

    if !ids.contains_key(&config.mailboxes.source) {
        warn!(
            "Source mailbox '{}' does not exist in this account",
            config.mailboxes.source
        );
    }

    config.mailboxes.ids = ids.clone();
    config.save(&cli.config).await?;
    Ok(ids)
}

fn mailbox_table(entries: impl Iterator<Item = (String, String)>) -> BTreeMap<String, String> {
    entries.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::parse_from(["mail-triage", "run", "--single", "--limit", "5", "--dry-run"]);
        match cli.command {
            Commands::Run {
                single,
                limit,
                dry_run,
            } => {
                assert!(single);
                assert_eq!(limit, Some(5));
                assert!(dry_run);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.config, PathBuf::from("config.toml"));
    }

    #[test]
    fn test_parse_global_options() {
        let cli = Cli::parse_from([
            "mail-triage",
            "--config",
            "/etc/triage.toml",
            "-v",
            "sync-mailboxes",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("/etc/triage.toml"));
        assert!(matches!(cli.command, Commands::SyncMailboxes));
    }

    #[test]
    fn test_mailbox_table_sorted_by_name() {
        let ids = mailbox_table(
            vec![
                ("Screener".to_string(), "Label_2".to_string()),
                ("AI/Finance".to_string(), "Label_1".to_string()),
            ]
            .into_iter(),
        );
        let names: Vec<&String> = ids.keys().collect();
        assert_eq!(names, vec!["AI/Finance", "Screener"]);
    }

    #[tokio::test]
    async fn test_deadline_cancels_token() {
        let token = CancellationToken::new();
        spawn_cancel_triggers(token.clone(), Some(Duration::from_millis(10)));

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
        assert!(token.is_cancelled());
    }
}
