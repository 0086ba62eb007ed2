use anyhow::Result;
use clap::Parser;
use indicatif::MultiProgress;
use mail_triage::cli::{self, Cli, Commands, RunOptions};
use mail_triage::config::Config;
use mail_triage::error::TriageError;
use mail_triage::orchestrator::RunReport;
use mail_triage::rules::{MailboxCatalog, RuleCatalog};
use mail_triage::secrets;
use mail_triage::store::JsonClassificationStore;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Ok(mut buffer) = self.buffer.lock() {
            if !buffer.is_empty() {
                let msg = String::from_utf8_lossy(&buffer);
                let msg = msg.trim_end_matches('\n');
                if !msg.is_empty() {
                    let _ = self.multi.println(msg);
                }
                buffer.clear();
            }
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("\nFor help, run: mail-triage --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Both reqwest and the Gmail connector use rustls; pin one crypto provider
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    secrets::load_dotenv();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mail_triage=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mail_triage=info,warn"))
    };

    // Log lines print above progress spinners
    let multi_progress = Arc::new(MultiProgress::new());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter {
            multi: Arc::clone(&multi_progress),
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if let Some(parent) = cli.token_cache.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            if force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let hub = mail_triage::auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            // Must name a granted scope to avoid a second consent prompt
            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope("https://www.googleapis.com/auth/gmail.modify")
                .doit()
                .await?;
            println!(
                "Connected to account: {}",
                profile.email_address.unwrap_or_default()
            );

            Ok(())
        }

        Commands::Run {
            single,
            limit,
            dry_run,
        } => {
            if dry_run {
                println!("Running in DRY RUN mode - no messages will be moved");
            }
            if let Some(parent) = cli.token_cache.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let report = cli::run_triage(
                &cli,
                RunOptions {
                    single,
                    limit,
                    dry_run,
                },
                (*multi_progress).clone(),
                CancellationToken::new(),
            )
            .await?;

            print_summary(&report);
            Ok(())
        }

        Commands::SyncMailboxes => {
            if let Some(parent) = cli.token_cache.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let ids = cli::sync_mailboxes(&cli, (*multi_progress).clone()).await?;
            let config = Config::load(&cli.config).await?;
            let mailboxes = MailboxCatalog::from_config(&config.mailboxes);

            println!("Stored {} mailbox ids in {:?}", ids.len(), cli.config);
            println!("Managed mailboxes ({}*):", config.mailboxes.managed_prefix);
            for name in mailboxes.managed_names() {
                println!("  {} -> {}", name, mailboxes.id_of(name).unwrap_or("-"));
            }
            Ok(())
        }

        Commands::Status => {
            let config = Config::load(&cli.config).await?;
            let store = JsonClassificationStore::load(&config.storage.classifications_path()).await?;
            let rules = RuleCatalog::new(config.rules.clone());

            if store.is_empty() {
                println!("No classifications stored yet.");
                println!("Store file: {:?}", store.path());
                return Ok(());
            }

            println!("\n========================================");
            println!("Stored classifications ({})", store.len());
            println!("========================================");
            for (address, record) in store.records() {
                println!(
                    "{:<40} {:<20} {:<20} {}",
                    address,
                    record.classification,
                    rules.mailbox_for(&record.classification).unwrap_or("-"),
                    record.last_processed.format("%Y-%m-%d %H:%M:%S")
                );
            }
            println!("========================================");
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(TriageError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(&output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nPlease edit this file to customize your settings.");
            println!("Key settings to review:");
            println!("  - mailboxes.source: mailbox that unread mail is triaged from");
            println!("  - rules: classifications and the move:<mailbox> action for each");
            println!("  - secrets.anthropic_api_key_ref: used when ANTHROPIC_API_KEY is unset");
            println!("Then run `mail-triage sync-mailboxes` to fill in mailbox ids.");

            Ok(())
        }
    }
}

fn print_summary(report: &RunReport) {
    println!("\n========================================");
    println!("Triage Summary");
    println!("========================================");
    println!("Emails processed: {}", report.sessions);
    println!("Completed: {}", report.done);
    println!("Messages moved: {}", report.moves);
    println!("Inference rounds: {}", report.rounds);
    if !report.stalled.is_empty() {
        println!("Stalled ({}):", report.stalled.len());
        for subject in &report.stalled {
            println!("  - {}", subject);
        }
    }
    if let Some(path) = &report.archive_path {
        println!("Conversations archived to: {:?}", path);
    }
    println!("========================================");
}
