//! Mail gateway over the Gmail API
//!
//! Gmail labels play the role of mailboxes: listing a mailbox lists the
//! messages carrying its label, and moving a message swaps the source label
//! for the target label.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use google_gmail1::api::{Message, MessagePart, ModifyMessageRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::auth::GmailHub;
use crate::error::{Result, TriageError};
use crate::models::EmailContent;

const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
const LABELS_SCOPE: &str = "https://www.googleapis.com/auth/gmail.labels";

/// Mailbox info returned from the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxInfo {
    pub id: String,
    pub name: String,
}

/// Mail operations the triage engine depends on
#[async_trait]
pub trait MailGateway: Send + Sync {
    /// Fetch up to `limit` unread messages from a mailbox
    async fn list_unread(&self, mailbox_id: &str, limit: u32) -> Result<Vec<EmailContent>>;

    /// Move a message into another mailbox
    async fn move_message(&self, message_id: &str, target_mailbox_id: &str) -> Result<()>;

    /// List every mailbox in the account
    async fn list_mailboxes(&self) -> Result<Vec<MailboxInfo>>;
}

/// Production Gmail gateway
///
/// Message fetches run concurrently behind a semaphore; transient API
/// errors are retried with exponential backoff.
pub struct ProductionGmailClient {
    hub: GmailHub,
    rate_limiter: Arc<Semaphore>,
    max_concurrent: usize,
    source_mailbox_id: Option<String>,
}

impl ProductionGmailClient {
    /// Create a new Gmail gateway
    ///
    /// # Arguments
    /// * `hub` - Gmail API hub instance
    /// * `max_concurrent` - Maximum concurrent message fetches
    pub fn new(hub: GmailHub, max_concurrent: usize) -> Self {
        Self {
            hub,
            rate_limiter: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            source_mailbox_id: None,
        }
    }

    /// Label removed from a message when it is moved
    pub fn with_source_mailbox(mut self, mailbox_id: impl Into<String>) -> Self {
        self.source_mailbox_id = Some(mailbox_id.into());
        self
    }

    /// Fetch a single message with retry logic
    async fn fetch_single_with_retry(&self, id: &str) -> Result<EmailContent> {
        let _permit = self.rate_limiter.acquire().await.map_err(|e| {
            TriageError::Unknown(format!("Failed to acquire rate limit permit: {}", e))
        })?;

        let message = Self::with_retry("get_message", 3, || async {
            let (_, message) = self
                .hub
                .users()
                .messages_get("me", id)
                .format("full")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;
            Ok(message)
        })
        .await?;

        parse_email_content(message)
    }

    /// Check if an error is retryable
    fn should_retry(error: &TriageError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(operation_name: &str, max_retries: u32, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    // Honour the server's pacing when it gives one
                    let wait = match &e {
                        TriageError::RateLimitExceeded { retry_after } => {
                            std::cmp::max(delay, Duration::from_secs(*retry_after))
                        }
                        _ => delay,
                    };
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Parse a full-format Gmail message into the fields a conversation needs
fn parse_email_content(message: Message) -> Result<EmailContent> {
    let id = message
        .id
        .ok_or_else(|| TriageError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let payload = message
        .payload
        .ok_or_else(|| TriageError::InvalidMessageFormat(format!("Message {} has no payload", id)))?;

    let mut subject = String::new();
    let mut from_address = String::new();

    for header in payload.headers.iter().flatten() {
        if let (Some(name), Some(value)) = (&header.name, &header.value) {
            match name.to_lowercase().as_str() {
                "from" => {
                    // Parse "Name <email@example.com>" format
                    from_address = match parse_email_header(value) {
                        Some((_, email)) => email,
                        None => value.trim().to_string(),
                    };
                }
                "subject" => subject = value.clone(),
                _ => {}
            }
        }
    }

    if from_address.is_empty() {
        return Err(TriageError::InvalidMessageFormat(format!(
            "Message {} has no From header",
            id
        )));
    }

    let mut text_parts = Vec::new();
    collect_text_parts(&payload, &mut text_parts);

    Ok(EmailContent {
        id,
        subject,
        preview: message.snippet.unwrap_or_default(),
        from_address,
        text: text_parts.join("\n"),
    })
}

/// Collect decoded `text/plain` bodies, depth first
fn collect_text_parts(part: &MessagePart, out: &mut Vec<String>) {
    let is_plain = part
        .mime_type
        .as_deref()
        .map(|mime| mime.eq_ignore_ascii_case("text/plain"))
        .unwrap_or(false);

    if is_plain {
        if let Some(data) = part.body.as_ref().and_then(|body| body.data.as_ref()) {
            let text = String::from_utf8_lossy(data);
            if !text.trim().is_empty() {
                out.push(text.into_owned());
            }
        }
    }

    for child in part.parts.iter().flatten() {
        collect_text_parts(child, out);
    }
}

/// Parse email header in "Name <email@example.com>" format
fn parse_email_header(header: &str) -> Option<(String, String)> {
    if let Some(start) = header.find('<') {
        if let Some(end) = header.find('>') {
            if end > start {
                let name = header[..start].trim().trim_matches('"').to_string();
                let email = header[start + 1..end].trim().to_string();
                return Some((name, email));
            }
        }
    }
    None
}

#[async_trait]
impl MailGateway for ProductionGmailClient {
    async fn list_unread(&self, mailbox_id: &str, limit: u32) -> Result<Vec<EmailContent>> {
        let response = Self::with_retry("list_unread", 3, || async {
            let (_, response) = self
                .hub
                .users()
                .messages_list("me")
                .add_label_ids(mailbox_id)
                .q("is:unread")
                .max_results(limit)
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;
            Ok(response)
        })
        .await?;

        let ids: Vec<String> = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|message| message.id)
            .take(limit as usize)
            .collect();

        info!("Found {} unread messages in {}", ids.len(), mailbox_id);

        // fetch_single_with_retry already holds a semaphore permit per request
        let emails: Vec<EmailContent> = stream::iter(ids)
            .map(|id| async move { self.fetch_single_with_retry(&id).await })
            .buffer_unordered(self.max_concurrent)
            .try_collect()
            .await?;

        debug!("Fetched {} messages", emails.len());
        Ok(emails)
    }

    async fn move_message(&self, message_id: &str, target_mailbox_id: &str) -> Result<()> {
        Self::with_retry("move_message", 3, || async {
            let request = ModifyMessageRequest {
                add_label_ids: Some(vec![target_mailbox_id.to_string()]),
                remove_label_ids: self.source_mailbox_id.clone().map(|source| vec![source]),
            };

            self.hub
                .users()
                .messages_modify(request, "me", message_id)
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;
            Ok(())
        })
        .await
    }

    async fn list_mailboxes(&self) -> Result<Vec<MailboxInfo>> {
        Self::with_retry("list_mailboxes", 3, || async {
            // Wrap API call in timeout to prevent indefinite hangs
            let timeout_duration = Duration::from_secs(30);
            let api_call = self.hub.users().labels_list("me").add_scope(LABELS_SCOPE).doit();

            let (_, response) = match tokio::time::timeout(timeout_duration, api_call).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("Gmail API labels call timed out after {:?}", timeout_duration);
                    return Err(TriageError::NetworkError(format!(
                        "API call timed out after {:?}",
                        timeout_duration
                    )));
                }
            };

            let mailboxes: Vec<MailboxInfo> = response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(|label| match (label.id, label.name) {
                    (Some(id), Some(name)) => Some(MailboxInfo { id, name }),
                    _ => None,
                })
                .collect();

            debug!("Successfully parsed {} mailboxes", mailboxes.len());
            Ok(mailboxes)
        })
        .await
    }
}

/// Gateway wrapper that reads through but only logs moves
pub struct DryRunGateway {
    inner: Arc<dyn MailGateway>,
}

impl DryRunGateway {
    pub fn new(inner: Arc<dyn MailGateway>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl MailGateway for DryRunGateway {
    async fn list_unread(&self, mailbox_id: &str, limit: u32) -> Result<Vec<EmailContent>> {
        self.inner.list_unread(mailbox_id, limit).await
    }

    async fn move_message(&self, message_id: &str, target_mailbox_id: &str) -> Result<()> {
        info!("[dry run] would move {} to {}", message_id, target_mailbox_id);
        Ok(())
    }

    async fn list_mailboxes(&self) -> Result<Vec<MailboxInfo>> {
        self.inner.list_mailboxes().await
    }
}
