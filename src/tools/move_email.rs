use chrono::Utc;
use serde::Deserialize;

use super::ToolOutcome;
use crate::client::MailGateway;
use crate::error::Result;
use crate::rules::{MailboxCatalog, RuleCatalog};
use crate::store::ClassificationStore;

pub const MOVED: &str = "Email moved successfully";
pub const INVALID_MAILBOX: &str = "Invalid mailbox name";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveEmailInput {
    pub email_id: String,
    pub target_mailbox: String,
    pub email_address: String,
    pub classification: String,
}

/// Record the classification, then move the message if the target is valid
///
/// The record is written before the mailbox is checked and is not rolled
/// back if the move fails.
pub(super) async fn run(
    gateway: &dyn MailGateway,
    mailboxes: &MailboxCatalog,
    rules: &RuleCatalog,
    input: &MoveEmailInput,
    store: &mut dyn ClassificationStore,
) -> Result<ToolOutcome> {
    store.put(&input.email_address, &input.classification, Utc::now());

    if let Some(expected) = rules.mailbox_for(&input.classification) {
        if expected != input.target_mailbox {
            tracing::warn!(
                "Classification '{}' maps to '{}' but the model chose '{}'",
                input.classification,
                expected,
                input.target_mailbox
            );
        }
    }

    let Some(target_id) = mailboxes.resolve_target(&input.target_mailbox) else {
        tracing::warn!(
            "Rejected move of {} to invalid mailbox '{}'",
            input.email_id,
            input.target_mailbox
        );
        return Ok(ToolOutcome::reply(INVALID_MAILBOX));
    };

    gateway.move_message(&input.email_id, target_id).await?;
    tracing::info!("Moved {} to {}", input.email_id, input.target_mailbox);

    Ok(ToolOutcome {
        content: MOVED.to_string(),
        moved: true,
    })
}
