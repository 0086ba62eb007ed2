//! Named conversation steps and the user turns they render into

use std::fmt;
use std::str::FromStr;

use crate::error::TriageError;
use crate::models::{ClassificationRecord, EmailContent, Message};
use crate::rules::RuleCatalog;

/// Catalog of named conversation steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Ask the model to file the email using the rule catalog
    Triage,
    /// Ask the model for a short summary of the email
    Summarize,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Triage => "triage",
            StepKind::Summarize => "summarize",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "triage" => Ok(StepKind::Triage),
            "summarize" => Ok(StepKind::Summarize),
            other => Err(TriageError::UnknownStep(other.to_string())),
        }
    }
}

/// Materialize a named step into the user turn sent to the model
pub fn render_step(
    step: StepKind,
    email: &EmailContent,
    prior: Option<&ClassificationRecord>,
    rules: &RuleCatalog,
) -> Message {
    match step {
        StepKind::Triage => Message::user_text(triage_prompt(email, prior, rules)),
        StepKind::Summarize => {
            Message::user_text("Please summarize the email in 2 sentences or less.")
        }
    }
}

fn triage_prompt(
    email: &EmailContent,
    prior: Option<&ClassificationRecord>,
    rules: &RuleCatalog,
) -> String {
    let mut prompt = format!(
        "This email has been sent from email address {} with the id {}.\n\n\
         Please take appropriate steps to put the email in the correct mailbox.\n\n\
         Here are the potential rules and classifications:\n{}\n\n",
        email.from_address,
        email.id,
        rules.render()
    );

    if let Some(record) = prior {
        prompt.push_str(&format!(
            "The previous classification of this email was {}.\n",
            record.classification
        ));
    }

    prompt.push_str(&format!(
        "Here is the subject line: {}\nHere is the preview: {}\n",
        email.subject, email.preview
    ));

    if !email.text.is_empty() {
        prompt.push_str(&format!("Here is the body:\n{}\n", email.text));
    }

    prompt
}
