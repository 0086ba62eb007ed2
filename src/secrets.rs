//! Model API credential resolution

use secrecy::SecretString;
use tokio::process::Command;

use crate::config::SecretsConfig;
use crate::error::{Result, TriageError};

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// 1Password CLI used for `op://` references
const SECRET_READER: &str = "op";

/// Load `.env` from the working directory, if present
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment from {:?}", path),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Ignoring unreadable .env file: {}", e),
    }
}

/// Resolve the Anthropic API key
///
/// The environment wins; otherwise the configured secret reference is read
/// through the 1Password CLI. No key at all is a startup error.
pub async fn load_anthropic_key(config: &SecretsConfig) -> Result<SecretString> {
    if let Ok(value) = std::env::var(API_KEY_ENV) {
        if !value.trim().is_empty() {
            tracing::debug!("Using {} from the environment", API_KEY_ENV);
            return Ok(SecretString::from(value.trim().to_string()));
        }
    }

    match &config.anthropic_api_key_ref {
        Some(reference) => {
            tracing::debug!("Reading API key from secret reference");
            let value = read_reference(SECRET_READER, reference).await?;
            Ok(SecretString::from(value))
        }
        None => Err(TriageError::MissingCredential(format!(
            "{} is not set and no secrets.anthropic_api_key_ref is configured",
            API_KEY_ENV
        ))),
    }
}

async fn read_reference(program: &str, reference: &str) -> Result<String> {
    let output = Command::new(program)
        .arg("read")
        .arg(reference)
        .output()
        .await
        .map_err(|e| {
            TriageError::MissingCredential(format!("failed to run `{} read`: {}", program, e))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TriageError::MissingCredential(format!(
            "`{} read` failed: {}",
            program,
            stderr.trim()
        )));
    }

    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() {
        return Err(TriageError::MissingCredential(format!(
            "secret reference {} resolved to an empty value",
            reference
        )));
    }
    Ok(value)
}
