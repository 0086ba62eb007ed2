use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, TriageError};
use crate::rules::Rule;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub mailboxes: MailboxConfig,
    #[serde(default = "default_rules")]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            inference: InferenceConfig::default(),
            batch: BatchConfig::default(),
            mailboxes: MailboxConfig::default(),
            rules: default_rules(),
            storage: StorageConfig::default(),
            secrets: SecretsConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_max_unread")]
    pub max_unread: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_unread: default_max_unread(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Named steps every new session starts with
    #[serde(default = "default_initial_steps")]
    pub initial_steps: Vec<String>,
    /// Advertise the classification lookup tool to the model
    #[serde(default)]
    pub enable_lookup_tool: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            api_base: default_api_base(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            initial_steps: default_initial_steps(),
            enable_lookup_tool: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Failed inference attempts a session may accumulate before it stalls
    #[serde(default = "default_max_item_attempts")]
    pub max_item_attempts: u32,
    /// Deadline for batch waits, counted from the start of the run; unset
    /// means poll until every job ends
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_item_attempts: default_max_item_attempts(),
            wait_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Mailbox that unread mail is triaged from
    #[serde(default = "default_source_mailbox")]
    pub source: String,
    /// Only mailboxes under this prefix may be move targets
    #[serde(default = "default_managed_prefix")]
    pub managed_prefix: String,
    /// Mailbox name -> provider mailbox id
    #[serde(default)]
    pub ids: BTreeMap<String, String>,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            source: default_source_mailbox(),
            managed_prefix: default_managed_prefix(),
            ids: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn classifications_path(&self) -> PathBuf {
        self.data_dir.join("classifications.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    /// Secret reference (e.g. `op://Vault/Item/field`) read when the
    /// environment does not carry the key
    #[serde(default)]
    pub anthropic_api_key_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Batched,
    Single,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub mode: RunMode,
}

fn default_max_unread() -> u32 {
    100
}

fn default_max_concurrent() -> usize {
    10
}

fn default_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_system_prompt() -> String {
    "You are an email triage assistant. For every email you are shown, decide which \
     rule applies and use the moveEmail tool to file it into the matching mailbox, \
     passing the classification of the rule you applied. Only use mailbox names that \
     appear in the rules."
        .to_string()
}

fn default_api_base() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_initial_steps() -> Vec<String> {
    vec!["triage".to_string()]
}

fn default_max_item_attempts() -> u32 {
    1
}

fn default_source_mailbox() -> String {
    "Screener".to_string()
}

fn default_managed_prefix() -> String {
    "AI/".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".mail-triage")
}

fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "Receipts and invoices".to_string(),
            classification: "Finance".to_string(),
            actions: vec!["move:AI/Finance".to_string()],
        },
        Rule {
            name: "Newsletters".to_string(),
            classification: "Newsletter".to_string(),
            actions: vec!["move:AI/Newsletters".to_string()],
        },
        Rule {
            name: "Personal correspondence".to_string(),
            classification: "Personal".to_string(),
            actions: vec!["move:AI/Personal".to_string()],
        },
    ]
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TriageError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    TriageError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TriageError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scan.max_unread == 0 {
            return Err(TriageError::ConfigError(
                "scan.max_unread must be at least 1".to_string(),
            ));
        }
        if self.scan.max_unread > 500 {
            return Err(TriageError::ConfigError(
                "scan.max_unread cannot exceed 500 (Gmail list page limit)".to_string(),
            ));
        }

        if self.scan.max_concurrent_requests == 0 {
            return Err(TriageError::ConfigError(
                "scan.max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.scan.max_concurrent_requests > 50 {
            return Err(TriageError::ConfigError(
                "scan.max_concurrent_requests cannot exceed 50".to_string(),
            ));
        }

        if self.inference.model.trim().is_empty() {
            return Err(TriageError::ConfigError(
                "inference.model cannot be empty".to_string(),
            ));
        }
        if self.inference.max_tokens == 0 {
            return Err(TriageError::ConfigError(
                "inference.max_tokens must be greater than 0".to_string(),
            ));
        }
        if self.inference.poll_interval_secs == 0 {
            return Err(TriageError::ConfigError(
                "inference.poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.inference.initial_steps.is_empty() {
            return Err(TriageError::ConfigError(
                "inference.initial_steps must name at least one step".to_string(),
            ));
        }
        if !self.inference.api_base.starts_with("http://")
            && !self.inference.api_base.starts_with("https://")
        {
            return Err(TriageError::ConfigError(format!(
                "inference.api_base must be an http(s) URL, got '{}'",
                self.inference.api_base
            )));
        }

        if self.batch.max_item_attempts == 0 {
            return Err(TriageError::ConfigError(
                "batch.max_item_attempts must be greater than 0".to_string(),
            ));
        }
        if self.batch.wait_timeout_secs == Some(0) {
            return Err(TriageError::ConfigError(
                "batch.wait_timeout_secs must be greater than 0 when set".to_string(),
            ));
        }

        if self.mailboxes.source.is_empty() {
            return Err(TriageError::ConfigError(
                "mailboxes.source cannot be empty".to_string(),
            ));
        }
        if self.mailboxes.managed_prefix.is_empty() {
            return Err(TriageError::ConfigError(
                "mailboxes.managed_prefix cannot be empty".to_string(),
            ));
        }

        for rule in &self.rules {
            if rule.classification.is_empty() {
                return Err(TriageError::ConfigError(format!(
                    "rule '{}' has an empty classification",
                    rule.name
                )));
            }
            if rule.actions.is_empty() {
                return Err(TriageError::ConfigError(format!(
                    "rule '{}' must list at least one action",
                    rule.name
                )));
            }
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
