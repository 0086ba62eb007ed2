//! Classification records and the per-day conversation archive

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::{ClassificationRecord, Message};

/// Last-known classification per sender address
///
/// Reads and writes are in-memory; `flush` persists the whole record set.
/// Concurrent writers to the same address resolve last-writer-wins.
#[async_trait]
pub trait ClassificationStore: Send + Sync {
    fn get(&self, address: &str) -> Option<ClassificationRecord>;

    fn put(&mut self, address: &str, classification: &str, timestamp: DateTime<Utc>);

    async fn flush(&self) -> Result<()>;
}

/// Classification store backed by a single JSON file
#[derive(Debug, Clone)]
pub struct JsonClassificationStore {
    path: PathBuf,
    records: BTreeMap<String, ClassificationRecord>,
}

impl JsonClassificationStore {
    /// Load records from `path`, starting empty when the file does not exist
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No classification records at {:?}, starting fresh", path);
            return Ok(Self {
                path: path.to_path_buf(),
                records: BTreeMap::new(),
            });
        }

        let json = tokio::fs::read_to_string(path).await?;
        let records: BTreeMap<String, ClassificationRecord> = serde_json::from_str(&json)?;

        tracing::info!("Loaded {} classification records from {:?}", records.len(), path);
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records ordered by sender address
    pub fn records(&self) -> impl Iterator<Item = (&String, &ClassificationRecord)> {
        self.records.iter()
    }
}

#[async_trait]
impl ClassificationStore for JsonClassificationStore {
    fn get(&self, address: &str) -> Option<ClassificationRecord> {
        self.records.get(address).cloned()
    }

    fn put(&mut self, address: &str, classification: &str, timestamp: DateTime<Utc>) {
        tracing::debug!("Recording classification '{}' for {}", classification, address);
        self.records.insert(
            address.to_string(),
            ClassificationRecord {
                classification: classification.to_string(),
                last_processed: timestamp,
            },
        );
    }

    async fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&self.records)?;
        tokio::fs::write(&self.path, json).await?;
        tracing::debug!("Saved {} classification records to {:?}", self.records.len(), self.path);
        Ok(())
    }
}

/// Per-day audit record of every processed conversation, keyed by subject
#[derive(Debug, Clone)]
pub struct ConversationArchive {
    dir: PathBuf,
}

impl ConversationArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    /// Merge conversations into the archive file for `date`
    ///
    /// Entries already on disk are kept; a subject seen again replaces the
    /// earlier conversation.
    pub async fn record(&self, date: NaiveDate, conversations: &[(String, Vec<Message>)]) -> Result<PathBuf> {
        let path = self.path_for(date);
        let mut archive = Self::read(&path).await?;

        for (subject, history) in conversations {
            archive.insert(subject.clone(), history.clone());
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(&archive)?;
        tokio::fs::write(&path, json).await?;

        tracing::info!(
            "Archived {} conversations to {:?}",
            conversations.len(),
            path
        );
        Ok(path)
    }

    /// Read the archive for one day
    pub async fn load(&self, date: NaiveDate) -> Result<BTreeMap<String, Vec<Message>>> {
        Self::read(&self.path_for(date)).await
    }

    async fn read(path: &Path) -> Result<BTreeMap<String, Vec<Message>>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let json = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }
}
