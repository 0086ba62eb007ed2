//! Inference client abstraction
//!
//! One immutable [`InferenceSettings`] value (model, token budget, system
//! preamble, tool catalog) is shared by the synchronous call and every batch
//! item. Tool choice is always automatic with parallel tool use disabled, so
//! a response carries at most one tool invocation.

pub mod anthropic;
pub mod types;

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::InferenceConfig;
use crate::error::{Result, TriageError};
use crate::models::Message;
use crate::tools::ToolDefinition;

pub use anthropic::AnthropicClient;
pub use types::{
    BatchHandle, BatchItemResult, BatchOutcome, BatchRequest, InferenceResponse,
    ProcessingStatus, RequestCounts, StopReason, Usage,
};

/// Request configuration shared by every inference call of a run
#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub tools: Vec<ToolDefinition>,
}

impl InferenceSettings {
    pub fn from_config(config: &InferenceConfig, tools: Vec<ToolDefinition>) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system: config.system_prompt.clone(),
            tools,
        }
    }
}

/// Sends conversations to a language model
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Complete one conversation synchronously
    async fn complete(&self, messages: &[Message]) -> Result<InferenceResponse>;

    /// Submit many conversations as one batch job
    async fn submit_batch(&self, requests: &[BatchRequest]) -> Result<BatchHandle>;

    /// Fetch the current state of a batch job
    async fn batch_status(&self, batch_id: &str) -> Result<BatchHandle>;

    /// Download per-item outcomes of an ended batch job
    async fn batch_results(&self, handle: &BatchHandle) -> Result<Vec<BatchOutcome>>;

    /// Ask the provider to stop processing a batch job
    async fn cancel_batch(&self, batch_id: &str) -> Result<BatchHandle>;
}

/// Poll a batch job on a fixed interval until it ends
///
/// When `cancel` fires first the provider is asked to cancel the job and
/// [`TriageError::BatchCancelled`] is returned.
pub async fn wait_for_batch(
    client: &dyn InferenceClient,
    handle: BatchHandle,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<BatchHandle> {
    let mut current = handle;
    let mut polls = 0u32;

    while !current.is_ended() {
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Cancelling batch {} after {} polls", current.id, polls);
                if let Err(e) = client.cancel_batch(&current.id).await {
                    warn!("Failed to cancel batch {}: {}", current.id, e);
                }
                return Err(TriageError::BatchCancelled { batch_id: current.id });
            }
            _ = tokio::time::sleep(interval) => {}
        }

        polls += 1;
        current = client.batch_status(&current.id).await?;
        debug!(
            "Batch {} is {:?} (processing={}, succeeded={}, errored={})",
            current.id,
            current.processing_status,
            current.request_counts.processing,
            current.request_counts.succeeded,
            current.request_counts.errored
        );
    }

    info!("Batch {} ended after {} polls", current.id, polls);
    Ok(current)
}
