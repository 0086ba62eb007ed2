//! Anthropic Messages and Message Batches client

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::types::{
    BatchCreateRequest, BatchItemParams, BatchResultLine, MessagesRequest, ToolChoice,
};
use super::{
    BatchHandle, BatchOutcome, BatchRequest, InferenceClient, InferenceResponse, InferenceSettings,
};
use crate::error::{Result, TriageError};
use crate::models::Message;

/// The Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Inference client for the Anthropic API
pub struct AnthropicClient {
    api_key: SecretString,
    api_base: String,
    settings: InferenceSettings,
    client: Client,
}

impl AnthropicClient {
    pub fn new(
        api_key: SecretString,
        api_base: &str,
        timeout: Duration,
        settings: InferenceSettings,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(api_key, api_base, settings, client))
    }

    /// Create a client around a preconfigured `reqwest::Client`
    pub fn with_client(
        api_key: SecretString,
        api_base: &str,
        settings: InferenceSettings,
        client: Client,
    ) -> Self {
        Self {
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            settings,
            client,
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn params<'a>(&'a self, messages: &'a [Message]) -> MessagesRequest<'a> {
        let tool_choice = if self.settings.tools.is_empty() {
            None
        } else {
            Some(ToolChoice::auto_sequential())
        };

        MessagesRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            system: &self.settings.system,
            messages,
            tools: &self.settings.tools,
            tool_choice,
        }
    }

    /// Turn a non-success response into an inference failure
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        let detail = match serde_json::from_str::<ApiErrorResponse>(&error_text) {
            Ok(parsed) => format!("{} - {}", parsed.error.kind, parsed.error.message),
            Err(_) => error_text,
        };

        Err(TriageError::InferenceFailure(format!(
            "HTTP {}: {}",
            status.as_u16(),
            detail
        )))
    }
}

#[async_trait]
impl InferenceClient for AnthropicClient {
    async fn complete(&self, messages: &[Message]) -> Result<InferenceResponse> {
        debug!("Sending {} messages to {}", messages.len(), self.settings.model);

        let response = self
            .request(Method::POST, &self.endpoint("/v1/messages"))
            .json(&self.params(messages))
            .send()
            .await?;

        let response: InferenceResponse = Self::check(response).await?.json().await?;
        debug!(
            "Response {} stop_reason={:?} tokens in/out={}/{}",
            response.id, response.stop_reason, response.usage.input_tokens, response.usage.output_tokens
        );
        Ok(response)
    }

    async fn submit_batch(&self, requests: &[BatchRequest]) -> Result<BatchHandle> {
        let body = BatchCreateRequest {
            requests: requests
                .iter()
                .map(|request| BatchItemParams {
                    custom_id: &request.custom_id,
                    params: self.params(&request.messages),
                })
                .collect(),
        };

        let response = self
            .request(Method::POST, &self.endpoint("/v1/messages/batches"))
            .json(&body)
            .send()
            .await?;

        let handle: BatchHandle = Self::check(response).await?.json().await?;
        info!("Submitted batch {} with {} requests", handle.id, requests.len());
        Ok(handle)
    }

    async fn batch_status(&self, batch_id: &str) -> Result<BatchHandle> {
        let url = self.endpoint(&format!("/v1/messages/batches/{}", batch_id));
        let response = self.request(Method::GET, &url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn batch_results(&self, handle: &BatchHandle) -> Result<Vec<BatchOutcome>> {
        let url = match &handle.results_url {
            Some(url) => url.clone(),
            None => self.endpoint(&format!("/v1/messages/batches/{}/results", handle.id)),
        };

        let response = self.request(Method::GET, &url).send().await?;
        let body = Self::check(response).await?.text().await?;

        let mut outcomes = Vec::new();
        for line in body.lines().filter(|line| !line.trim().is_empty()) {
            let parsed: BatchResultLine = serde_json::from_str(line)?;
            outcomes.push(BatchOutcome::from(parsed));
        }

        let counts = &handle.request_counts;
        let expected = counts.succeeded + counts.errored + counts.canceled + counts.expired;
        if expected > 0 && expected != outcomes.len() as u64 {
            warn!(
                "Batch {} returned {} result lines but reports {} finished requests",
                handle.id,
                outcomes.len(),
                expected
            );
        }

        debug!("Downloaded {} results for batch {}", outcomes.len(), handle.id);
        Ok(outcomes)
    }

    async fn cancel_batch(&self, batch_id: &str) -> Result<BatchHandle> {
        let url = self.endpoint(&format!("/v1/messages/batches/{}/cancel", batch_id));
        let response = self.request(Method::POST, &url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
