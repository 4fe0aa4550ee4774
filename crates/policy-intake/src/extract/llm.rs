//! Language-model completion client.
//!
//! The HTTP client is built once at process start and shared; the API key is
//! resolved on first use and cached for the lifetime of the client.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::config::ModelConfig;
use crate::secrets::{SecretError, SecretSource};

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Model endpoint is not configured")]
    NotConfigured,

    #[error("Failed to resolve API key: {0}")]
    Credentials(#[from] SecretError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Completion request failed ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Completion response contained no text")]
    EmptyResponse,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_text: &str)
        -> Result<String, CompletionError>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

/// Completion client for a messages-style JSON endpoint.
pub struct HttpCompletionClient {
    client: Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
    key_source: SecretSource,
    api_key: OnceCell<SecretString>,
}

impl HttpCompletionClient {
    pub fn from_config(config: &ModelConfig) -> Result<Self, CompletionError> {
        let (endpoint, model) = match (&config.endpoint, &config.model) {
            (Some(endpoint), Some(model)) => (endpoint.clone(), model.clone()),
            _ => return Err(CompletionError::NotConfigured),
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        info!("Completion client configured for model {}", model);

        Ok(Self {
            client,
            endpoint,
            model,
            max_tokens: config.max_tokens,
            key_source: SecretSource {
                direct: config.api_key.clone(),
                file_path: config.api_key_file.clone(),
                env_var: config.api_key_env.clone(),
            },
            api_key: OnceCell::new(),
        })
    }

    async fn api_key(&self) -> Result<&SecretString, CompletionError> {
        self.api_key
            .get_or_try_init(|| async {
                debug!("Resolving completion API key");
                self.key_source.resolve().map_err(CompletionError::from)
            })
            .await
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_text: &str,
    ) -> Result<String, CompletionError> {
        let api_key = self.api_key().await?;

        let request = CompletionRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: system_prompt,
            messages: [Message {
                role: "user",
                content: user_text,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status,
                body: crate::sanitize::snippet(&body),
            });
        }

        let parsed: CompletionResponse = response.json().await?;
        let text: String = parsed
            .content
            .into_iter()
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(CompletionError::EmptyResponse);
        }
        Ok(text)
    }
}
