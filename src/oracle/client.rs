//! OpenAI-compatible chat client for the code-generation oracle.

use crate::oracle::{parser, prompts, Oracle};
use crate::types::{GeneratedCode, GenerationContext};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Oracle client speaking the `/v1/chat/completions` protocol.
#[derive(Debug, Clone)]
pub struct OracleClient {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    http: reqwest::Client,
}

// -- Request / response types -----------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<MessagePayload<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OracleClient {
    /// Create a new oracle client.
    pub fn new(base_url: &str, api_key: &str, model: &str, max_tokens: u32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens,
            http: reqwest::Client::new(),
        }
    }

    /// One chat completion round-trip returning the raw reply text.
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                MessagePayload {
                    role: "system",
                    content: system,
                },
                MessagePayload {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
            // Low temperature: code generation should be as deterministic
            // as the oracle allows.
            temperature: 0.1,
        };

        debug!("Oracle request to model: {}", self.model);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Oracle request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Oracle call failed ({}): {}", status, body);
        }

        let body: ChatResponse = resp
            .json()
            .await
            .context("Failed to parse oracle response")?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content);

        match content {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => bail!("Oracle returned an empty reply"),
        }
    }
}

#[async_trait]
impl Oracle for OracleClient {
    async fn generate(
        &self,
        prompt: &str,
        context: Option<&GenerationContext>,
    ) -> Result<GeneratedCode> {
        let user = prompts::generation_request(prompt, context);
        let reply = self.complete(prompts::SYSTEM_PROMPT, &user).await?;
        parser::parse_reply(&reply)
    }

    async fn heal(
        &self,
        original_prompt: &str,
        error_message: &str,
        failed_code: &str,
    ) -> Result<GeneratedCode> {
        let user = prompts::heal_request(original_prompt, error_message, failed_code);
        let reply = self.complete(prompts::HEALING_SYSTEM_PROMPT, &user).await?;
        parser::parse_reply(&reply)
    }
}
