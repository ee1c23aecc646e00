//! Answer generation providers.
//!
//! The [`Generator`] trait turns a composed prompt plus the prior
//! conversation into answer text. Implementations:
//! - **[`DisabledGenerator`]**: returns errors; used when no model is configured.
//! - **[`OpenAIGenerator`]**: OpenAI chat completions (`POST /v1/chat/completions`).
//! - **[`OllamaGenerator`]**: a local Ollama instance's `/api/chat` endpoint.
//!
//! History is sent as alternating user/assistant messages ahead of the
//! prompt, so the model sees the conversation in order.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::backoff::post_json_with_retry;
use crate::config::GenerationConfig;
use crate::error::{KbError, KbResult};
use crate::models::Turn;

/// `(prompt, history) -> text`.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn answer(&self, prompt: &str, history: &[Turn]) -> KbResult<String>;
}

/// Build the chat message list shared by the OpenAI and Ollama payloads.
fn chat_messages(prompt: &str, history: &[Turn]) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 1);
    for turn in history {
        messages.push(serde_json::json!({ "role": "user", "content": turn.question }));
        messages.push(serde_json::json!({ "role": "assistant", "content": turn.answer }));
    }
    messages.push(serde_json::json!({ "role": "user", "content": prompt }));
    messages
}

fn to_generation_error(err: anyhow::Error) -> KbError {
    KbError::GenerationError(format!("{:#}", err))
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn answer(&self, _prompt: &str, _history: &[Turn]) -> KbResult<String> {
        Err(KbError::GenerationError(
            "Generation provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI ============

/// Chat completion provider using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIGenerator {
    model: String,
    url: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }

    async fn request(&self, prompt: &str, history: &[Turn]) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": chat_messages(prompt, history),
        });

        let json = post_json_with_retry(
            &self.client,
            &format!("{}/chat/completions", self.url.trim_end_matches('/')),
            Some(&api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_chat(&json)
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn answer(&self, prompt: &str, history: &[Turn]) -> KbResult<String> {
        self.request(prompt, history)
            .await
            .map_err(to_generation_error)
    }
}

fn parse_openai_chat(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

// ============ Ollama ============

/// Chat provider using a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn answer(&self, prompt: &str, history: &[Turn]) -> KbResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "options": { "temperature": self.temperature },
            "messages": chat_messages(prompt, history),
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/chat", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await
        .map_err(to_generation_error)?;
        parse_ollama_chat(&json).map_err(to_generation_error)
    }
}

fn parse_ollama_chat(json: &serde_json::Value) -> Result<String> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
}

/// Create the appropriate [`Generator`] based on configuration.
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_messages_interleave_history() {
        let history = vec![Turn {
            question: "q1".into(),
            answer: "a1".into(),
        }];
        let messages = chat_messages("prompt", &history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], "a1");
        assert_eq!(messages[2]["content"], "prompt");
    }

    #[test]
    fn test_parse_openai_chat() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": " Paris. " } }]
        });
        assert_eq!(parse_openai_chat(&json).unwrap(), "Paris.");
        assert!(parse_openai_chat(&serde_json::json!({ "choices": [] })).is_err());
    }

    #[test]
    fn test_parse_ollama_chat() {
        let json = serde_json::json!({ "message": { "role": "assistant", "content": "Yes" } });
        assert_eq!(parse_ollama_chat(&json).unwrap(), "Yes");
    }

    #[tokio::test]
    async fn test_disabled_generator_errors() {
        let err = DisabledGenerator.answer("p", &[]).await.unwrap_err();
        assert!(matches!(err, KbError::GenerationError(_)));
    }
}
