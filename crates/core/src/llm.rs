use crate::config::RagConfig;
use crate::error::{ConfigError, GenerationError, UnsupportedModelError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error};
use url::Url;

/// The chat models callers may select, by alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatModel {
    #[serde(rename = "deepseek-r1")]
    DeepseekR1,
    #[serde(rename = "gemma")]
    Gemma,
    #[serde(rename = "llama3")]
    Llama3,
}

impl ChatModel {
    pub const ALL: [ChatModel; 3] = [ChatModel::DeepseekR1, ChatModel::Gemma, ChatModel::Llama3];

    pub fn alias(self) -> &'static str {
        match self {
            ChatModel::DeepseekR1 => "deepseek-r1",
            ChatModel::Gemma => "gemma",
            ChatModel::Llama3 => "llama3",
        }
    }

    /// Model tag sent to the serving backend.
    pub fn identifier(self) -> &'static str {
        match self {
            ChatModel::DeepseekR1 => "deepseek-r1:8b",
            ChatModel::Gemma => "gemma3:latest",
            ChatModel::Llama3 => "llama3.2:latest",
        }
    }

    pub fn aliases() -> Vec<&'static str> {
        Self::ALL.iter().map(|model| model.alias()).collect()
    }
}

impl FromStr for ChatModel {
    type Err = UnsupportedModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|model| model.alias() == value)
            .ok_or_else(|| UnsupportedModelError {
                requested: value.to_string(),
                supported: Self::aliases(),
            })
    }
}

impl fmt::Display for ChatModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}

pub const SYSTEM_PROMPT: &str = "You are a knowledge assistant that answers questions using only the \
information in the Context section below.
- Do not invent facts that are not in the context.
- If the answer is not in the context, reply: \"I'm sorry, I don't have enough information to answer that.\"
- Keep answers concise and accurate.
- Quote or reference the context when it supports your answer.
- If the question is ambiguous, ask a short clarifying question instead of guessing.";

/// Fills the question-answering template. All context passages go into one block.
pub fn build_prompt(context: &[&str], question: &str) -> String {
    format!(
        "{SYSTEM_PROMPT}\n\nContext:\n{}\n\nUser Question:\n{}\n\nAssistant Answer:\n",
        context.join("\n\n"),
        question.trim()
    )
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// One deterministic completion of `prompt` by `model`.
    async fn complete(&self, model: ChatModel, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Chat completions through an Ollama server's `/api/chat`, with sampling disabled.
pub struct OllamaChatClient {
    client: Client,
    endpoint: Url,
}

impl OllamaChatClient {
    pub fn new(config: &RagConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: config.http_client()?,
            endpoint: config.base_url()?.join("api/chat")?,
        })
    }
}

#[async_trait]
impl ChatClient for OllamaChatClient {
    async fn complete(&self, model: ChatModel, prompt: &str) -> Result<String, GenerationError> {
        let identifier = model.identifier();
        debug!(model = identifier, prompt_chars = prompt.len(), "chat completion");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&ChatRequest {
                model: identifier,
                messages: [ChatMessage {
                    role: "user",
                    content: prompt,
                }],
                stream: false,
                options: ChatOptions { temperature: 0.0 },
            })
            .send()
            .await
            .map_err(|e| {
                error!(model = identifier, error = %e, "chat request failed");
                GenerationError::Http(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            return Err(GenerationError::BackendResponse {
                model: identifier.to_string(),
                status: status.to_string(),
                details,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let answer = parsed.message.content.trim().to_string();
        if answer.is_empty() {
            return Err(GenerationError::EmptyAnswer {
                model: identifier.to_string(),
            });
        }

        Ok(answer)
    }
}
