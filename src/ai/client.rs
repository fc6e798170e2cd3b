//! Chat-completions client
//!
//! Speaks the OpenAI chat completions wire format, which OpenAI, OpenRouter,
//! Ollama and most self-hosted gateways accept.

use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::config::AiConfig;
use crate::error::{Error, Result};

/// The two kinds of request the robot makes
pub trait LlmClient: Send + Sync + 'static {
    fn generate_with_image(
        &self,
        system: &str,
        prompt: &str,
        image_jpeg: Vec<u8>,
        max_tokens: u32,
    ) -> impl Future<Output = Result<String>> + Send;

    fn generate_with_text(
        &self,
        system: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
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

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_base: String,
    api_key: String,
    model: String,
    vision_model: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            Error::Config(
                "OpenAI API key is required. Set OPENAI_API_KEY or ai.api_key in the config"
                    .to_string(),
            )
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            vision_model: config.vision_model.clone(),
            client,
        })
    }

    async fn chat(&self, request: ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        tracing::debug!(model = %request.model, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Chat completion request failed: {}", e);
                Error::Llm(format!("request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Model API error: {} - {}", status, error_text);
            return Err(Error::Llm(format!(
                "API returned error: {} - {}",
                status, error_text
            )));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse chat completion: {}", e);
            Error::Llm(format!("Failed to parse response: {}", e))
        })?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Llm("No response from model".to_string()))
    }
}

impl LlmClient for OpenAiClient {
    async fn generate_with_image(
        &self,
        system: &str,
        prompt: &str,
        image_jpeg: Vec<u8>,
        max_tokens: u32,
    ) -> Result<String> {
        let encoded = general_purpose::STANDARD.encode(&image_jpeg);

        let request = ChatRequest {
            model: self.vision_model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(system.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: prompt.to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: format!("data:image/jpeg;base64,{}", encoded),
                            },
                        },
                    ]),
                },
            ],
            max_tokens,
            temperature: None,
        };

        self.chat(request).await
    }

    async fn generate_with_text(
        &self,
        system: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(system.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Text(prompt.to_string()),
                },
            ],
            max_tokens,
            temperature: Some(temperature),
        };

        self.chat(request).await
    }
}


#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Call {
        pub system: String,
        pub prompt: String,
        pub temperature: Option<f32>,
        pub max_tokens: u32,
        pub image_bytes: Option<usize>,
    }

    /// Replays canned replies in order and records every request
    #[derive(Debug, Default)]
    pub struct ScriptedClient {
        replies: Mutex<VecDeque<std::result::Result<String, String>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedClient {
        pub fn replying(replies: impl IntoIterator<Item = &'static str>) -> Self {
            let client = Self::default();
            for reply in replies {
                client.push(Ok(reply.to_string()));
            }
            client
        }

        pub fn push(&self, reply: std::result::Result<String, String>) {
            self.replies.lock().unwrap().push_back(reply);
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn answer(&self, call: Call) -> Result<String> {
            self.calls.lock().unwrap().push(call);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted reply left".to_string()))
                .map_err(Error::Llm)
        }
    }

    impl LlmClient for ScriptedClient {
        async fn generate_with_image(
            &self,
            system: &str,
            prompt: &str,
            image_jpeg: Vec<u8>,
            max_tokens: u32,
        ) -> Result<String> {
            self.answer(Call {
                system: system.to_string(),
                prompt: prompt.to_string(),
                temperature: None,
                max_tokens,
                image_bytes: Some(image_jpeg.len()),
            })
        }

        async fn generate_with_text(
            &self,
            system: &str,
            prompt: &str,
            temperature: f32,
            max_tokens: u32,
        ) -> Result<String> {
            self.answer(Call {
                system: system.to_string(),
                prompt: prompt.to_string(),
                temperature: Some(temperature),
                max_tokens,
                image_bytes: None,
            })
        }
    }
}
