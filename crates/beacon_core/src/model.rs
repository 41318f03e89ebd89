use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent, MessageContent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::conversation::{ChatRole, ChatTurn};
use crate::{CoreError, Result};

/// Text chunks as they arrive from the provider
pub type CompletionStream = BoxStream<'static, Result<String>>;

/// A full, non-streamed completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A model provider that can generate chat completions
#[async_trait]
pub trait ModelProvider: Send + Sync + Debug {
    /// Get the name of this provider
    fn name(&self) -> &str;

    /// Generate one complete answer
    async fn generate_chat_completion(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<CompletionResponse>;

    /// Generate an answer as a forward-only stream of text chunks
    async fn generate_streaming_completion(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<CompletionStream>;
}

fn text_message(turn: &ChatTurn) -> ChatMessage {
    ChatMessage {
        role: match turn.role {
            ChatRole::User => genai::chat::ChatRole::User,
            ChatRole::Assistant => genai::chat::ChatRole::Assistant,
        },
        content: MessageContent::Text(turn.content.clone()),
        options: None,
    }
}

/// A client for language models through the genai library
///
/// Provider API keys come from the environment (OPENAI_API_KEY,
/// ANTHROPIC_API_KEY, ...); the model id picks the adapter.
#[derive(Debug, Clone)]
pub struct GenAiProvider {
    client: genai::Client,
    config: ModelConfig,
}

impl GenAiProvider {
    pub fn new(config: ModelConfig) -> Self {
        Self::with_client(genai::Client::default(), config)
    }

    pub fn with_client(client: genai::Client, config: ModelConfig) -> Self {
        Self { client, config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn chat_request(system_prompt: &str, history: &[ChatTurn]) -> ChatRequest {
        ChatRequest::from_system(system_prompt)
            .append_messages(history.iter().map(text_message).collect())
    }

    fn chat_options(&self) -> ChatOptions {
        let mut options = ChatOptions::default();
        if let Some(temperature) = self.config.temperature {
            options = options.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        options
    }
}

#[async_trait]
impl ModelProvider for GenAiProvider {
    fn name(&self) -> &str {
        "genai::Client"
    }

    #[tracing::instrument(skip_all, fields(model = %self.config.model, turns = history.len()))]
    async fn generate_chat_completion(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<CompletionResponse> {
        let request = Self::chat_request(system_prompt, history);
        tracing::debug!("Chat Request:\n{:#?}", request);

        let response = match self
            .client
            .exec_chat(&self.config.model, request, Some(&self.chat_options()))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                crate::log_error!("GenAI API error", e);
                return Err(CoreError::model_error("genai", &self.config.model, e));
            }
        };

        let content = response
            .content
            .into_iter()
            .filter_map(|c| match c {
                MessageContent::Text(text) => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            model: Some(self.config.model.clone()),
        })
    }

    #[tracing::instrument(skip_all, fields(model = %self.config.model, turns = history.len()))]
    async fn generate_streaming_completion(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<CompletionStream> {
        let request = Self::chat_request(system_prompt, history);
        let response = match self
            .client
            .exec_chat_stream(&self.config.model, request, Some(&self.chat_options()))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                crate::log_error!("GenAI stream setup error", e);
                return Err(CoreError::model_error("genai", &self.config.model, e));
            }
        };

        let model = self.config.model.clone();
        let stream = response.stream.filter_map(move |event| {
            let model = model.clone();
            async move {
                match event {
                    Ok(ChatStreamEvent::Chunk(chunk)) => Some(Ok(chunk.content)),
                    Ok(_) => None,
                    Err(e) => Some(Err(CoreError::model_error("genai", model, e))),
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Scripted provider for tests and local development
#[derive(Debug, Clone)]
pub struct MockModelProvider {
    chunks: Vec<String>,
    fail_after: Option<usize>,
    calls: Arc<AtomicUsize>,
    last_system_prompt: Arc<Mutex<Option<String>>>,
}

impl MockModelProvider {
    pub fn new(chunks: Vec<&str>) -> Self {
        Self {
            chunks: chunks.into_iter().map(str::to_string).collect(),
            fail_after: None,
            calls: Arc::new(AtomicUsize::new(0)),
            last_system_prompt: Arc::new(Mutex::new(None)),
        }
    }

    /// Emit `count` chunks, then fail the stream
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_system_prompt(&self) -> Option<String> {
        self.last_system_prompt.lock().clone()
    }

    fn record(&self, system_prompt: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_system_prompt.lock() = Some(system_prompt.to_string());
    }

    fn failure() -> CoreError {
        CoreError::model_error(
            "mock",
            "mock-model",
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "stream interrupted"),
        )
    }
}

#[async_trait]
impl ModelProvider for MockModelProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_chat_completion(
        &self,
        system_prompt: &str,
        _history: &[ChatTurn],
    ) -> Result<CompletionResponse> {
        self.record(system_prompt);
        if self.fail_after.is_some() {
            return Err(Self::failure());
        }
        Ok(CompletionResponse {
            content: self.chunks.concat(),
            model: Some("mock-model".to_string()),
        })
    }

    async fn generate_streaming_completion(
        &self,
        system_prompt: &str,
        _history: &[ChatTurn],
    ) -> Result<CompletionStream> {
        self.record(system_prompt);
        let mut items: Vec<Result<String>> = match self.fail_after {
            Some(count) => self.chunks.iter().take(count).cloned().map(Ok).collect(),
            None => self.chunks.iter().cloned().map(Ok).collect(),
        };
        if self.fail_after.is_some() {
            items.push(Err(Self::failure()));
        }
        Ok(futures::stream::iter(items).boxed())
    }
}
