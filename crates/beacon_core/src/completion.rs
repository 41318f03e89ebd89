//! Chat completion pipeline
//!
//! Each invocation moves `Idle -> ContextBuilt -> Requesting ->
//! Streaming|Complete -> Persisted`. The user turn is stored before the
//! provider is called; the assistant turn only once the reply is whole.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::aggregation::AggregationEngine;
use crate::config::ModelConfig;
use crate::conversation::{
    ChatRole, ChatTurn, Conversation, ConversationWithMessages, StoredMessage,
};
use crate::id::{ClientId, ConversationId, UserId};
use crate::model::ModelProvider;
use crate::rate_limit::RateLimiter;
use crate::store::Store;
use crate::{CoreError, Result};

pub mod stream;

pub use stream::{StreamFrame, StreamingReply};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Beacon, a marketing analytics assistant for \
agencies. Answer questions about a client's website traffic and advertising performance using \
only the platform data provided below. Be concise and give concrete numbers where you have them.";

const NO_CLIENT_NOTE: &str = "No client is selected, so no platform data is available. If the \
user asks about specific metrics, ask them to pick a client first.";

const MISSING_PLATFORM_NOTE: &str = "If the user asks about a platform listed as not \
connected, tell them to connect it from the client's settings instead of guessing numbers.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    ContextBuilt,
    Requesting,
    Streaming,
    Complete,
    Persisted,
    Errored,
}

/// One chat invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
    #[serde(default)]
    pub client_id: Option<ClientId>,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
}

/// Result of a non-streamed invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub content: String,
    pub conversation_id: Option<ConversationId>,
}

/// Work done before the provider is called
#[derive(Debug)]
struct Prepared {
    system_prompt: String,
    history: Vec<ChatTurn>,
    conversation_id: Option<ConversationId>,
}

#[derive(Debug, Clone)]
pub struct CompletionPipeline {
    store: Arc<dyn Store>,
    engine: Arc<AggregationEngine>,
    limiter: Arc<RateLimiter>,
    provider: Arc<dyn ModelProvider>,
    base_prompt: String,
}

impl CompletionPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<AggregationEngine>,
        limiter: Arc<RateLimiter>,
        provider: Arc<dyn ModelProvider>,
    ) -> Self {
        Self {
            store,
            engine,
            limiter,
            provider,
            base_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Use the configured prompt, if any, as the base instruction
    pub fn with_model_config(mut self, config: &ModelConfig) -> Self {
        if let Some(prompt) = config.system_prompt.as_ref().filter(|p| !p.trim().is_empty()) {
            self.base_prompt = prompt.clone();
        }
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    /// Gate, build context and store the user turn
    async fn prepare(&self, user_id: &UserId, request: &CompletionRequest) -> Result<Prepared> {
        self.limiter.enforce(&user_id.to_string())?;

        let system_prompt = self.system_prompt(user_id, request.client_id.as_ref()).await?;
        let conversation_id = self.record_user_turn(user_id, request).await?;

        Ok(Prepared {
            system_prompt,
            history: request.messages.clone(),
            conversation_id,
        })
    }

    /// Base instruction plus the client's platform snapshot
    pub async fn system_prompt(
        &self,
        user_id: &UserId,
        client_id: Option<&ClientId>,
    ) -> Result<String> {
        let Some(client_id) = client_id else {
            return Ok(format!("{}\n\n{}", self.base_prompt, NO_CLIENT_NOTE));
        };

        let context = self.engine.client_context(user_id, client_id).await?;
        Ok(format!(
            "{}\n\n## Client data\n{}\n\n{}",
            self.base_prompt,
            context.render(),
            MISSING_PLATFORM_NOTE
        ))
    }

    /// Append the last user message, creating the conversation if needed.
    /// Nothing is stored when there is no user message, but a resumed
    /// conversation is still checked against the caller and client.
    async fn record_user_turn(
        &self,
        user_id: &UserId,
        request: &CompletionRequest,
    ) -> Result<Option<ConversationId>> {
        let resumed = match &request.conversation_id {
            Some(id) => Some(self.resumable_conversation(user_id, id, request.client_id).await?),
            None => None,
        };

        let Some(last) = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
        else {
            return Ok(resumed.map(|c| c.id));
        };

        let conversation = match resumed {
            Some(conversation) => conversation,
            None => {
                let conversation = Conversation::start(*user_id, request.client_id, &last.content);
                self.store.create_conversation(&conversation).await?;
                tracing::debug!(conversation = %conversation.id, "Started conversation");
                conversation
            }
        };

        self.store
            .append_message(&StoredMessage::new(
                conversation.id,
                ChatRole::User,
                last.content.clone(),
            ))
            .await?;
        Ok(Some(conversation.id))
    }

    /// A conversation stays with the client it was started for
    async fn resumable_conversation(
        &self,
        user_id: &UserId,
        id: &ConversationId,
        client_id: Option<ClientId>,
    ) -> Result<Conversation> {
        let conversation = self.owned_conversation(user_id, id).await?;
        if client_id.is_some() && conversation.client_id != client_id {
            return Err(CoreError::validation(
                "client_id",
                format!("conversation {} belongs to a different client", id),
            ));
        }
        Ok(conversation)
    }

    async fn owned_conversation(
        &self,
        user_id: &UserId,
        id: &ConversationId,
    ) -> Result<Conversation> {
        let conversation = self
            .store
            .get_conversation(id)
            .await?
            .ok_or_else(|| CoreError::not_found("conversation", id))?;
        if !conversation.is_owned_by(user_id) {
            return Err(CoreError::permission_denied(
                user_id,
                format!("conversation {}", id),
            ));
        }
        Ok(conversation)
    }

    /// One blocking completion and one persistence write
    #[tracing::instrument(skip(self, request), fields(user = %user_id))]
    pub async fn send_message(
        &self,
        user_id: &UserId,
        request: CompletionRequest,
    ) -> Result<CompletionOutcome> {
        let prepared = self.prepare(user_id, &request).await?;

        let response = self
            .provider
            .generate_chat_completion(&prepared.system_prompt, &prepared.history)
            .await?;

        if let Some(conversation_id) = prepared.conversation_id {
            self.store
                .append_message(&StoredMessage::new(
                    conversation_id,
                    ChatRole::Assistant,
                    response.content.clone(),
                ))
                .await?;
        }

        Ok(CompletionOutcome {
            content: response.content,
            conversation_id: prepared.conversation_id,
        })
    }

    /// Streamed reply. Errors before the user turn is stored come back as
    /// `Err`; everything after arrives as an error frame.
    #[tracing::instrument(skip(self, request), fields(user = %user_id))]
    pub async fn stream_message(
        &self,
        user_id: &UserId,
        request: CompletionRequest,
    ) -> Result<StreamingReply> {
        let prepared = self.prepare(user_id, &request).await?;
        Ok(stream::spawn(stream::StreamJob {
            store: self.store.clone(),
            provider: self.provider.clone(),
            system_prompt: prepared.system_prompt,
            history: prepared.history,
            conversation_id: prepared.conversation_id,
        }))
    }

    /// The user's conversations, newest first
    pub async fn list_conversations(
        &self,
        user_id: &UserId,
        client_id: Option<&ClientId>,
    ) -> Result<Vec<Conversation>> {
        self.store.list_conversations(user_id, client_id).await
    }

    pub async fn get_conversation(
        &self,
        user_id: &UserId,
        id: &ConversationId,
    ) -> Result<ConversationWithMessages> {
        let conversation = self.owned_conversation(user_id, id).await?;
        let messages = self.store.list_messages(id).await?;
        Ok(ConversationWithMessages {
            conversation,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::config::AggregationConfig;
    use crate::connection::{Connection, Platform};
    use crate::lifecycle::ConnectionManager;
    use crate::model::MockModelProvider;
    use crate::platform::PlatformRegistry;
    use crate::test_utils::{FakeAdapter, FakeTokenClient, seeded_store};
    use chrono::{Duration, Utc};
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use std::time::Duration as StdDuration;
    use tracing_test::traced_test;

    fn pipeline(
        store: Arc<dyn Store>,
        provider: MockModelProvider,
        max_messages: u32,
    ) -> CompletionPipeline {
        let registry = PlatformRegistry::new().with_adapter(Arc::new(
            FakeAdapter::new(Platform::GoogleAnalytics).with_sessions(1234),
        ));
        let manager = Arc::new(ConnectionManager::new(
            store.clone(),
            Arc::new(FakeTokenClient::new()),
            registry,
            7,
        ));
        let engine = Arc::new(AggregationEngine::new(manager, &AggregationConfig::default()));
        CompletionPipeline::new(
            store,
            engine,
            Arc::new(RateLimiter::new(max_messages, StdDuration::from_secs(60))),
            Arc::new(provider),
        )
    }

    fn ask(client_id: Option<ClientId>, text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatTurn::user(text)],
            client_id,
            conversation_id: None,
        }
    }

    #[tokio::test]
    async fn test_stream_announces_conversation_then_persists_concatenation() {
        let (store, user, client) = seeded_store().await;
        let connection = Connection::new(
            client.id,
            user,
            Platform::GoogleAnalytics,
            "token".to_string(),
            None,
            Utc::now() + Duration::days(30),
        );
        store.upsert_connection(&connection).await.unwrap();
        let provider = MockModelProvider::new(vec!["Sessions ", "were ", "1,234."]);
        let pipeline = pipeline(store.clone(), provider.clone(), 20);

        let reply = pipeline
            .stream_message(&user, ask(Some(client.id), "How many sessions?"))
            .await
            .unwrap();
        let conversation_id = reply.conversation_id.unwrap();
        let frames: Vec<StreamFrame> = reply.frames.collect().await;
        assert_eq!(reply.task.await.unwrap(), PipelineState::Persisted);

        assert_eq!(frames[0], StreamFrame::ConversationId(conversation_id));
        let forwarded: String = frames[1..]
            .iter()
            .map(|f| match f {
                StreamFrame::Content(c) => c.as_str(),
                other => panic!("unexpected frame {:?}", other),
            })
            .collect();

        let messages = store.list_messages(&conversation_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "How many sessions?");
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(messages[1].content, forwarded);

        let prompt = provider.last_system_prompt().unwrap();
        assert!(prompt.contains("Sessions: 1234"));
        assert!(prompt.contains("Not connected: Google Ads, Meta Ads"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_mid_stream_failure_discards_partial_reply() {
        let (store, user, client) = seeded_store().await;
        let provider = MockModelProvider::new(vec!["Partial ", "answer ", "lost"]).failing_after(2);
        let pipeline = pipeline(store.clone(), provider, 20);

        let reply = pipeline
            .stream_message(&user, ask(Some(client.id), "Summarize ads"))
            .await
            .unwrap();
        let conversation_id = reply.conversation_id.unwrap();
        let frames: Vec<StreamFrame> = reply.frames.collect().await;
        assert_eq!(reply.task.await.unwrap(), PipelineState::Errored);

        assert!(frames.last().unwrap().is_error());
        let messages = store.list_messages(&conversation_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ChatRole::User);
        assert!(logs_contain("streamed completion failed"));
    }

    #[tokio::test]
    async fn test_viewer_disconnect_still_persists() {
        let (store, user, client) = seeded_store().await;
        let provider = MockModelProvider::new(vec!["one ", "two ", "three"]);
        let pipeline = pipeline(store.clone(), provider, 20);

        let mut reply = pipeline
            .stream_message(&user, ask(Some(client.id), "Count"))
            .await
            .unwrap();
        let first = reply.frames.next().await.unwrap();
        assert!(matches!(first, StreamFrame::ConversationId(_)));
        drop(reply.frames);

        assert_eq!(reply.task.await.unwrap(), PipelineState::Persisted);
        let messages = store
            .list_messages(&reply.conversation_id.unwrap())
            .await
            .unwrap();
        assert_eq!(messages[1].content, "one two three");
    }

    #[tokio::test]
    async fn test_rate_limit_never_reaches_provider() {
        let (store, user, client) = seeded_store().await;
        let provider = MockModelProvider::new(vec!["ok"]);
        let pipeline = pipeline(store.clone(), provider.clone(), 1);

        pipeline
            .send_message(&user, ask(Some(client.id), "first"))
            .await
            .unwrap();
        let err = pipeline
            .stream_message(&user, ask(Some(client.id), "second"))
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::RateLimited { .. }));
        assert_eq!(provider.calls(), 1);
        let conversations = store.list_conversations(&user, None).await.unwrap();
        assert_eq!(conversations.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_messages_without_client_still_answers() {
        let (store, user, _client) = seeded_store().await;
        let provider = MockModelProvider::new(vec!["How can I help?"]);
        let pipeline = pipeline(store.clone(), provider.clone(), 20);

        let outcome = pipeline
            .send_message(&user, CompletionRequest::default())
            .await
            .unwrap();

        assert_eq!(outcome.content, "How can I help?");
        assert_eq!(outcome.conversation_id, None);
        assert!(store.list_conversations(&user, None).await.unwrap().is_empty());
        let prompt = provider.last_system_prompt().unwrap();
        assert!(!prompt.contains("## Client data"));
    }

    #[tokio::test]
    async fn test_resume_checks_ownership_and_appends() {
        let (store, user, client) = seeded_store().await;
        let pipeline = pipeline(store.clone(), MockModelProvider::new(vec!["Sure."]), 20);

        let first = pipeline
            .send_message(&user, ask(Some(client.id), "Hello"))
            .await
            .unwrap();
        let conversation_id = first.conversation_id.unwrap();

        let mut follow_up = ask(Some(client.id), "And ads?");
        follow_up.conversation_id = Some(conversation_id);
        pipeline.send_message(&user, follow_up.clone()).await.unwrap();

        let loaded = pipeline.get_conversation(&user, &conversation_id).await.unwrap();
        assert_eq!(loaded.conversation.message_count, 4);
        assert_eq!(loaded.conversation.title, "Hello");

        let err = pipeline
            .send_message(&UserId::generate(), follow_up)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. } | CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_resume_without_user_turn_still_checks_owner() {
        let (store, user, client) = seeded_store().await;
        let provider = MockModelProvider::new(vec!["x"]);
        let pipeline = pipeline(store.clone(), provider.clone(), 20);

        let first = pipeline
            .send_message(&user, ask(Some(client.id), "hi"))
            .await
            .unwrap();
        let conversation_id = first.conversation_id.unwrap();

        let err = pipeline
            .send_message(
                &UserId::generate(),
                CompletionRequest {
                    messages: vec![ChatTurn::assistant("x")],
                    client_id: None,
                    conversation_id: Some(conversation_id),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::PermissionDenied { .. }));
        assert_eq!(provider.calls(), 1);
        assert_eq!(store.list_messages(&conversation_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_under_another_client_is_rejected() {
        let (store, user, client) = seeded_store().await;
        let other = Client::new(user, "Second Client");
        store.save_client(&other).await.unwrap();
        let provider = MockModelProvider::new(vec!["Sure."]);
        let pipeline = pipeline(store.clone(), provider.clone(), 20);

        let first = pipeline
            .send_message(&user, ask(Some(client.id), "Hello"))
            .await
            .unwrap();
        let conversation_id = first.conversation_id.unwrap();

        let mut follow_up = ask(Some(other.id), "And this one?");
        follow_up.conversation_id = Some(conversation_id);
        let err = pipeline.send_message(&user, follow_up).await.unwrap_err();

        assert!(matches!(err, CoreError::ValidationFailure { .. }));
        assert_eq!(provider.calls(), 1);
        assert_eq!(store.list_messages(&conversation_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_persists_only_user_turn() {
        let (store, user, _client) = seeded_store().await;
        let provider = MockModelProvider::new(vec!["never"]).failing_after(0);
        let pipeline = pipeline(store.clone(), provider, 20);

        let err = pipeline
            .send_message(&user, ask(None, "Hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ModelProviderError { .. }));

        let conversations = store.list_conversations(&user, None).await.unwrap();
        assert_eq!(conversations[0].message_count, 1);
    }
}
