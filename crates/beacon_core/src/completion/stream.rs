//! Streaming reply driver
//!
//! Frames go out over a bounded channel. The first frame carries the
//! conversation id. Chunks are forwarded and buffered together; the buffer
//! is written as one assistant message only after the provider stream ends
//! cleanly. A viewer that goes away stops the forwarding, not the buffering.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use super::PipelineState;
use crate::conversation::{ChatRole, ChatTurn, StoredMessage};
use crate::id::ConversationId;
use crate::model::ModelProvider;
use crate::store::Store;
use crate::{CoreError, Result, log_contained};

/// Frames buffered ahead of a slow viewer
const FRAME_BUFFER: usize = 32;

/// One server-push frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamFrame {
    ConversationId(ConversationId),
    Content(String),
    Error(String),
}

impl StreamFrame {
    /// `data: <json>\n\n`
    pub fn to_sse_data(&self) -> Result<String> {
        let json =
            serde_json::to_string(self).map_err(|e| CoreError::serialization("StreamFrame", e))?;
        Ok(format!("data: {}\n\n", json))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StreamFrame::Error(_))
    }
}

/// A running streamed reply
#[derive(Debug)]
pub struct StreamingReply {
    pub conversation_id: Option<ConversationId>,
    pub frames: ReceiverStream<StreamFrame>,
    /// Resolves with the final state once persistence is settled
    pub task: JoinHandle<PipelineState>,
}

/// Everything the driver needs, captured before the task is spawned
pub(super) struct StreamJob {
    pub store: Arc<dyn Store>,
    pub provider: Arc<dyn ModelProvider>,
    pub system_prompt: String,
    pub history: Vec<ChatTurn>,
    pub conversation_id: Option<ConversationId>,
}

struct StreamDriver {
    tx: mpsc::Sender<StreamFrame>,
    state: PipelineState,
    conversation_sent: bool,
    viewer_gone: bool,
    buffer: String,
}

impl StreamDriver {
    fn new(tx: mpsc::Sender<StreamFrame>) -> Self {
        Self {
            tx,
            state: PipelineState::ContextBuilt,
            conversation_sent: false,
            viewer_gone: false,
            buffer: String::new(),
        }
    }

    async fn emit(&mut self, frame: StreamFrame) {
        if self.viewer_gone {
            return;
        }
        if self.tx.send(frame).await.is_err() {
            tracing::debug!("Viewer disconnected, continuing without forwarding");
            self.viewer_gone = true;
        }
    }

    async fn announce(&mut self, conversation_id: Option<ConversationId>) {
        if self.conversation_sent {
            return;
        }
        self.conversation_sent = true;
        if let Some(id) = conversation_id {
            self.emit(StreamFrame::ConversationId(id)).await;
        }
    }

    async fn fail(&mut self, error: CoreError) -> PipelineState {
        log_contained!("streamed completion", error);
        // partial text is never persisted
        self.buffer.clear();
        self.state = PipelineState::Errored;
        self.emit(StreamFrame::Error(error.user_message())).await;
        self.state
    }

    async fn run(mut self, job: StreamJob) -> PipelineState {
        self.announce(job.conversation_id).await;

        self.state = PipelineState::Requesting;
        let mut upstream = match job
            .provider
            .generate_streaming_completion(&job.system_prompt, &job.history)
            .await
        {
            Ok(stream) => stream,
            Err(e) => return self.fail(e).await,
        };

        self.state = PipelineState::Streaming;
        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    self.buffer.push_str(&chunk);
                    self.emit(StreamFrame::Content(chunk)).await;
                }
                Err(e) => return self.fail(e).await,
            }
        }
        self.state = PipelineState::Complete;

        let Some(conversation_id) = job.conversation_id else {
            return self.state;
        };
        let message = StoredMessage::new(
            conversation_id,
            ChatRole::Assistant,
            std::mem::take(&mut self.buffer),
        );
        match job.store.append_message(&message).await {
            Ok(_) => {
                self.state = PipelineState::Persisted;
                tracing::debug!(conversation = %conversation_id, "Assistant reply persisted");
                self.state
            }
            Err(e) => self.fail(e).await,
        }
    }
}

/// Spawn the driver and hand back the viewer's end
pub(super) fn spawn(job: StreamJob) -> StreamingReply {
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    let conversation_id = job.conversation_id;
    let task = tokio::spawn(StreamDriver::new(tx).run(job).in_current_span());
    StreamingReply {
        conversation_id,
        frames: ReceiverStream::new(rx),
        task,
    }
}
