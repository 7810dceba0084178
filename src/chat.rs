//! Multi-turn conversation threaded through the conversation ids.

use std::sync::Arc;

use gemini_api::client::CancellationSignal;
use gemini_api::{ChatRequest, ConversationMetadata, Endpoint, ErrorKind, FileAttachment, GeminiError, ModelOutput};

use crate::engine::Engine;
use crate::upload::UploadedResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No reply yet; the next turn opens a new conversation.
    Fresh,
    /// Every turn continues the conversation named by the metadata.
    Threaded,
}

/// One conversation on a shared [`Engine`].
///
/// Methods take `&mut self`, so a session is driven by one caller at a time.
/// Independent sessions on the same engine may run concurrently.
pub struct ChatSession {
    engine: Arc<Engine>,
    metadata: ConversationMetadata,
    persona_id: Option<String>,
    last_output: Option<ModelOutput>,
}

impl ChatSession {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        Self::resume(engine, ConversationMetadata::default())
    }

    pub(crate) fn resume(engine: Arc<Engine>, metadata: ConversationMetadata) -> Self {
        Self {
            engine,
            metadata,
            persona_id: None,
            last_output: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.metadata.is_empty() {
            SessionState::Fresh
        } else {
            SessionState::Threaded
        }
    }

    pub fn metadata(&self) -> &ConversationMetadata {
        &self.metadata
    }

    pub fn last_output(&self) -> Option<&ModelOutput> {
        self.last_output.as_ref()
    }

    pub fn persona_id(&self) -> Option<&str> {
        self.persona_id.as_deref()
    }

    pub fn set_persona(&mut self, persona_id: impl Into<String>) {
        self.persona_id = Some(persona_id.into()).filter(|id| !id.is_empty());
    }

    pub fn clear_persona(&mut self) {
        self.persona_id = None;
    }

    /// Forget the conversation; the next turn starts a new one.
    pub fn reset(&mut self) {
        self.metadata = ConversationMetadata::default();
        self.last_output = None;
    }

    pub async fn send_message(
        &mut self,
        prompt: &str,
        attachments: &[UploadedResource],
    ) -> Result<ModelOutput, GeminiError> {
        self.send_message_cancellable(prompt, attachments, None).await
    }

    /// Send one turn. On any error the conversation ids stay as they were.
    pub async fn send_message_cancellable(
        &mut self,
        prompt: &str,
        attachments: &[UploadedResource],
        cancellation: Option<&CancellationSignal>,
    ) -> Result<ModelOutput, GeminiError> {
        let files = attachments
            .iter()
            .map(UploadedResource::to_attachment)
            .collect::<Vec<FileAttachment>>();
        let request = ChatRequest {
            prompt,
            files: &files,
            metadata: Some(&self.metadata).filter(|metadata| !metadata.is_empty()),
            persona_id: self.persona_id.as_deref(),
            antibot_token: None,
        };

        let output = self.engine.generate_content(&request, cancellation).await?;
        self.metadata = output.metadata.clone();
        self.last_output = Some(output.clone());
        Ok(output)
    }

    /// Pick another candidate of the last reply; the next turn continues from it.
    pub fn choose_candidate(&mut self, index: usize) -> Result<&ModelOutput, GeminiError> {
        let output = self.last_output.as_mut().ok_or_else(|| {
            GeminiError::new(
                ErrorKind::Config,
                Endpoint::Local,
                "no reply to choose a candidate from",
            )
        })?;
        if !output.select(index) {
            return Err(GeminiError::new(
                ErrorKind::Config,
                Endpoint::Local,
                format!(
                    "candidate index {index} is out of range ({} candidates)",
                    output.candidates.len()
                ),
            ));
        }
        self.metadata = output.metadata.clone();
        Ok(output)
    }
}
