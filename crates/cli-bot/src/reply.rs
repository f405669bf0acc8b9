use std::path::Path;
use std::sync::Arc;
use async_trait::async_trait;
use circle_core::{Delivery, DeliveryError, FileResolver, MessageId, ResolveError, ResolvedFile};
use crate::telegram::{self, BotApi};

#[async_trait]
impl FileResolver for BotApi {
    async fn resolve(&self, file_ref: &str) -> Result<ResolvedFile, ResolveError> {
        let file = self.get_file(file_ref).await.map_err(telegram::resolve_error)?;
        let file_path = file
            .file_path
            .ok_or_else(|| ResolveError::Unavailable(format!("no file_path for {}", file_ref)))?;
        Ok(ResolvedFile {
            url: self.file_url(&file_path),
            remote_path: Some(file_path),
        })
    }
}

/// Replies into one chat
pub struct ChatReply {
    api: Arc<BotApi>,
    chat_id: i64,
}

impl ChatReply {
    pub fn new(api: Arc<BotApi>, chat_id: i64) -> Self {
        Self { api, chat_id }
    }
}

#[async_trait]
impl Delivery for ChatReply {
    async fn send_video_note(&self, path: &Path) -> Result<(), DeliveryError> {
        self.api
            .send_video_note(self.chat_id, path)
            .await
            .map_err(telegram::video_note_error)
    }

    async fn send_video(&self, path: &Path, caption: &str) -> Result<(), DeliveryError> {
        self.api
            .send_video(self.chat_id, path, caption)
            .await
            .map_err(telegram::delivery_error)
    }

    async fn send_message(&self, text: &str) -> Result<MessageId, DeliveryError> {
        let message = self
            .api
            .send_message(self.chat_id, text)
            .await
            .map_err(telegram::delivery_error)?;
        Ok(MessageId(message.message_id))
    }

    async fn edit_message(&self, id: MessageId, text: &str) -> Result<(), DeliveryError> {
        self.api
            .edit_message_text(self.chat_id, id.0, text)
            .await
            .map_err(telegram::delivery_error)
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), DeliveryError> {
        self.api
            .delete_message(self.chat_id, id.0)
            .await
            .map_err(telegram::delivery_error)
    }
}
