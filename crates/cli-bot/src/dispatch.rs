use std::sync::Arc;
use log::{debug, info, warn};
use tokio::task::JoinSet;
use circle_core::{Admission, MediaDescriptor, MediaKind, Service, UserId};
use crate::commands::{self, Command};
use crate::reply::ChatReply;
use crate::telegram::{BotApi, Message};

/// What to do with one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Command(Command),
    /// Throttled and handed to a session
    Media { user: UserId, media: MediaDescriptor },
    Ignore,
}

/// Classify a message. Only messages carrying a video or a document count as media.
///
/// Every document takes a throttle slot. Non-video documents are not dropped
/// silently here: the session answers them with the send-a-video guidance.
pub fn route(message: &Message) -> Route {
    let user = UserId(message.from.as_ref().map(|u| u.id).unwrap_or(message.chat.id));

    if let Some(video) = &message.video {
        return Route::Media {
            user,
            media: MediaDescriptor {
                file_ref: video.file_id.clone(),
                declared_size: video.file_size,
                mime_type: video.mime_type.clone(),
                kind: MediaKind::Video,
            },
        };
    }
    if let Some(document) = &message.document {
        return Route::Media {
            user,
            media: MediaDescriptor {
                file_ref: document.file_id.clone(),
                declared_size: document.file_size,
                mime_type: document.mime_type.clone(),
                kind: MediaKind::Document,
            },
        };
    }
    match message.text.as_deref().and_then(Command::parse) {
        Some(command) => Route::Command(command),
        None => Route::Ignore,
    }
}

/// Routes messages and spawns their work into the caller's `JoinSet`
pub struct Dispatcher {
    service: Arc<Service>,
    api: Arc<BotApi>,
}

impl Dispatcher {
    pub fn new(service: Arc<Service>, api: Arc<BotApi>) -> Self {
        Self { service, api }
    }

    pub fn dispatch(&self, message: Message, tasks: &mut JoinSet<()>) {
        let chat_id = message.chat.id;
        match route(&message) {
            Route::Command(command) => {
                debug!("Command {:?} from chat {}", command, chat_id);
                self.reply_text(tasks, chat_id, command.reply_text().to_string());
            }
            Route::Media { user, media } => match self.service.admit(user) {
                Admission::Allowed => {
                    info!("Accepted {:?} {} from user {}", media.kind, media.file_ref, user);
                    let handler = self.service.handler();
                    let reply = ChatReply::new(self.api.clone(), chat_id);
                    tasks.spawn(async move {
                        handler.handle_request(Some(&media), &reply).await;
                    });
                }
                Admission::Denied { retry_after_secs } => {
                    self.reply_text(tasks, chat_id, commands::throttle_message(retry_after_secs));
                }
                Admission::Closed => debug!("Dropping media from user {} during shutdown", user),
            },
            Route::Ignore => debug!("Ignoring message {} in chat {}", message.message_id, chat_id),
        }
    }

    fn reply_text(&self, tasks: &mut JoinSet<()>, chat_id: i64, text: String) {
        let api = self.api.clone();
        tasks.spawn(async move {
            if let Err(e) = api.send_message(chat_id, &text).await {
                warn!("Failed to reply in chat {}: {}", chat_id, e);
            }
        });
    }
}
