//! Collaborator seams between the session core and the chat transport.

use std::path::Path;
use async_trait::async_trait;
use thiserror::Error;

/// How the inbound media was attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Sent as a video message
    Video,
    /// Sent as a generic file
    Document,
}

/// Inbound media reference, before anything is downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    /// Opaque remote file reference
    pub file_ref: String,
    pub declared_size: Option<u64>,
    pub mime_type: Option<String>,
    pub kind: MediaKind,
}

impl MediaDescriptor {
    /// Videos are accepted as-is; documents only when their MIME type says video
    pub fn is_video(&self) -> bool {
        match self.kind {
            MediaKind::Video => true,
            MediaKind::Document => self
                .mime_type
                .as_deref()
                .map(|m| m.to_ascii_lowercase().starts_with("video/"))
                .unwrap_or(false),
        }
    }
}

/// Where a remote file can be fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub url: String,
    /// Remote path, used only to pick the local file extension
    pub remote_path: Option<String>,
}

impl ResolvedFile {
    pub fn extension(&self) -> Option<String> {
        self.remote_path
            .as_deref()
            .and_then(|p| Path::new(p).extension())
            .and_then(|e| e.to_str())
            .map(str::to_string)
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The transport refuses to hand out files this large
    #[error("file too large to resolve: {0}")]
    TooLarge(String),
    #[error("file not available: {0}")]
    Unavailable(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Identifier of a message sent through [`Delivery`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub i64);

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The recipient's settings refuse this delivery mode
    #[error("delivery mode rejected: {0}")]
    Rejected(String),
    #[error("api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("io error: {0}")]
    Io(String),
}

/// Turns a remote file reference into a fetchable location
#[async_trait]
pub trait FileResolver: Send + Sync {
    async fn resolve(&self, file_ref: &str) -> Result<ResolvedFile, ResolveError>;
}

/// Reply channel for one conversation
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Send as a compact circular video
    async fn send_video_note(&self, path: &Path) -> Result<(), DeliveryError>;

    /// Send as an ordinary video with a caption
    async fn send_video(&self, path: &Path, caption: &str) -> Result<(), DeliveryError>;

    async fn send_message(&self, text: &str) -> Result<MessageId, DeliveryError>;

    /// May fail if the message is already gone
    async fn edit_message(&self, id: MessageId, text: &str) -> Result<(), DeliveryError>;

    /// May fail if the message is already gone
    async fn delete_message(&self, id: MessageId) -> Result<(), DeliveryError>;
}
