//! Minimal Telegram Bot API client: long polling, file lookup, replies and uploads.

use std::path::Path;
use std::time::Duration;
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use circle_core::{DeliveryError, ResolveError};

/// Timeout for every call except long polling
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Uploads can take a while on slow links
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(180);
/// Slack added on top of the long-poll timeout
const POLL_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub video: Option<Video>,
    pub document: Option<Document>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub file_id: String,
    pub mime_type: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub mime_type: Option<String>,
    pub file_size: Option<u64>,
}

/// Result of `getFile`
#[derive(Debug, Clone, Deserialize)]
pub struct File {
    /// Absent once the file is no longer downloadable
    pub file_path: Option<String>,
}

/// Envelope around every Bot API answer
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// `ok: false` answer from the Bot API
    #[error("telegram error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ApiError {
    /// Request urls embed the bot token
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.without_url())
    }
}

/// Bot API client bound to one token
pub struct BotApi {
    client: Client,
    base: String,
    token: String,
}

impl BotApi {
    pub fn new(api_base: &str, token: &str) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base, self.token, method)
    }

    /// Download location for a `file_path` returned by `getFile`
    pub fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.base, self.token, file_path)
    }

    async fn post_json<P: Serialize, T: DeserializeOwned>(&self, method: &str, params: &P) -> Result<T, ApiError> {
        let response = self.client.post(self.method_url(method)).json(params).send().await?;
        let body = response.text().await?;
        parse_response(&body)
    }

    async fn post_form<T: DeserializeOwned>(&self, method: &str, form: Form) -> Result<T, ApiError> {
        let response = self
            .client
            .post(self.method_url(method))
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        let body = response.text().await?;
        parse_response(&body)
    }

    pub async fn get_me(&self) -> Result<User, ApiError> {
        self.post_json("getMe", &serde_json::json!({})).await
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, ApiError> {
        let params = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        let response = self
            .client
            .post(self.method_url("getUpdates"))
            .timeout(Duration::from_secs(timeout_secs) + POLL_SLACK)
            .json(&params)
            .send()
            .await?;
        let body = response.text().await?;
        parse_response(&body)
    }

    pub async fn get_file(&self, file_id: &str) -> Result<File, ApiError> {
        self.post_json("getFile", &serde_json::json!({ "file_id": file_id })).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message, ApiError> {
        self.post_json("sendMessage", &serde_json::json!({ "chat_id": chat_id, "text": text }))
            .await
    }

    pub async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), ApiError> {
        let params = serde_json::json!({ "chat_id": chat_id, "message_id": message_id, "text": text });
        // Answers with the edited message, or `true` for inline messages
        let _: serde_json::Value = self.post_json("editMessageText", &params).await?;
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ApiError> {
        let params = serde_json::json!({ "chat_id": chat_id, "message_id": message_id });
        let _: bool = self.post_json("deleteMessage", &params).await?;
        Ok(())
    }

    pub async fn send_video_note(&self, chat_id: i64, path: &Path) -> Result<(), ApiError> {
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("video_note", file_part(path).await?);
        let _: Message = self.post_form("sendVideoNote", form).await?;
        Ok(())
    }

    pub async fn send_video(&self, chat_id: i64, path: &Path, caption: &str) -> Result<(), ApiError> {
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("video", file_part(path).await?);
        let _: Message = self.post_form("sendVideo", form).await?;
        Ok(())
    }
}

async fn file_part(path: &Path) -> Result<Part, ApiError> {
    let bytes = tokio::fs::read(path).await?;
    debug!("Uploading {} ({} bytes)", path.display(), bytes.len());
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("video.mp4")
        .to_string();
    Ok(Part::bytes(bytes).file_name(name).mime_str("video/mp4")?)
}

/// Unwrap the `{ ok, result }` envelope
fn parse_response<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    let envelope: ApiResponse<T> =
        serde_json::from_str(body).map_err(|e| ApiError::Malformed(format!("{}: {}", e, truncate(body, 200))))?;

    if !envelope.ok {
        return Err(ApiError::Api {
            code: envelope.error_code.unwrap_or(0),
            description: envelope.description.unwrap_or_default(),
        });
    }
    envelope
        .result
        .ok_or_else(|| ApiError::Malformed("ok response without result".to_string()))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// `getFile` failures as the session sees them
pub fn resolve_error(err: ApiError) -> ResolveError {
    match err {
        ApiError::Api { description, .. } if description.to_ascii_lowercase().contains("file is too big") => {
            ResolveError::TooLarge(description)
        }
        ApiError::Api { code, description } => ResolveError::Unavailable(format!("{}: {}", code, description)),
        ApiError::Transport(e) => ResolveError::Transport(e.to_string()),
        other => ResolveError::Unavailable(other.to_string()),
    }
}

/// `sendVideoNote` failures: the recipient's privacy setting surfaces as a rejection
pub fn video_note_error(err: ApiError) -> DeliveryError {
    match err {
        ApiError::Api { description, .. } if description.contains("VOICE_MESSAGES_FORBIDDEN") => {
            DeliveryError::Rejected(description)
        }
        other => delivery_error(other),
    }
}

pub fn delivery_error(err: ApiError) -> DeliveryError {
    match err {
        ApiError::Api { code, description } => DeliveryError::Api { code, description },
        ApiError::Transport(e) => DeliveryError::Transport(e.to_string()),
        ApiError::Io(e) => DeliveryError::Io(e.to_string()),
        ApiError::Malformed(m) => DeliveryError::Transport(m),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: i64, description: &str) -> ApiError {
        ApiError::Api { code, description: description.to_string() }
    }

    #[test]
    fn test_parse_updates() {
        let body = r#"{"ok":true,"result":[
            {"update_id":10,"message":{"message_id":1,"from":{"id":42,"is_bot":false,"username":"ann"},
             "chat":{"id":42,"type":"private"},
             "video":{"file_id":"BAAC","width":1080,"height":1920,"duration":12,"mime_type":"video/mp4","file_size":5242880}}},
            {"update_id":11,"edited_message":{"message_id":1}}
        ]}"#;
        let updates: Vec<Update> = parse_response(body).unwrap();
        assert_eq!(updates.len(), 2);
        let video = updates[0].message.as_ref().unwrap().video.as_ref().unwrap();
        assert_eq!(video.file_id, "BAAC");
        assert_eq!(video.file_size, Some(5_242_880));
        assert!(updates[1].message.is_none());
    }

    #[test]
    fn test_parse_error_envelope() {
        let body = r#"{"ok":false,"error_code":400,"description":"Bad Request: file is too big"}"#;
        match parse_response::<File>(body) {
            Err(ApiError::Api { code, description }) => {
                assert_eq!(code, 400);
                assert_eq!(description, "Bad Request: file is too big");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(parse_response::<File>("<html>502</html>"), Err(ApiError::Malformed(_))));
        assert!(matches!(parse_response::<File>(r#"{"ok":true}"#), Err(ApiError::Malformed(_))));
    }

    #[test]
    fn test_resolve_error_mapping() {
        assert!(matches!(
            resolve_error(api(400, "Bad Request: File is too big")),
            ResolveError::TooLarge(_)
        ));
        assert!(matches!(
            resolve_error(api(400, "Bad Request: invalid file_id")),
            ResolveError::Unavailable(_)
        ));
        assert!(matches!(
            resolve_error(ApiError::Malformed("x".into())),
            ResolveError::Unavailable(_)
        ));
    }

    #[test]
    fn test_video_note_error_mapping() {
        assert!(matches!(
            video_note_error(api(400, "Bad Request: VOICE_MESSAGES_FORBIDDEN")),
            DeliveryError::Rejected(_)
        ));
        // Only the privacy refusal is recoverable; other bad requests stay api errors
        assert!(matches!(
            video_note_error(api(400, "Bad Request: wrong file identifier")),
            DeliveryError::Api { code: 400, .. }
        ));
        assert!(matches!(
            delivery_error(api(403, "Forbidden: VOICE_MESSAGES_FORBIDDEN")),
            DeliveryError::Api { code: 403, .. }
        ));
        assert!(matches!(
            delivery_error(ApiError::Io(std::io::Error::from(std::io::ErrorKind::NotFound))),
            DeliveryError::Io(_)
        ));
    }

    #[test]
    fn test_urls() {
        let api = BotApi::new("https://api.telegram.org/", "123:abc").unwrap();
        assert_eq!(api.method_url("getMe"), "https://api.telegram.org/bot123:abc/getMe");
        assert_eq!(
            api.file_url("videos/file_1.mp4"),
            "https://api.telegram.org/file/bot123:abc/videos/file_1.mp4"
        );
    }
}
