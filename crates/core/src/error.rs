use thiserror::Error;
use crate::fetch::FetchError;
use crate::transcoder::TranscodeError;
use crate::transport::{DeliveryError, ResolveError};

pub const NO_MEDIA_MESSAGE: &str = "📹 Please send a video file.";
pub const INPUT_TOO_LARGE_MESSAGE: &str = "⚠️ File is too large for Telegram Bot API (max 20 MB).\n\n\
    Tip: Send video as \"video\" (not as file) - Telegram will compress it automatically.";
pub const DOWNLOAD_FAILED_MESSAGE: &str = "❌ Failed to download video. Please try again.";
pub const CONVERSION_FAILED_MESSAGE: &str = "❌ Failed to convert video. Please try a different video.";
pub const OUTPUT_TOO_LARGE_MESSAGE: &str = "❌ Could not compress video enough. Please try a shorter video.";
pub const UNEXPECTED_MESSAGE: &str = "❌ Something went wrong. Please try again later.";

/// Caption attached when a video note is refused and sent as a plain video instead
pub const FALLBACK_CAPTION: &str = "⚠️ Video note blocked by privacy settings. Sending as regular video.\n\n\
    To receive circles, enable: Settings → Privacy → Voice Messages → Everybody";

/// User-facing classification of a session outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NoMedia,
    InputTooLarge,
    DownloadFailed,
    ConversionFailed,
    OutputTooLarge,
    /// Recovered locally by falling back to a plain video
    DeliveryRejected,
    Unexpected,
}

impl FailureKind {
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureKind::NoMedia => NO_MEDIA_MESSAGE,
            FailureKind::InputTooLarge => INPUT_TOO_LARGE_MESSAGE,
            FailureKind::DownloadFailed => DOWNLOAD_FAILED_MESSAGE,
            FailureKind::ConversionFailed => CONVERSION_FAILED_MESSAGE,
            FailureKind::OutputTooLarge => OUTPUT_TOO_LARGE_MESSAGE,
            FailureKind::DeliveryRejected => FALLBACK_CAPTION,
            FailureKind::Unexpected => UNEXPECTED_MESSAGE,
        }
    }
}

/// Everything that can end a session early
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("input of {declared} bytes exceeds the {limit} byte limit")]
    InputTooLarge { declared: u64, limit: u64 },
    #[error("resolve failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("transcode failed: {0}")]
    Transcode(#[from] TranscodeError),
    #[error("output missing after transcode")]
    OutputMissing,
    #[error("output of {bytes} bytes exceeds the {limit} byte limit")]
    OutputOversized { bytes: u64, limit: u64 },
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("fallback delivery failed: {0}")]
    FallbackDelivery(#[source] DeliveryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Map to exactly one user-facing category
    pub fn kind(&self) -> FailureKind {
        match self {
            SessionError::InputTooLarge { .. } => FailureKind::InputTooLarge,
            SessionError::Resolve(ResolveError::TooLarge(_)) => FailureKind::InputTooLarge,
            SessionError::Resolve(_) => FailureKind::DownloadFailed,
            SessionError::Fetch(FetchError::TooLarge { .. }) => FailureKind::InputTooLarge,
            SessionError::Fetch(_) => FailureKind::DownloadFailed,
            SessionError::Transcode(TranscodeError::Exhausted { .. }) => FailureKind::OutputTooLarge,
            SessionError::Transcode(_) => FailureKind::ConversionFailed,
            SessionError::OutputMissing => FailureKind::ConversionFailed,
            SessionError::OutputOversized { .. } => FailureKind::OutputTooLarge,
            SessionError::Delivery(_) | SessionError::FallbackDelivery(_) | SessionError::Io(_) => {
                FailureKind::Unexpected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncodeError;

    #[test]
    fn test_classification_table() {
        let cases: Vec<(SessionError, FailureKind)> = vec![
            (SessionError::InputTooLarge { declared: 30, limit: 20 }, FailureKind::InputTooLarge),
            (ResolveError::TooLarge("file is too big".into()).into(), FailureKind::InputTooLarge),
            (ResolveError::Unavailable("gone".into()).into(), FailureKind::DownloadFailed),
            (ResolveError::Transport("reset".into()).into(), FailureKind::DownloadFailed),
            (FetchError::Status(404).into(), FailureKind::DownloadFailed),
            (FetchError::Missing("/tmp/x".into()).into(), FailureKind::DownloadFailed),
            (FetchError::TooLarge { limit: 20 }.into(), FailureKind::InputTooLarge),
            (
                TranscodeError::Exhausted { attempts: 5, max_bytes: 8, smallest_bytes: 9 }.into(),
                FailureKind::OutputTooLarge,
            ),
            (
                TranscodeError::Encode(EncodeError::Failed { code: 1, stderr_tail: String::new() }).into(),
                FailureKind::ConversionFailed,
            ),
            (
                TranscodeError::Encode(EncodeError::TimedOut { secs: 300 }).into(),
                FailureKind::ConversionFailed,
            ),
            (SessionError::OutputMissing, FailureKind::ConversionFailed),
            (SessionError::OutputOversized { bytes: 9, limit: 8 }, FailureKind::OutputTooLarge),
            (DeliveryError::Transport("timeout".into()).into(), FailureKind::Unexpected),
            (
                SessionError::FallbackDelivery(DeliveryError::Rejected("again".into())),
                FailureKind::Unexpected,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.kind(), expected, "{}", error);
        }
    }

    #[test]
    fn test_messages_are_distinct() {
        let kinds = [
            FailureKind::NoMedia,
            FailureKind::InputTooLarge,
            FailureKind::DownloadFailed,
            FailureKind::ConversionFailed,
            FailureKind::OutputTooLarge,
            FailureKind::DeliveryRejected,
            FailureKind::Unexpected,
        ];
        let mut messages: Vec<&str> = kinds.iter().map(|k| k.user_message()).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), kinds.len());
        assert!(!FALLBACK_CAPTION.is_empty());
    }
}
