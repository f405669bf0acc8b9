use std::path::Path;
use async_trait::async_trait;
use thiserror::Error;
use crate::probe::MediaInfo;
use crate::quality::EncodeParams;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to start encoder: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("encoder exited with code {code}: {stderr_tail}")]
    Failed { code: i32, stderr_tail: String },
    #[error("encoder timed out after {secs}s")]
    TimedOut { secs: u64 },
}

/// Black-box encode capability.
///
/// `encode` either leaves a finished file at `output` or reports why it could not.
/// Rate control is opaque; callers check the resulting size themselves.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, input: &Path, output: &Path, params: &EncodeParams) -> Result<(), EncodeError>;

    /// Best-effort description of an input, used only for logging
    async fn inspect(&self, _input: &Path) -> Option<MediaInfo> {
        None
    }
}
