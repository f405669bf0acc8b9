pub mod config;
pub mod encoder;
pub mod error;
pub mod fetch;
pub mod ffmpeg;
pub mod limiter;
pub mod probe;
pub mod quality;
pub mod service;
pub mod session;
pub mod storage;
pub mod sweeper;
pub mod transcoder;
pub mod transport;

pub use config::{ConverterConfig, ThrottleConfig};
pub use encoder::{EncodeError, Encoder};
pub use error::{FailureKind, SessionError};
pub use ffmpeg::FfmpegEncoder;
pub use limiter::{Admission, AdmissionLimiter, UserId};
pub use quality::{AudioPolicy, EncodeParams, Ladder, QualityLevel, SpeedPreset};
pub use service::Service;
pub use session::{DeliveryMode, SessionHandler, SessionOutcome};
pub use storage::{ScratchDir, SessionId};
pub use transcoder::{AdaptiveTranscoder, TranscodeOutcome};
pub use transport::{Delivery, DeliveryError, FileResolver, MediaDescriptor, MediaKind, MessageId, ResolveError, ResolvedFile};
