use std::path::{Path, PathBuf};
use std::sync::Arc;
use humansize::{format_size, BINARY};
use log::{debug, error, info, warn};
use crate::config::ConverterConfig;
use crate::encoder::Encoder;
use crate::error::{FailureKind, SessionError, FALLBACK_CAPTION};
use crate::fetch::{FetchError, Fetcher};
use crate::storage::{FileRole, ScratchDir, SessionId};
use crate::transcoder::AdaptiveTranscoder;
use crate::transport::{Delivery, DeliveryError, FileResolver, MediaDescriptor, MessageId};

/// Status shown while the conversion runs
pub const STATUS_CONVERTING: &str = "Converting to video note...";

/// Lifecycle phase of a session, in the order a session moves through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Admitted, nothing allocated or fetched yet
    Accepted,
    Fetching,
    Transcoding,
    Verifying,
    Delivering,
    Done,
}

/// How the finished clip reached the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    VideoNote,
    /// Video note refused by the recipient; sent as a plain captioned video
    FallbackVideo,
}

/// Final result of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Delivered {
        mode: DeliveryMode,
        bytes: u64,
        level_index: usize,
    },
    Failed(FailureKind),
}

/// Scratch state of one request. Dropping it removes every file it allocated,
/// whether the request finished, failed, or was abandoned mid-flight.
struct Session<'a> {
    id: SessionId,
    scratch: &'a ScratchDir,
    phase: Phase,
    pending: Vec<PathBuf>,
}

impl<'a> Session<'a> {
    fn new(scratch: &'a ScratchDir) -> Self {
        Self {
            id: SessionId::new(),
            scratch,
            phase: Phase::Accepted,
            pending: Vec::new(),
        }
    }

    /// Allocate a scratch path and register it for cleanup before anything touches it
    fn allocate(&mut self, role: FileRole) -> PathBuf {
        let path = self.scratch.allocate(&self.id, &role);
        self.pending.push(path.clone());
        path
    }

    fn enter(&mut self, phase: Phase) {
        debug_assert!(phase > self.phase, "{:?} -> {:?}", self.phase, phase);
        debug!("Session {}: {:?} -> {:?}", self.id, self.phase, phase);
        self.phase = phase;
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        let removed = self.scratch.cleanup(&self.pending);
        debug!("Session {}: removed {} temp file(s) at {:?}", self.id, removed, self.phase);
    }
}

/// Runs one request end-to-end: fetch, transcode, verify, deliver, clean up
pub struct SessionHandler {
    scratch: ScratchDir,
    fetcher: Fetcher,
    transcoder: AdaptiveTranscoder,
    resolver: Arc<dyn FileResolver>,
    max_input_bytes: u64,
    max_output_bytes: u64,
}

impl SessionHandler {
    pub fn new(
        config: &ConverterConfig,
        encoder: Arc<dyn Encoder>,
        resolver: Arc<dyn FileResolver>,
    ) -> Result<Self, FetchError> {
        let fetcher = Fetcher::new(config.max_input_bytes, config.download_timeout())?;
        let transcoder = AdaptiveTranscoder::new(
            encoder,
            config.ladder.clone(),
            config.max_output_bytes,
            config.max_duration_secs,
            config.audio,
        );
        Ok(Self {
            scratch: ScratchDir::new(&config.scratch_dir),
            fetcher,
            transcoder,
            resolver,
            max_input_bytes: config.max_input_bytes,
            max_output_bytes: config.max_output_bytes,
        })
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    /// Handle one inbound request. Never fails: every error is classified, reported
    /// to the user through `reply`, and the session's temp files are removed.
    pub async fn handle_request(
        &self,
        media: Option<&MediaDescriptor>,
        reply: &dyn Delivery,
    ) -> SessionOutcome {
        let media = match media.filter(|m| m.is_video()) {
            Some(m) => m,
            None => {
                send_best_effort(reply, FailureKind::NoMedia.user_message()).await;
                return SessionOutcome::Failed(FailureKind::NoMedia);
            }
        };

        if let Some(declared) = media.declared_size {
            if declared > self.max_input_bytes {
                info!(
                    "Rejecting {}: declared {} exceeds input limit {}",
                    media.file_ref,
                    format_size(declared, BINARY),
                    format_size(self.max_input_bytes, BINARY)
                );
                send_best_effort(reply, FailureKind::InputTooLarge.user_message()).await;
                return SessionOutcome::Failed(FailureKind::InputTooLarge);
            }
        }

        let mut session = Session::new(&self.scratch);
        let mut status: Option<MessageId> = None;
        info!("Session {}: started for file {}", session.id, media.file_ref);

        match self.run(&mut session, media, reply, &mut status).await {
            Ok(outcome) => {
                if let Some(id) = status {
                    if let Err(e) = reply.delete_message(id).await {
                        debug!("Session {}: could not delete status message: {}", session.id, e);
                    }
                }
                info!("Session {}: completed ({:?})", session.id, outcome);
                outcome
            }
            Err(e) => {
                let kind = e.kind();
                if kind == FailureKind::Unexpected {
                    error!("Session {}: failed at {:?}: {:?}", session.id, session.phase, e);
                } else {
                    warn!("Session {}: failed at {:?} ({:?}): {}", session.id, session.phase, kind, e);
                }
                report_failure(reply, status, kind).await;
                SessionOutcome::Failed(kind)
            }
        }
    }

    async fn run(
        &self,
        session: &mut Session<'_>,
        media: &MediaDescriptor,
        reply: &dyn Delivery,
        status: &mut Option<MessageId>,
    ) -> Result<SessionOutcome, SessionError> {
        let output = session.allocate(FileRole::Output);

        session.enter(Phase::Fetching);
        let resolved = self.resolver.resolve(&media.file_ref).await?;
        let input = session.allocate(FileRole::Input { extension: resolved.extension() });
        let downloaded = self.fetcher.fetch(&resolved.url, &input).await?;
        info!("Session {}: downloaded {}", session.id, format_size(downloaded, BINARY));

        match reply.send_message(STATUS_CONVERTING).await {
            Ok(id) => *status = Some(id),
            Err(e) => warn!("Session {}: could not send status message: {}", session.id, e),
        }

        if let Some(info) = self.transcoder.encoder().inspect(&input).await {
            info!(
                "Session {}: input {}x{}, {:.1}s, codec {}",
                session.id,
                info.width.unwrap_or(0),
                info.height.unwrap_or(0),
                info.duration_secs.unwrap_or(0.0),
                info.codec.as_deref().unwrap_or("unknown")
            );
        }

        session.enter(Phase::Transcoding);
        let transcoded = self.transcoder.transcode(&input, &output).await?;

        session.enter(Phase::Verifying);
        let bytes = verify_output(&output, self.max_output_bytes).await?;

        session.enter(Phase::Delivering);
        let mode = deliver(session.id, reply, &output).await?;

        session.enter(Phase::Done);
        Ok(SessionOutcome::Delivered {
            mode,
            bytes,
            level_index: transcoded.level_index,
        })
    }
}

/// Re-check the output right before delivery
async fn verify_output(output: &Path, max_bytes: u64) -> Result<u64, SessionError> {
    let bytes = match tokio::fs::metadata(output).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(SessionError::OutputMissing),
        Err(e) => return Err(e.into()),
    };
    if bytes > max_bytes {
        return Err(SessionError::OutputOversized { bytes, limit: max_bytes });
    }
    Ok(bytes)
}

/// Send as a video note; if the recipient refuses that mode, retry once as a plain video
async fn deliver(id: SessionId, reply: &dyn Delivery, output: &Path) -> Result<DeliveryMode, SessionError> {
    match reply.send_video_note(output).await {
        Ok(()) => Ok(DeliveryMode::VideoNote),
        Err(DeliveryError::Rejected(reason)) => {
            info!("Session {}: video note refused ({}), sending as regular video", id, reason);
            reply
                .send_video(output, FALLBACK_CAPTION)
                .await
                .map_err(SessionError::FallbackDelivery)?;
            Ok(DeliveryMode::FallbackVideo)
        }
        Err(e) => Err(e.into()),
    }
}

/// Replace the status message with the failure text, or send a fresh message
async fn report_failure(reply: &dyn Delivery, status: Option<MessageId>, kind: FailureKind) {
    let message = kind.user_message();
    if let Some(id) = status {
        match reply.edit_message(id, message).await {
            Ok(()) => return,
            Err(e) => debug!("Could not edit status message, sending a new one: {}", e),
        }
    }
    send_best_effort(reply, message).await;
}

async fn send_best_effort(reply: &dyn Delivery, text: &str) {
    if let Err(e) = reply.send_message(text).await {
        warn!("Could not send reply: {}", e);
    }
}
