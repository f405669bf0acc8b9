use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;
use crate::encoder::{EncodeError, Encoder};
use crate::probe::{self, MediaInfo};
use crate::quality::{AudioPolicy, EncodeParams};

/// Lines of ffmpeg stderr kept in an error
const STDERR_TAIL_LINES: usize = 12;

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FFmpegVersion {
    /// Parse version from FFmpeg version string.
    /// Example: "ffmpeg version 6.1.1-3ubuntu5 Copyright ..." -> 6.1.1
    pub fn parse(version_str: &str) -> Result<Self> {
        let version_part = version_str
            .split_whitespace()
            .map(|s| s.trim_start_matches('n'))
            .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
            .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        let mut numbers = version_part.split('.').map(leading_number);

        let major = numbers
            .next()
            .flatten()
            .ok_or_else(|| anyhow!("Invalid version format: {}", version_str))?;
        let minor = numbers.next().flatten().unwrap_or(0);
        let patch = numbers.next().flatten().unwrap_or(0);

        Ok(FFmpegVersion { major, minor, patch })
    }
}

fn leading_number(part: &str) -> Option<u32> {
    let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Builds ffmpeg argument lists for video note encodes
#[derive(Debug, Default)]
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn new() -> Self {
        CommandBuilder
    }

    /// Video filter chain: centred square crop, then scale to the target size
    pub fn note_filter(square_size: u32) -> String {
        format!(
            "crop=min(iw\\,ih):min(iw\\,ih),scale={size}:{size},setsar=1",
            size = square_size
        )
    }

    /// Build the encode command for one ladder attempt
    ///
    /// - crop to a centred square and scale
    /// - H.264 (libx264) at the level's CRF/preset, yuv420p for player compatibility
    /// - truncate to the maximum duration
    /// - strip or re-encode audio
    /// - `+faststart` so playback can begin before the download finishes
    pub fn build_note_command(&self, input: &Path, output: &Path, params: &EncodeParams) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
        ];

        if matches!(params.audio, AudioPolicy::Aac { .. }) {
            args.push("-map".to_string());
            args.push("0:a:0?".to_string());
        }

        args.push("-vf".to_string());
        args.push(Self::note_filter(params.square_size));

        args.push("-c:v".to_string());
        args.push("libx264".to_string());
        args.push("-preset".to_string());
        args.push(params.preset.as_str().to_string());
        args.push("-crf".to_string());
        args.push(params.crf.to_string());
        args.push("-pix_fmt".to_string());
        args.push("yuv420p".to_string());

        args.push("-t".to_string());
        args.push(params.max_duration_secs.to_string());

        match params.audio {
            AudioPolicy::Strip => args.push("-an".to_string()),
            AudioPolicy::Aac { bitrate_kbps } => {
                args.push("-c:a".to_string());
                args.push("aac".to_string());
                args.push("-b:a".to_string());
                args.push(format!("{}k", bitrate_kbps));
            }
        }

        args.push("-movflags".to_string());
        args.push("+faststart".to_string());

        args.push(output.to_string_lossy().to_string());
        args
    }
}

/// Encoder backed by the ffmpeg/ffprobe binaries
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    pub timeout: Duration,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, ffprobe_bin: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
            timeout,
        }
    }

    /// Run `ffmpeg -version` and parse the first line
    pub async fn detect_version(&self) -> Result<FFmpegVersion> {
        let output = Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute FFmpeg at: {}", self.ffmpeg_bin.display()))?;

        if !output.status.success() {
            return Err(anyhow!("FFmpeg version check failed"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow!("Empty output from FFmpeg -version"))?;

        FFmpegVersion::parse(first_line)
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, input: &Path, output: &Path, params: &EncodeParams) -> Result<(), EncodeError> {
        let args = CommandBuilder::new().build_note_command(input, output, params);
        debug!("Executing FFmpeg: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        let child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(EncodeError::Spawn)?;

        // Dropping the child on timeout kills ffmpeg
        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(EncodeError::Spawn)?,
            Err(_) => {
                warn!("FFmpeg timed out after {:?} on {}", self.timeout, input.display());
                return Err(EncodeError::TimedOut { secs: self.timeout.as_secs() });
            }
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(EncodeError::Failed {
                code: result.status.code().unwrap_or(-1),
                stderr_tail: stderr_tail(&stderr),
            });
        }
        Ok(())
    }

    async fn inspect(&self, input: &Path) -> Option<MediaInfo> {
        match probe::probe_file(&self.ffprobe_bin, input).await {
            Ok(data) => Some(data.media_info()),
            Err(e) => {
                debug!("ffprobe failed for {}: {:#}", input.display(), e);
                None
            }
        }
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
