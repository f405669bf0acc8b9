use std::path::Path;
use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;
use tokio::process::Command;

/// Subset of ffprobe's JSON output we care about
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeData {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    pub format: ProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeFormat {
    pub format_name: Option<String>,
    /// Seconds, as a decimal string
    pub duration: Option<String>,
    /// Bytes, as a decimal string
    pub size: Option<String>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<String>,
}

/// Summary of an input video, used for logging and tests
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<f64>,
    pub codec: Option<String>,
    pub has_audio: bool,
}

impl ProbeData {
    pub fn video_stream(&self) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }

    pub fn media_info(&self) -> MediaInfo {
        let video = self.video_stream();
        let duration_secs = self
            .format
            .duration
            .as_deref()
            .or_else(|| video.and_then(|v| v.duration.as_deref()))
            .and_then(|d| d.parse::<f64>().ok());

        MediaInfo {
            width: video.and_then(|v| v.width),
            height: video.and_then(|v| v.height),
            duration_secs,
            codec: video.and_then(|v| v.codec_name.clone()),
            has_audio: self
                .streams
                .iter()
                .any(|s| s.codec_type.as_deref() == Some("audio")),
        }
    }
}

/// Run ffprobe and parse the JSON output
pub async fn probe_file(ffprobe_bin: &Path, file_path: &Path) -> Result<ProbeData> {
    if !file_path.exists() {
        anyhow::bail!("File does not exist: {}", file_path.display());
    }

    let output = Command::new(ffprobe_bin)
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(file_path)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to execute ffprobe for: {}", file_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "ffprobe failed (exit code {}) for {}: {}",
            output.status.code().unwrap_or(-1),
            file_path.display(),
            stderr.trim()
        );
    }

    let json_str = String::from_utf8(output.stdout)
        .context("ffprobe output is not valid UTF-8")?;
    debug!("ffprobe returned {} bytes of JSON for {}", json_str.len(), file_path.display());

    parse_probe_json(&json_str)
        .with_context(|| format!("Failed to parse ffprobe JSON for: {}", file_path.display()))
}

pub fn parse_probe_json(json: &str) -> Result<ProbeData> {
    Ok(serde_json::from_str(json)?)
}
