use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use crate::quality::{AudioPolicy, Ladder};

const MIB: u64 = 1024 * 1024;

/// Sliding-window throttle settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Maximum media requests per identity inside one window
    pub max_requests: usize,
    /// Length of the trailing window in seconds
    pub window_secs: u64,
    /// How often identities with no recent requests are dropped
    pub prune_interval_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window_secs: 60,
            prune_interval_secs: 5 * 60,
        }
    }
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

/// Configuration for the video note converter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Scratch directory holding per-session input/output files
    pub scratch_dir: PathBuf,
    /// Largest input accepted, in bytes (Bot API download limit)
    pub max_input_bytes: u64,
    /// Largest output delivered, in bytes (video note limit)
    pub max_output_bytes: u64,
    /// Output is truncated to this many seconds
    pub max_duration_secs: u32,
    /// Quality presets tried in order until the output fits
    pub ladder: Ladder,
    pub audio: AudioPolicy,
    pub throttle: ThrottleConfig,
    /// Interval in seconds between scratch directory sweeps
    pub sweep_interval_secs: u64,
    /// Scratch files older than this are treated as orphans
    pub max_file_age_secs: u64,
    /// Upper bound on a single encode attempt
    pub encode_timeout_secs: u64,
    /// Upper bound on fetching the input
    pub download_timeout_secs: u64,
    /// Path to ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to ffprobe binary
    pub ffprobe_bin: PathBuf,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ConverterConfig {
    /// Create a default configuration matching the video note limits
    pub fn default_config() -> Self {
        Self {
            scratch_dir: PathBuf::from("temp"),
            max_input_bytes: 20 * MIB,
            max_output_bytes: 8 * MIB,
            max_duration_secs: 60,
            ladder: Ladder::default(),
            audio: AudioPolicy::Strip,
            throttle: ThrottleConfig::default(),
            sweep_interval_secs: 5 * 60,
            max_file_age_secs: 10 * 60,
            encode_timeout_secs: 60,
            download_timeout_secs: 2 * 60,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                config = if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?
                } else {
                    serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?
                };
            }
        }

        config.validate()
            .context("Invalid configuration")?;
        Ok(config)
    }

    /// Check limits that the rest of the service relies on
    pub fn validate(&self) -> Result<()> {
        self.ladder.validate()?;

        if self.max_input_bytes == 0 || self.max_output_bytes == 0 {
            bail!("byte limits must be greater than zero");
        }
        if self.max_output_bytes > self.max_input_bytes {
            bail!(
                "max_output_bytes ({}) exceeds max_input_bytes ({})",
                self.max_output_bytes, self.max_input_bytes
            );
        }
        if self.max_duration_secs == 0 {
            bail!("max_duration_secs must be greater than zero");
        }
        if self.throttle.max_requests == 0 || self.throttle.window_secs == 0 {
            bail!("throttle max_requests and window_secs must be greater than zero");
        }
        if self.sweep_interval_secs == 0 || self.throttle.prune_interval_secs == 0 {
            bail!("sweep intervals must be greater than zero");
        }
        if self.encode_timeout_secs == 0 || self.download_timeout_secs == 0 {
            bail!("timeouts must be greater than zero");
        }
        let longest = self.longest_session_secs();
        if self.max_file_age_secs <= longest {
            bail!(
                "max_file_age_secs ({}) must exceed the longest possible session ({}s: download plus {} encode attempt(s))",
                self.max_file_age_secs, longest, self.ladder.len()
            );
        }
        Ok(())
    }

    /// Worst-case session duration: one download then every ladder level timing out.
    /// The sweeper must never see a live session's files as orphans.
    pub fn longest_session_secs(&self) -> u64 {
        let attempts = self.ladder.len() as u64;
        self.download_timeout_secs
            .saturating_add(attempts.saturating_mul(self.encode_timeout_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn max_file_age(&self) -> Duration {
        Duration::from_secs(self.max_file_age_secs)
    }

    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.encode_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{QualityLevel, SpeedPreset};
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let cfg = ConverterConfig::default();
        assert_eq!(cfg.max_input_bytes, 20 * 1024 * 1024);
        assert_eq!(cfg.max_output_bytes, 8 * 1024 * 1024);
        assert_eq!(cfg.max_duration_secs, 60);
        assert_eq!(cfg.ladder.primary_size(), Some(384));
        assert_eq!(cfg.throttle.max_requests, 5);
        assert_eq!(cfg.throttle.window(), Duration::from_secs(60));
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(300));
        assert_eq!(cfg.max_file_age(), Duration::from_secs(600));
        assert_eq!(cfg.encode_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.longest_session_secs(), 120 + 5 * 60);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = ConverterConfig::load_config(Some(Path::new("/nonexistent/circle.toml"))).unwrap();
        assert_eq!(cfg, ConverterConfig::default());
        assert_eq!(ConverterConfig::load_config(None).unwrap(), ConverterConfig::default());
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("circle.toml");
        std::fs::write(
            &path,
            r#"
scratch_dir = "/var/tmp/circle"
max_duration_secs = 30

[throttle]
max_requests = 2

[audio]
mode = "aac"
bitrate_kbps = 48

[[ladder]]
size = 320
crf = 30
preset = "veryfast"
"#,
        )
        .unwrap();

        let cfg = ConverterConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.scratch_dir, PathBuf::from("/var/tmp/circle"));
        assert_eq!(cfg.max_duration_secs, 30);
        assert_eq!(cfg.throttle.max_requests, 2);
        assert_eq!(cfg.throttle.window_secs, 60);
        assert_eq!(cfg.audio, AudioPolicy::Aac { bitrate_kbps: 48 });
        assert_eq!(cfg.ladder.levels(), &[QualityLevel::new(320, 30, SpeedPreset::Veryfast)]);
        assert_eq!(cfg.max_output_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn test_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("circle.json");
        std::fs::write(&path, r#"{"max_output_bytes": 1048576, "sweep_interval_secs": 10}"#).unwrap();

        let cfg = ConverterConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.max_output_bytes, 1024 * 1024);
        assert_eq!(cfg.sweep_interval_secs, 10);
    }

    #[test]
    fn test_rejects_invalid_limits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "max_output_bytes = 100\nmax_input_bytes = 10\n").unwrap();
        assert!(ConverterConfig::load_config(Some(&path)).is_err());

        std::fs::write(&path, "ladder = []\n").unwrap();
        assert!(ConverterConfig::load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_rejects_file_age_shorter_than_session() {
        // 120s download + 5 levels x 300s encode outlives a 600s sweep age
        let mut cfg = ConverterConfig::default();
        cfg.encode_timeout_secs = 300;
        assert_eq!(cfg.longest_session_secs(), 1620);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_file_age_secs"));

        cfg.max_file_age_secs = 1620;
        assert!(cfg.validate().is_err());
        cfg.max_file_age_secs = 1621;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_file_age_bound_loaded_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slow.toml");
        std::fs::write(&path, "encode_timeout_secs = 600
").unwrap();
        assert!(ConverterConfig::load_config(Some(&path)).is_err());

        std::fs::write(&path, "encode_timeout_secs = 600
max_file_age_secs = 3600
").unwrap();
        let cfg = ConverterConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.longest_session_secs(), 120 + 5 * 600);
    }
}
