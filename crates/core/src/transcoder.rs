use std::path::{Path, PathBuf};
use std::sync::Arc;
use humansize::{format_size, BINARY};
use log::{info, warn};
use thiserror::Error;
use crate::encoder::{EncodeError, Encoder};
use crate::quality::{AudioPolicy, EncodeParams, Ladder, QualityLevel};

#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Every ladder level produced output over the byte budget
    #[error("no quality level fits {max_bytes} bytes after {attempts} attempt(s), smallest was {smallest_bytes}")]
    Exhausted {
        attempts: usize,
        max_bytes: u64,
        smallest_bytes: u64,
    },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Successful ladder search
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOutcome {
    pub level_index: usize,
    pub level: QualityLevel,
    pub bytes: u64,
    pub attempts: usize,
}

/// Searches the quality ladder for the first level whose output fits the byte budget
pub struct AdaptiveTranscoder {
    encoder: Arc<dyn Encoder>,
    ladder: Ladder,
    max_output_bytes: u64,
    max_duration_secs: u32,
    audio: AudioPolicy,
}

impl AdaptiveTranscoder {
    pub fn new(
        encoder: Arc<dyn Encoder>,
        ladder: Ladder,
        max_output_bytes: u64,
        max_duration_secs: u32,
        audio: AudioPolicy,
    ) -> Self {
        Self {
            encoder,
            ladder,
            max_output_bytes,
            max_duration_secs,
            audio,
        }
    }

    pub fn encoder(&self) -> &Arc<dyn Encoder> {
        &self.encoder
    }

    pub fn ladder(&self) -> &Ladder {
        &self.ladder
    }

    /// Encode `input` into `output`, walking the ladder from index 0.
    ///
    /// Only an oversized result advances the ladder; an encoder failure is returned
    /// immediately. On success `output` holds the final file.
    pub async fn transcode(&self, input: &Path, output: &Path) -> Result<TranscodeOutcome, TranscodeError> {
        let mut smallest_bytes = u64::MAX;

        for (index, level) in self.ladder.levels().iter().enumerate() {
            let params = EncodeParams::for_level(level, self.max_duration_secs, self.audio);
            info!("Encoding attempt {}/{} at {}", index + 1, self.ladder.len(), level);

            self.encoder.encode(input, output, &params).await?;

            let bytes = tokio::fs::metadata(output)
                .await
                .map_err(|source| TranscodeError::Io { path: output.to_path_buf(), source })?
                .len();

            if bytes <= self.max_output_bytes {
                info!(
                    "Output fits at level {} ({} <= {})",
                    index,
                    format_size(bytes, BINARY),
                    format_size(self.max_output_bytes, BINARY)
                );
                return Ok(TranscodeOutcome {
                    level_index: index,
                    level: *level,
                    bytes,
                    attempts: index + 1,
                });
            }

            smallest_bytes = smallest_bytes.min(bytes);
            warn!(
                "Output too large at level {} ({} > {}), retrying with lower quality",
                index,
                format_size(bytes, BINARY),
                format_size(self.max_output_bytes, BINARY)
            );
            tokio::fs::remove_file(output)
                .await
                .map_err(|source| TranscodeError::Io { path: output.to_path_buf(), source })?;
        }

        Err(TranscodeError::Exhausted {
            attempts: self.ladder.len(),
            max_bytes: self.max_output_bytes,
            smallest_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::SpeedPreset;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use tempfile::TempDir;

    /// Writes an output whose size is looked up by attempt number
    struct SizedEncoder {
        sizes: Vec<u64>,
        fail_at: Option<usize>,
        calls: Mutex<Vec<EncodeParams>>,
    }

    impl SizedEncoder {
        fn new(sizes: Vec<u64>) -> Self {
            Self { sizes, fail_at: None, calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Encoder for SizedEncoder {
        async fn encode(&self, _input: &Path, output: &Path, params: &EncodeParams) -> Result<(), EncodeError> {
            let attempt = {
                let mut calls = self.calls.lock();
                calls.push(params.clone());
                calls.len() - 1
            };
            if self.fail_at == Some(attempt) {
                return Err(EncodeError::Failed { code: 1, stderr_tail: "Invalid data found".into() });
            }
            assert!(!output.exists(), "oversized output must be removed before retrying");
            std::fs::write(output, vec![0u8; self.sizes[attempt] as usize]).unwrap();
            Ok(())
        }
    }

    fn ladder(n: usize) -> Ladder {
        let levels = (0..n)
            .map(|i| QualityLevel::new(384 - 16 * i as u32, 28 + i as u8, SpeedPreset::Fast))
            .collect();
        Ladder::new(levels).unwrap()
    }

    fn transcoder(encoder: Arc<SizedEncoder>, levels: usize, max: u64) -> AdaptiveTranscoder {
        AdaptiveTranscoder::new(encoder, ladder(levels), max, 60, AudioPolicy::Strip)
    }

    #[tokio::test]
    async fn test_first_level_fits() {
        let dir = TempDir::new().unwrap();
        let encoder = Arc::new(SizedEncoder::new(vec![100]));
        let out = dir.path().join("out.mp4");

        let outcome = transcoder(encoder.clone(), 3, 100)
            .transcode(Path::new("in.mp4"), &out)
            .await
            .unwrap();
        assert_eq!(outcome.level_index, 0);
        assert_eq!(outcome.bytes, 100);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(encoder.calls.lock().len(), 1);
        assert_eq!(encoder.calls.lock()[0].max_duration_secs, 60);
    }

    #[tokio::test]
    async fn test_advances_until_fit() {
        let dir = TempDir::new().unwrap();
        let encoder = Arc::new(SizedEncoder::new(vec![300, 200, 90, 10]));
        let out = dir.path().join("out.mp4");

        let outcome = transcoder(encoder.clone(), 4, 100)
            .transcode(Path::new("in.mp4"), &out)
            .await
            .unwrap();
        assert_eq!(outcome.level_index, 2);
        assert_eq!(outcome.level, ladder(4).levels()[2]);
        assert_eq!(std::fs::metadata(&out).unwrap().len(), 90);

        let sizes: Vec<u32> = encoder.calls.lock().iter().map(|p| p.square_size).collect();
        assert_eq!(sizes, vec![384, 368, 352]);
    }

    #[tokio::test]
    async fn test_exhausted_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let encoder = Arc::new(SizedEncoder::new(vec![500, 400, 300]));
        let out = dir.path().join("out.mp4");

        let err = transcoder(encoder.clone(), 3, 100)
            .transcode(Path::new("in.mp4"), &out)
            .await
            .unwrap_err();
        match err {
            TranscodeError::Exhausted { attempts, smallest_bytes, max_bytes } => {
                assert_eq!(attempts, 3);
                assert_eq!(smallest_bytes, 300);
                assert_eq!(max_bytes, 100);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!out.exists());
        assert_eq!(encoder.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_encode_failure_stops_ladder() {
        let dir = TempDir::new().unwrap();
        let mut encoder = SizedEncoder::new(vec![500, 50, 50]);
        encoder.fail_at = Some(1);
        let encoder = Arc::new(encoder);

        let err = transcoder(encoder.clone(), 3, 100)
            .transcode(Path::new("in.mp4"), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Encode(EncodeError::Failed { .. })));
        assert_eq!(encoder.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_exact_budget_fits() {
        let dir = TempDir::new().unwrap();
        let max = 8 * 1024 * 1024;
        let encoder = Arc::new(SizedEncoder::new(vec![max + 1, max]));
        let outcome = transcoder(encoder, 2, max)
            .transcode(Path::new("in.mp4"), &dir.path().join("out.mp4"))
            .await
            .unwrap();
        assert_eq!(outcome.level_index, 1);
        assert_eq!(outcome.bytes, max);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// The search visits levels 0, 1, 2, ... in order, never skipping or revisiting,
        /// and stops at the first fit
        #[test]
        fn test_search_is_monotonic(sizes in prop::collection::vec(0u64..400, 1..6), max in 0u64..400) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let dir = TempDir::new().unwrap();
            let encoder = Arc::new(SizedEncoder::new(sizes.clone()));
            let t = transcoder(encoder.clone(), sizes.len(), max);

            let result = rt.block_on(t.transcode(Path::new("in.mp4"), &dir.path().join("out.mp4")));
            let visited: Vec<u32> = encoder.calls.lock().iter().map(|p| p.square_size).collect();
            let expected_prefix: Vec<u32> = ladder(sizes.len()).levels().iter().map(|l| l.size).collect();

            match sizes.iter().position(|&s| s <= max) {
                Some(first_fit) => {
                    let outcome = result.unwrap();
                    prop_assert_eq!(outcome.level_index, first_fit);
                    prop_assert_eq!(&visited[..], &expected_prefix[..=first_fit]);
                }
                None => {
                    let is_exhausted = matches!(result, Err(TranscodeError::Exhausted { .. }));
                    prop_assert!(is_exhausted);
                    prop_assert_eq!(visited, expected_prefix);
                }
            }
        }
    }
}
