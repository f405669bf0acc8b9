use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Highest CRF accepted by libx264 for 8-bit output
pub const MAX_CRF: u8 = 51;

/// x264 speed/effort preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedPreset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl SpeedPreset {
    /// Name passed to `-preset`
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedPreset::Ultrafast => "ultrafast",
            SpeedPreset::Superfast => "superfast",
            SpeedPreset::Veryfast => "veryfast",
            SpeedPreset::Faster => "faster",
            SpeedPreset::Fast => "fast",
            SpeedPreset::Medium => "medium",
            SpeedPreset::Slow => "slow",
            SpeedPreset::Slower => "slower",
            SpeedPreset::Veryslow => "veryslow",
        }
    }
}

impl fmt::Display for SpeedPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to the input's audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum AudioPolicy {
    /// Drop audio entirely (`-an`)
    Strip,
    /// Re-encode to AAC at the given bitrate
    Aac { bitrate_kbps: u32 },
}

impl Default for AudioPolicy {
    fn default() -> Self {
        AudioPolicy::Strip
    }
}

/// One rung of the compression ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityLevel {
    /// Side of the square output frame, in pixels
    pub size: u32,
    /// Constant rate factor (higher = smaller, worse)
    pub crf: u8,
    pub preset: SpeedPreset,
}

impl QualityLevel {
    pub const fn new(size: u32, crf: u8, preset: SpeedPreset) -> Self {
        Self { size, crf, preset }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} crf {} preset {}", self.size, self.size, self.crf, self.preset)
    }
}

/// Parameters handed to the encode capability for a single attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeParams {
    pub square_size: u32,
    pub crf: u8,
    pub preset: SpeedPreset,
    pub max_duration_secs: u32,
    pub audio: AudioPolicy,
}

impl EncodeParams {
    pub fn for_level(level: &QualityLevel, max_duration_secs: u32, audio: AudioPolicy) -> Self {
        Self {
            square_size: level.size,
            crf: level.crf,
            preset: level.preset,
            max_duration_secs,
            audio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LadderError {
    #[error("quality ladder is empty")]
    Empty,
    #[error("ladder level {index} has a zero frame size")]
    ZeroSize { index: usize },
    #[error("ladder level {index} has odd frame size {size}, yuv420p needs even dimensions")]
    OddSize { index: usize, size: u32 },
    #[error("ladder level {index} has crf {crf}, above the maximum of {MAX_CRF}")]
    CrfOutOfRange { index: usize, crf: u8 },
    #[error("ladder level {index} is larger than the level before it")]
    SizeIncreases { index: usize },
    #[error("ladder level {index} has a lower crf than the level before it")]
    CrfDecreases { index: usize },
}

/// Ordered quality presets, largest/best first.
///
/// Every level is expected to produce output no larger than the level before it:
/// frame size never grows and CRF never drops as the index increases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ladder(Vec<QualityLevel>);

impl Default for Ladder {
    fn default() -> Self {
        Ladder(vec![
            QualityLevel::new(384, 28, SpeedPreset::Fast),
            QualityLevel::new(384, 32, SpeedPreset::Fast),
            QualityLevel::new(320, 35, SpeedPreset::Medium),
            QualityLevel::new(240, 35, SpeedPreset::Medium),
            QualityLevel::new(240, 40, SpeedPreset::Medium),
        ])
    }
}

impl Ladder {
    /// Build a ladder, rejecting orderings that could grow the output
    pub fn new(levels: Vec<QualityLevel>) -> Result<Self, LadderError> {
        let ladder = Ladder(levels);
        ladder.validate()?;
        Ok(ladder)
    }

    pub fn validate(&self) -> Result<(), LadderError> {
        if self.0.is_empty() {
            return Err(LadderError::Empty);
        }
        for (index, level) in self.0.iter().enumerate() {
            if level.size == 0 {
                return Err(LadderError::ZeroSize { index });
            }
            if level.size % 2 != 0 {
                return Err(LadderError::OddSize { index, size: level.size });
            }
            if level.crf > MAX_CRF {
                return Err(LadderError::CrfOutOfRange { index, crf: level.crf });
            }
            if index > 0 {
                let prev = &self.0[index - 1];
                if level.size > prev.size {
                    return Err(LadderError::SizeIncreases { index });
                }
                if level.crf < prev.crf {
                    return Err(LadderError::CrfDecreases { index });
                }
            }
        }
        Ok(())
    }

    pub fn levels(&self) -> &[QualityLevel] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Frame size of the first (preferred) level
    pub fn primary_size(&self) -> Option<u32> {
        self.0.first().map(|l| l.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_ladder_is_valid() {
        let ladder = Ladder::default();
        assert!(ladder.validate().is_ok());
        assert_eq!(ladder.primary_size(), Some(384));
        assert_eq!(ladder.levels()[3], QualityLevel::new(240, 35, SpeedPreset::Medium));
    }

    #[test]
    fn test_rejects_bad_orderings() {
        assert_eq!(Ladder::new(vec![]), Err(LadderError::Empty));

        let growing = vec![
            QualityLevel::new(240, 30, SpeedPreset::Fast),
            QualityLevel::new(384, 30, SpeedPreset::Fast),
        ];
        assert_eq!(Ladder::new(growing), Err(LadderError::SizeIncreases { index: 1 }));

        let sharper = vec![
            QualityLevel::new(384, 35, SpeedPreset::Fast),
            QualityLevel::new(384, 28, SpeedPreset::Fast),
        ];
        assert_eq!(Ladder::new(sharper), Err(LadderError::CrfDecreases { index: 1 }));

        let zero = vec![QualityLevel::new(0, 30, SpeedPreset::Fast)];
        assert_eq!(Ladder::new(zero), Err(LadderError::ZeroSize { index: 0 }));

        let odd = vec![QualityLevel::new(383, 30, SpeedPreset::Fast)];
        assert_eq!(Ladder::new(odd), Err(LadderError::OddSize { index: 0, size: 383 }));

        let crf = vec![QualityLevel::new(384, 60, SpeedPreset::Fast)];
        assert_eq!(Ladder::new(crf), Err(LadderError::CrfOutOfRange { index: 0, crf: 60 }));
    }

    #[test]
    fn test_ladder_serde_shape() {
        let json = r#"[{"size":384,"crf":28,"preset":"fast"},{"size":240,"crf":35,"preset":"medium"}]"#;
        let ladder: Ladder = serde_json::from_str(json).unwrap();
        assert_eq!(ladder.len(), 2);
        assert_eq!(ladder.levels()[1].preset, SpeedPreset::Medium);
    }

    #[test]
    fn test_audio_policy_serde() {
        let strip: AudioPolicy = serde_json::from_str(r#"{"mode":"strip"}"#).unwrap();
        assert_eq!(strip, AudioPolicy::Strip);
        let aac: AudioPolicy = serde_json::from_str(r#"{"mode":"aac","bitrate_kbps":64}"#).unwrap();
        assert_eq!(aac, AudioPolicy::Aac { bitrate_kbps: 64 });
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Any ladder built from non-increasing sizes and non-decreasing CRFs validates
        #[test]
        fn test_monotone_ladders_validate(
            steps in prop::collection::vec((0u32..32, 0u8..4), 1..8),
            start_size in 100u32..360,
            start_crf in 18u8..30,
        ) {
            let mut size = (start_size + 32 * 8) * 2;
            let mut crf = start_crf;
            let mut levels = Vec::new();
            for (shrink, soften) in steps {
                size -= shrink * 2;
                crf += soften;
                levels.push(QualityLevel::new(size, crf, SpeedPreset::Medium));
            }
            prop_assert!(Ladder::new(levels).is_ok());
        }

        /// Swapping in a larger level after a smaller one is always rejected
        #[test]
        fn test_growth_is_rejected(small in 50u32..200, grow in 1u32..100) {
            let levels = vec![
                QualityLevel::new(small * 2, 30, SpeedPreset::Fast),
                QualityLevel::new((small + grow) * 2, 30, SpeedPreset::Fast),
            ];
            prop_assert_eq!(Ladder::new(levels), Err(LadderError::SizeIncreases { index: 1 }));
        }
    }
}
