use serde::{Deserialize, Serialize};
use std::fmt;

/// Curtailment stage, 0 (no load shedding) to 8 (most severe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Stage(u8);

impl Stage {
    pub const MIN: Stage = Stage(0);
    pub const MAX: Stage = Stage(8);
    /// Number of stage classes a predictor distributes probability over
    pub const COUNT: usize = 9;

    pub fn new(value: u8) -> Result<Self, InvalidStage> {
        Self::try_from(value)
    }

    /// Clamp an arbitrary integer into the valid range.
    pub fn saturating(value: i64) -> Self {
        Self(value.clamp(0, Self::MAX.0 as i64) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = Stage> {
        (Self::MIN.0..=Self::MAX.0).map(Stage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid stage {0}; expected 0..=8")]
pub struct InvalidStage(pub u8);

impl TryFrom<u8> for Stage {
    type Error = InvalidStage;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value <= Self::MAX.0 {
            Ok(Self(value))
        } else {
            Err(InvalidStage(value))
        }
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> Self {
        stage.0
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_bounds() {
        assert!(Stage::new(0).is_ok());
        assert!(Stage::new(8).is_ok());
        assert_eq!(Stage::new(9), Err(InvalidStage(9)));
        assert_eq!(Stage::all().count(), Stage::COUNT);
    }

    #[test]
    fn test_saturating() {
        assert_eq!(Stage::saturating(-3), Stage::MIN);
        assert_eq!(Stage::saturating(12), Stage::MAX);
        assert_eq!(Stage::saturating(4).value(), 4);
    }

    #[test]
    fn test_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<Stage>("9").is_err());
        assert_eq!(serde_json::from_str::<Stage>("3").unwrap().value(), 3);
    }
}
