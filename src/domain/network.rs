//! Network classification.

use serde::{Deserialize, Serialize};

/// Coarse link quality, recomputed once per queue-processing pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkClass {
    /// Average round-trip under the threshold
    Fast,

    /// Average round-trip over the threshold
    Slow,

    /// Probe or parse failure
    Unknown,
}

impl NetworkClass {
    /// Classify an average round-trip time against a threshold (both in ms)
    pub fn from_round_trip(avg_ms: f64, threshold_ms: f64) -> Self {
        if avg_ms > threshold_ms {
            Self::Slow
        } else {
            Self::Fast
        }
    }

    /// Whether the retry budget and worker pool should be narrowed.
    ///
    /// `Unknown` gets the same permissive treatment as `Fast`.
    pub fn is_constrained(&self) -> bool {
        matches!(self, Self::Slow)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for NetworkClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_exclusive() {
        assert_eq!(NetworkClass::from_round_trip(100.0, 100.0), NetworkClass::Fast);
        assert_eq!(NetworkClass::from_round_trip(100.5, 100.0), NetworkClass::Slow);
        assert_eq!(NetworkClass::from_round_trip(12.0, 100.0), NetworkClass::Fast);
    }

    #[test]
    fn test_unknown_is_not_constrained() {
        assert!(!NetworkClass::Unknown.is_constrained());
        assert!(!NetworkClass::Fast.is_constrained());
        assert!(NetworkClass::Slow.is_constrained());
    }
}
