use serde::{Deserialize, Serialize};

/// Outcome of classifying one image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub is_fake: bool,
    /// Probability of the predicted label
    pub confidence: f32,
    /// Unthresholded probability of "fake"
    pub raw_score: f32,
}

impl Prediction {
    /// Apply the decision threshold to a sigmoid output
    pub fn from_raw_score(raw_score: f32, threshold: f32) -> Self {
        let is_fake = raw_score > threshold;
        let confidence = if is_fake { raw_score } else { 1.0 - raw_score };
        Self {
            is_fake,
            confidence,
            raw_score,
        }
    }

    pub fn label(&self) -> &'static str {
        if self.is_fake {
            "FAKE"
        } else {
            "REAL"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_mapping_over_score_range() {
        for step in 0..=1000 {
            let raw = step as f32 / 1000.0;
            let prediction = Prediction::from_raw_score(raw, 0.5);

            if raw > 0.5 {
                assert!(prediction.is_fake);
                assert_eq!(prediction.confidence, raw);
            } else {
                assert!(!prediction.is_fake);
                assert_eq!(prediction.confidence, 1.0 - raw);
            }
            assert!((0.5..=1.0).contains(&prediction.confidence));
            assert_eq!(prediction.raw_score, raw);
        }
    }

    #[test]
    fn test_exact_threshold_is_real() {
        let prediction = Prediction::from_raw_score(0.5, 0.5);
        assert!(!prediction.is_fake);
        assert_eq!(prediction.label(), "REAL");
    }

    #[test]
    fn test_custom_threshold() {
        let prediction = Prediction::from_raw_score(0.6, 0.7);
        assert!(!prediction.is_fake);
        assert!((prediction.confidence - 0.4).abs() < 1e-6);

        let prediction = Prediction::from_raw_score(0.8, 0.7);
        assert!(prediction.is_fake);
        assert_eq!(prediction.label(), "FAKE");
    }

    #[test]
    fn test_serializes_to_flat_json() {
        let json = serde_json::to_value(Prediction::from_raw_score(0.9, 0.5)).unwrap();
        assert_eq!(json["is_fake"], true);
        assert!(json.get("confidence").is_some());
        assert!(json.get("raw_score").is_some());
    }
}
