//! Anomaly model lifecycle: train, score, persist.
//!
//! The fitted scaler + forest pair serializes to an opaque bincode blob the
//! store gateway persists; on restart the blob is loaded before the
//! pipeline opens. Scoring never fails the pipeline: an unloaded or
//! mismatched model degrades to `(0.0, false)`.

pub mod features;
pub mod forest;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::event::Event;
use features::{feature_vector, FEATURE_NAMES};
use forest::{IsolationForest, ZScaler};

/// Minimum valid feature vectors required to fit the model.
pub const MIN_TRAINING_SAMPLES: usize = 10;

/// Gain applied to the raw decision value before sigmoid normalization,
/// calibrated so clear training-set outliers land above the default 0.75
/// flag threshold.
const SCORE_GAIN: f64 = 10.0;

/// Blob format version, checked on load.
const BLOB_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("not enough data to train model: {current_count} of {min_required} required samples")]
    NotEnoughData {
        min_required: usize,
        current_count: usize,
    },
    #[error("model blob rejected: {0}")]
    InvalidBlob(String),
    #[error("model serialization failed: {0}")]
    Serialization(String),
}

/// A fitted anomaly model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyModel {
    version: u32,
    scaler: ZScaler,
    forest: IsolationForest,
    pub training_samples: usize,
    pub feature_names: Vec<String>,
    pub contamination: f64,
}

impl AnomalyModel {
    /// Fit the scaler and forest on pre-derived feature vectors.
    pub fn train(matrix: &[Vec<f64>], contamination: f64) -> Result<Self, ModelError> {
        if matrix.len() < MIN_TRAINING_SAMPLES {
            return Err(ModelError::NotEnoughData {
                min_required: MIN_TRAINING_SAMPLES,
                current_count: matrix.len(),
            });
        }

        let scaler = ZScaler::fit(matrix);
        let scaled: Vec<Vec<f64>> = matrix.iter().map(|row| scaler.transform(row)).collect();
        let forest = IsolationForest::fit(&scaled, contamination);

        Ok(Self {
            version: BLOB_VERSION,
            scaler,
            forest,
            training_samples: matrix.len(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            contamination,
        })
    }

    /// Score an event: `(score in [0, 1], flagged)`, higher = more
    /// anomalous, flagged iff `score >= threshold`.
    pub fn predict(&self, event: &Event, threshold: f64) -> (f64, bool) {
        let features = feature_vector(event);
        self.predict_vector(&features, threshold)
    }

    /// Score a pre-assembled feature vector.
    pub fn predict_vector(&self, features: &[f64], threshold: f64) -> (f64, bool) {
        if features.len() != self.feature_names.len() {
            warn!(
                got = features.len(),
                expected = self.feature_names.len(),
                "feature vector shape mismatch, degrading to neutral score"
            );
            return (0.0, false);
        }

        let scaled = self.scaler.transform(features);
        let raw = self.forest.decision_function(&scaled);
        // Sigmoid of the (negated, gained) raw score: anomalies (raw < 0)
        // push the output toward 1.
        let score = 1.0 / (1.0 + (SCORE_GAIN * raw).exp());
        (score, score >= threshold)
    }

    /// Serialize to the opaque blob handed to the store gateway.
    pub fn to_blob(&self) -> Result<Vec<u8>, ModelError> {
        bincode::serialize(self).map_err(|e| ModelError::Serialization(e.to_string()))
    }

    /// Restore from a stored blob.
    pub fn from_blob(blob: &[u8]) -> Result<Self, ModelError> {
        let model: AnomalyModel =
            bincode::deserialize(blob).map_err(|e| ModelError::InvalidBlob(e.to_string()))?;
        if model.version != BLOB_VERSION {
            return Err(ModelError::InvalidBlob(format!(
                "unsupported blob version {}",
                model.version
            )));
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, FeatureContext, Severity};
    use serde_json::Map;

    fn baseline_matrix(n: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| {
                let t = i as f64 / n.max(1) as f64;
                vec![
                    0.3 + 0.08 * t,
                    0.1 + 0.05 * ((i % 11) as f64 / 11.0),
                    0.05,
                    0.6 - 0.1 * t,
                    0.25,
                    0.5,
                    0.4 + 0.06 * ((i % 7) as f64 / 7.0),
                    0.01,
                    0.02,
                    0.1 + 0.02 * t,
                ]
            })
            .collect()
    }

    #[test]
    fn test_train_requires_ten_samples() {
        let err = AnomalyModel::train(&baseline_matrix(9), 0.1).unwrap_err();
        match err {
            ModelError::NotEnoughData {
                min_required,
                current_count,
            } => {
                assert_eq!(min_required, 10);
                assert_eq!(current_count, 9);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(AnomalyModel::train(&baseline_matrix(10), 0.1).is_ok());
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        let model = AnomalyModel::train(&baseline_matrix(50), 0.1).unwrap();
        for row in baseline_matrix(50) {
            let (score, _) = model.predict_vector(&row, 0.75);
            assert!((0.0..=1.0).contains(&score), "score out of range: {score}");
        }
    }

    #[test]
    fn test_outlier_flags_inlier_does_not() {
        let matrix = baseline_matrix(50);
        let model = AnomalyModel::train(&matrix, 0.1).unwrap();

        // Interior point of the training distribution.
        let (inlier_score, inlier_flag) = model.predict_vector(&matrix[25], 0.75);
        let outlier = vec![1.0, 1.0, 1.0, 0.05, 1.0, 0.0, 1.0, 0.9, 1.0, 0.95];
        let (outlier_score, outlier_flag) = model.predict_vector(&outlier, 0.75);

        assert!(outlier_score > inlier_score);
        assert!(outlier_flag, "clear outlier must flag: {outlier_score}");
        assert!(!inlier_flag, "inlier must not flag: {inlier_score}");
    }

    #[test]
    fn test_blob_round_trip_bit_identical() {
        let model = AnomalyModel::train(&baseline_matrix(50), 0.1).unwrap();
        let blob = model.to_blob().unwrap();
        let restored = AnomalyModel::from_blob(&blob).unwrap();

        let probes = [
            baseline_matrix(1)[0].clone(),
            vec![1.0, 1.0, 1.0, 0.05, 1.0, 0.0, 1.0, 0.9, 1.0, 0.95],
        ];
        for probe in &probes {
            let (a, fa) = model.predict_vector(probe, 0.75);
            let (b, fb) = restored.predict_vector(probe, 0.75);
            assert_eq!(a, b, "scores must be bit-identical after reload");
            assert_eq!(fa, fb);
        }
        assert_eq!(restored.training_samples, 50);
    }

    #[test]
    fn test_shape_mismatch_degrades_silently() {
        let model = AnomalyModel::train(&baseline_matrix(20), 0.1).unwrap();
        let (score, flagged) = model.predict_vector(&[0.5, 0.5], 0.75);
        assert_eq!(score, 0.0);
        assert!(!flagged);
    }

    #[test]
    fn test_predict_uses_event_context() {
        let model = AnomalyModel::train(&baseline_matrix(30), 0.1).unwrap();
        let mut event = Event::new(EventKind::LoginEvent, "192.168.1.10", Severity::Low, Map::new());
        event.ml_context = Some(FeatureContext {
            type_rarity: 0.3,
            ip_rarity: 0.1,
            event_frequency: 5.0,
            payload_entropy: 0.6,
        });
        let (score, _) = model.predict(&event, 0.75);
        assert!((0.0..=1.0).contains(&score));
    }
}
