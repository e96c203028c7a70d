//! Isolation forest outlier scorer with a z-score feature scaler.
//!
//! Scoring follows the classic formulation: anomalies isolate in fewer
//! random cuts, so short average path lengths mean outliers. The raw
//! decision value is shifted by a contamination quantile so that roughly
//! `contamination` of the training data scores negative (anomalous),
//! mirroring the scikit-learn sign convention the rest of the pipeline
//! expects. Trees are serde-serializable so a fitted forest round-trips
//! through the opaque model blob bit-for-bit.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Trees per forest.
const NUM_TREES: usize = 100;
/// Per-tree subsample ceiling.
const MAX_SAMPLES: usize = 256;
/// Fixed fit seed so retraining on identical data reproduces the model.
const FIT_SEED: u64 = 42;

/// Z-score scaler fitted on the training matrix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZScaler {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl ZScaler {
    pub fn fit(matrix: &[Vec<f64>]) -> Self {
        let dims = matrix.first().map(Vec::len).unwrap_or(0);
        let n = matrix.len() as f64;

        let mut mean = vec![0.0; dims];
        for row in matrix {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n.max(1.0);
        }

        let mut var = vec![0.0; dims];
        for row in matrix {
            for ((v, x), m) in var.iter_mut().zip(row).zip(&mean) {
                let d = x - m;
                *v += d * d;
            }
        }
        let std = var
            .into_iter()
            .map(|v| {
                let s = (v / n.max(1.0)).sqrt();
                // Constant features pass through unscaled.
                if s > 0.0 { s } else { 1.0 }
            })
            .collect();

        Self { mean, std }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

/// Average unsuccessful-search path length in a BST of `n` points, the
/// standard normalization term c(n).
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        n => {
            let n = n as f64;
            const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn build_tree(points: &[Vec<f64>], indices: &[usize], depth: usize, limit: usize, rng: &mut StdRng) -> Node {
    if depth >= limit || indices.len() <= 1 {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let dims = points[indices[0]].len();
    // Features with spread in this partition.
    let mut candidates = Vec::with_capacity(dims);
    for feature in 0..dims {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &i in indices {
            let v = points[i][feature];
            min = min.min(v);
            max = max.max(v);
        }
        if max > min {
            candidates.push((feature, min, max));
        }
    }
    if candidates.is_empty() {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let (feature, min, max) = candidates[rng.random_range(0..candidates.len())];
    let threshold = min + rng.random::<f64>() * (max - min);

    let (left, right): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .copied()
        .partition(|&i| points[i][feature] < threshold);
    if left.is_empty() || right.is_empty() {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(points, &left, depth + 1, limit, rng)),
        right: Box::new(build_tree(points, &right, depth + 1, limit, rng)),
    }
}

fn path_length(node: &Node, row: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if row[*feature] < *threshold {
                path_length(left, row, depth + 1)
            } else {
                path_length(right, row, depth + 1)
            }
        }
    }
}

/// A fitted isolation forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
    /// Contamination quantile of training scores; shifts the decision value
    /// so anomalies land negative.
    offset: f64,
}

impl IsolationForest {
    /// Fit on scaled rows. `contamination` is the expected anomaly share in
    /// the training data, in (0, 0.5].
    pub fn fit(matrix: &[Vec<f64>], contamination: f64) -> Self {
        let mut rng = StdRng::seed_from_u64(FIT_SEED);
        let n = matrix.len();
        let sample_size = n.min(MAX_SAMPLES);
        let height_limit = (sample_size.max(2) as f64).log2().ceil() as usize;

        let mut trees = Vec::with_capacity(NUM_TREES);
        for _ in 0..NUM_TREES {
            // Subsample without replacement.
            let mut indices: Vec<usize> = (0..n).collect();
            for i in (1..indices.len()).rev() {
                let j = rng.random_range(0..=i);
                indices.swap(i, j);
            }
            indices.truncate(sample_size);
            trees.push(build_tree(matrix, &indices, 0, height_limit, &mut rng));
        }

        let mut forest = Self {
            trees,
            sample_size,
            offset: 0.0,
        };

        // Place the offset at the contamination quantile of training scores.
        let mut scores: Vec<f64> = matrix.iter().map(|row| forest.score_sample(row)).collect();
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        forest.offset = quantile(&scores, contamination.clamp(0.0, 0.5));
        forest
    }

    /// Raw score in (-1, 0): closer to -1 means more isolated.
    fn score_sample(&self, row: &[f64]) -> f64 {
        let avg: f64 = self
            .trees
            .iter()
            .map(|t| path_length(t, row, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let c = average_path_length(self.sample_size).max(f64::MIN_POSITIVE);
        -(2f64.powf(-avg / c))
    }

    /// Offset-shifted score: positive = normal, negative = anomalous.
    pub fn decision_function(&self, row: &[f64]) -> f64 {
        self.score_sample(row) - self.offset
    }
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clustered_matrix(n: usize) -> Vec<Vec<f64>> {
        // Deterministic cluster with continuous spread on every dimension.
        (0..n)
            .map(|i| {
                let t = i as f64 / n.max(1) as f64;
                vec![
                    0.2 + 0.1 * t,
                    0.3 - 0.05 * t,
                    0.25 + 0.08 * ((i % 13) as f64 / 13.0),
                    0.2 + 0.02 * ((i % 5) as f64),
                ]
            })
            .collect()
    }

    #[test]
    fn test_scaler_handles_constant_feature() {
        let matrix = vec![vec![1.0, 5.0], vec![3.0, 5.0], vec![5.0, 5.0]];
        let scaler = ZScaler::fit(&matrix);
        let row = scaler.transform(&[3.0, 5.0]);
        assert!(row[0].abs() < 1e-9);
        assert!(row[1].abs() < 1e-9); // zero variance passes through
        assert!(row.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_outlier_scores_below_inliers() {
        let matrix = clustered_matrix(64);
        let forest = IsolationForest::fit(&matrix, 0.1);

        let inlier = forest.decision_function(&[0.25, 0.275, 0.29, 0.24]);
        let outlier = forest.decision_function(&[0.95, 0.9, 0.99, 0.97]);
        assert!(
            outlier < inlier,
            "outlier {outlier} must score below inlier {inlier}"
        );
        assert!(outlier < 0.0, "clear outlier must land negative: {outlier}");
    }

    #[test]
    fn test_fit_is_deterministic() {
        let matrix = clustered_matrix(32);
        let a = IsolationForest::fit(&matrix, 0.1);
        let b = IsolationForest::fit(&matrix, 0.1);
        let probe = [0.7, 0.1, 0.4, 0.9];
        assert_eq!(a.decision_function(&probe), b.decision_function(&probe));
    }

    #[test]
    fn test_serialized_forest_scores_bit_identical() {
        let matrix = clustered_matrix(40);
        let forest = IsolationForest::fit(&matrix, 0.1);
        let bytes = bincode::serialize(&forest).unwrap();
        let restored: IsolationForest = bincode::deserialize(&bytes).unwrap();

        for probe in [
            [0.2, 0.2, 0.25, 0.2],
            [0.9, 0.8, 0.7, 0.6],
            [0.0, 1.0, 0.0, 1.0],
        ] {
            assert_eq!(
                forest.decision_function(&probe),
                restored.decision_function(&probe)
            );
        }
    }

    #[test]
    fn test_average_path_length_terms() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > average_path_length(64));
    }
}
