use serde::{Deserialize, Serialize};

/// How raw per-token scores of one window are turned into importances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Probability-like distribution over the window's tokens.
    #[default]
    Softmax,
    /// Rescale to [0, 1]; a constant window maps every token to its mean.
    MinMax,
    /// Divide by the largest magnitude.
    MaxAbs,
}

impl Normalization {
    pub fn apply(self, scores: &[f32]) -> Vec<f32> {
        match self {
            Self::Softmax => softmax(scores),
            Self::MinMax => min_max(scores),
            Self::MaxAbs => max_abs(scores),
        }
    }
}

/// Softmax with the maximum subtracted before exponentiating.
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = scores.iter().map(|&s| (s as f64 - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| (e / total) as f32).collect()
}

fn min_max(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == min {
        let mean = scores.iter().map(|&s| s as f64).sum::<f64>() / scores.len() as f64;
        return vec![mean as f32; scores.len()];
    }
    scores.iter().map(|&s| (s - min) / (max - min)).collect()
}

fn max_abs(scores: &[f32]) -> Vec<f32> {
    let peak = scores.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    if peak == 0.0 {
        return vec![0.0; scores.len()];
    }
    scores.iter().map(|&s| s / peak).collect()
}
