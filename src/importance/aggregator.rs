use std::collections::HashMap;

use serde::Serialize;

use crate::error::AlignmentError;
use crate::importance::normalize::Normalization;
use crate::types::WindowedTokens;

/// Count, sum and sum of squares of one score source.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMoments {
    pub count: u64,
    pub sum: f64,
    pub sum_sq: f64,
}

impl RunningMoments {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Sample standard deviation; 0 when fewer than two values were seen.
    pub fn sample_std(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let var = (self.sum_sq - self.sum * self.sum / n) / (n - 1.0);
        var.max(0.0).sqrt()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WordStat {
    pub count: u64,
    pub attention: RunningMoments,
    pub gradient: RunningMoments,
}

/// One row of the word table. `*_gs` columns come from the gradient source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordStatRow {
    pub word: String,
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub std: f64,
    pub sum_gs: f64,
    pub avg_gs: f64,
    pub std_gs: f64,
}

/// Accumulators keyed by canonical token, iterated in first-occurrence order.
#[derive(Debug, Clone, Default)]
pub struct WordLevelStats {
    index: HashMap<String, usize>,
    entries: Vec<(String, WordStat)>,
}

impl WordLevelStats {
    fn entry(&mut self, token: &str) -> &mut WordStat {
        let slot = match self.index.get(token) {
            Some(&slot) => slot,
            None => {
                let slot = self.entries.len();
                self.index.insert(token.to_string(), slot);
                self.entries.push((token.to_string(), WordStat::default()));
                slot
            }
        };
        &mut self.entries[slot].1
    }

    pub fn get(&self, token: &str) -> Option<&WordStat> {
        self.index.get(token).map(|&slot| &self.entries[slot].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WordStat)> {
        self.entries.iter().map(|(word, stat)| (word.as_str(), stat))
    }

    pub fn rows(&self) -> Vec<WordStatRow> {
        self.iter()
            .map(|(word, stat)| WordStatRow {
                word: word.to_string(),
                count: stat.count,
                sum: stat.attention.sum,
                avg: stat.attention.mean(),
                std: stat.attention.sample_std(),
                sum_gs: stat.gradient.sum,
                avg_gs: stat.gradient.mean(),
                std_gs: stat.gradient.sample_std(),
            })
            .collect()
    }

    fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
    }
}

/// Normalized per-window scores of one sequence. Windows without tokens
/// hold an empty vector so indices stay window-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceImportance {
    pub attention: Vec<Vec<f32>>,
    pub gradient: Option<Vec<Vec<f32>>>,
}

pub struct ImportanceAggregator {
    normalization: Normalization,
    stats: WordLevelStats,
}

impl ImportanceAggregator {
    pub fn new(normalization: Normalization) -> Self {
        Self {
            normalization,
            stats: WordLevelStats::default(),
        }
    }

    /// Normalizes one sequence's `[windows][tokens]` scores and folds them
    /// into the word accumulators.
    ///
    /// Scores past a window's true token count are padding and ignored. A
    /// score row shorter than its window's token count means the scores are
    /// misaligned with the tokens; the sequence is rejected before any
    /// accumulator is touched.
    pub fn aggregate_sequence(
        &mut self,
        seq_id: &str,
        tokens: &WindowedTokens,
        attention: &[Vec<f32>],
        gradient: Option<&[Vec<f32>]>,
    ) -> Result<SequenceImportance, AlignmentError> {
        let attention = self.normalize_source(seq_id, "attention", tokens, attention)?;
        let gradient = gradient
            .map(|g| self.normalize_source(seq_id, "gradient", tokens, g))
            .transpose()?;

        for (w, window) in tokens.windows.iter().enumerate() {
            for (t, token) in window.tokens().iter().enumerate() {
                let stat = self.stats.entry(token);
                stat.count += 1;
                stat.attention.push(attention[w][t] as f64);
                if let Some(gradient) = gradient.as_ref() {
                    stat.gradient.push(gradient[w][t] as f64);
                }
            }
        }

        Ok(SequenceImportance {
            attention,
            gradient,
        })
    }

    fn normalize_source(
        &self,
        seq_id: &str,
        source: &str,
        tokens: &WindowedTokens,
        scores: &[Vec<f32>],
    ) -> Result<Vec<Vec<f32>>, AlignmentError> {
        tokens
            .windows
            .iter()
            .enumerate()
            .map(|(w, window)| {
                let count = window.token_count();
                if count == 0 {
                    return Ok(Vec::new());
                }
                let row = scores.get(w).ok_or_else(|| {
                    AlignmentError::aggregation(
                        seq_id,
                        format!(
                            "{source} scores cover {} windows but window {w} holds {count} tokens",
                            scores.len()
                        ),
                    )
                })?;
                if row.len() < count {
                    return Err(AlignmentError::aggregation(
                        seq_id,
                        format!(
                            "{source} scores for window {w} have {} entries but the window holds {count} tokens",
                            row.len()
                        ),
                    ));
                }
                Ok(self.normalization.apply(&row[..count]))
            })
            .collect()
    }

    pub fn stats(&self) -> &WordLevelStats {
        &self.stats
    }

    pub fn reset(&mut self) {
        self.stats.clear();
    }

    pub fn finalize(self) -> Vec<WordStatRow> {
        self.stats.rows()
    }
}
