use std::fmt;

use candle_core::{DType, Device, Tensor, D};

use crate::alignment::corpus::{align_corpus, text_length_stats, AlignedCorpus};
use crate::batching::batcher::{Batch, LengthSortedBatcher};
use crate::batching::padding::pad_corpus;
use crate::config::AlignmentConfig;
use crate::error::AlignmentError;
use crate::importance::aggregator::ImportanceAggregator;
use crate::importance::metrics::{concordance_correlation, mean_and_std};
use crate::importance::report::{AnalysisReport, EvaluationSummary, ReportMeta, SequenceMappings};
use crate::pipeline::traits::{ImportanceModel, TokenCanonicalizer};
use crate::types::SequenceRecord;

pub struct ImportanceAnalyzer {
    config: AlignmentConfig,
    model: Box<dyn ImportanceModel>,
    canonicalizer: Box<dyn TokenCanonicalizer>,
    device: Device,
}

impl fmt::Debug for ImportanceAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportanceAnalyzer")
            .field("config", &self.config)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

pub(crate) struct ImportanceAnalyzerParts {
    pub config: AlignmentConfig,
    pub model: Box<dyn ImportanceModel>,
    pub canonicalizer: Box<dyn TokenCanonicalizer>,
    pub device: Device,
}

/// Model outputs of one sequence, trimmed to its true window count.
struct SequenceEvaluation {
    index: usize,
    seq_id: String,
    fit: f64,
    actual: Vec<f32>,
    predicted: Vec<f32>,
    weights: Vec<Vec<f32>>,
    saliency: Option<Vec<Vec<f32>>>,
}

impl ImportanceAnalyzer {
    pub(crate) fn from_parts(parts: ImportanceAnalyzerParts) -> Self {
        Self {
            config: parts.config,
            model: parts.model,
            canonicalizer: parts.canonicalizer,
            device: parts.device,
        }
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    /// Aligns, pads and evaluates every record one sequence at a time, then
    /// folds the per-token scores into word-level statistics.
    ///
    /// Sequences are aggregated in descending fit order (ties by id), which
    /// fixes the row order of the word table. Any model or aggregation
    /// failure aborts the whole pass.
    pub fn analyze(&self, records: &[SequenceRecord]) -> Result<AnalysisReport, AlignmentError> {
        let corpus = align_corpus(records, &self.config, self.canonicalizer.as_ref())?;
        let lengths = text_length_stats(&corpus, &self.config.text_channel);
        let dataset = pad_corpus(&corpus, &self.config)?;

        let mut batcher = LengthSortedBatcher::new(&dataset, 1, self.config.seed);
        let batches = batcher.epoch();
        let total = batches.len();
        let mut evaluations = Vec::with_capacity(total);
        let mut skipped = 0usize;
        for (n, batch) in batches.enumerate() {
            let seq_id = batch.seq_ids[0].to_string();
            if batch.lengths[0] == 0 {
                tracing::warn!(seq_id = %seq_id, "sequence has no windows; skipping");
                skipped += 1;
                continue;
            }
            tracing::debug!(sequence = n + 1, total, seq_id = %seq_id, "evaluating");
            evaluations.push(self.evaluate(&batch)?);
        }

        evaluations.sort_by(|a, b| b.fit.total_cmp(&a.fit).then_with(|| a.seq_id.cmp(&b.seq_id)));

        let mut aggregator = ImportanceAggregator::new(self.config.normalization);
        let mut mappings = SequenceMappings::default();
        for eval in &evaluations {
            self.aggregate(&corpus, eval, &mut aggregator, &mut mappings)?;
        }

        let fits: Vec<f64> = evaluations.iter().map(|e| e.fit).collect();
        let (fit_mean, fit_std) = mean_and_std(&fits);
        tracing::info!(
            evaluated = evaluations.len(),
            skipped,
            fit_mean,
            fit_std,
            "evaluation finished"
        );

        let words = aggregator.finalize();
        Ok(AnalysisReport {
            meta: ReportMeta {
                generated_at: chrono::Utc::now().to_rfc3339(),
                device: self.model.device_label(),
                primary_channel: self.config.primary_channel.clone(),
                text_channel: self.config.text_channel.clone(),
                sequence_count: records.len(),
            },
            summary: EvaluationSummary {
                fit_mean,
                fit_std,
                evaluated_sequences: evaluations.len(),
                skipped_sequences: skipped,
                lengths,
            },
            words,
            mappings,
        })
    }

    fn evaluate(&self, batch: &Batch) -> Result<SequenceEvaluation, AlignmentError> {
        let len = batch.lengths[0];
        let input = batch.to_model_input(&self.config.primary_channel, &self.device)?;

        let output = self.model.forward(&input)?;
        let predicted: Vec<f32> = output
            .to_dtype(DType::F32)
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1())
            .map_err(|e| AlignmentError::runtime("read predictions", e))?;
        if predicted.len() < len {
            return Err(AlignmentError::runtime(
                "read predictions",
                format!("model returned {} predictions for {len} windows", predicted.len()),
            ));
        }

        let weights = per_window_rows(&self.model.token_weights(&input)?, len)
            .map_err(|e| AlignmentError::runtime("read token weights", e))?;
        let saliency = self
            .model
            .input_gradient(&input, &output)?
            .map(|grad| {
                gradient_saliency(&grad)
                    .and_then(|s| per_window_rows(&s, len))
                    .map_err(|e| AlignmentError::runtime("gradient saliency", e))
            })
            .transpose()?;

        let actual = batch.target_row(0)[..len].to_vec();
        let predicted = predicted[..len].to_vec();
        let fit = concordance_correlation(&actual, &predicted);
        Ok(SequenceEvaluation {
            index: batch.indices[0],
            seq_id: batch.seq_ids[0].to_string(),
            fit,
            actual,
            predicted,
            weights,
            saliency,
        })
    }

    fn aggregate(
        &self,
        corpus: &AlignedCorpus,
        eval: &SequenceEvaluation,
        aggregator: &mut ImportanceAggregator,
        mappings: &mut SequenceMappings,
    ) -> Result<(), AlignmentError> {
        let tokens = corpus.sequences[eval.index]
            .tokens(&self.config.text_channel)
            .ok_or_else(|| {
                AlignmentError::aggregation(
                    eval.seq_id.as_str(),
                    format!("text channel '{}' is missing", self.config.text_channel),
                )
            })?;
        let importance = aggregator.aggregate_sequence(
            &eval.seq_id,
            tokens,
            &eval.weights,
            eval.saliency.as_deref(),
        )?;

        let id = eval.seq_id.clone();
        mappings.weights.insert(id.clone(), importance.attention);
        if let Some(gradient) = importance.gradient {
            mappings.gradients.insert(id.clone(), gradient);
        }
        mappings.labels.insert(
            id.clone(),
            eval.actual
                .iter()
                .copied()
                .zip(eval.predicted.iter().copied())
                .collect(),
        );
        mappings.sentences.insert(
            id.clone(),
            tokens.windows.iter().map(|w| w.tokens().to_vec()).collect(),
        );
        mappings.fit.insert(id, eval.fit);
        Ok(())
    }
}

/// Per-token saliency of an input gradient `[b, w, t, d]`: the squared
/// gradient summed over the feature axis, giving `[b, w, t]`.
pub fn gradient_saliency(grad: &Tensor) -> candle_core::Result<Tensor> {
    grad.sqr()?.sum(D::Minus1)
}

/// First batch row of a `[1, w, t]` tensor as `w` rows of `t` scores.
fn per_window_rows(scores: &Tensor, len: usize) -> candle_core::Result<Vec<Vec<f32>>> {
    let mut rows: Vec<Vec<f32>> = scores.to_dtype(DType::F32)?.get(0)?.to_vec2()?;
    rows.truncate(len);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_saliency_sums_squares_over_features() {
        let grad = Tensor::from_vec(
            vec![1.0f32, 2.0, 0.0, -3.0, 0.5, 0.5],
            (1, 1, 3, 2),
            &Device::Cpu,
        )
        .unwrap();
        let saliency = gradient_saliency(&grad).unwrap();
        assert_eq!(saliency.dims(), &[1, 1, 3]);
        let rows = per_window_rows(&saliency, 1).unwrap();
        assert_eq!(rows, vec![vec![5.0, 9.0, 0.5]]);
    }

    #[test]
    fn per_window_rows_drops_padded_windows() {
        let scores = Tensor::zeros((1, 3, 2), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(per_window_rows(&scores, 2).unwrap().len(), 2);
    }
}
