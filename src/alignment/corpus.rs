use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use crate::alignment::windowing::align_sequence;
use crate::config::{AlignmentConfig, WindowSpec};
use crate::error::AlignmentError;
use crate::pipeline::traits::TokenCanonicalizer;
use crate::types::{AlignedSequence, SeqId, SequenceRecord};

#[derive(Debug, Clone)]
pub struct AlignedCorpus {
    pub spec: WindowSpec,
    pub sequences: Vec<AlignedSequence>,
}

/// Reads a JSON array of [`SequenceRecord`]s.
pub fn load_records(path: &Path) -> Result<Vec<SequenceRecord>, AlignmentError> {
    let data =
        std::fs::read_to_string(path).map_err(|e| AlignmentError::io("read sequence records", e))?;
    serde_json::from_str(&data).map_err(|e| AlignmentError::json("parse sequence records", e))
}

/// Validates the configuration, then aligns every record in input order.
///
/// Reports key by the `subject_video` form of the id, so two records whose
/// ids render to the same key are rejected up front.
pub fn align_corpus(
    records: &[SequenceRecord],
    config: &AlignmentConfig,
    canonicalizer: &dyn TokenCanonicalizer,
) -> Result<AlignedCorpus, AlignmentError> {
    let spec = config.validate()?;
    check_unique_keys(records)?;
    let sequences = records
        .iter()
        .map(|record| align_sequence(record, config, &spec, canonicalizer))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::info!(
        sequences = sequences.len(),
        windows = sequences.iter().map(AlignedSequence::len).sum::<usize>(),
        "corpus aligned"
    );
    Ok(AlignedCorpus { spec, sequences })
}

fn check_unique_keys(records: &[SequenceRecord]) -> Result<(), AlignmentError> {
    let mut seen: HashMap<String, &SeqId> = HashMap::with_capacity(records.len());
    for record in records {
        if let Some(previous) = seen.insert(record.seq_id.to_string(), &record.seq_id) {
            return Err(AlignmentError::invalid_input(format!(
                "sequence ids ({}, {}) and ({}, {}) share the key '{}'",
                previous.subject,
                previous.video,
                record.seq_id.subject,
                record.seq_id.video,
                record.seq_id
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LengthStats {
    pub min: usize,
    pub max: usize,
    pub mean: f64,
    /// Sample standard deviation; 0 for fewer than two values.
    pub std: f64,
}

impl LengthStats {
    pub fn from_counts(counts: &[usize]) -> Option<Self> {
        let min = counts.iter().copied().min()?;
        let max = counts.iter().copied().max()?;
        let n = counts.len() as f64;
        let mean = counts.iter().map(|&c| c as f64).sum::<f64>() / n;
        let std = if counts.len() < 2 {
            0.0
        } else {
            let ss: f64 = counts
                .iter()
                .map(|&c| {
                    let d = c as f64 - mean;
                    d * d
                })
                .sum();
            (ss / (n - 1.0)).sqrt()
        };
        Some(Self {
            min,
            max,
            mean,
            std,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CorpusLengthStats {
    pub tokens_per_sequence: Option<LengthStats>,
    pub tokens_per_window: Option<LengthStats>,
}

/// Token count distribution of the text channel, per sequence and per window.
pub fn text_length_stats(corpus: &AlignedCorpus, text_channel: &str) -> CorpusLengthStats {
    let mut per_sequence = Vec::with_capacity(corpus.sequences.len());
    let mut per_window = Vec::new();
    for sequence in &corpus.sequences {
        let Some(tokens) = sequence.tokens(text_channel) else {
            continue;
        };
        let mut total = 0usize;
        for window in &tokens.windows {
            total += window.token_count();
            per_window.push(window.token_count());
        }
        per_sequence.push(total);
    }

    let stats = CorpusLengthStats {
        tokens_per_sequence: LengthStats::from_counts(&per_sequence),
        tokens_per_window: LengthStats::from_counts(&per_window),
    };
    if let Some(s) = stats.tokens_per_sequence {
        tracing::info!(
            min = s.min,
            max = s.max,
            mean = format!("{:.3}", s.mean),
            std = format!("{:.3}", s.std),
            "tokens per sequence"
        );
    }
    if let Some(s) = stats.tokens_per_window {
        tracing::info!(
            min = s.min,
            max = s.max,
            mean = format!("{:.3}", s.mean),
            std = format!("{:.3}", s.std),
            "tokens per window"
        );
    }
    stats
}
