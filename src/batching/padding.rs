use std::collections::BTreeMap;

use crate::alignment::corpus::AlignedCorpus;
use crate::config::AlignmentConfig;
use crate::error::AlignmentError;
use crate::types::{SeqId, WindowedTokens, WindowedVectors};

/// Fills token slots of a padded text channel past a window's true count.
pub const PAD_TOKEN: &str = "<pad>";

/// Dense `[n, max_windows, max_tokens, dim]` array for one numeric channel.
///
/// `max_tokens` is a single cap over every window of every sequence. Slots at
/// or past `seq_lens[i]` windows, or `token_lens[i][w]` tokens, hold zeros.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedChannel {
    pub dim: usize,
    pub max_windows: usize,
    pub max_tokens: usize,
    pub data: Vec<f32>,
    pub seq_lens: Vec<usize>,
    /// `max_windows` entries per sequence; 0 for trailing padding windows.
    pub token_lens: Vec<Vec<usize>>,
}

impl PaddedChannel {
    pub fn len(&self) -> usize {
        self.seq_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq_lens.is_empty()
    }

    fn slot_offset(&self, seq: usize, window: usize) -> usize {
        (seq * self.max_windows + window) * self.max_tokens * self.dim
    }

    /// The full `max_tokens * dim` slot of window `window` of sequence `seq`.
    pub fn padded_window(&self, seq: usize, window: usize) -> &[f32] {
        let start = self.slot_offset(seq, window);
        &self.data[start..start + self.max_tokens * self.dim]
    }

    /// The valid prefix of a window slot: exactly the tokens captured before padding.
    pub fn window(&self, seq: usize, window: usize) -> &[f32] {
        let valid = self.token_lens[seq][window] * self.dim;
        &self.padded_window(seq, window)[..valid]
    }
}

pub fn pad_channel(windows: &[&WindowedVectors], dim: usize) -> PaddedChannel {
    let max_windows = windows.iter().map(|w| w.window_count()).max().unwrap_or(0);
    let max_tokens = windows.iter().map(|w| w.max_tokens()).max().unwrap_or(0);
    let slot = max_tokens * dim;

    let mut data = vec![0.0f32; windows.len() * max_windows * slot];
    let mut seq_lens = Vec::with_capacity(windows.len());
    let mut token_lens = Vec::with_capacity(windows.len());
    for (i, seq) in windows.iter().enumerate() {
        let mut lens = vec![0usize; max_windows];
        for (w, len) in lens.iter_mut().enumerate().take(seq.window_count()) {
            let values = seq.window(w);
            let start = (i * max_windows + w) * slot;
            data[start..start + values.len()].copy_from_slice(values);
            *len = seq.token_count(w);
        }
        seq_lens.push(seq.window_count());
        token_lens.push(lens);
    }

    PaddedChannel {
        dim,
        max_windows,
        max_tokens,
        data,
        seq_lens,
        token_lens,
    }
}

/// Token strings of one text channel laid out as `[n, max_windows, max_tokens]`.
///
/// Unused slots hold [`PAD_TOKEN`]. A window holding the no-tokens sentinel
/// has `token_lens[i][w] == 0`, the same as a trailing padding window.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedText {
    pub max_windows: usize,
    pub max_tokens: usize,
    pub tokens: Vec<String>,
    pub seq_lens: Vec<usize>,
    pub token_lens: Vec<Vec<usize>>,
}

impl PaddedText {
    pub fn len(&self) -> usize {
        self.seq_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq_lens.is_empty()
    }

    pub fn padded_window(&self, seq: usize, window: usize) -> &[String] {
        let start = (seq * self.max_windows + window) * self.max_tokens;
        &self.tokens[start..start + self.max_tokens]
    }

    pub fn window(&self, seq: usize, window: usize) -> &[String] {
        &self.padded_window(seq, window)[..self.token_lens[seq][window]]
    }
}

pub fn pad_text(windows: &[&WindowedTokens]) -> PaddedText {
    let max_windows = windows.iter().map(|w| w.window_count()).max().unwrap_or(0);
    let max_tokens = windows
        .iter()
        .flat_map(|w| w.windows.iter().map(|t| t.token_count()))
        .max()
        .unwrap_or(0);

    let mut tokens = vec![PAD_TOKEN.to_string(); windows.len() * max_windows * max_tokens];
    let mut seq_lens = Vec::with_capacity(windows.len());
    let mut token_lens = Vec::with_capacity(windows.len());
    for (i, seq) in windows.iter().enumerate() {
        let mut lens = vec![0usize; max_windows];
        for (w, window) in seq.windows.iter().enumerate() {
            let start = (i * max_windows + w) * max_tokens;
            for (slot, token) in tokens[start..].iter_mut().zip(window.tokens()) {
                slot.clone_from(token);
            }
            lens[w] = window.token_count();
        }
        seq_lens.push(seq.window_count());
        token_lens.push(lens);
    }

    PaddedText {
        max_windows,
        max_tokens,
        tokens,
        seq_lens,
        token_lens,
    }
}

/// Window-level padded rating targets, `[n, max_windows]`, pad value 0.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedTargets {
    pub max_windows: usize,
    pub data: Vec<f32>,
}

impl PaddedTargets {
    pub fn row(&self, seq: usize) -> &[f32] {
        &self.data[seq * self.max_windows..(seq + 1) * self.max_windows]
    }
}

pub fn pad_targets(ratings: &[&[f32]], max_windows: usize) -> PaddedTargets {
    let mut data = vec![0.0f32; ratings.len() * max_windows];
    for (i, series) in ratings.iter().enumerate() {
        let n = series.len().min(max_windows);
        data[i * max_windows..i * max_windows + n].copy_from_slice(&series[..n]);
    }
    PaddedTargets { max_windows, data }
}

/// Dataset-level padded tensors consumed by the batcher.
#[derive(Debug, Clone)]
pub struct PaddedDataset {
    pub seq_ids: Vec<SeqId>,
    /// One entry per numeric channel.
    pub channels: BTreeMap<String, PaddedChannel>,
    /// One entry per text channel.
    pub text: BTreeMap<String, PaddedText>,
    pub targets: PaddedTargets,
    pub seq_lens: Vec<usize>,
    pub primary_channel: String,
}

impl PaddedDataset {
    pub fn len(&self) -> usize {
        self.seq_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq_ids.is_empty()
    }

    pub fn primary(&self) -> Result<&PaddedChannel, AlignmentError> {
        self.channels.get(&self.primary_channel).ok_or_else(|| {
            AlignmentError::config(format!(
                "primary channel '{}' was not padded",
                self.primary_channel
            ))
        })
    }
}

pub fn pad_corpus(
    corpus: &AlignedCorpus,
    config: &AlignmentConfig,
) -> Result<PaddedDataset, AlignmentError> {
    let mut channels = BTreeMap::new();
    let mut text = BTreeMap::new();
    for channel in config.channels.iter().filter(|c| c.text) {
        let windows = corpus
            .sequences
            .iter()
            .map(|seq| {
                seq.tokens(&channel.name).ok_or_else(|| {
                    AlignmentError::invalid_input(format!(
                        "{}: channel '{}' was not aligned",
                        seq.seq_id, channel.name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let padded = pad_text(&windows);
        tracing::debug!(
            channel = channel.name.as_str(),
            max_windows = padded.max_windows,
            max_tokens = padded.max_tokens,
            "text channel padded"
        );
        text.insert(channel.name.clone(), padded);
    }
    for channel in config.channels.iter().filter(|c| !c.text) {
        let dim = channel.feature_dim()?;
        let windows = corpus
            .sequences
            .iter()
            .map(|seq| {
                seq.vectors(&channel.name).ok_or_else(|| {
                    AlignmentError::invalid_input(format!(
                        "{}: channel '{}' was not aligned",
                        seq.seq_id, channel.name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let padded = pad_channel(&windows, dim);
        tracing::debug!(
            channel = channel.name.as_str(),
            max_windows = padded.max_windows,
            max_tokens = padded.max_tokens,
            "channel padded"
        );
        channels.insert(channel.name.clone(), padded);
    }

    let seq_lens: Vec<usize> = corpus.sequences.iter().map(|s| s.len()).collect();
    let max_windows = seq_lens.iter().copied().max().unwrap_or(0);
    let ratings: Vec<&[f32]> = corpus
        .sequences
        .iter()
        .map(|s| s.ratings.as_slice())
        .collect();

    Ok(PaddedDataset {
        seq_ids: corpus.sequences.iter().map(|s| s.seq_id.clone()).collect(),
        channels,
        text,
        targets: pad_targets(&ratings, max_windows),
        seq_lens,
        primary_channel: config.primary_channel.clone(),
    })
}
