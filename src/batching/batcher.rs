use std::cmp::Reverse;
use std::collections::BTreeMap;

use candle_core::{Device, Tensor};
use rand::prelude::SliceRandom;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::batching::padding::{PaddedChannel, PaddedDataset, PaddedText};
use crate::error::AlignmentError;
use crate::types::SeqId;

/// Splits `0..n` into chunks of at most `batch_size` indices. The order is
/// shuffled with `rng` unless `batch_size == 1`, which keeps dataset order.
pub fn chunk_indices<R: Rng + ?Sized>(
    n: usize,
    batch_size: usize,
    rng: &mut R,
) -> Vec<Vec<usize>> {
    let mut index: Vec<usize> = (0..n).collect();
    if batch_size != 1 {
        index.shuffle(rng);
    }
    index
        .chunks(batch_size.max(1))
        .map(<[usize]>::to_vec)
        .collect()
}

/// One channel of a batch, sliced to `[batch, max_windows, max_tokens, dim]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelBatch {
    pub dim: usize,
    pub max_tokens: usize,
    pub data: Vec<f32>,
    /// `max_windows` entries per row, in sorted order.
    pub token_lengths: Vec<Vec<usize>>,
}

/// One text channel of a batch, sliced to `[batch, max_windows, max_tokens]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBatch {
    pub max_tokens: usize,
    pub tokens: Vec<String>,
    pub token_lengths: Vec<Vec<usize>>,
}

/// A model-ready batch. Every per-row field is in descending length order;
/// `indices[i]` is the dataset position row `i` came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub indices: Vec<usize>,
    pub seq_ids: Vec<SeqId>,
    pub max_windows: usize,
    pub channels: BTreeMap<String, ChannelBatch>,
    pub text: BTreeMap<String, TextBatch>,
    /// `[batch, max_windows]`.
    pub targets: Vec<f32>,
    /// `[batch, max_windows]`; 1.0 iff `w < lengths[i]`.
    pub mask: Vec<f32>,
    pub lengths: Vec<usize>,
    /// Token lengths of the primary channel.
    pub token_lengths: Vec<Vec<usize>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn target_row(&self, row: usize) -> &[f32] {
        &self.targets[row * self.max_windows..(row + 1) * self.max_windows]
    }

    pub fn mask_row(&self, row: usize) -> &[f32] {
        &self.mask[row * self.max_windows..(row + 1) * self.max_windows]
    }

    /// Channel tensors `[b, w, t, d]`, and mask and target tensors `[b, w, 1]`.
    pub fn to_model_input(
        &self,
        primary_channel: &str,
        device: &Device,
    ) -> Result<ModelInput, AlignmentError> {
        let b = self.len();
        let w = self.max_windows;
        let mut channels = BTreeMap::new();
        for (name, channel) in &self.channels {
            let tensor = Tensor::from_vec(
                channel.data.clone(),
                (b, w, channel.max_tokens, channel.dim),
                device,
            )
            .map_err(|e| AlignmentError::runtime("channel tensor creation", e))?;
            channels.insert(name.clone(), tensor);
        }
        let mask = Tensor::from_vec(self.mask.clone(), (b, w, 1), device)
            .map_err(|e| AlignmentError::runtime("mask tensor creation", e))?;
        let target = Tensor::from_vec(self.targets.clone(), (b, w, 1), device)
            .map_err(|e| AlignmentError::runtime("target tensor creation", e))?;
        Ok(ModelInput {
            channels,
            primary_channel: primary_channel.to_string(),
            lengths: self.lengths.clone(),
            token_lengths: self.token_lengths.clone(),
            mask,
            target,
        })
    }
}

/// Tensor view of a [`Batch`] handed to the model collaborator.
#[derive(Debug, Clone)]
pub struct ModelInput {
    pub channels: BTreeMap<String, Tensor>,
    pub primary_channel: String,
    pub lengths: Vec<usize>,
    pub token_lengths: Vec<Vec<usize>>,
    pub mask: Tensor,
    pub target: Tensor,
}

/// Groups a padded dataset into length-sorted batches.
pub struct LengthSortedBatcher<'a> {
    dataset: &'a PaddedDataset,
    batch_size: usize,
    rng: StdRng,
}

impl<'a> LengthSortedBatcher<'a> {
    pub fn new(dataset: &'a PaddedDataset, batch_size: usize, seed: u64) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// One pass over the dataset. Each call draws a fresh shuffle.
    pub fn epoch(&mut self) -> Batches<'a> {
        let chunks = chunk_indices(self.dataset.len(), self.batch_size, &mut self.rng);
        Batches {
            dataset: self.dataset,
            chunks: chunks.into_iter(),
        }
    }
}

/// Lazy iterator over the batches of one pass.
pub struct Batches<'a> {
    dataset: &'a PaddedDataset,
    chunks: std::vec::IntoIter<Vec<usize>>,
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunks.next()?;
        Some(build_batch(self.dataset, chunk))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Batches<'_> {}

fn build_batch(dataset: &PaddedDataset, mut chunk: Vec<usize>) -> Batch {
    // Stable: equal lengths keep their chunk order.
    chunk.sort_by_key(|&i| Reverse(dataset.seq_lens[i]));
    let lengths: Vec<usize> = chunk.iter().map(|&i| dataset.seq_lens[i]).collect();
    let max_windows = lengths.iter().copied().max().unwrap_or(0);

    let channels: BTreeMap<String, ChannelBatch> = dataset
        .channels
        .iter()
        .map(|(name, channel)| (name.clone(), slice_channel(channel, &chunk, max_windows)))
        .collect();
    let text: BTreeMap<String, TextBatch> = dataset
        .text
        .iter()
        .map(|(name, channel)| (name.clone(), slice_text(channel, &chunk, max_windows)))
        .collect();

    let mut targets = Vec::with_capacity(chunk.len() * max_windows);
    let mut mask = Vec::with_capacity(chunk.len() * max_windows);
    for (&i, &len) in chunk.iter().zip(&lengths) {
        targets.extend_from_slice(&dataset.targets.row(i)[..max_windows]);
        mask.extend((0..max_windows).map(|w| if w < len { 1.0 } else { 0.0 }));
    }

    let token_lengths = channels
        .get(&dataset.primary_channel)
        .map(|c| c.token_lengths.clone())
        .unwrap_or_else(|| vec![vec![0; max_windows]; chunk.len()]);

    tracing::debug!(batch = chunk.len(), max_windows, "batch assembled");

    Batch {
        seq_ids: chunk.iter().map(|&i| dataset.seq_ids[i].clone()).collect(),
        indices: chunk,
        max_windows,
        channels,
        text,
        targets,
        mask,
        lengths,
        token_lengths,
    }
}

fn slice_channel(channel: &PaddedChannel, rows: &[usize], max_windows: usize) -> ChannelBatch {
    let token_lengths: Vec<Vec<usize>> = rows
        .iter()
        .map(|&i| channel.token_lens[i][..max_windows].to_vec())
        .collect();
    let max_tokens = token_lengths
        .iter()
        .flat_map(|lens| lens.iter().copied())
        .max()
        .unwrap_or(0);

    let mut data = Vec::with_capacity(rows.len() * max_windows * max_tokens * channel.dim);
    for &i in rows {
        for w in 0..max_windows {
            data.extend_from_slice(&channel.padded_window(i, w)[..max_tokens * channel.dim]);
        }
    }
    ChannelBatch {
        dim: channel.dim,
        max_tokens,
        data,
        token_lengths,
    }
}

fn slice_text(channel: &PaddedText, rows: &[usize], max_windows: usize) -> TextBatch {
    let token_lengths: Vec<Vec<usize>> = rows
        .iter()
        .map(|&i| channel.token_lens[i][..max_windows].to_vec())
        .collect();
    let max_tokens = token_lengths
        .iter()
        .flat_map(|lens| lens.iter().copied())
        .max()
        .unwrap_or(0);

    let mut tokens = Vec::with_capacity(rows.len() * max_windows * max_tokens);
    for &i in rows {
        for w in 0..max_windows {
            tokens.extend_from_slice(&channel.padded_window(i, w)[..max_tokens]);
        }
    }
    TextBatch {
        max_tokens,
        tokens,
        token_lengths,
    }
}
