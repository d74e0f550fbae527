use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable two-part identifier of a source sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeqId {
    pub subject: String,
    pub video: String,
}

impl SeqId {
    pub fn new(subject: impl Into<String>, video: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            video: video.into(),
        }
    }
}

impl fmt::Display for SeqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.subject, self.video)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedVector {
    pub timestamp: f64,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedToken {
    pub timestamp: f64,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedRating {
    pub timestamp: f64,
    pub value: f32,
}

/// Raw time-stamped samples of one modality of one sequence.
/// Timestamps are non-decreasing; repeats and irregular spacing are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "samples", rename_all = "lowercase")]
pub enum ChannelStream {
    Numeric(Vec<TimedVector>),
    Text(Vec<TimedToken>),
}

impl ChannelStream {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(samples) => samples.len(),
            Self::Text(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One input record: named channel streams plus the timed rating series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub seq_id: SeqId,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelStream>,
    pub ratings: Vec<TimedRating>,
}

/// Windows of token vectors for one numeric channel, stored as a flat arena.
///
/// `offsets[w]..offsets[w + 1]` is the token range of window `w`; token `k`
/// occupies `values[k * dim..(k + 1) * dim]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedVectors {
    dim: usize,
    values: Vec<f32>,
    offsets: Vec<usize>,
}

impl WindowedVectors {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            values: Vec::new(),
            offsets: vec![0],
        }
    }

    /// Appends one window whose tokens are laid out back to back in `tokens`.
    pub fn push_window(&mut self, tokens: &[f32]) {
        debug_assert_eq!(tokens.len() % self.dim.max(1), 0);
        self.values.extend_from_slice(tokens);
        let count = tokens.len() / self.dim.max(1);
        let last = self.offsets.last().copied().unwrap_or(0);
        self.offsets.push(last + count);
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn window_count(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn token_count(&self, window: usize) -> usize {
        self.offsets[window + 1] - self.offsets[window]
    }

    pub fn token_counts(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    pub fn max_tokens(&self) -> usize {
        self.token_counts().into_iter().max().unwrap_or(0)
    }

    /// Flat values of window `window`, `token_count(window) * dim` long.
    pub fn window(&self, window: usize) -> &[f32] {
        &self.values[self.offsets[window] * self.dim..self.offsets[window + 1] * self.dim]
    }

    pub fn truncate(&mut self, windows: usize) {
        if windows >= self.window_count() {
            return;
        }
        self.offsets.truncate(windows + 1);
        let tokens = self.offsets[windows];
        self.values.truncate(tokens * self.dim);
    }
}

/// One text window: captured tokens, or the sentinel for a window in which
/// nothing was said. The sentinel is padded downstream and never scored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextWindow {
    Tokens(Vec<String>),
    NoTokens,
}

impl TextWindow {
    pub fn tokens(&self) -> &[String] {
        match self {
            Self::Tokens(tokens) => tokens,
            Self::NoTokens => &[],
        }
    }

    pub fn token_count(&self) -> usize {
        self.tokens().len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowedTokens {
    pub windows: Vec<TextWindow>,
}

impl WindowedTokens {
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn truncate(&mut self, windows: usize) {
        self.windows.truncate(windows);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowedChannel {
    Vectors(WindowedVectors),
    Tokens(WindowedTokens),
}

impl WindowedChannel {
    pub fn window_count(&self) -> usize {
        match self {
            Self::Vectors(v) => v.window_count(),
            Self::Tokens(t) => t.window_count(),
        }
    }

    pub fn truncate(&mut self, windows: usize) {
        match self {
            Self::Vectors(v) => v.truncate(windows),
            Self::Tokens(t) => t.truncate(windows),
        }
    }
}

/// A sequence after temporal alignment. Every channel and the rating series
/// hold exactly `len()` windows.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSequence {
    pub seq_id: SeqId,
    pub channels: BTreeMap<String, WindowedChannel>,
    pub ratings: Vec<f32>,
}

impl AlignedSequence {
    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    pub fn vectors(&self, channel: &str) -> Option<&WindowedVectors> {
        match self.channels.get(channel) {
            Some(WindowedChannel::Vectors(v)) => Some(v),
            _ => None,
        }
    }

    pub fn tokens(&self, channel: &str) -> Option<&WindowedTokens> {
        match self.channels.get(channel) {
            Some(WindowedChannel::Tokens(t)) => Some(t),
            _ => None,
        }
    }
}
