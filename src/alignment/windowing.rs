use std::ops::Range;

use crate::config::{AlignmentConfig, ChannelWindow, WindowSpec};
use crate::error::AlignmentError;
use crate::pipeline::traits::TokenCanonicalizer;
use crate::types::{
    AlignedSequence, ChannelStream, SequenceRecord, TextWindow, TimedRating, TimedToken,
    TimedVector, WindowedChannel, WindowedTokens, WindowedVectors,
};

/// Lowercases and strips surrounding whitespace and ASCII punctuation.
/// A token made only of punctuation canonicalizes to the empty string and is
/// kept, so text slots stay index-aligned with their embedding vectors.
pub fn canonical_token(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase()
}

/// Partitions samples into consecutive closed windows of `duration_secs`.
///
/// The first window covers `[0, duration]` inclusive. A window only closes
/// when a later sample falls past its end, so samples after the last crossed
/// boundary form an open window that is not returned. Windows crossed without
/// capturing anything come back as empty ranges. At most `limit` windows are
/// returned.
fn closed_windows(
    timestamps: &[f64],
    duration_secs: f64,
    channel: &str,
    limit: usize,
) -> Result<Vec<Range<usize>>, AlignmentError> {
    if let Some(bad) = timestamps.iter().find(|t| !t.is_finite()) {
        return Err(AlignmentError::invalid_input(format!(
            "channel '{channel}' has non-finite timestamp {bad}"
        )));
    }

    let mut windows = Vec::new();
    let mut window_start = 0.0f64;
    let mut first = 0usize;
    let mut idx = 0usize;
    while idx < timestamps.len() && windows.len() < limit {
        if timestamps[idx] <= window_start + duration_secs {
            idx += 1;
        } else {
            windows.push(first..idx);
            first = idx;
            window_start += duration_secs;
        }
    }
    Ok(windows)
}

/// Windows a numeric stream. NaN components are zeroed first; gap windows
/// repeat the last vector seen before the gap, or the first vector of the
/// stream, or a zero vector for an empty stream. Each of at most `limit`
/// closed windows is emitted `oversample` times.
pub fn window_vectors(
    channel: &str,
    samples: &[TimedVector],
    window: ChannelWindow,
    dim: usize,
    limit: usize,
) -> Result<WindowedVectors, AlignmentError> {
    let mut flat = Vec::with_capacity(samples.len() * dim);
    for (idx, sample) in samples.iter().enumerate() {
        if sample.vector.len() != dim {
            return Err(AlignmentError::invalid_input(format!(
                "channel '{channel}' sample {idx} has dimension {} but {dim} is configured",
                sample.vector.len()
            )));
        }
        flat.extend(
            sample
                .vector
                .iter()
                .map(|&v| if v.is_nan() { 0.0 } else { v }),
        );
    }
    let timestamps: Vec<f64> = samples.iter().map(|s| s.timestamp).collect();
    let zero = vec![0.0f32; dim];

    let mut out = WindowedVectors::new(dim);
    for range in closed_windows(&timestamps, window.duration_secs, channel, limit)? {
        let tokens: &[f32] = if range.is_empty() {
            let fill = range.start.checked_sub(1).or(if samples.is_empty() {
                None
            } else {
                Some(0)
            });
            match fill {
                Some(k) => &flat[k * dim..(k + 1) * dim],
                None => zero.as_slice(),
            }
        } else {
            &flat[range.start * dim..range.end * dim]
        };
        for _ in 0..window.oversample {
            out.push_window(tokens);
        }
    }
    Ok(out)
}

/// Windows a token stream. Gap windows become [`TextWindow::NoTokens`].
pub fn window_tokens(
    channel: &str,
    samples: &[TimedToken],
    window: ChannelWindow,
    canonicalizer: &dyn TokenCanonicalizer,
    limit: usize,
) -> Result<WindowedTokens, AlignmentError> {
    let timestamps: Vec<f64> = samples.iter().map(|s| s.timestamp).collect();
    let mut out = WindowedTokens::default();
    for range in closed_windows(&timestamps, window.duration_secs, channel, limit)? {
        let text_window = if range.is_empty() {
            TextWindow::NoTokens
        } else {
            TextWindow::Tokens(
                samples[range]
                    .iter()
                    .map(|s| canonicalizer.canonicalize(&s.token))
                    .collect(),
            )
        };
        for _ in 0..window.oversample {
            out.windows.push(text_window.clone());
        }
    }
    Ok(out)
}

/// Windows the rating series; each closed window holds the mean of the
/// ratings captured inside it.
pub fn window_ratings(
    samples: &[TimedRating],
    window: ChannelWindow,
    limit: usize,
) -> Result<Vec<f32>, AlignmentError> {
    let timestamps: Vec<f64> = samples.iter().map(|s| s.timestamp).collect();
    let mut out: Vec<f32> = Vec::new();
    for range in closed_windows(&timestamps, window.duration_secs, "ratings", limit)? {
        let mean = if range.is_empty() {
            let carried = out.last().copied().unwrap_or(0.0);
            tracing::warn!(
                window = out.len(),
                carried,
                "rating window captured no ratings; carrying previous mean"
            );
            carried
        } else {
            let count = range.len();
            let sum: f64 = samples[range].iter().map(|s| s.value as f64).sum();
            (sum / count as f64) as f32
        };
        out.push(mean);
    }
    Ok(out)
}

/// Upper bound, in rating windows, on how many windows a stream whose latest
/// sample is at `last` can close.
fn window_bound(last: Option<f64>, window: ChannelWindow) -> usize {
    let Some(last) = last else {
        return 0;
    };
    let steps = (last / window.duration_secs).ceil();
    let steps = if steps.is_finite() && steps > 0.0 {
        steps as usize
    } else if steps > 0.0 {
        usize::MAX
    } else {
        0
    };
    steps.saturating_add(1).saturating_mul(window.oversample)
}

fn latest(timestamps: impl Iterator<Item = f64>) -> Option<f64> {
    timestamps.reduce(f64::max)
}

/// Smallest window bound over every configured stream of `record`. No stream
/// can contribute more windows than this to the common length.
fn common_horizon(
    record: &SequenceRecord,
    config: &AlignmentConfig,
    spec: &WindowSpec,
) -> Result<usize, AlignmentError> {
    let mut horizon = window_bound(
        latest(record.ratings.iter().map(|r| r.timestamp)),
        spec.rating_window(),
    );
    for channel in &config.channels {
        let window = spec.channel(&channel.name)?;
        let last = match record.channels.get(&channel.name) {
            Some(ChannelStream::Numeric(samples)) => latest(samples.iter().map(|s| s.timestamp)),
            Some(ChannelStream::Text(samples)) => latest(samples.iter().map(|s| s.timestamp)),
            None => None,
        };
        horizon = horizon.min(window_bound(last, window));
    }
    Ok(horizon)
}

/// Windows every configured channel and the ratings of one record, then
/// truncates all of them to the shortest window count.
pub fn align_sequence(
    record: &SequenceRecord,
    config: &AlignmentConfig,
    spec: &WindowSpec,
    canonicalizer: &dyn TokenCanonicalizer,
) -> Result<AlignedSequence, AlignmentError> {
    let horizon = common_horizon(record, config, spec)?;
    let mut channels = std::collections::BTreeMap::new();
    for channel in &config.channels {
        let window = spec.channel(&channel.name)?;
        let limit = horizon.div_ceil(window.oversample);
        let stream = record.channels.get(&channel.name);
        if stream.map_or(true, ChannelStream::is_empty) {
            tracing::warn!(
                seq_id = %record.seq_id,
                channel = channel.name.as_str(),
                "channel stream is missing or empty; sequence will have no windows"
            );
        }
        let windowed = if channel.text {
            let samples: &[TimedToken] = match stream {
                Some(ChannelStream::Text(samples)) => samples.as_slice(),
                None => &[],
                Some(ChannelStream::Numeric(_)) => {
                    return Err(AlignmentError::invalid_input(format!(
                        "{}: channel '{}' is configured as text but holds numeric samples",
                        record.seq_id, channel.name
                    )))
                }
            };
            WindowedChannel::Tokens(window_tokens(
                &channel.name,
                samples,
                window,
                canonicalizer,
                limit,
            )?)
        } else {
            let dim = channel.feature_dim()?;
            let samples: &[TimedVector] = match stream {
                Some(ChannelStream::Numeric(samples)) => samples.as_slice(),
                None => &[],
                Some(ChannelStream::Text(_)) => {
                    return Err(AlignmentError::invalid_input(format!(
                        "{}: channel '{}' is configured as numeric but holds text samples",
                        record.seq_id, channel.name
                    )))
                }
            };
            WindowedChannel::Vectors(window_vectors(&channel.name, samples, window, dim, limit)?)
        };
        channels.insert(channel.name.clone(), windowed);
    }

    let mut ratings = window_ratings(&record.ratings, spec.rating_window(), horizon)?;
    let common = channels
        .values()
        .map(WindowedChannel::window_count)
        .chain(std::iter::once(ratings.len()))
        .min()
        .unwrap_or(0);

    for (name, windowed) in channels.iter_mut() {
        if windowed.window_count() != common {
            tracing::warn!(
                seq_id = %record.seq_id,
                channel = name.as_str(),
                windows = windowed.window_count(),
                common,
                "truncating channel to common window count"
            );
            windowed.truncate(common);
        }
    }
    ratings.truncate(common);

    Ok(AlignedSequence {
        seq_id: record.seq_id.clone(),
        channels,
        ratings,
    })
}
