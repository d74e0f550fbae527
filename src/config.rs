use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AlignmentError;
use crate::importance::normalize::Normalization;

/// Name reserved for the target channel. Its window duration is the canonical
/// one every other channel is measured against.
pub const RATINGS_CHANNEL: &str = "ratings";

const RATIO_TOLERANCE: f64 = 1e-9;

/// Window duration of one channel plus how many rating windows one of its
/// windows spans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelWindow {
    pub duration_secs: f64,
    pub oversample: usize,
}

/// Validated channel → window duration mapping.
///
/// Construction fails when any channel duration is not a positive integer
/// multiple of the rating duration, so windowing never sees a fractional
/// oversample ratio.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    rating_secs: f64,
    channels: BTreeMap<String, ChannelWindow>,
}

impl WindowSpec {
    pub fn new<I, S>(rating_secs: f64, channels: I) -> Result<Self, AlignmentError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        check_duration(RATINGS_CHANNEL, rating_secs)?;
        let mut out = BTreeMap::new();
        for (name, secs) in channels {
            let name = name.into();
            if name == RATINGS_CHANNEL {
                return Err(AlignmentError::config(format!(
                    "channel name '{RATINGS_CHANNEL}' is reserved for the target series"
                )));
            }
            check_duration(&name, secs)?;
            let oversample = oversample_ratio(&name, secs, rating_secs)?;
            let window = ChannelWindow {
                duration_secs: secs,
                oversample,
            };
            if out.insert(name.clone(), window).is_some() {
                return Err(AlignmentError::config(format!(
                    "channel '{name}' declared more than once"
                )));
            }
        }
        Ok(Self {
            rating_secs,
            channels: out,
        })
    }

    pub fn rating_window(&self) -> ChannelWindow {
        ChannelWindow {
            duration_secs: self.rating_secs,
            oversample: 1,
        }
    }

    pub fn channel(&self, name: &str) -> Result<ChannelWindow, AlignmentError> {
        if name == RATINGS_CHANNEL {
            return Ok(self.rating_window());
        }
        self.channels
            .get(name)
            .copied()
            .ok_or_else(|| AlignmentError::config(format!("unknown channel '{name}'")))
    }

    pub fn channels(&self) -> impl Iterator<Item = (&str, ChannelWindow)> {
        self.channels.iter().map(|(name, w)| (name.as_str(), *w))
    }
}

fn check_duration(name: &str, secs: f64) -> Result<(), AlignmentError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(AlignmentError::config(format!(
            "window duration for '{name}' must be a positive number of seconds, got {secs}"
        )));
    }
    Ok(())
}

fn oversample_ratio(name: &str, secs: f64, rating_secs: f64) -> Result<usize, AlignmentError> {
    let ratio = secs / rating_secs;
    let nearest = ratio.round();
    if nearest < 1.0 || (ratio - nearest).abs() > RATIO_TOLERANCE * nearest {
        return Err(AlignmentError::config(format!(
            "window duration for '{name}' ({secs}s) is not a positive integer multiple \
             of the rating window ({rating_secs}s)"
        )));
    }
    Ok(nearest as usize)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub window_secs: f64,
    /// Feature dimension; required for numeric channels.
    #[serde(default)]
    pub dim: Option<usize>,
    #[serde(default)]
    pub text: bool,
}

impl ChannelConfig {
    pub fn numeric(name: impl Into<String>, window_secs: f64, dim: usize) -> Self {
        Self {
            name: name.into(),
            window_secs,
            dim: Some(dim),
            text: false,
        }
    }

    pub fn text(name: impl Into<String>, window_secs: f64) -> Self {
        Self {
            name: name.into(),
            window_secs,
            dim: None,
            text: true,
        }
    }

    pub(crate) fn feature_dim(&self) -> Result<usize, AlignmentError> {
        match self.dim {
            Some(dim) if dim > 0 => Ok(dim),
            _ => Err(AlignmentError::config(format!(
                "missing modality dimension for numeric channel '{}'",
                self.name
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    #[serde(default = "default_rating_window_secs")]
    pub rating_window_secs: f64,
    pub channels: Vec<ChannelConfig>,
    /// Numeric channel whose token slots line up with the text channel and
    /// whose input gradient is used for saliency.
    pub primary_channel: String,
    /// Text channel providing the token strings for importance reporting.
    pub text_channel: String,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub normalization: Normalization,
}

impl AlignmentConfig {
    pub const DEFAULT_RATING_WINDOW_SECS: f64 = 5.0;
    pub const DEFAULT_SEED: u64 = 1;
    pub const DEFAULT_LINGUISTIC_DIM: usize = 300;

    pub fn load(path: &Path) -> Result<Self, AlignmentError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| AlignmentError::io("read alignment config", e))?;
        serde_json::from_str(&data).map_err(|e| AlignmentError::json("parse alignment config", e))
    }

    /// Checks every configuration invariant and returns the derived window
    /// spec. Called before any sequence is touched.
    pub fn validate(&self) -> Result<WindowSpec, AlignmentError> {
        if self.channels.is_empty() {
            return Err(AlignmentError::config("no channels configured"));
        }
        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.name.as_str()) {
                return Err(AlignmentError::config(format!(
                    "channel '{}' declared more than once",
                    channel.name
                )));
            }
            if !channel.text {
                channel.feature_dim()?;
            }
        }

        let primary = self.require_channel(&self.primary_channel)?;
        if primary.text {
            return Err(AlignmentError::config(format!(
                "primary channel '{}' must be numeric",
                primary.name
            )));
        }
        let text = self.require_channel(&self.text_channel)?;
        if !text.text {
            return Err(AlignmentError::config(format!(
                "text channel '{}' is not declared as text",
                text.name
            )));
        }

        WindowSpec::new(
            self.rating_window_secs,
            self.channels
                .iter()
                .map(|c| (c.name.clone(), c.window_secs)),
        )
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == name)
    }

    fn require_channel(&self, name: &str) -> Result<&ChannelConfig, AlignmentError> {
        self.channel(name)
            .ok_or_else(|| AlignmentError::config(format!("unknown channel '{name}'")))
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            rating_window_secs: Self::DEFAULT_RATING_WINDOW_SECS,
            channels: vec![
                ChannelConfig::numeric("linguistic", 5.0, Self::DEFAULT_LINGUISTIC_DIM),
                ChannelConfig::text("linguistic_text", 5.0),
            ],
            primary_channel: "linguistic".to_string(),
            text_channel: "linguistic_text".to_string(),
            seed: Self::DEFAULT_SEED,
            normalization: Normalization::default(),
        }
    }
}

fn default_rating_window_secs() -> f64 {
    AlignmentConfig::DEFAULT_RATING_WINDOW_SECS
}

fn default_seed() -> u64 {
    AlignmentConfig::DEFAULT_SEED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_config_default_is_valid() {
        let config = AlignmentConfig::default();
        let spec = config.validate().expect("default config validates");
        assert_eq!(spec.channel("linguistic").unwrap().oversample, 1);
        assert_eq!(spec.channel("linguistic_text").unwrap().oversample, 1);
        assert_eq!(spec.rating_window().duration_secs, 5.0);
        assert_eq!(config.seed, 1);
    }

    #[test]
    fn window_spec_computes_integer_oversample() {
        let spec = WindowSpec::new(5.0, [("image", 10.0), ("audio", 5.0)]).unwrap();
        assert_eq!(spec.channel("image").unwrap().oversample, 2);
        assert_eq!(spec.channel("audio").unwrap().oversample, 1);
    }

    #[test]
    fn window_spec_rejects_fractional_ratio_at_construction() {
        let err = WindowSpec::new(5.0, [("image", 7.5)]).unwrap_err();
        assert!(matches!(err, AlignmentError::Config { .. }));
    }

    #[test]
    fn window_spec_rejects_shorter_than_rating_window() {
        assert!(WindowSpec::new(5.0, [("image", 2.5)]).is_err());
        assert!(WindowSpec::new(5.0, [("image", 0.0)]).is_err());
        assert!(WindowSpec::new(0.0, [("image", 5.0)]).is_err());
    }

    #[test]
    fn window_spec_unknown_channel_is_config_error() {
        let spec = WindowSpec::new(5.0, [("image", 5.0)]).unwrap();
        assert!(matches!(
            spec.channel("audio"),
            Err(AlignmentError::Config { .. })
        ));
        assert_eq!(spec.channel(RATINGS_CHANNEL).unwrap().oversample, 1);
    }

    #[test]
    fn validate_reports_missing_dimension() {
        let mut config = AlignmentConfig::default();
        config.channels[0].dim = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("missing modality dimension"));
    }

    #[test]
    fn validate_reports_unknown_primary_channel() {
        let config = AlignmentConfig {
            primary_channel: "emotient".to_string(),
            ..AlignmentConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AlignmentError::Config { .. })
        ));
    }

    #[test]
    fn validate_rejects_text_channel_of_wrong_kind() {
        let config = AlignmentConfig {
            text_channel: "linguistic".to_string(),
            ..AlignmentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_parses_from_json_with_defaults() {
        let json = r#"{
            "channels": [
                {"name": "linguistic", "window_secs": 10, "dim": 4},
                {"name": "linguistic_text", "window_secs": 10, "text": true}
            ],
            "primary_channel": "linguistic",
            "text_channel": "linguistic_text"
        }"#;
        let config: AlignmentConfig = serde_json::from_str(json).expect("valid config json");
        assert_eq!(config.rating_window_secs, 5.0);
        assert_eq!(config.seed, AlignmentConfig::DEFAULT_SEED);
        assert_eq!(config.normalization, Normalization::Softmax);
        let spec = config.validate().unwrap();
        assert_eq!(spec.channel("linguistic").unwrap().oversample, 2);
    }

    #[test]
    fn load_reads_config_file() {
        let path = std::env::temp_dir().join("affect_align_config_load.json");
        let json = serde_json::to_string(&AlignmentConfig::default()).unwrap();
        std::fs::write(&path, json).expect("write config");
        let loaded = AlignmentConfig::load(&path).expect("load config");
        assert_eq!(loaded, AlignmentConfig::default());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_fails_on_missing_file() {
        let result = AlignmentConfig::load(Path::new("/nonexistent/affect_align.json"));
        assert!(matches!(result, Err(AlignmentError::Io { .. })));
    }
}
