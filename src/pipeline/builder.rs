use candle_core::Device;

use crate::config::AlignmentConfig;
use crate::error::AlignmentError;
use crate::pipeline::defaults::PunctuationStrippingCanonicalizer;
use crate::pipeline::runtime::{ImportanceAnalyzer, ImportanceAnalyzerParts};
use crate::pipeline::traits::{ImportanceModel, TokenCanonicalizer};

pub struct ImportanceAnalyzerBuilder {
    config: AlignmentConfig,
    model: Option<Box<dyn ImportanceModel>>,
    canonicalizer: Option<Box<dyn TokenCanonicalizer>>,
    device: Device,
}

impl ImportanceAnalyzerBuilder {
    pub fn new(config: AlignmentConfig) -> Self {
        Self {
            config,
            model: None,
            canonicalizer: None,
            device: Device::Cpu,
        }
    }

    pub fn with_model(mut self, model: Box<dyn ImportanceModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_canonicalizer(mut self, canonicalizer: Box<dyn TokenCanonicalizer>) -> Self {
        self.canonicalizer = Some(canonicalizer);
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Validates the configuration and assembles the analyzer. A model is
    /// required; the canonicalizer defaults to punctuation stripping.
    pub fn build(self) -> Result<ImportanceAnalyzer, AlignmentError> {
        self.config.validate()?;
        let model = self
            .model
            .ok_or_else(|| AlignmentError::config("no importance model supplied"))?;
        tracing::debug!(
            primary = %self.config.primary_channel,
            text = %self.config.text_channel,
            device = %model.device_label(),
            "importance analyzer built"
        );
        Ok(ImportanceAnalyzer::from_parts(ImportanceAnalyzerParts {
            config: self.config,
            model,
            canonicalizer: self
                .canonicalizer
                .unwrap_or_else(|| Box::new(PunctuationStrippingCanonicalizer)),
            device: self.device,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use candle_core::{DType, Tensor};

    use super::*;
    use crate::batching::batcher::ModelInput;
    use crate::config::ChannelConfig;
    use crate::types::{ChannelStream, SeqId, SequenceRecord, TimedRating, TimedToken, TimedVector};

    struct MockModel;

    impl MockModel {
        fn shape(input: &ModelInput) -> Result<(usize, usize, usize), AlignmentError> {
            let primary = &input.channels[&input.primary_channel];
            let (b, w, t, _) = primary.dims4()?;
            Ok((b, w, t))
        }
    }

    impl ImportanceModel for MockModel {
        fn forward(&self, input: &ModelInput) -> Result<Tensor, AlignmentError> {
            Ok(input.target.clone())
        }

        fn token_weights(&self, input: &ModelInput) -> Result<Tensor, AlignmentError> {
            Ok(Tensor::zeros(Self::shape(input)?, DType::F32, &Device::Cpu)?)
        }

        fn device_label(&self) -> String {
            "mock".to_string()
        }
    }

    struct UpperCanonicalizer;

    impl TokenCanonicalizer for UpperCanonicalizer {
        fn canonicalize(&self, raw: &str) -> String {
            raw.to_uppercase()
        }
    }

    fn small_config() -> AlignmentConfig {
        AlignmentConfig {
            channels: vec![
                ChannelConfig::numeric("linguistic", 5.0, 2),
                ChannelConfig::text("linguistic_text", 5.0),
            ],
            ..AlignmentConfig::default()
        }
    }

    fn record() -> SequenceRecord {
        let vector = |timestamp: f64, vector: Vec<f32>| TimedVector { timestamp, vector };
        let token = |timestamp: f64, token: &str| TimedToken {
            timestamp,
            token: token.to_string(),
        };
        let mut channels = BTreeMap::new();
        channels.insert(
            "linguistic".to_string(),
            ChannelStream::Numeric(vec![
                vector(1.0, vec![1.0, 0.0]),
                vector(7.0, vec![0.0, 1.0]),
                vector(12.0, vec![1.0, 1.0]),
            ]),
        );
        channels.insert(
            "linguistic_text".to_string(),
            ChannelStream::Text(vec![
                token(1.0, "well"),
                token(7.0, "ok"),
                token(12.0, "later"),
            ]),
        );
        SequenceRecord {
            seq_id: SeqId::new("ID1", "vid1"),
            channels,
            ratings: (0..=12)
                .map(|s| TimedRating {
                    timestamp: s as f64,
                    value: (s as f32) / 12.0,
                })
                .collect(),
        }
    }

    #[test]
    fn builder_defaults_to_cpu_without_model() {
        let builder = ImportanceAnalyzerBuilder::new(AlignmentConfig::default());
        assert!(builder.model.is_none());
        assert!(builder.canonicalizer.is_none());
        assert!(matches!(builder.device, Device::Cpu));
    }

    #[test]
    fn build_without_model_fails() {
        let err = ImportanceAnalyzerBuilder::new(small_config())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, AlignmentError::Config { .. }));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let config = AlignmentConfig {
            primary_channel: "absent".to_string(),
            ..small_config()
        };
        let result = ImportanceAnalyzerBuilder::new(config)
            .with_model(Box::new(MockModel))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn build_success_with_mock_model() {
        let analyzer = ImportanceAnalyzerBuilder::new(small_config())
            .with_model(Box::new(MockModel))
            .build()
            .expect("build should succeed");
        let report = analyzer.analyze(&[record()]).unwrap();
        assert_eq!(report.meta.device, "mock");
        assert_eq!(report.summary.evaluated_sequences, 1);
        assert!(report.mappings.gradients.is_empty());
        assert!((report.mappings.fit["ID1_vid1"] - 1.0).abs() < 1e-9);
        let words: Vec<&str> = report.words.iter().map(|r| r.word.as_str()).collect();
        assert_eq!(words, vec!["well", "ok"]);
    }

    #[test]
    fn custom_canonicalizer_is_used() {
        let analyzer = ImportanceAnalyzerBuilder::new(small_config())
            .with_model(Box::new(MockModel))
            .with_canonicalizer(Box::new(UpperCanonicalizer))
            .build()
            .unwrap();
        let report = analyzer.analyze(&[record()]).unwrap();
        assert_eq!(report.words[0].word, "WELL");
    }
}
