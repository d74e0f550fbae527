use std::collections::BTreeMap;

use affect_align::batching::batcher::ModelInput;
use affect_align::config::ChannelConfig;
use affect_align::importance::report::WORD_TABLE_HEADER;
use affect_align::types::{TimedRating, TimedToken, TimedVector};
use affect_align::{
    AlignmentConfig, AlignmentError, ChannelStream, ImportanceAnalyzerBuilder, ImportanceModel,
    SeqId, SequenceRecord,
};
use candle_core::Tensor;

/// Predicts an affine function of the target, weights tokens by their first
/// feature and reports the primary input itself as its gradient.
struct FeatureEchoModel;

impl ImportanceModel for FeatureEchoModel {
    fn forward(&self, input: &ModelInput) -> Result<Tensor, AlignmentError> {
        Ok(input.target.affine(0.5, 0.1)?)
    }

    fn token_weights(&self, input: &ModelInput) -> Result<Tensor, AlignmentError> {
        let primary = &input.channels[&input.primary_channel];
        Ok(primary.narrow(3, 0, 1)?.squeeze(3)?)
    }

    fn input_gradient(
        &self,
        input: &ModelInput,
        _output: &Tensor,
    ) -> Result<Option<Tensor>, AlignmentError> {
        Ok(Some(input.channels[&input.primary_channel].clone()))
    }

    fn device_label(&self) -> String {
        "echo".to_string()
    }
}

struct FailingModel;

impl ImportanceModel for FailingModel {
    fn forward(&self, _input: &ModelInput) -> Result<Tensor, AlignmentError> {
        Err(AlignmentError::runtime("forward pass", "device lost"))
    }

    fn token_weights(&self, _input: &ModelInput) -> Result<Tensor, AlignmentError> {
        Err(AlignmentError::runtime("token weights", "unreachable"))
    }
}

fn config() -> AlignmentConfig {
    AlignmentConfig {
        channels: vec![
            ChannelConfig::numeric("linguistic", 5.0, 2),
            ChannelConfig::text("linguistic_text", 5.0),
        ],
        ..AlignmentConfig::default()
    }
}

fn record(subject: &str, video: &str, words: &[(f64, &str)], ratings: Vec<f32>) -> SequenceRecord {
    let mut channels = BTreeMap::new();
    if !words.is_empty() {
        channels.insert(
            "linguistic".to_string(),
            ChannelStream::Numeric(
                words
                    .iter()
                    .map(|&(timestamp, word)| TimedVector {
                        timestamp,
                        vector: vec![word.len() as f32, 1.0],
                    })
                    .collect(),
            ),
        );
        channels.insert(
            "linguistic_text".to_string(),
            ChannelStream::Text(
                words
                    .iter()
                    .map(|&(timestamp, word)| TimedToken {
                        timestamp,
                        token: word.to_string(),
                    })
                    .collect(),
            ),
        );
    }
    SequenceRecord {
        seq_id: SeqId::new(subject, video),
        channels,
        ratings: ratings
            .into_iter()
            .enumerate()
            .map(|(s, value)| TimedRating {
                timestamp: s as f64,
                value,
            })
            .collect(),
    }
}

fn corpus() -> Vec<SequenceRecord> {
    vec![
        // windows: [hello, world], gap, [bye]; "end" stays in an open window
        record(
            "ID1",
            "vid1",
            &[(0.5, "Hello,"), (1.0, "world"), (11.0, "bye"), (16.0, "end")],
            (0..=16).map(|s| (s % 4) as f32 / 4.0).collect(),
        ),
        // windows: [good, morning, world], [again]
        record(
            "ID2",
            "vid1",
            &[(1.0, "Good"), (2.0, "morning"), (3.0, "world!"), (7.0, "again"), (12.0, "x")],
            (0..=11).map(|s| s as f32 / 11.0).collect(),
        ),
        record("ID3", "vid2", &[], (0..=11).map(|_| 0.5).collect()),
    ]
}

#[test]
fn analysis_skips_empty_sequences_and_reports_the_rest() {
    let analyzer = ImportanceAnalyzerBuilder::new(config())
        .with_model(Box::new(FeatureEchoModel))
        .build()
        .expect("build should succeed");
    let report = analyzer.analyze(&corpus()).unwrap();

    assert_eq!(report.meta.device, "echo");
    assert_eq!(report.meta.sequence_count, 3);
    assert_eq!(report.summary.evaluated_sequences, 2);
    assert_eq!(report.summary.skipped_sequences, 1);
    assert!(!report.mappings.fit.contains_key("ID3_vid2"));

    let lengths = report.summary.lengths.tokens_per_sequence.unwrap();
    assert_eq!(lengths.max, 4);
}

#[test]
fn mappings_follow_window_structure() {
    let analyzer = ImportanceAnalyzerBuilder::new(config())
        .with_model(Box::new(FeatureEchoModel))
        .build()
        .unwrap();
    let report = analyzer.analyze(&corpus()).unwrap();
    let mappings = &report.mappings;

    let sentences = &mappings.sentences["ID1_vid1"];
    assert_eq!(sentences.len(), 3);
    assert_eq!(sentences[0], vec!["hello", "world"]);
    assert!(sentences[1].is_empty());
    assert_eq!(sentences[2], vec!["bye"]);

    let weights = &mappings.weights["ID1_vid1"];
    assert!(weights[1].is_empty());
    for window in [&weights[0], &weights[2]] {
        let total: f32 = window.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }
    // "hello," has the larger first feature, so it gets the larger weight
    assert!(weights[0][0] > weights[0][1]);

    let gradients = &mappings.gradients["ID2_vid1"];
    assert_eq!(gradients.len(), 2);
    assert_eq!(gradients[0].len(), 3);
    assert_eq!(gradients[1].len(), 1);

    for (actual, predicted) in &mappings.labels["ID2_vid1"] {
        assert!((predicted - (0.5 * actual + 0.1)).abs() < 1e-6);
    }
}

#[test]
fn word_table_is_ordered_by_best_fit_sequence_first() {
    let analyzer = ImportanceAnalyzerBuilder::new(config())
        .with_model(Box::new(FeatureEchoModel))
        .build()
        .unwrap();
    let report = analyzer.analyze(&corpus()).unwrap();

    let (best, _) = report
        .mappings
        .fit
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .unwrap();
    let first_token = &report.mappings.sentences[best][0][0];
    assert_eq!(&report.words[0].word, first_token);

    let world = report.words.iter().find(|r| r.word == "world").unwrap();
    assert_eq!(world.count, 2);
    assert!(report.words.iter().all(|r| r.word != "end" && r.word != "x"));
}

#[test]
fn analysis_is_deterministic() {
    let analyzer = ImportanceAnalyzerBuilder::new(config())
        .with_model(Box::new(FeatureEchoModel))
        .build()
        .unwrap();
    let first = analyzer.analyze(&corpus()).unwrap();
    let second = analyzer.analyze(&corpus()).unwrap();
    assert_eq!(first.words, second.words);
    assert_eq!(first.mappings, second.mappings);
}

#[test]
fn model_failure_aborts_the_pass() {
    let analyzer = ImportanceAnalyzerBuilder::new(config())
        .with_model(Box::new(FailingModel))
        .build()
        .unwrap();
    let err = analyzer.analyze(&corpus()).unwrap_err();
    assert!(matches!(err, AlignmentError::Runtime { .. }));
}

#[test]
fn report_is_written_to_disk() {
    let analyzer = ImportanceAnalyzerBuilder::new(config())
        .with_model(Box::new(FeatureEchoModel))
        .build()
        .unwrap();
    let report = analyzer.analyze(&corpus()).unwrap();

    let dir = std::env::temp_dir().join("affect_align_end_to_end_report");
    let written = report.write_to_dir(&dir, "test").unwrap();
    let table = std::fs::read_to_string(&written.words_path).unwrap();
    assert_eq!(table.lines().next().unwrap(), WORD_TABLE_HEADER.join(","));
    assert_eq!(table.lines().count(), report.words.len() + 1);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&written.sequences_path).unwrap()).unwrap();
    assert_eq!(json["summary"]["evaluated_sequences"], 2);
    assert!(json["mappings"]["fit"]["ID1_vid1"].is_number());

    let _ = std::fs::remove_dir_all(&dir);
}
