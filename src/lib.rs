pub mod alignment;
pub mod batching;
pub mod config;
pub mod error;
pub mod importance;
pub mod pipeline;
pub mod types;

pub use alignment::corpus::{align_corpus, load_records, AlignedCorpus};
pub use batching::batcher::{Batch, LengthSortedBatcher, ModelInput};
pub use batching::padding::{pad_corpus, PaddedDataset};
pub use config::{AlignmentConfig, ChannelConfig, WindowSpec};
pub use error::AlignmentError;
pub use importance::aggregator::{ImportanceAggregator, WordStatRow};
pub use importance::normalize::Normalization;
pub use importance::report::AnalysisReport;
pub use pipeline::builder::ImportanceAnalyzerBuilder;
pub use pipeline::runtime::ImportanceAnalyzer;
pub use pipeline::traits::{ImportanceModel, TokenCanonicalizer};
pub use types::{AlignedSequence, ChannelStream, SeqId, SequenceRecord};
