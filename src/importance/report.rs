use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::alignment::corpus::CorpusLengthStats;
use crate::error::AlignmentError;
use crate::importance::aggregator::WordStatRow;

pub const WORD_TABLE_HEADER: [&str; 8] =
    ["word", "count", "sum", "avg", "std", "sum_gs", "avg_gs", "std_gs"];

/// Per-sequence outputs keyed by sequence id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SequenceMappings {
    pub weights: BTreeMap<String, Vec<Vec<f32>>>,
    pub gradients: BTreeMap<String, Vec<Vec<f32>>>,
    /// (actual, predicted) per window.
    pub labels: BTreeMap<String, Vec<(f32, f32)>>,
    pub sentences: BTreeMap<String, Vec<Vec<String>>>,
    pub fit: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub generated_at: String,
    pub device: String,
    pub primary_channel: String,
    pub text_channel: String,
    pub sequence_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationSummary {
    pub fit_mean: f64,
    pub fit_std: f64,
    pub evaluated_sequences: usize,
    pub skipped_sequences: usize,
    pub lengths: CorpusLengthStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub meta: ReportMeta,
    pub summary: EvaluationSummary,
    pub words: Vec<WordStatRow>,
    pub mappings: SequenceMappings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenReport {
    pub words_path: PathBuf,
    pub sequences_path: PathBuf,
}

impl AnalysisReport {
    /// Writes `words_<tag>.csv` and `sequences_<tag>.json` into `dir`.
    pub fn write_to_dir(&self, dir: &Path, tag: &str) -> Result<WrittenReport, AlignmentError> {
        fs::create_dir_all(dir).map_err(|e| AlignmentError::io("create report directory", e))?;
        let words_path = dir.join(format!("words_{tag}.csv"));
        let file =
            File::create(&words_path).map_err(|e| AlignmentError::io("create word table", e))?;
        let mut writer = BufWriter::new(file);
        write_word_table(&mut writer, &self.words)?;
        writer
            .flush()
            .map_err(|e| AlignmentError::io("flush word table", e))?;

        let sequences_path = dir.join(format!("sequences_{tag}.json"));
        write_json(&sequences_path, self)?;
        Ok(WrittenReport {
            words_path,
            sequences_path,
        })
    }
}

/// Writes the comma-delimited word table, one row per token in report order.
pub fn write_word_table<W: Write>(out: &mut W, rows: &[WordStatRow]) -> Result<(), AlignmentError> {
    let io = |e| AlignmentError::io("write word table", e);
    writeln!(out, "{}", WORD_TABLE_HEADER.join(",")).map_err(io)?;
    for row in rows {
        writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            escape_field(&row.word),
            row.count,
            row.sum,
            row.avg,
            row.std,
            row.sum_gs,
            row.avg_gs,
            row.std_gs
        )
        .map_err(io)?;
    }
    Ok(())
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AlignmentError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AlignmentError::io("create output directory", e))?;
    }
    let mut file = File::create(path).map_err(|e| AlignmentError::io("create JSON output", e))?;
    serde_json::to_writer_pretty(&mut file, value)
        .map_err(|e| AlignmentError::json("serialize JSON output", e))?;
    file.write_all(b"\n")
        .map_err(|e| AlignmentError::io("finalize JSON output", e))?;
    Ok(())
}
