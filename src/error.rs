use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("configuration error: {message}")]
    Config { message: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("aggregation error for sequence {seq_id}: {message}")]
    Aggregation { seq_id: String, message: String },
    #[error("{context}: {message}")]
    Runtime {
        context: &'static str,
        message: String,
    },
}

impl AlignmentError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn aggregation(seq_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Aggregation {
            seq_id: seq_id.into(),
            message: message.into(),
        }
    }

    pub fn runtime(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            context,
            message: err.to_string(),
        }
    }
}

impl From<candle_core::Error> for AlignmentError {
    fn from(err: candle_core::Error) -> Self {
        Self::runtime("tensor operation", err)
    }
}
