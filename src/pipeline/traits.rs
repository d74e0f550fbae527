use candle_core::Tensor;

use crate::batching::batcher::ModelInput;
use crate::error::AlignmentError;

/// The sequence model collaborator. Calls are blocking; any error aborts the
/// evaluation pass.
pub trait ImportanceModel: Send + Sync {
    /// Predictions shaped `[batch, windows, 1]`.
    fn forward(&self, input: &ModelInput) -> Result<Tensor, AlignmentError>;

    /// Raw per-token weights shaped `[batch, windows, tokens]`, with the token
    /// axis matching the primary channel's padded token dimension.
    fn token_weights(&self, input: &ModelInput) -> Result<Tensor, AlignmentError>;

    /// Gradient of `output`, backpropagated with a unit upstream gradient,
    /// with respect to the primary channel input: `[batch, windows, tokens, dim]`.
    /// `None` when the model cannot provide gradients.
    fn input_gradient(
        &self,
        _input: &ModelInput,
        _output: &Tensor,
    ) -> Result<Option<Tensor>, AlignmentError> {
        Ok(None)
    }

    fn device_label(&self) -> String {
        "cpu".to_string()
    }
}

/// Maps a raw token to the identity used for word-level statistics.
pub trait TokenCanonicalizer: Send + Sync {
    fn canonicalize(&self, raw: &str) -> String;
}
