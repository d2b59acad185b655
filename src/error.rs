use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error taxonomy for the pipeline. Variants carry enough context to log
/// without escaping the call site; callers decide whether a given variant
/// is session-fatal or scoped to a single frame/utterance.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("vad inference failed in {detector}: {message}")]
    VadInferenceError {
        detector: &'static str,
        message: String,
    },

    #[error("component not initialized: {0}")]
    NotInitialized(&'static str),

    #[error("vad initialization failed: {0}")]
    VadInitFailed(String),

    #[error("segmentation error: {0}")]
    SegmentationError(String),

    #[error("asr initialization failed: {0}")]
    AsrInitFailed(String),

    #[error("asr transcription failed: {0}")]
    AsrTranscribeFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Stable, low-cardinality identifier for this error variant, suitable
    /// for log aggregation and alerting — unlike the `Display` message, it
    /// never embeds caller-supplied text.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidFrame(_) => "invalid_frame",
            CoreError::InvalidInput(_) => "invalid_input",
            CoreError::VadInferenceError { .. } => "vad_inference_error",
            CoreError::NotInitialized(_) => "not_initialized",
            CoreError::VadInitFailed(_) => "vad_init_failed",
            CoreError::SegmentationError(_) => "segmentation_error",
            CoreError::AsrInitFailed(_) => "asr_init_failed",
            CoreError::AsrTranscribeFailed(_) => "asr_transcribe_failed",
            CoreError::Io(_) => "io_error",
            CoreError::Other(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_is_stable_and_ignores_message_text() {
        let a = CoreError::InvalidFrame("foo".into());
        let b = CoreError::InvalidFrame("bar".into());
        assert_eq!(a.error_code(), b.error_code());
        assert_eq!(a.error_code(), "invalid_frame");
    }

    #[test]
    fn not_initialized_has_stable_code() {
        assert_eq!(CoreError::NotInitialized("vad").error_code(), "not_initialized");
    }
}
