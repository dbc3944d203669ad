//! Error taxonomy shared by the model manager and the generation paths.

use std::time::Duration;

use thiserror::Error;

use crate::language::Language;

/// Failures of the model lifecycle.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Unsupported language code: {0}")]
    UnsupportedLanguage(char),

    #[error("Timeout must be at least {minimum} seconds (got {requested})")]
    InvalidTimeout { requested: u64, minimum: u64 },

    #[error("Model loading failed: {0}")]
    LoadFailed(String),

    #[error("Model loading did not finish within {0:?}")]
    LoadTimeout(Duration),

    #[error("Pipeline for language {0} not available")]
    BackendUnavailable(Language),

    #[error("Model manager has been shut down")]
    ShutDown,
}

impl ModelError {
    /// `true` when the caller can fix the request; everything else is a
    /// resource condition that may clear up on retry.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::UnsupportedLanguage(_) | Self::InvalidTimeout { .. })
    }
}

/// Failures of a generation request.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Malformed or out-of-range input.
    #[error("{0}")]
    Validation(String),

    /// The session was stopped while synthesis was running.
    #[error("Client cancelled request")]
    Cancelled,

    #[error(transparent)]
    Resource(ModelError),

    /// Backend or encoder failure; details are logged, not returned.
    #[error("Audio generation failed: {0:#}")]
    Unexpected(#[from] anyhow::Error),
}

impl GenerationError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Message safe to hand to a client.
    pub fn public_message(&self) -> String {
        match self {
            Self::Unexpected(_) => "Audio generation failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ModelError> for GenerationError {
    fn from(err: ModelError) -> Self {
        if err.is_client_error() {
            Self::Validation(err.to_string())
        } else {
            Self::Resource(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_model_errors_become_validation() {
        let err: GenerationError = ModelError::UnsupportedLanguage('q').into();
        assert!(matches!(err, GenerationError::Validation(_)));

        let err: GenerationError = ModelError::LoadTimeout(Duration::from_secs(60)).into();
        assert!(matches!(err, GenerationError::Resource(ModelError::LoadTimeout(_))));
    }

    #[test]
    fn test_unexpected_errors_hide_details() {
        let err = GenerationError::from(anyhow::anyhow!("tensor shape mismatch at layer 7"));
        assert_eq!(err.public_message(), "Audio generation failed");
        assert!(err.to_string().contains("layer 7"));
    }
}
