use metasweep_core::ConfigError;
use thiserror::Error;

pub type LaunchResult<T> = std::result::Result<T, LaunchError>;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("job {index} submission failed: {message}")]
    JobSubmission { index: usize, message: String },

    #[error("job {index} timed out after {secs}s")]
    Timeout { index: usize, secs: u64 },

    #[error("job {index} cancelled before submission")]
    Cancelled { index: usize },

    #[error("invalid launcher profile: {0}")]
    Profile(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl LaunchError {
    /// Failures worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::JobSubmission { .. } | Self::Timeout { .. } | Self::Io(_))
    }
}
