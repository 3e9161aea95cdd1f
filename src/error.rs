use thiserror::Error;

/// Errors surfaced by the spectrum pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpectrumError {
    /// Invalid transform size, sample rate, dB bounds or enum name.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The pipeline was disposed before the call.
    #[error("pipeline has been disposed")]
    Disposed,
    /// A single frame failed inside the FFT kernel or the conversion math.
    #[error("transform error: {0}")]
    Transform(String),
    /// A background worker could not be started.
    #[error("failed to start worker: {0}")]
    Worker(String),
}

impl SpectrumError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SpectrumError::Configuration(msg.into())
    }

    pub(crate) fn transform(msg: impl Into<String>) -> Self {
        SpectrumError::Transform(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SpectrumError>;
