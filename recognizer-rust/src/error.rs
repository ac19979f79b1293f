use thiserror::Error;

/// Errors raised by the recognition pipeline
///
/// Decode, spectrogram, feature and fingerprint failures are recoverable
/// during a corpus scan (the file is skipped and retried next scan) but
/// fatal for a query file, which cannot be matched without a fingerprint.
#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Spectrogram is empty for {0}")]
    EmptySpectrogram(String),

    #[error("No features could be extracted: {0}")]
    EmptyFeatureSet(String),

    #[error("Fingerprint generation failed: {0}")]
    Fingerprint(String),

    #[error("Mixing weight must be in the range 0 to 100, got {0}")]
    InvalidWeight(f64),

    #[error("Corpus contains no fingerprints")]
    EmptyCorpus,

    #[error("Resampling failed: {0}")]
    Resample(String),

    #[error("Corrupt cache file {0}")]
    Cache(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RecognizerError>;
