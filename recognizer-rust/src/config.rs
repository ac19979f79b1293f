//! Configuration for analysis, corpus layout and mixing

use crate::error::{RecognizerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Parameters of the spectrogram analysis shared by corpus and query files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Only the first `duration_secs` of each file are analysed
    pub duration_secs: f32,

    /// Analysis rate in Hz; `None` keeps each file's native rate
    pub sample_rate: Option<u32>,

    /// Number of mel bands
    pub n_mels: usize,

    /// STFT window size
    pub n_fft: usize,

    /// STFT hop size
    pub hop_length: usize,

    /// Dynamic range kept below the peak, in dB
    pub top_db: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            duration_secs: 30.0,
            sample_rate: Some(22050),
            n_mels: 128,
            n_fft: 2048,
            hop_length: 512,
            top_db: 80.0,
        }
    }
}

impl AnalysisConfig {
    /// Builder pattern: set analysed duration
    pub fn with_duration(mut self, secs: f32) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Builder pattern: analyse at a fixed rate, or at the native rate with `None`
    pub fn with_sample_rate(mut self, rate: Option<u32>) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Builder pattern: set mel band count
    pub fn with_mel_bins(mut self, n_mels: usize) -> Self {
        self.n_mels = n_mels;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.duration_secs > 0.0) {
            return Err(RecognizerError::Config(format!(
                "duration must be positive, got {}",
                self.duration_secs
            )));
        }
        if self.n_fft == 0 || self.n_fft % 2 != 0 {
            return Err(RecognizerError::Config(format!(
                "FFT size must be a positive even number, got {}",
                self.n_fft
            )));
        }
        if self.hop_length == 0 {
            return Err(RecognizerError::Config("hop length must be positive".into()));
        }
        if self.n_mels < crate::features::N_MFCC {
            return Err(RecognizerError::Config(format!(
                "at least {} mel bands are required, got {}",
                crate::features::N_MFCC,
                self.n_mels
            )));
        }
        if self.sample_rate == Some(0) {
            return Err(RecognizerError::Config("sample rate must be positive".into()));
        }
        Ok(())
    }
}

/// On-disk layout of the corpus and its caches
///
/// Cache directories default to siblings of the corpus root, e.g. a root of
/// `static/songs` caches into `static/features`, `static/fingerprints` and
/// `static/spectrograms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub root: PathBuf,
    pub features_dir: Option<PathBuf>,
    pub fingerprints_dir: Option<PathBuf>,
    pub spectrograms_dir: Option<PathBuf>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self::new("static/songs")
    }
}

impl CorpusConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            features_dir: None,
            fingerprints_dir: None,
            spectrograms_dir: None,
        }
    }

    fn sibling(&self, name: &str) -> PathBuf {
        self.root
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(name)
    }

    pub fn features_path(&self) -> PathBuf {
        self.features_dir
            .clone()
            .unwrap_or_else(|| self.sibling("features"))
    }

    pub fn fingerprints_path(&self) -> PathBuf {
        self.fingerprints_dir
            .clone()
            .unwrap_or_else(|| self.sibling("fingerprints"))
    }

    pub fn spectrograms_path(&self) -> PathBuf {
        self.spectrograms_dir
            .clone()
            .unwrap_or_else(|| self.sibling("spectrograms"))
    }
}

/// Where mixed tracks are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub output_dir: PathBuf,
    pub file_name: String,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("static/generated mixed song"),
            file_name: "mixed song.wav".to_string(),
        }
    }
}

impl MixerConfig {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.file_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub analysis: AnalysisConfig,
    pub corpus: CorpusConfig,
    pub mixer: MixerConfig,
}

impl RecognizerConfig {
    /// Load a TOML configuration file; absent keys keep their defaults
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RecognizerError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.analysis.validate()
    }

    /// Builder pattern: set corpus root, keeping cache directories as siblings
    pub fn with_corpus_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.corpus.root = root.into();
        self
    }

    /// Builder pattern: set mixer output directory
    pub fn with_mix_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mixer.output_dir = dir.into();
        self
    }

    pub fn with_analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.analysis = analysis;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = RecognizerConfig::default();
        assert_eq!(config.corpus.root, PathBuf::from("static/songs"));
        assert_eq!(config.corpus.features_path(), PathBuf::from("static/features"));
        assert_eq!(
            config.corpus.fingerprints_path(),
            PathBuf::from("static/fingerprints")
        );
        assert_eq!(
            config.corpus.spectrograms_path(),
            PathBuf::from("static/spectrograms")
        );
        assert_eq!(
            config.mixer.output_path(),
            PathBuf::from("static/generated mixed song/mixed song.wav")
        );
    }

    #[test]
    fn test_explicit_cache_dirs() {
        let mut corpus = CorpusConfig::new("/data/songs");
        corpus.features_dir = Some(PathBuf::from("/cache/f"));
        assert_eq!(corpus.features_path(), PathBuf::from("/cache/f"));
        assert_eq!(corpus.fingerprints_path(), PathBuf::from("/data/fingerprints"));
    }

    #[test]
    fn test_partial_toml() {
        let config: RecognizerConfig = toml::from_str(
            r#"
            [analysis]
            n_mels = 64

            [corpus]
            root = "library/songs"
            "#,
        )
        .unwrap();

        assert_eq!(config.analysis.n_mels, 64);
        assert_eq!(config.analysis.n_fft, 2048);
        assert_eq!(config.corpus.features_path(), PathBuf::from("library/features"));
        assert_eq!(config.mixer, MixerConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_analysis() {
        assert!(AnalysisConfig::default().validate().is_ok());

        let mut bad = AnalysisConfig::default();
        bad.n_fft = 1023;
        assert!(bad.validate().is_err());

        let bad = AnalysisConfig::default().with_duration(0.0);
        assert!(bad.validate().is_err());

        let bad = AnalysisConfig::default().with_mel_bins(8);
        assert!(bad.validate().is_err());
    }
}
