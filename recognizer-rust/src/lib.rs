pub mod audio;
pub mod config;
pub mod core;
pub mod corpus;
pub mod error;
pub mod features;
pub mod fingerprint;
pub mod matcher;
pub mod mixer;
pub mod models;
pub mod render;
pub mod spectrogram;
pub mod storage;

pub use audio::AudioLoader;
pub use config::{AnalysisConfig, CorpusConfig, MixerConfig, RecognizerConfig};
pub use self::core::{display_name, Recognition, Recognizer};
pub use corpus::{CorpusIndex, ScanReport};
pub use error::{RecognizerError, Result};
pub use features::extract_features;
pub use fingerprint::generate_fingerprint;
pub use matcher::{similarity, SongMatcher};
pub use mixer::SongMixer;
pub use models::{AudioSignal, FeatureVector, Fingerprint, FingerprintTable, MatchResult};
pub use spectrogram::{generate_spectrogram, Spectrogram};
