use crate::config::RecognizerConfig;
use crate::corpus::{clear_caches, CorpusIndex, ScanReport};
use crate::error::{RecognizerError, Result};
use crate::matcher::SongMatcher;
use crate::mixer::SongMixer;
use crate::models::{FingerprintTable, MatchResult};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome of matching one clip against the corpus
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    /// Every corpus file, best score first
    pub ranked: Vec<MatchResult>,
    /// `None` when the corpus holds no fingerprints
    pub best: Option<String>,
}

impl fmt::Display for Recognition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.best {
            Some(song) => write!(f, "Best match: {}", song),
            None => write!(f, "No match found"),
        }
    }
}

/// Entry point tying the corpus, matcher and mixer together
pub struct Recognizer {
    config: RecognizerConfig,
    index: CorpusIndex,
}

impl Recognizer {
    pub fn new(config: RecognizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            index: CorpusIndex::default(),
        })
    }

    /// Removes every cache directory and forgets the loaded index
    pub fn clean(&mut self) -> Result<usize> {
        self.index = CorpusIndex::default();
        clear_caches(&self.config.corpus)
    }

    /// Brings the corpus caches up to date and loads them
    pub fn scan(&mut self) -> Result<ScanReport> {
        let (index, report) = CorpusIndex::scan(&self.config.corpus, &self.config.analysis)?;
        self.index = index;
        Ok(report)
    }

    pub fn index(&self) -> &CorpusIndex {
        &self.index
    }

    pub fn fingerprints(&self) -> &FingerprintTable {
        self.index.all_fingerprints()
    }

    /// Ranks the corpus against the clip at `path`
    pub fn recognize<P: AsRef<Path>>(&self, path: P) -> Result<Recognition> {
        let matcher = SongMatcher::new(path, self.fingerprints(), &self.config.analysis)?;
        let ranked = matcher.compute_all_similarities().to_vec();
        let best = match matcher.best_match() {
            Ok(song) => Some(song.to_string()),
            Err(RecognizerError::EmptyCorpus) => {
                warn!("Corpus is empty, nothing to match against");
                None
            }
            Err(e) => return Err(e),
        };
        if let Some(top) = ranked.first() {
            info!("Best match {} ({})", top.song, top.percentage());
        }
        Ok(Recognition { ranked, best })
    }

    /// Mixes two files into the configured output location
    pub fn mix<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        first: P,
        second: Q,
        weight: f64,
    ) -> Result<PathBuf> {
        self.mix_to(first, second, weight, self.config.mixer.output_path())
    }

    /// Mixes two files into `output`
    pub fn mix_to<P: AsRef<Path>, Q: AsRef<Path>, O: AsRef<Path>>(
        &self,
        first: P,
        second: Q,
        weight: f64,
        output: O,
    ) -> Result<PathBuf> {
        let (first, second) = (first.as_ref(), second.as_ref());
        info!(
            "Mixing {} ({}%) with {} ({}%)",
            display_name(first),
            weight,
            display_name(second),
            100.0 - weight
        );
        SongMixer::new(first, second)?.save_mixed_audio(weight, output)
    }

    /// Mixes two files and matches the result against the corpus
    pub fn mix_and_recognize<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        first: P,
        second: Q,
        weight: f64,
    ) -> Result<(PathBuf, Recognition)> {
        let path = self.mix(first, second, weight)?;
        let recognition = self.recognize(&path)?;
        Ok((path, recognition))
    }
}

/// File stem with underscores shown as spaces, e.g. `my_song.wav` -> `my song`
pub fn display_name<P: AsRef<Path>>(path: P) -> String {
    path.as_ref()
        .file_stem()
        .map(|stem| stem.to_string_lossy().replace('_', " "))
        .unwrap_or_default()
}
