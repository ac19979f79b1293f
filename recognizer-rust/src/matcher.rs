use crate::config::AnalysisConfig;
use crate::error::{RecognizerError, Result};
use crate::fingerprint::generate_fingerprint;
use crate::models::{Fingerprint, FingerprintTable, MatchResult};
use crate::spectrogram::generate_spectrogram;
use std::path::Path;
use tracing::{debug, info};

/// Fraction of positions where two fingerprints agree, over the longer length
///
/// Characters are compared position by position; the tail of the longer
/// fingerprint counts as mismatches.
pub fn similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    let matching = a
        .as_str()
        .chars()
        .zip(b.as_str().chars())
        .filter(|(x, y)| x == y)
        .count();
    matching as f64 / longest as f64
}

/// Drops a trailing `.wav` or `.mp3`, ignoring case
pub fn strip_audio_extension(file: &str) -> &str {
    let split = file.len().saturating_sub(4);
    match (file.get(..split), file.get(split..)) {
        (Some(stem), Some(ext))
            if ext.eq_ignore_ascii_case(".wav") || ext.eq_ignore_ascii_case(".mp3") =>
        {
            stem
        }
        _ => file,
    }
}

/// Scores one query fingerprint against a corpus fingerprint table
pub struct SongMatcher<'a> {
    query: Fingerprint,
    corpus: &'a FingerprintTable,
    results: Vec<MatchResult>,
}

impl<'a> SongMatcher<'a> {
    /// Fingerprints the query file and ranks the corpus against it
    ///
    /// Any failure to analyse the query is returned, since there is nothing
    /// to match without its fingerprint.
    pub fn new<P: AsRef<Path>>(
        query_path: P,
        corpus: &'a FingerprintTable,
        analysis: &AnalysisConfig,
    ) -> Result<Self> {
        let query_path = query_path.as_ref();
        let spectrogram = generate_spectrogram(query_path, analysis)?;
        let query = generate_fingerprint(&spectrogram)?;
        info!("Query {} -> {}", query_path.display(), query);
        Ok(Self::from_fingerprint(query, corpus))
    }

    /// Ranks the corpus against an already computed fingerprint
    pub fn from_fingerprint(query: Fingerprint, corpus: &'a FingerprintTable) -> Self {
        let mut matcher = Self {
            query,
            corpus,
            results: Vec::new(),
        };
        matcher.results = matcher.score_corpus();
        matcher
    }

    fn score_corpus(&self) -> Vec<MatchResult> {
        let mut results: Vec<MatchResult> = self
            .corpus
            .iter()
            .flat_map(|(song, files)| {
                files.iter().map(move |(file, fingerprint)| MatchResult {
                    song: song.clone(),
                    similarity: similarity(&self.query, fingerprint),
                    label: strip_audio_extension(file).to_string(),
                })
            })
            .collect();

        // Vec::sort_by is stable, so ties keep scan order
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        debug!("Scored {} corpus files", results.len());
        results
    }

    /// Every corpus file, best score first
    pub fn compute_all_similarities(&self) -> &[MatchResult] {
        &self.results
    }

    /// Song name of the highest scoring file
    pub fn best_match(&self) -> Result<&str> {
        self.results
            .first()
            .map(|result| result.song.as_str())
            .ok_or(RecognizerError::EmptyCorpus)
    }
}
