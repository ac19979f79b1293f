//! Corpus index over a directory of song folders
//!
//! ```text
//! static/songs/<song>/<file>.wav|.mp3     audio corpus
//! static/features/<song>.json             file name -> feature vector
//! static/fingerprints/<song>.json         file name -> fingerprint
//! static/spectrograms/<song>/<file>.png   rendered spectrograms
//! ```

use crate::config::{AnalysisConfig, CorpusConfig};
use crate::error::Result;
use crate::features::extract_features;
use crate::fingerprint::generate_fingerprint;
use crate::models::{CorpusEntry, FeatureTable, FeatureVector, Fingerprint, FingerprintTable};
use crate::render::save_spectrogram_png;
use crate::spectrogram::generate_spectrogram;
use crate::storage::JsonTable;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: [&str; 2] = ["wav", "mp3"];

/// True for `.wav` and `.mp3` files, in any letter case
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| AUDIO_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
}

/// Counters describing what a scan did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub songs: usize,
    pub computed: usize,
    pub cached: usize,
    pub skipped: usize,
    /// Cache tables that were unreadable and rebuilt
    pub recovered: usize,
    pub tables_written: usize,
}

/// Fingerprints and features of every analysed corpus file
#[derive(Debug, Clone, Default)]
pub struct CorpusIndex {
    fingerprints: FingerprintTable,
    features: FeatureTable,
}

impl CorpusIndex {
    /// Scans `config.root`, analysing every audio file the caches lack
    pub fn scan(config: &CorpusConfig, analysis: &AnalysisConfig) -> Result<(Self, ScanReport)> {
        CorpusScanner::new(config, analysis).scan()
    }

    /// song name -> file name -> fingerprint, read-only
    pub fn all_fingerprints(&self) -> &FingerprintTable {
        &self.fingerprints
    }

    /// song name -> file name -> features, read-only
    pub fn all_features(&self) -> &FeatureTable {
        &self.features
    }

    pub fn song_count(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn file_count(&self) -> usize {
        self.fingerprints.values().map(|files| files.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.file_count() == 0
    }
}

/// Deletes the feature, fingerprint and spectrogram directories
///
/// The audio corpus itself is left alone. Returns how many directories
/// existed and were removed.
pub fn clear_caches(config: &CorpusConfig) -> Result<usize> {
    let mut removed = 0;
    for dir in [
        config.features_path(),
        config.fingerprints_path(),
        config.spectrograms_path(),
    ] {
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("Removed {}", dir.display());
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

/// Walks the corpus and keeps the per-song caches in step with it
pub struct CorpusScanner<'a> {
    config: &'a CorpusConfig,
    analysis: &'a AnalysisConfig,
    features_dir: PathBuf,
    fingerprints_dir: PathBuf,
    spectrograms_dir: PathBuf,
}

impl<'a> CorpusScanner<'a> {
    pub fn new(config: &'a CorpusConfig, analysis: &'a AnalysisConfig) -> Self {
        Self {
            config,
            analysis,
            features_dir: config.features_path(),
            fingerprints_dir: config.fingerprints_path(),
            spectrograms_dir: config.spectrograms_path(),
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.features_dir)?;
        std::fs::create_dir_all(&self.fingerprints_dir)?;
        std::fs::create_dir_all(&self.spectrograms_dir)?;
        Ok(())
    }

    /// Song folders directly under the corpus root, in name order
    pub fn song_folders(&self) -> Result<Vec<PathBuf>> {
        let mut folders = Vec::new();
        for entry in WalkDir::new(&self.config.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory loop in corpus"))
            })?;
            if entry.file_type().is_dir() {
                folders.push(entry.into_path());
            }
        }
        Ok(folders)
    }

    fn audio_files(folder: &Path) -> Vec<PathBuf> {
        WalkDir::new(folder)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Cannot read entry in {}: {}", folder.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
            .map(|entry| entry.into_path())
            .collect()
    }

    pub fn scan(&self) -> Result<(CorpusIndex, ScanReport)> {
        info!("Scanning corpus at {}", self.config.root.display());
        self.ensure_directories()?;

        let mut index = CorpusIndex::default();
        let mut report = ScanReport::default();

        for folder in self.song_folders()? {
            let song = match folder.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => {
                    warn!("Skipping song folder with a non UTF-8 name: {}", folder.display());
                    continue;
                }
            };

            let (features, fingerprints) = self.process_song_folder(&song, &folder, &mut report)?;
            index.features.insert(song.clone(), features);
            index.fingerprints.insert(song, fingerprints);
            report.songs += 1;
        }

        info!(
            "Corpus scan finished: {} songs, {} files computed, {} cached, {} skipped",
            report.songs, report.computed, report.cached, report.skipped
        );
        Ok((index, report))
    }

    /// Loads one song's caches, analyses what they lack and persists them
    fn process_song_folder(
        &self,
        song: &str,
        folder: &Path,
        report: &mut ScanReport,
    ) -> Result<(
        std::collections::BTreeMap<String, FeatureVector>,
        std::collections::BTreeMap<String, Fingerprint>,
    )> {
        let table_name = format!("{}.json", song);
        let mut features = JsonTable::<FeatureVector>::load(self.features_dir.join(&table_name))?;
        let mut fingerprints =
            JsonTable::<Fingerprint>::load(self.fingerprints_dir.join(&table_name))?;
        report.recovered +=
            usize::from(features.recovered()) + usize::from(fingerprints.recovered());

        for path in Self::audio_files(folder) {
            let file = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            if features.contains(&file) && fingerprints.contains(&file) {
                report.cached += 1;
                continue;
            }

            match self.analyze_file(song, &file, &path) {
                Ok(entry) => {
                    features.insert(entry.file.clone(), entry.features);
                    fingerprints.insert(entry.file, entry.fingerprint);
                    report.computed += 1;
                }
                Err(e) => {
                    error!("Skipping {}: {}", path.display(), e);
                    report.skipped += 1;
                }
            }
        }

        if features.save_if_needed()? {
            report.tables_written += 1;
        }
        if fingerprints.save_if_needed()? {
            report.tables_written += 1;
        }

        Ok((features.into_entries(), fingerprints.into_entries()))
    }

    /// Spectrogram, image, features and fingerprint of one corpus file
    pub fn analyze_file(&self, song: &str, file: &str, path: &Path) -> Result<CorpusEntry> {
        let spectrogram = generate_spectrogram(path, self.analysis)?;

        let image_path = self
            .spectrograms_dir
            .join(song)
            .join(format!("{}.png", file));
        if let Err(e) = save_spectrogram_png(&spectrogram, &image_path) {
            warn!("Could not save spectrogram image {}: {}", image_path.display(), e);
        }

        let features = extract_features(&spectrogram)?;
        let fingerprint = generate_fingerprint(&spectrogram)?;
        info!("Analysed {}/{} -> {}", song, file, fingerprint);

        Ok(CorpusEntry {
            song: song.to_string(),
            file: file.to_string(),
            features,
            fingerprint,
        })
    }
}
