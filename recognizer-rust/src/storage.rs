use crate::error::{RecognizerError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// A per-song cache file mapping audio file names to cached values
///
/// The table is loaded whole, mutated in memory and written back whole.
/// Entries are kept sorted by file name, so saving an unchanged table
/// reproduces the file byte for byte.
///
/// # Storage Structure
/// - One pretty-printed JSON object per song: `{ "a.wav": <value>, ... }`
/// - Writes go to a temporary file in the same directory which is then
///   renamed over the destination, so readers never see half a table
#[derive(Debug)]
pub struct JsonTable<V> {
    path: PathBuf,
    entries: BTreeMap<String, V>,
    exists: bool,
    recovered: bool,
    dirty: bool,
}

impl<V> JsonTable<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Loads the table at `path`
    ///
    /// A missing file yields an empty table. A file that cannot be parsed is
    /// discarded: the table comes back empty and flagged as recovered so the
    /// caller recomputes its entries.
    pub fn load<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let mut table = Self {
            path,
            entries: BTreeMap::new(),
            exists: false,
            recovered: false,
            dirty: false,
        };

        let content = match std::fs::read(&table.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(table),
            Err(e) => return Err(e.into()),
        };
        table.exists = true;

        match Self::parse(&table.path, &content) {
            Ok(entries) => {
                debug!(
                    "Loaded {} cached entries from {}",
                    entries.len(),
                    table.path.display()
                );
                table.entries = entries;
            }
            Err(e) => {
                warn!("{}; discarding it and recomputing", e);
                table.recovered = true;
            }
        }
        Ok(table)
    }

    fn parse(path: &Path, content: &[u8]) -> Result<BTreeMap<String, V>> {
        serde_json::from_slice(content)
            .map_err(|e| RecognizerError::Cache(format!("{}: {}", path.display(), e)))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Adds or replaces an entry and marks the table as modified
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value);
        self.dirty = true;
    }

    pub fn entries(&self) -> &BTreeMap<String, V> {
        &self.entries
    }

    pub fn into_entries(self) -> BTreeMap<String, V> {
        self.entries
    }

    /// True when the file on disk was unreadable as a table
    pub fn recovered(&self) -> bool {
        self.recovered
    }

    /// True when saving would change what is on disk
    pub fn needs_save(&self) -> bool {
        self.dirty || self.recovered || !self.exists
    }

    /// Atomically rewrites the whole table
    pub fn save(&mut self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(&self.entries)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(
            "Wrote {} entries to {}",
            self.entries.len(),
            self.path.display()
        );
        self.exists = true;
        self.recovered = false;
        self.dirty = false;
        Ok(())
    }

    /// Saves only when the table differs from the file on disk
    pub fn save_if_needed(&mut self) -> Result<bool> {
        if !self.needs_save() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = JsonTable::<String>::load(dir.path().join("song.json")).unwrap();
        assert!(table.entries().is_empty());
        assert!(!table.recovered());
        assert!(table.needs_save());
    }

    #[test]
    fn test_round_trip_and_clean_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("song.json");

        let mut table = JsonTable::<String>::load(&path).unwrap();
        table.insert("b.wav", "ff00".to_string());
        table.insert("a.wav", "00ff".to_string());
        table.save().unwrap();

        let reloaded = JsonTable::<String>::load(&path).unwrap();
        assert_eq!(reloaded.entries().get("a.wav").map(String::as_str), Some("00ff"));
        assert!(reloaded.contains("b.wav"));
        assert!(!reloaded.needs_save());

        let keys: Vec<&String> = reloaded.entries().keys().collect();
        assert_eq!(keys, vec!["a.wav", "b.wav"]);
    }

    #[test]
    fn test_resave_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.json");

        let mut table = JsonTable::<String>::load(&path).unwrap();
        table.insert("x.mp3", "1234".to_string());
        table.save().unwrap();
        let first = std::fs::read(&path).unwrap();

        let mut again = JsonTable::<String>::load(&path).unwrap();
        again.save().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_corrupt_file_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.json");
        std::fs::write(&path, "{ \"a.wav\": \"00ff\", ").unwrap();

        let mut table = JsonTable::<String>::load(&path).unwrap();
        assert!(table.entries().is_empty());
        assert!(table.recovered());
        assert!(table.save_if_needed().unwrap());

        let reloaded = JsonTable::<String>::load(&path).unwrap();
        assert!(!reloaded.recovered());
        assert!(reloaded.entries().is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.json");
        std::fs::write(&path, b"{ \"caf\xc3").unwrap();

        let mut table = JsonTable::<String>::load(&path).unwrap();
        assert!(table.recovered());
        assert!(table.entries().is_empty());
        assert!(table.save_if_needed().unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_wrong_shape_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let table = JsonTable::<String>::load(&path).unwrap();
        assert!(table.recovered());
    }
}
