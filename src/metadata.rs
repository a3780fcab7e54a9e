//! Per-path side table of color labels, tags, structured metadata and
//! content-hash records.
//!
//! The store is shared mutable state: a folder watcher may hand files from
//! several roots to the engine concurrently, so every access goes through a
//! single mutex. Methods take `&self`; wrap the store in an `Arc` to share it.
//!
//! Keys are normalized absolute paths (lexically cleaned, symlinks are not
//! resolved) so that a record stays addressable after the file disappears.

use crate::fsops;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Bytes hashed for a [`HashKind::Quick`] fingerprint.
pub const QUICK_HASH_BYTES: u64 = 64 * 1024;

/// Errors raised while loading or saving a metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read metadata store {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to write metadata store {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("Invalid metadata store format in {path}: {reason}")]
    Format { path: PathBuf, reason: String },
}

/// Which fingerprint a hash record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    /// SHA-256 over the whole file.
    Content,
    /// SHA-256 over the first [`QUICK_HASH_BYTES`] bytes.
    Quick,
}

/// Size and digest pair used for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    pub size: u64,
    pub digest: String,
}

impl HashRecord {
    /// Fingerprints a file.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be opened or read.
    pub fn compute(path: &Path, kind: HashKind) -> io::Result<Self> {
        let size = fs::metadata(path)?.len();
        let file = File::open(path)?;
        let mut reader: Box<dyn Read> = match kind {
            HashKind::Content => Box::new(file),
            HashKind::Quick => Box::new(file.take(QUICK_HASH_BYTES)),
        };

        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self {
            size,
            digest: format!("{:x}", hasher.finalize()),
        })
    }
}

/// Everything the store knows about one path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub hash_records: BTreeMap<HashKind, HashRecord>,
}

impl MetadataRecord {
    fn is_empty(&self) -> bool {
        self.color.is_none()
            && self.tags.is_empty()
            && self.metadata.is_empty()
            && self.hash_records.is_empty()
    }
}

/// Thread-safe metadata side table keyed by normalized path.
#[derive(Debug, Default)]
pub struct MetadataStore {
    records: Mutex<HashMap<String, MetadataRecord>>,
}

impl MetadataStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a store from a JSON file. A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Read` if the file exists but cannot be read, and
    /// `StoreError::Format` if it is not a valid store document.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let records: HashMap<String, MetadataRecord> =
            serde_json::from_str(&content).map_err(|e| StoreError::Format {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            records: Mutex::new(records),
        })
    }

    /// Persists the store as pretty JSON, atomically replacing `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Write` if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = {
            let records = self.lock();
            serde_json::to_string_pretty(&*records).map_err(|e| StoreError::Write {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidData, e),
            })?
        };

        fsops::atomic_write(path, json.as_bytes()).map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Normalized key for a path.
    pub fn key_for(path: &Path) -> String {
        fsops::normalize_lexical(path).to_string_lossy().to_string()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MetadataRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `f` to the record for `path`, creating it if needed, and drops
    /// records that end up empty.
    fn update<T>(&self, path: &Path, f: impl FnOnce(&mut MetadataRecord) -> T) -> T {
        let key = Self::key_for(path);
        let mut records = self.lock();
        let record = records.entry(key.clone()).or_default();
        let out = f(record);
        if record.is_empty() {
            records.remove(&key);
        }
        out
    }

    /// Snapshot of the record for `path`.
    pub fn record(&self, path: &Path) -> Option<MetadataRecord> {
        self.lock().get(&Self::key_for(path)).cloned()
    }

    /// Number of paths with a record.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no path has a record.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Color label for `path`.
    pub fn color(&self, path: &Path) -> Option<String> {
        self.lock()
            .get(&Self::key_for(path))
            .and_then(|r| r.color.clone())
    }

    /// Sets or clears the color label, returning the previous one.
    pub fn set_color(&self, path: &Path, color: Option<&str>) -> Option<String> {
        self.update(path, |record| {
            std::mem::replace(&mut record.color, color.map(str::to_string))
        })
    }

    /// Tags attached to `path`.
    pub fn tags(&self, path: &Path) -> BTreeSet<String> {
        self.lock()
            .get(&Self::key_for(path))
            .map(|r| r.tags.clone())
            .unwrap_or_default()
    }

    /// Case-insensitive tag lookup.
    pub fn has_tag(&self, path: &Path, tag: &str) -> bool {
        self.lock()
            .get(&Self::key_for(path))
            .is_some_and(|r| r.tags.iter().any(|t| t.eq_ignore_ascii_case(tag.trim())))
    }

    /// Adds a tag. Returns `false` if it was already present.
    pub fn add_tag(&self, path: &Path, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.has_tag(path, tag) {
            return false;
        }
        self.update(path, |record| record.tags.insert(tag.to_string()))
    }

    /// Removes a tag (case-insensitive). Returns `false` if it was absent.
    pub fn remove_tag(&self, path: &Path, tag: &str) -> bool {
        let tag = tag.trim();
        self.update(path, |record| {
            let before = record.tags.len();
            record.tags.retain(|t| !t.eq_ignore_ascii_case(tag));
            record.tags.len() != before
        })
    }

    /// Value at a dot-separated field path (`"exif.camera.model"`).
    /// Numeric segments index into arrays.
    pub fn metadata_value(&self, path: &Path, field_path: &str) -> Option<Value> {
        let records = self.lock();
        let record = records.get(&Self::key_for(path))?;
        lookup_field(&record.metadata, field_path).cloned()
    }

    /// Writes a value at a dot-separated field path, creating intermediate
    /// objects. Returns `false` if the path is empty or blocked by a
    /// non-object value.
    pub fn set_metadata_value(&self, path: &Path, field_path: &str, value: Value) -> bool {
        let segments: Vec<&str> = field_path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return false;
        };

        self.update(path, |record| {
            let mut current = &mut record.metadata;
            for segment in parents {
                let entry = current
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                match entry {
                    Value::Object(map) => current = map,
                    _ => return false,
                }
            }
            current.insert(last.to_string(), value);
            true
        })
    }

    /// Stores a hash record for `path`.
    pub fn record_hash(&self, path: &Path, kind: HashKind, record: HashRecord) {
        self.update(path, |r| {
            r.hash_records.insert(kind, record);
        });
    }

    /// Hash record of the given kind for `path`.
    pub fn hash_record(&self, path: &Path, kind: HashKind) -> Option<HashRecord> {
        self.lock()
            .get(&Self::key_for(path))
            .and_then(|r| r.hash_records.get(&kind).cloned())
    }

    /// Computes and stores a fingerprint for `path`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be hashed.
    pub fn index_file(&self, path: &Path, kind: HashKind) -> io::Result<HashRecord> {
        let record = HashRecord::compute(path, kind)?;
        self.record_hash(path, kind, record.clone());
        Ok(record)
    }

    /// Other paths whose `kind` fingerprint equals `record`.
    pub fn find_matching(&self, path: &Path, kind: HashKind, record: &HashRecord) -> Vec<PathBuf> {
        let own = Self::key_for(path);
        self.lock()
            .iter()
            .filter(|(key, r)| **key != own && r.hash_records.get(&kind) == Some(record))
            .map(|(key, _)| PathBuf::from(key))
            .collect()
    }

    /// Other paths with any fingerprint recording `size` bytes.
    pub fn find_same_size(&self, path: &Path, size: u64) -> Vec<PathBuf> {
        let own = Self::key_for(path);
        self.lock()
            .iter()
            .filter(|(key, r)| **key != own && r.hash_records.values().any(|h| h.size == size))
            .map(|(key, _)| PathBuf::from(key))
            .collect()
    }

    /// Moves the record for `from` to `to`. Returns `false` if `from` had none.
    pub fn relocate(&self, from: &Path, to: &Path) -> bool {
        let from_key = Self::key_for(from);
        let to_key = Self::key_for(to);
        if from_key == to_key {
            return false;
        }

        let mut records = self.lock();
        match records.remove(&from_key) {
            Some(record) => {
                records.insert(to_key, record);
                true
            }
            None => false,
        }
    }

    /// Drops the record for `path`.
    pub fn remove(&self, path: &Path) -> Option<MetadataRecord> {
        self.lock().remove(&Self::key_for(path))
    }
}

fn lookup_field<'a>(root: &'a Map<String, Value>, field_path: &str) -> Option<&'a Value> {
    let mut segments = field_path.split('.').filter(|s| !s.is_empty());
    let mut current = root.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}
