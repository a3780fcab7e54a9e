/// File snapshots handed to the rule engine.
///
/// A `FileInfo` is captured once per evaluation by whoever noticed the file
/// (a folder watcher, the CLI scanner, a test). Conditions and actions read it
/// but must not assume it stays valid once an action has moved or renamed the
/// underlying entry.
use chrono::{DateTime, Local};
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

/// Immutable snapshot of one filesystem entry.
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    /// File name including extension.
    pub name: String,
    /// Absolute path to the entry. `None` when the producer could not supply one.
    pub path: Option<PathBuf>,
    /// Lower-cased extension with a leading dot (`".png"`), empty when absent.
    pub ext: String,
    /// Size in bytes, when known.
    pub size: Option<u64>,
    /// Raw platform stat captured with the snapshot.
    pub stat: Option<Metadata>,
}

impl FileInfo {
    /// Captures a snapshot of an existing entry.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the entry cannot be stat'ed.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = std::path::absolute(path.as_ref())?;
        let stat = fs::metadata(&path)?;
        let name = file_name_of(&path);
        let ext = if stat.is_dir() {
            String::new()
        } else {
            extension_of(&name)
        };

        Ok(Self {
            name,
            ext,
            size: Some(stat.len()),
            stat: Some(stat),
            path: Some(path),
        })
    }

    /// Builds a snapshot from a path alone, without touching the filesystem.
    ///
    /// Size and stat are left empty. Useful for entries that no longer exist
    /// or that are described by an external producer.
    pub fn unresolved(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = file_name_of(&path);
        let ext = extension_of(&name);

        Self {
            name,
            ext,
            size: None,
            stat: None,
            path: Some(path),
        }
    }

    /// Re-captures the snapshot at a new location, falling back to an
    /// unresolved snapshot if the entry cannot be stat'ed.
    pub fn relocated(new_path: &Path) -> Self {
        Self::from_path(new_path).unwrap_or_else(|_| Self::unresolved(new_path))
    }

    /// File name without its final extension.
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Directory containing the entry.
    pub fn parent(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    /// Live metadata for the entry, preferring a fresh stat over the snapshot.
    pub fn metadata(&self) -> Option<Metadata> {
        self.path
            .as_deref()
            .and_then(|p| fs::metadata(p).ok())
            .or_else(|| self.stat.clone())
    }

    /// Last modification time in local time.
    pub fn modified(&self) -> Option<DateTime<Local>> {
        self.metadata()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Local>::from)
    }

    /// Creation time, where the platform records one.
    pub fn created(&self) -> Option<DateTime<Local>> {
        self.metadata()
            .and_then(|m| m.created().ok())
            .map(DateTime::<Local>::from)
    }

    /// Last access time.
    pub fn accessed(&self) -> Option<DateTime<Local>> {
        self.metadata()
            .and_then(|m| m.accessed().ok())
            .map(DateTime::<Local>::from)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Lower-cased extension of a file name with a leading dot.
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}
