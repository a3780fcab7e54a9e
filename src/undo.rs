/// Undo ledger for reverting rule actions.
///
/// Every real (non-simulated) reversible action produces an `UndoEntry` that
/// the executor records here. The ledger is a bounded LIFO: once it is full
/// the oldest entry is dropped to make room. Entries are kept in memory only.
use crate::actions::ActionMeta;
use crate::fsops::{exists_no_follow, move_path, remove_path, unique_path};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Number of entries kept before the oldest is evicted.
pub const DEFAULT_UNDO_CAPACITY: usize = 200;

/// Which reversal an entry needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndoType {
    Move,
    Rename,
    Copy,
    Delete,
}

impl UndoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UndoType::Move => "move",
            UndoType::Rename => "rename",
            UndoType::Copy => "copy",
            UndoType::Delete => "delete",
        }
    }
}

impl fmt::Display for UndoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndoStatus {
    /// Built but not yet handed to a ledger.
    Pending,
    /// Stored in a ledger and reversible.
    Recorded,
    /// Successfully reversed.
    Undone,
    /// A reversal was attempted and failed; the entry stays reversible.
    Failed,
}

/// Everything needed to reverse one completed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoEntry {
    #[serde(rename = "type")]
    pub undo_type: UndoType,
    pub src: Option<PathBuf>,
    pub dst: Option<PathBuf>,
    pub old_name: Option<String>,
    pub new_name: Option<String>,
    #[serde(default)]
    pub collision_handled: bool,
    #[serde(default)]
    pub was_dry_run: bool,
    pub timestamp: Option<DateTime<Local>>,
    pub status: UndoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_backup: Option<PathBuf>,
}

impl UndoEntry {
    /// Creates a pending entry with no paths filled in.
    pub fn new(undo_type: UndoType) -> Self {
        Self {
            undo_type,
            src: None,
            dst: None,
            old_name: None,
            new_name: None,
            collision_handled: false,
            was_dry_run: false,
            timestamp: None,
            status: UndoStatus::Pending,
            temp_backup: None,
        }
    }

    /// Builds an entry from an action's result metadata.
    ///
    /// Returns `None` for actions that have no reversal (metadata edits,
    /// `RunCommand`, `CreateFolder`).
    pub fn from_meta(meta: &ActionMeta) -> Option<Self> {
        let undo_type = meta.undo_type?;
        Some(Self {
            src: meta.src.clone(),
            dst: meta.dst.clone(),
            old_name: meta.old_name.clone(),
            new_name: meta.new_name.clone(),
            collision_handled: meta.collision_handled,
            was_dry_run: meta.was_dry_run,
            temp_backup: meta.temp_backup.clone(),
            ..Self::new(undo_type)
        })
    }

    /// Two entries describe the same operation, regardless of status.
    ///
    /// The timestamp is part of the identity so that repeating the same
    /// move twice yields two distinguishable entries.
    fn same_operation(&self, other: &UndoEntry) -> bool {
        self.undo_type == other.undo_type
            && self.src == other.src
            && self.dst == other.dst
            && self.old_name == other.old_name
            && self.new_name == other.new_name
            && self.timestamp == other.timestamp
            && self.temp_backup == other.temp_backup
    }

    /// One-line description for history views.
    pub fn describe(&self) -> String {
        let show = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "?".to_string())
        };
        match self.undo_type {
            UndoType::Move => format!("move {} -> {}", show(&self.src), show(&self.dst)),
            UndoType::Copy => format!("copy {} -> {}", show(&self.src), show(&self.dst)),
            UndoType::Rename => format!(
                "rename {} -> {}",
                self.old_name.as_deref().unwrap_or("?"),
                self.new_name.as_deref().unwrap_or("?")
            ),
            UndoType::Delete => format!("delete {}", show(&self.src)),
        }
    }
}

/// Outcome of an undo request.
#[derive(Debug, Clone)]
pub struct UndoResult {
    pub success: bool,
    pub message: String,
    /// The entry that was (or failed to be) reversed.
    pub entry: Option<UndoEntry>,
    /// Where the restored file ended up, if anything was restored.
    pub restored: Option<PathBuf>,
}

impl UndoResult {
    fn failure(message: impl Into<String>, entry: Option<UndoEntry>) -> Self {
        Self {
            success: false,
            message: message.into(),
            entry,
            restored: None,
        }
    }
}

/// Bounded LIFO history of reversible actions.
#[derive(Debug)]
pub struct UndoLedger {
    capacity: usize,
    entries: Mutex<VecDeque<UndoEntry>>,
}

impl Default for UndoLedger {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_CAPACITY)
    }
}

impl UndoLedger {
    /// Creates an empty ledger; a capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<UndoEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Stamps and stores an entry, evicting the oldest when full.
    pub fn record(&self, mut entry: UndoEntry) {
        if entry.timestamp.is_none() {
            entry.timestamp = Some(Local::now());
        }
        entry.status = UndoStatus::Recorded;
        tracing::debug!(entry = %entry.describe(), "Recording undo entry");
        self.push(entry);
    }

    fn push(&self, entry: UndoEntry) {
        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            if let Some(evicted) = entries.pop_front() {
                tracing::debug!(entry = %evicted.describe(), "Evicting oldest undo entry");
            }
        }
        entries.push_back(entry);
    }

    /// Reverses the most recent entry, consuming it.
    ///
    /// A failed entry is not put back; it comes back inside the result with
    /// status `Failed` and can be retried through `undo_entry`.
    pub fn undo_last(&self) -> UndoResult {
        let Some(entry) = self.lock().pop_back() else {
            return UndoResult::failure("Nothing to undo", None);
        };

        let mut result = reverse(entry);
        if !result.success
            && let Some(failed) = result.entry.as_mut()
        {
            failed.status = UndoStatus::Failed;
        }
        result
    }

    /// Reverses an arbitrary entry, removing it from the history on success.
    pub fn undo_entry(&self, entry: &UndoEntry) -> UndoResult {
        let result = reverse(entry.clone());

        let mut entries = self.lock();
        if let Some(index) = entries.iter().position(|e| e.same_operation(entry)) {
            if result.success {
                entries.remove(index);
            } else if let Some(stored) = entries.get_mut(index) {
                stored.status = UndoStatus::Failed;
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Snapshot of all entries, newest first.
    pub fn get_history(&self) -> Vec<UndoEntry> {
        self.lock().iter().rev().cloned().collect()
    }
}

fn reverse(entry: UndoEntry) -> UndoResult {
    let outcome = match entry.undo_type {
        UndoType::Move => reverse_move(&entry),
        UndoType::Rename => reverse_rename(&entry),
        UndoType::Copy => reverse_copy(&entry),
        UndoType::Delete => reverse_delete(&entry),
    };

    match outcome {
        Ok((message, restored)) => {
            tracing::info!(entry = %entry.describe(), "{}", message);
            let mut entry = entry;
            entry.status = UndoStatus::Undone;
            UndoResult {
                success: true,
                message,
                entry: Some(entry),
                restored,
            }
        }
        Err(message) => {
            tracing::warn!(entry = %entry.describe(), "Undo failed: {}", message);
            UndoResult::failure(message, Some(entry))
        }
    }
}

type Reversal = Result<(String, Option<PathBuf>), String>;

fn required<'a>(path: &'a Option<PathBuf>, field: &str) -> Result<&'a Path, String> {
    path.as_deref()
        .ok_or_else(|| format!("Undo entry is missing '{}'", field))
}

/// Moves `from` back to `to`, picking an alternate name if `to` is occupied.
fn restore_to(from: &Path, to: &Path) -> Result<PathBuf, String> {
    if let Some(parent) = to.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Could not create {}: {}", parent.display(), e))?;
    }

    let (target, _) = unique_path(to);
    move_path(from, &target).map_err(|e| {
        format!(
            "Failed to move {} back to {}: {}",
            from.display(),
            target.display(),
            e
        )
    })?;
    Ok(target)
}

fn reverse_move(entry: &UndoEntry) -> Reversal {
    let src = required(&entry.src, "src")?;
    let dst = required(&entry.dst, "dst")?;

    if !exists_no_follow(dst) {
        return Err(format!("File not found at expected location: {}", dst.display()));
    }

    let restored = restore_to(dst, src)?;
    Ok((format!("Moved back to {}", restored.display()), Some(restored)))
}

fn reverse_rename(entry: &UndoEntry) -> Reversal {
    let old_name = entry
        .old_name
        .as_deref()
        .ok_or_else(|| "Undo entry is missing 'old_name'".to_string())?;

    let current = match (&entry.dst, &entry.src, &entry.new_name) {
        (Some(dst), _, _) => dst.clone(),
        (None, Some(src), Some(new_name)) => src.with_file_name(new_name),
        _ => return Err("Undo entry is missing 'dst'".to_string()),
    };

    if !exists_no_follow(&current) {
        return Err(format!("File not found at expected location: {}", current.display()));
    }

    let original = current.with_file_name(old_name);
    let restored = restore_to(&current, &original)?;
    Ok((format!("Renamed back to {}", restored.display()), Some(restored)))
}

fn reverse_copy(entry: &UndoEntry) -> Reversal {
    let dst = required(&entry.dst, "dst")?;

    if !exists_no_follow(dst) {
        return Err(format!("Copy not found at {}", dst.display()));
    }

    remove_path(dst).map_err(|e| format!("Failed to remove copy {}: {}", dst.display(), e))?;
    Ok((format!("Removed copy {}", dst.display()), None))
}

fn reverse_delete(entry: &UndoEntry) -> Reversal {
    let src = required(&entry.src, "src")?;
    let backup = entry
        .temp_backup
        .as_deref()
        .ok_or_else(|| "No backup was retained for this delete".to_string())?;

    if !exists_no_follow(backup) {
        return Err(format!("Backup missing: {}", backup.display()));
    }

    let restored = restore_to(backup, src)?;
    Ok((format!("Restored {}", restored.display()), Some(restored)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn move_entry(src: &Path, dst: &Path) -> UndoEntry {
        UndoEntry {
            src: Some(src.to_path_buf()),
            dst: Some(dst.to_path_buf()),
            ..UndoEntry::new(UndoType::Move)
        }
    }

    #[test]
    fn test_record_stamps_entry() {
        let ledger = UndoLedger::new(10);
        ledger.record(UndoEntry::new(UndoType::Copy));

        let history = ledger.get_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, UndoStatus::Recorded);
        assert!(history[0].timestamp.is_some());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let ledger = UndoLedger::new(3);
        for i in 0..4 {
            let mut entry = UndoEntry::new(UndoType::Copy);
            entry.dst = Some(PathBuf::from(format!("/tmp/copy-{}", i)));
            ledger.record(entry);
        }

        assert_eq!(ledger.len(), 3);
        let history = ledger.get_history();
        assert_eq!(history[0].dst, Some(PathBuf::from("/tmp/copy-3")));
        assert!(
            history
                .iter()
                .all(|e| e.dst != Some(PathBuf::from("/tmp/copy-0")))
        );
    }

    #[test]
    fn test_undo_last_empty() {
        let ledger = UndoLedger::default();
        let result = ledger.undo_last();
        assert!(!result.success);
        assert!(result.entry.is_none());
    }

    #[test]
    fn test_undo_move() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let src = temp_dir.path().join("report.pdf");
        let dst_dir = temp_dir.path().join("docs");
        fs::create_dir(&dst_dir).expect("Failed to create dir");
        let dst = dst_dir.join("report.pdf");
        fs::write(&dst, "pdf").expect("Failed to write file");

        let ledger = UndoLedger::default();
        ledger.record(move_entry(&src, &dst));

        let result = ledger.undo_last();
        assert!(result.success, "{}", result.message);
        assert!(src.exists());
        assert!(!dst.exists());
        assert_eq!(result.restored, Some(src));
        assert_eq!(
            result.entry.map(|e| e.status),
            Some(UndoStatus::Undone)
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_undo_move_with_occupied_source() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let src = temp_dir.path().join("notes.txt");
        let dst = temp_dir.path().join("moved.txt");
        fs::write(&src, "newcomer").expect("Failed to write file");
        fs::write(&dst, "original").expect("Failed to write file");

        let ledger = UndoLedger::default();
        ledger.record(move_entry(&src, &dst));

        let result = ledger.undo_last();
        assert!(result.success, "{}", result.message);
        let restored = temp_dir.path().join("notes (1).txt");
        assert_eq!(result.restored, Some(restored.clone()));
        assert_eq!(
            fs::read_to_string(restored).expect("Failed to read file"),
            "original"
        );
        assert_eq!(
            fs::read_to_string(&src).expect("Failed to read file"),
            "newcomer"
        );
    }

    #[test]
    fn test_failed_undo_is_consumed() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = UndoLedger::default();
        ledger.record(move_entry(
            &temp_dir.path().join("a.txt"),
            &temp_dir.path().join("gone.txt"),
        ));

        let result = ledger.undo_last();
        assert!(!result.success);
        assert!(result.message.contains("not found"));
        assert!(ledger.is_empty());
        let failed = result.entry.expect("Failed result should carry the entry");
        assert_eq!(failed.status, UndoStatus::Failed);
    }

    #[test]
    fn test_dead_entry_does_not_block_older_ones() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = UndoLedger::default();

        let copy = temp_dir.path().join("copy.txt");
        fs::write(&copy, "c").expect("Failed to write file");
        let mut older = UndoEntry::new(UndoType::Copy);
        older.dst = Some(copy.clone());
        ledger.record(older);
        ledger.record(move_entry(
            &temp_dir.path().join("a.txt"),
            &temp_dir.path().join("gone.txt"),
        ));

        assert!(!ledger.undo_last().success);
        let result = ledger.undo_last();
        assert!(result.success, "{}", result.message);
        assert!(!copy.exists());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_failed_entry_can_be_retried() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = UndoLedger::default();
        let src = temp_dir.path().join("a.txt");
        let dst = temp_dir.path().join("later.txt");
        ledger.record(move_entry(&src, &dst));

        let failed = ledger.undo_last();
        assert!(!failed.success);

        fs::write(&dst, "back").expect("Failed to write file");
        let entry = failed.entry.expect("Failed result should carry the entry");
        let retried = ledger.undo_entry(&entry);
        assert!(retried.success, "{}", retried.message);
        assert_eq!(fs::read_to_string(&src).expect("Failed to read file"), "back");
    }

    #[test]
    fn test_undo_entry_tells_repeated_operations_apart() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = UndoLedger::default();
        let copy = temp_dir.path().join("copy.txt");

        let mut first = UndoEntry::new(UndoType::Copy);
        first.dst = Some(copy.clone());
        first.timestamp = Some(Local::now() - chrono::Duration::seconds(60));
        let mut second = first.clone();
        second.timestamp = Some(Local::now());
        ledger.record(first.clone());
        ledger.record(second);

        fs::write(&copy, "c").expect("Failed to write file");
        let result = ledger.undo_entry(&ledger.get_history()[1]);
        assert!(result.success, "{}", result.message);

        let history = ledger.get_history();
        assert_eq!(history.len(), 1);
        assert_ne!(history[0].timestamp, first.timestamp);
    }

    #[test]
    fn test_undo_rename() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let renamed = temp_dir.path().join("2024-01-01_scan.pdf");
        fs::write(&renamed, "scan").expect("Failed to write file");

        let entry = UndoEntry {
            src: Some(temp_dir.path().join("scan.pdf")),
            dst: Some(renamed.clone()),
            old_name: Some("scan.pdf".to_string()),
            new_name: Some("2024-01-01_scan.pdf".to_string()),
            ..UndoEntry::new(UndoType::Rename)
        };

        let ledger = UndoLedger::default();
        ledger.record(entry);
        let result = ledger.undo_last();

        assert!(result.success, "{}", result.message);
        assert!(temp_dir.path().join("scan.pdf").exists());
        assert!(!renamed.exists());
    }

    #[test]
    fn test_undo_copy_leaves_source() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let src = temp_dir.path().join("a.txt");
        let dst = temp_dir.path().join("b.txt");
        fs::write(&src, "a").expect("Failed to write file");
        fs::write(&dst, "a").expect("Failed to write file");

        let entry = UndoEntry {
            src: Some(src.clone()),
            dst: Some(dst.clone()),
            ..UndoEntry::new(UndoType::Copy)
        };

        let ledger = UndoLedger::default();
        ledger.record(entry);
        assert!(ledger.undo_last().success);
        assert!(src.exists());
        assert!(!dst.exists());
    }

    #[test]
    fn test_undo_delete_restores_backup() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let original = temp_dir.path().join("old.log");
        let backup = temp_dir.path().join("backup-old.log");
        fs::write(&backup, "log lines").expect("Failed to write backup");

        let entry = UndoEntry {
            src: Some(original.clone()),
            temp_backup: Some(backup.clone()),
            ..UndoEntry::new(UndoType::Delete)
        };

        let ledger = UndoLedger::default();
        ledger.record(entry);
        let result = ledger.undo_last();

        assert!(result.success, "{}", result.message);
        assert_eq!(
            fs::read_to_string(&original).expect("Failed to read restored file"),
            "log lines"
        );
        assert!(!backup.exists());
    }

    #[test]
    fn test_undo_delete_without_backup_fails() {
        let entry = UndoEntry {
            src: Some(PathBuf::from("/tmp/whatever.txt")),
            ..UndoEntry::new(UndoType::Delete)
        };
        let ledger = UndoLedger::default();
        ledger.record(entry);

        let result = ledger.undo_last();
        assert!(!result.success);
        assert!(result.message.contains("backup"));
    }

    #[test]
    fn test_undo_entry_selective() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = UndoLedger::default();

        let first_copy = temp_dir.path().join("first.txt");
        fs::write(&first_copy, "1").expect("Failed to write file");
        let mut first = UndoEntry::new(UndoType::Copy);
        first.dst = Some(first_copy.clone());
        ledger.record(first);

        let mut second = UndoEntry::new(UndoType::Copy);
        second.dst = Some(temp_dir.path().join("second.txt"));
        ledger.record(second);

        let oldest = ledger.get_history()[1].clone();
        let result = ledger.undo_entry(&oldest);

        assert!(result.success, "{}", result.message);
        assert!(!first_copy.exists());
        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger.get_history()[0].dst,
            Some(temp_dir.path().join("second.txt"))
        );
    }

    #[test]
    fn test_entry_serializes_type_field() {
        let entry = UndoEntry::new(UndoType::Rename);
        let json = serde_json::to_value(&entry).expect("Serialize failed");
        assert_eq!(json["type"], "rename");
        assert_eq!(json["status"], "pending");
    }
}
