use crate::layout::StoreLayout;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// A single rollback step that undoes one record replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RollbackStep {
    /// The record did not exist before the commit.
    RemoveFile(PathBuf),
    /// The record existed; `backup` holds its previous bytes.
    RestoreFile { path: PathBuf, backup: PathBuf },
}

/// A WAL entry representing an in-flight commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub op_id: String,
    /// Ids of the records the commit replaces.
    pub records: Vec<String>,
    pub timestamp: String,
    pub rollback_steps: Vec<RollbackStep>,
}

/// Write-ahead log for multi-record commits.
///
/// A commit creates an entry before touching any record, appends a rollback
/// step (and a backup of the old bytes) before each replacement, and removes
/// the entry once every record is in place. Entries found on startup belong
/// to interrupted commits and are rolled back.
pub struct WriteAheadLog {
    wal_dir: PathBuf,
}

impl WriteAheadLog {
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            wal_dir: layout.wal_dir(),
        }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.wal_dir)?;
        Ok(())
    }

    /// Begin a new WAL entry. Returns the op_id.
    pub fn begin(&self, records: &[String]) -> Result<String, StoreError> {
        let seed = records.join(",");
        let op_id = format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S%6f"),
            &blake3::hash(seed.as_bytes()).to_hex()[..8]
        );
        let entry = WalEntry {
            op_id: op_id.clone(),
            records: records.to_vec(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            rollback_steps: Vec::new(),
        };
        self.write_entry(&entry)?;
        debug!("WAL begin: {} record(s) (op_id={op_id})", records.len());
        Ok(op_id)
    }

    /// Record how to undo the upcoming replacement of `path`.
    ///
    /// Copies the current file aside first when it exists. Must be called
    /// before the replacement happens.
    pub fn guard_replacement(&self, op_id: &str, path: &Path) -> Result<(), StoreError> {
        let mut entry = self.read_entry(op_id)?;
        let step = if path.is_file() {
            let backup = self
                .wal_dir
                .join(format!("{op_id}-{}.bak", entry.rollback_steps.len()));
            fs::copy(path, &backup)?;
            fs::File::open(&backup)?.sync_all()?;
            RollbackStep::RestoreFile {
                path: path.to_path_buf(),
                backup,
            }
        } else {
            RollbackStep::RemoveFile(path.to_path_buf())
        };
        entry.rollback_steps.push(step);
        self.write_entry(&entry)
    }

    /// Commit (remove) a WAL entry and its backups after successful completion.
    pub fn commit(&self, op_id: &str) -> Result<(), StoreError> {
        let path = self.entry_path(op_id);
        if path.exists() {
            let entry = self.read_entry(op_id)?;
            fs::remove_file(&path)?;
            for step in &entry.rollback_steps {
                if let RollbackStep::RestoreFile { backup, .. } = step {
                    let _ = fs::remove_file(backup);
                }
            }
            debug!("WAL commit: {op_id}");
        }
        Ok(())
    }

    /// Undo a failed commit immediately, then drop its entry.
    pub fn abort(&self, op_id: &str) -> Result<(), StoreError> {
        let entry = self.read_entry(op_id)?;
        warn!("WAL abort: rolling back op_id={op_id}");
        rollback_entry(&entry);
        let _ = fs::remove_file(self.entry_path(op_id));
        Ok(())
    }

    pub fn list_incomplete(&self) -> Result<Vec<WalEntry>, StoreError> {
        if !self.wal_dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.wal_dir)? {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                match fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str::<WalEntry>(&content) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => {
                            warn!("corrupt WAL entry {}: {e}", path.display());
                            let _ = fs::remove_file(&path);
                        }
                    },
                    Err(e) => {
                        warn!("unreadable WAL entry {}: {e}", path.display());
                        let _ = fs::remove_file(&path);
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    /// Roll back all incomplete WAL entries.
    /// Returns the number of entries rolled back.
    pub fn recover(&self) -> Result<usize, StoreError> {
        let entries = self.list_incomplete()?;
        let count = entries.len();
        for entry in &entries {
            info!(
                "WAL recovery: rolling back commit of {} record(s) (op_id={})",
                entry.records.len(),
                entry.op_id
            );
            rollback_entry(entry);
            let _ = fs::remove_file(self.entry_path(&entry.op_id));
        }
        if count > 0 {
            info!("WAL recovery complete: {count} entries rolled back");
        }
        Ok(count)
    }

    fn entry_path(&self, op_id: &str) -> PathBuf {
        self.wal_dir.join(format!("{op_id}.json"))
    }

    fn write_entry(&self, entry: &WalEntry) -> Result<(), StoreError> {
        fs::create_dir_all(&self.wal_dir)?;
        let content = serde_json::to_string_pretty(entry)?;
        let mut tmp = NamedTempFile::new_in(&self.wal_dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        let dest = self.entry_path(&entry.op_id);
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        crate::fsync_dir(&self.wal_dir)?;
        Ok(())
    }

    fn read_entry(&self, op_id: &str) -> Result<WalEntry, StoreError> {
        let content = fs::read_to_string(self.entry_path(op_id))?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn rollback_entry(entry: &WalEntry) {
    for step in entry.rollback_steps.iter().rev() {
        match step {
            RollbackStep::RemoveFile(path) => {
                if path.is_file() {
                    if let Err(e) = fs::remove_file(path) {
                        warn!("WAL rollback: failed to remove {}: {e}", path.display());
                    } else {
                        debug!("WAL rollback: removed {}", path.display());
                    }
                }
            }
            RollbackStep::RestoreFile { path, backup } => {
                if !backup.exists() {
                    warn!("WAL rollback: backup {} missing", backup.display());
                    continue;
                }
                if let Err(e) = fs::rename(backup, path) {
                    warn!("WAL rollback: failed to restore {}: {e}", path.display());
                } else {
                    debug!("WAL rollback: restored {}", path.display());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, WriteAheadLog) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        let wal = WriteAheadLog::new(&layout);
        wal.initialize().unwrap();
        (dir, wal)
    }

    #[test]
    fn begin_creates_entry() {
        let (_dir, wal) = setup();
        let op_id = wal.begin(&["v1".to_owned()]).unwrap();
        assert!(!op_id.is_empty());
        let entries = wal.list_incomplete().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].records, vec!["v1".to_owned()]);
    }

    #[test]
    fn commit_removes_entry_and_backups() {
        let (dir, wal) = setup();
        let record = dir.path().join("record");
        fs::write(&record, "old").unwrap();

        let op_id = wal.begin(&["r".to_owned()]).unwrap();
        wal.guard_replacement(&op_id, &record).unwrap();
        fs::write(&record, "new").unwrap();
        wal.commit(&op_id).unwrap();

        assert!(wal.list_incomplete().unwrap().is_empty());
        let leftovers = fs::read_dir(StoreLayout::new(dir.path()).wal_dir())
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
        assert_eq!(fs::read_to_string(&record).unwrap(), "new");
    }

    #[test]
    fn recover_restores_replaced_record() {
        let (dir, wal) = setup();
        let record = dir.path().join("record");
        fs::write(&record, "old").unwrap();

        let op_id = wal.begin(&["r".to_owned()]).unwrap();
        wal.guard_replacement(&op_id, &record).unwrap();
        fs::write(&record, "half-written").unwrap();

        // Crash: no commit.
        assert_eq!(wal.recover().unwrap(), 1);
        assert_eq!(fs::read_to_string(&record).unwrap(), "old");
        assert!(wal.list_incomplete().unwrap().is_empty());
    }

    #[test]
    fn recover_removes_new_record() {
        let (dir, wal) = setup();
        let record = dir.path().join("fresh");

        let op_id = wal.begin(&["fresh".to_owned()]).unwrap();
        wal.guard_replacement(&op_id, &record).unwrap();
        fs::write(&record, "{}").unwrap();

        assert_eq!(wal.recover().unwrap(), 1);
        assert!(!record.exists());
    }

    #[test]
    fn abort_rolls_back_in_reverse_order() {
        let (dir, wal) = setup();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "a-old").unwrap();

        let op_id = wal.begin(&["a".to_owned(), "b".to_owned()]).unwrap();
        wal.guard_replacement(&op_id, &a).unwrap();
        fs::write(&a, "a-new").unwrap();
        wal.guard_replacement(&op_id, &b).unwrap();
        fs::write(&b, "b-new").unwrap();

        wal.abort(&op_id).unwrap();
        assert_eq!(fs::read_to_string(&a).unwrap(), "a-old");
        assert!(!b.exists());
        assert!(wal.list_incomplete().unwrap().is_empty());
    }

    #[test]
    fn recover_with_no_entries_is_noop() {
        let (_dir, wal) = setup();
        assert_eq!(wal.recover().unwrap(), 0);
    }

    #[test]
    fn recover_corrupt_wal_entry_is_removed() {
        let (dir, wal) = setup();
        let wal_dir = StoreLayout::new(dir.path()).wal_dir();
        fs::write(wal_dir.join("corrupt-op.json"), "THIS IS NOT JSON{{{").unwrap();

        let record = dir.path().join("orphan");
        let op_id = wal.begin(&["orphan".to_owned()]).unwrap();
        wal.guard_replacement(&op_id, &record).unwrap();
        fs::write(&record, "x").unwrap();

        assert_eq!(wal.recover().unwrap(), 1);
        assert!(!record.exists());
        assert!(!wal_dir.join("corrupt-op.json").exists());
    }
}
