//! Unit-of-work sessions against the durable store.

use crate::catalog::CatalogStore;
use crate::layout::StoreLayout;
use crate::wal::WriteAheadLog;
use crate::StoreError;
use dockyard_schema::{Entry, Version};
use std::collections::BTreeMap;
use tracing::debug;

/// Transaction primitives of a storage session.
///
/// `commit` and `rollback` are no-ops when no transaction is active.
/// After `close` every primitive fails with [`StoreError::SessionClosed`].
pub trait Session {
    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;
    /// Discard staged, uncommitted writes.
    fn clear(&mut self) -> Result<(), StoreError>;
    fn is_active(&self) -> bool;
    fn close(&mut self);
}

#[derive(Debug)]
struct StagedVersion {
    version: Version,
    expected_revision: Option<u64>,
}

/// File-backed [`Session`].
///
/// Writes are staged in memory. `commit` checks optimistic revisions, stores
/// file contents, then replaces every record under one WAL entry; if any
/// replacement fails the earlier ones are restored before the error returns.
pub struct FileSession {
    catalog: CatalogStore,
    wal: WriteAheadLog,
    active: bool,
    closed: bool,
    entries: BTreeMap<String, Entry>,
    versions: BTreeMap<String, StagedVersion>,
}

impl FileSession {
    pub fn new(layout: StoreLayout) -> Self {
        let wal = WriteAheadLog::new(&layout);
        Self {
            catalog: CatalogStore::new(layout),
            wal,
            active: false,
            closed: false,
            entries: BTreeMap::new(),
            versions: BTreeMap::new(),
        }
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn stage_entry(&mut self, entry: Entry) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.entries.insert(entry.id.to_string(), entry);
        Ok(())
    }

    /// Stage a version write.
    ///
    /// `expected_revision` is the revision the caller read, or `None` for a
    /// version that must not exist yet. The commit fails with
    /// [`StoreError::RevisionConflict`] if the stored revision has moved on.
    pub fn stage_version(
        &mut self,
        version: Version,
        expected_revision: Option<u64>,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.versions.insert(
            version.id.to_string(),
            StagedVersion {
                version,
                expected_revision,
            },
        );
        Ok(())
    }

    /// Read through staged writes to the committed store.
    pub fn get_version(&self, version_id: &str) -> Result<Version, StoreError> {
        self.ensure_open()?;
        match self.versions.get(version_id) {
            Some(staged) => Ok(staged.version.clone()),
            None => self.catalog.get_version(version_id),
        }
    }

    pub fn get_entry(&self, entry_id: &str) -> Result<Entry, StoreError> {
        self.ensure_open()?;
        match self.entries.get(entry_id) {
            Some(entry) => Ok(entry.clone()),
            None => self.catalog.get_entry(entry_id),
        }
    }

    pub fn staged_count(&self) -> usize {
        self.entries.len() + self.versions.len()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn discard_staged(&mut self) {
        self.entries.clear();
        self.versions.clear();
    }

    fn check_revisions(&self) -> Result<(), StoreError> {
        for (id, staged) in &self.versions {
            let found = self.catalog.current_revision(id)?;
            if found != staged.expected_revision {
                return Err(StoreError::RevisionConflict {
                    version_id: id.clone(),
                    expected: staged.expected_revision.unwrap_or(0),
                    found: found.unwrap_or(0),
                });
            }
        }
        Ok(())
    }

    fn write_staged(&self) -> Result<(), StoreError> {
        self.check_revisions()?;

        for staged in self.versions.values() {
            self.catalog.store_contents(&staged.version)?;
        }

        let mut records: Vec<String> = self.entries.keys().cloned().collect();
        records.extend(self.versions.keys().cloned());
        let op_id = self.wal.begin(&records)?;

        let result = self.replace_records(&op_id);
        match result {
            Ok(()) => self.wal.commit(&op_id),
            Err(e) => {
                self.wal.abort(&op_id)?;
                Err(e)
            }
        }
    }

    fn replace_records(&self, op_id: &str) -> Result<(), StoreError> {
        let layout = self.catalog.layout();
        for entry in self.entries.values() {
            self.wal
                .guard_replacement(op_id, &layout.entry_path(&entry.id))?;
            self.catalog.put_entry(entry)?;
        }
        for staged in self.versions.values() {
            self.wal
                .guard_replacement(op_id, &layout.version_path(&staged.version.id))?;
            self.catalog.write_version_record(&staged.version)?;
        }
        Ok(())
    }
}

impl Session for FileSession {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.active {
            return Err(StoreError::TransactionState(
                "transaction already active".to_owned(),
            ));
        }
        self.active = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if !self.active {
            return Ok(());
        }
        self.active = false;
        if self.staged_count() == 0 {
            return Ok(());
        }
        let result = self.write_staged();
        let count = self.staged_count();
        self.discard_staged();
        result?;
        debug!("session commit: {count} record(s)");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.discard_staged();
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.discard_staged();
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn close(&mut self) {
        self.discard_staged();
        self.active = false;
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_schema::{EntryId, FileType, ReferenceKind, SourceFile, VersionId};
    use std::fs;

    fn test_session() -> (tempfile::TempDir, FileSession) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, FileSession::new(layout))
    }

    fn version(id: &str, revision: u64, content: &str) -> Version {
        let mut v = Version::new(
            VersionId::new(id),
            EntryId::new("e1"),
            id,
            ReferenceKind::Branch,
        );
        v.revision = revision;
        v.files.push(SourceFile::new(
            "main.wdl",
            "/main.wdl",
            FileType::PrimaryDescriptor,
            content,
        ));
        v
    }

    #[test]
    fn commit_without_begin_is_noop() {
        let (_dir, mut session) = test_session();
        session.stage_version(version("v1", 1, "x"), None).unwrap();
        session.commit().unwrap();
        assert!(!session.catalog().version_exists("v1"));
    }

    #[test]
    fn begin_twice_is_an_error() {
        let (_dir, mut session) = test_session();
        session.begin().unwrap();
        assert!(matches!(
            session.begin(),
            Err(StoreError::TransactionState(_))
        ));
    }

    #[test]
    fn commit_persists_staged_version() {
        let (_dir, mut session) = test_session();
        session.begin().unwrap();
        session.stage_version(version("v1", 1, "x"), None).unwrap();
        session.commit().unwrap();
        assert!(!session.is_active());
        assert_eq!(session.catalog().get_version("v1").unwrap().revision, 1);
        assert_eq!(session.staged_count(), 0);
    }

    #[test]
    fn rollback_discards_staged() {
        let (_dir, mut session) = test_session();
        session.begin().unwrap();
        session.stage_version(version("v1", 1, "x"), None).unwrap();
        session.rollback().unwrap();
        assert!(!session.catalog().version_exists("v1"));
    }

    #[test]
    fn reads_see_staged_writes() {
        let (_dir, mut session) = test_session();
        session.begin().unwrap();
        session.stage_version(version("v1", 1, "staged"), None).unwrap();
        assert_eq!(
            session.get_version("v1").unwrap().files[0].content,
            "staged"
        );
    }

    #[test]
    fn stale_revision_conflicts() {
        let (_dir, mut session) = test_session();
        session.begin().unwrap();
        session.stage_version(version("v1", 1, "a"), None).unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        session.stage_version(version("v1", 2, "b"), Some(1)).unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        session.stage_version(version("v1", 2, "c"), Some(1)).unwrap();
        let err = session.commit().unwrap_err();
        assert!(matches!(
            err,
            StoreError::RevisionConflict {
                expected: 1,
                found: 2,
                ..
            }
        ));
        assert_eq!(
            session.catalog().get_version("v1").unwrap().files[0].content,
            "b"
        );
    }

    #[test]
    fn failed_record_write_restores_earlier_records() {
        let (dir, mut session) = test_session();
        session.begin().unwrap();
        session.stage_version(version("va", 1, "old-a"), None).unwrap();
        session.commit().unwrap();

        // A directory at vb's record path makes the rename fail.
        let blocker = StoreLayout::new(dir.path()).version_path("vb");
        fs::create_dir_all(blocker.join("occupied")).unwrap();

        session.begin().unwrap();
        session.stage_version(version("va", 2, "new-a"), Some(1)).unwrap();
        session.stage_version(version("vb", 1, "new-b"), None).unwrap();
        assert!(session.commit().is_err());

        let a = session.catalog().get_version("va").unwrap();
        assert_eq!(a.revision, 1);
        assert_eq!(a.files[0].content, "old-a");
        assert!(session.catalog().list_versions("e1").unwrap().len() == 1);
        assert!(WriteAheadLog::new(&StoreLayout::new(dir.path()))
            .list_incomplete()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn closed_session_rejects_everything() {
        let (_dir, mut session) = test_session();
        session.close();
        assert!(matches!(session.begin(), Err(StoreError::SessionClosed)));
        assert!(matches!(session.commit(), Err(StoreError::SessionClosed)));
        assert!(matches!(session.clear(), Err(StoreError::SessionClosed)));
        assert!(session.get_version("v1").is_err());
    }
}
