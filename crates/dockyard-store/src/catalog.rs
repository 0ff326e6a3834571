use crate::layout::StoreLayout;
use crate::objects::ObjectStore;
use crate::{fsync_dir, StoreError};
use dockyard_schema::{Entry, Version};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::warn;

/// On-disk record envelope with an embedded blake3 checksum of the record JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sealed<T> {
    record: T,
    /// `None` only for hand-written or legacy records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

impl<T: Serialize> Sealed<T> {
    fn seal(record: T) -> Result<Self, StoreError> {
        let checksum = Some(record_checksum(&record)?);
        Ok(Self { record, checksum })
    }
}

fn record_checksum<T: Serialize>(record: &T) -> Result<String, StoreError> {
    let json = serde_json::to_string_pretty(record)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}

fn write_atomic(dir: &Path, name: &str, content: &[u8]) -> Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(name))
        .map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

fn read_sealed<T>(path: &Path, id: &str) -> Result<T, StoreError>
where
    T: Serialize + DeserializeOwned,
{
    let content = fs::read_to_string(path)?;
    let sealed: Sealed<T> = serde_json::from_str(&content)?;
    if let Some(expected) = sealed.checksum {
        let actual = record_checksum(&sealed.record)?;
        if actual != expected {
            return Err(StoreError::IntegrityFailure {
                hash: id.to_owned(),
                expected,
                actual,
            });
        }
    }
    Ok(sealed.record)
}

fn list_record_names(dir: &Path) -> Result<Vec<String>, StoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_owned());
                }
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Entry and version records.
///
/// Version records keep only the checksum of each source file; contents live
/// in the [`ObjectStore`] and are hydrated (and integrity-checked) on read.
pub struct CatalogStore {
    layout: StoreLayout,
    objects: ObjectStore,
}

impl CatalogStore {
    pub fn new(layout: StoreLayout) -> Self {
        let objects = ObjectStore::new(layout.clone());
        Self { layout, objects }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn put_entry(&self, entry: &Entry) -> Result<(), StoreError> {
        let sealed = Sealed::seal(entry)?;
        let content = serde_json::to_string_pretty(&sealed)?;
        write_atomic(&self.layout.entries_dir(), &entry.id, content.as_bytes())
    }

    pub fn get_entry(&self, entry_id: &str) -> Result<Entry, StoreError> {
        let path = self.layout.entry_path(entry_id);
        if !path.is_file() {
            return Err(StoreError::EntryNotFound(entry_id.to_owned()));
        }
        read_sealed(&path, entry_id)
    }

    pub fn entry_exists(&self, entry_id: &str) -> bool {
        self.layout.entry_path(entry_id).is_file()
    }

    pub fn list_entries(&self) -> Result<Vec<Entry>, StoreError> {
        let mut entries = Vec::new();
        for name in list_record_names(&self.layout.entries_dir())? {
            match self.get_entry(&name) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("skipping corrupted entry record '{name}': {e}"),
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Write every source file's content into the object store.
    pub fn store_contents(&self, version: &Version) -> Result<(), StoreError> {
        for file in &version.files {
            let sum = self.objects.put(file.content.as_bytes())?;
            if sum != file.checksum {
                return Err(StoreError::IntegrityFailure {
                    hash: file.absolute_path.clone(),
                    expected: file.checksum.to_string(),
                    actual: sum.into_inner(),
                });
            }
        }
        Ok(())
    }

    /// Replace the version record. Contents must already be stored.
    pub fn write_version_record(&self, version: &Version) -> Result<(), StoreError> {
        let mut record = version.clone();
        for file in &mut record.files {
            file.content.clear();
        }
        let sealed = Sealed::seal(&record)?;
        let content = serde_json::to_string_pretty(&sealed)?;
        write_atomic(&self.layout.versions_dir(), &version.id, content.as_bytes())
    }

    /// Store contents, then the record. Not atomic across several versions;
    /// use a [`FileSession`](crate::FileSession) for that.
    pub fn put_version(&self, version: &Version) -> Result<(), StoreError> {
        self.store_contents(version)?;
        self.write_version_record(version)
    }

    fn read_version_record(&self, version_id: &str) -> Result<Version, StoreError> {
        let path = self.layout.version_path(version_id);
        if !path.is_file() {
            return Err(StoreError::VersionNotFound(version_id.to_owned()));
        }
        read_sealed(&path, version_id)
    }

    /// Read a version and hydrate its file contents from the object store.
    pub fn get_version(&self, version_id: &str) -> Result<Version, StoreError> {
        let mut version = self.read_version_record(version_id)?;
        for file in &mut version.files {
            file.content = self.objects.get_string(&file.checksum)?;
        }
        Ok(version)
    }

    pub fn version_exists(&self, version_id: &str) -> bool {
        self.layout.version_path(version_id).is_file()
    }

    /// Committed revision of a version, `None` when it was never stored.
    pub fn current_revision(&self, version_id: &str) -> Result<Option<u64>, StoreError> {
        match self.read_version_record(version_id) {
            Ok(v) => Ok(Some(v.revision)),
            Err(StoreError::VersionNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn list_version_ids(&self) -> Result<Vec<String>, StoreError> {
        list_record_names(&self.layout.versions_dir())
    }

    /// All versions of an entry, ordered by reference name.
    pub fn list_versions(&self, entry_id: &str) -> Result<Vec<Version>, StoreError> {
        let mut versions = Vec::new();
        for name in self.list_version_ids()? {
            match self.read_version_record(&name) {
                Ok(record) if record.entry_id == entry_id => {
                    versions.push(self.get_version(&name)?);
                }
                Ok(_) => {}
                Err(e) => warn!("skipping corrupted version record '{name}': {e}"),
            }
        }
        versions.sort_by(|a, b| a.reference.cmp(&b.reference));
        Ok(versions)
    }

    pub fn remove_version(&self, version_id: &str) -> Result<(), StoreError> {
        let path = self.layout.version_path(version_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
