use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use dockyard_schema::{checksum, Checksum};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

/// Descriptor content store addressed by SHA-256 checksum.
///
/// Identical files across versions are stored once. Reads recompute the
/// checksum and fail on mismatch.
pub struct ObjectStore {
    layout: StoreLayout,
}

impl ObjectStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Store data and return its checksum. Existing objects are skipped.
    pub fn put(&self, data: &[u8]) -> Result<Checksum, StoreError> {
        let sum = checksum(data);
        let dest = self.layout.objects_dir().join(sum.as_str());

        if dest.exists() {
            return Ok(sum);
        }

        let dir = self.layout.objects_dir();
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;

        Ok(sum)
    }

    pub fn get(&self, sum: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.layout.objects_dir().join(sum);
        if !path.exists() {
            return Err(StoreError::ObjectNotFound(sum.to_owned()));
        }
        let data = fs::read(&path)?;

        let actual = checksum(&data);
        if actual != sum {
            return Err(StoreError::IntegrityFailure {
                hash: sum.to_owned(),
                expected: sum.to_owned(),
                actual: actual.into_inner(),
            });
        }

        Ok(data)
    }

    /// Fetch an object as UTF-8 text. Descriptors are always text.
    pub fn get_string(&self, sum: &str) -> Result<String, StoreError> {
        let data = self.get(sum)?;
        String::from_utf8(data).map_err(|e| {
            StoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    pub fn exists(&self, sum: &str) -> bool {
        self.layout.objects_dir().join(sum).exists()
    }

    pub fn remove(&self, sum: &str) -> Result<(), StoreError> {
        let path = self.layout.objects_dir().join(sum);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.layout.objects_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut sums = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    sums.push(name.to_owned());
                }
            }
        }
        sums.sort();
        Ok(sums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        let store = ObjectStore::new(layout);
        (dir, store)
    }

    #[test]
    fn put_and_get_roundtrip() {
        let (_dir, store) = test_store();
        let data = b"cwlVersion: v1.2\nclass: Workflow\n";
        let sum = store.put(data).unwrap();
        assert_eq!(store.get(&sum).unwrap(), data);
    }

    #[test]
    fn put_key_is_content_checksum() {
        let (_dir, store) = test_store();
        let sum = store.put(b"abc").unwrap();
        assert_eq!(
            sum.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn identical_content_stored_once() {
        let (_dir, store) = test_store();
        let a = store.put(b"version 1.0").unwrap();
        let b = store.put(b"version 1.0").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn get_nonexistent_fails() {
        let (_dir, store) = test_store();
        assert!(matches!(
            store.get("nonexistent"),
            Err(StoreError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn integrity_check_on_read() {
        let (dir, store) = test_store();
        let sum = store.put(b"task hello {}").unwrap();

        let obj_path = StoreLayout::new(dir.path()).objects_dir().join(sum.as_str());
        fs::write(&obj_path, b"corrupted").unwrap();

        assert!(matches!(
            store.get(&sum),
            Err(StoreError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn empty_content_roundtrip() {
        let (_dir, store) = test_store();
        let sum = store.put(b"").unwrap();
        assert!(store.get(&sum).unwrap().is_empty());
        assert_eq!(store.get_string(&sum).unwrap(), "");
    }

    #[test]
    fn remove_object() {
        let (_dir, store) = test_store();
        let sum = store.put(b"data").unwrap();
        assert!(store.exists(&sum));
        store.remove(&sum).unwrap();
        assert!(!store.exists(&sum));
        assert!(store.remove("nonexistent").is_ok());
    }
}
