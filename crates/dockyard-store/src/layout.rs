use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of a Dockyard store.
///
/// ```text
/// <root>/store/objects/<sha256>     descriptor contents
/// <root>/store/entries/<entry_id>   entry records
/// <root>/store/versions/<version_id> version records
/// <root>/store/wal/                 in-flight commits
/// <root>/store/locks/               per-version advisory locks
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    #[inline]
    pub fn objects_dir(&self) -> PathBuf {
        self.store_dir().join("objects")
    }

    #[inline]
    pub fn entries_dir(&self) -> PathBuf {
        self.store_dir().join("entries")
    }

    #[inline]
    pub fn versions_dir(&self) -> PathBuf {
        self.store_dir().join("versions")
    }

    #[inline]
    pub fn entry_path(&self, entry_id: &str) -> PathBuf {
        self.entries_dir().join(entry_id)
    }

    #[inline]
    pub fn version_path(&self, version_id: &str) -> PathBuf {
        self.versions_dir().join(version_id)
    }

    #[inline]
    pub fn wal_dir(&self) -> PathBuf {
        self.store_dir().join("wal")
    }

    #[inline]
    pub fn locks_dir(&self) -> PathBuf {
        self.store_dir().join("locks")
    }

    /// Held shared by committers and exclusively by WAL recovery.
    #[inline]
    pub fn store_lock_file(&self) -> PathBuf {
        self.locks_dir().join("store.lock")
    }

    #[inline]
    pub fn version_lock_file(&self, version_id: &str) -> PathBuf {
        self.locks_dir().join(format!("{version_id}.lock"))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.objects_dir())?;
        fs::create_dir_all(self.entries_dir())?;
        fs::create_dir_all(self.versions_dir())?;
        fs::create_dir_all(self.wal_dir())?;
        fs::create_dir_all(self.locks_dir())?;

        let version_path = self.store_dir().join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let store_dir = self.store_dir();
            let mut tmp = NamedTempFile::new_in(&store_dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&store_dir)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.store_dir().join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
