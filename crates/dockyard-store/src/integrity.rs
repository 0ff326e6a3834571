use crate::catalog::CatalogStore;
use crate::layout::StoreLayout;
use crate::StoreError;

#[derive(Debug, Default)]
pub struct IntegrityReport {
    pub objects_checked: usize,
    pub objects_passed: usize,
    pub entries_checked: usize,
    pub entries_passed: usize,
    pub versions_checked: usize,
    pub versions_passed: usize,
    pub failed: Vec<IntegrityFailure>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct IntegrityFailure {
    pub id: String,
    pub reason: String,
}

fn describe(kind: &str, err: &StoreError) -> String {
    match err {
        StoreError::IntegrityFailure { actual, .. } => format!("{kind} checksum mismatch: got {actual}"),
        StoreError::ObjectNotFound(sum) => format!("{kind} references missing object {sum}"),
        other => format!("{kind} read error: {other}"),
    }
}

/// Re-hash every content object, verify every record checksum, and check
/// that each version's file contents are present and intact.
pub fn verify_store_integrity(layout: &StoreLayout) -> Result<IntegrityReport, StoreError> {
    let catalog = CatalogStore::new(layout.clone());
    let objects = catalog.objects();

    let all_objects = objects.list()?;
    let mut report = IntegrityReport {
        objects_checked: all_objects.len(),
        ..Default::default()
    };

    for sum in &all_objects {
        match objects.get(sum) {
            Ok(_) => report.objects_passed += 1,
            Err(e) => report.failed.push(IntegrityFailure {
                id: sum.clone(),
                reason: describe("object", &e),
            }),
        }
    }

    let entry_dir = layout.entries_dir();
    if entry_dir.exists() {
        for dir_entry in std::fs::read_dir(entry_dir)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            report.entries_checked += 1;
            match catalog.get_entry(&name) {
                Ok(_) => report.entries_passed += 1,
                Err(e) => report.failed.push(IntegrityFailure {
                    id: name,
                    reason: describe("entry", &e),
                }),
            }
        }
    }

    for id in catalog.list_version_ids()? {
        report.versions_checked += 1;
        match catalog.get_version(&id) {
            Ok(_) => report.versions_passed += 1,
            Err(e) => report.failed.push(IntegrityFailure {
                id,
                reason: describe("version", &e),
            }),
        }
    }

    Ok(report)
}
