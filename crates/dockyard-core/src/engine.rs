use crate::concurrency::{CancelToken, StoreLock, VersionLock};
use crate::config::{DockyardConfig, SyncConfig};
use crate::derived::{build_graph, build_tool_table, version_steps};
use crate::freeze::check_freezable;
use crate::images::ImageResolver;
use crate::imports::ImportResolver;
use crate::lifecycle::validate_transition;
use crate::parse::{parser_for, Step};
use crate::transaction::TransactionHelper;
use crate::CoreError;
use dockyard_remote::{HttpSourceControl, RegistryClients, SourceControl};
use dockyard_schema::{
    compute_entry_id, compute_version_id, DescriptorLanguage, Diagnostics, Entry, EntryKind,
    Graph, ImageFailure, ReferenceKind, SourceLocator, ToolTable, Version, VersionId,
    VersionState,
};
use dockyard_store::{CatalogStore, FileSession, StoreError, StoreLayout, WriteAheadLog};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Central orchestration engine for the Dockyard catalog.
///
/// Coordinates source control, registries, descriptor parsers and the
/// durable store to register entries, synchronize and freeze versions, and
/// serve their derived artifacts.
pub struct Engine {
    layout: StoreLayout,
    catalog: CatalogStore,
    scm: Arc<dyn SourceControl>,
    registries: Arc<RegistryClients>,
    sync: SyncConfig,
}

/// Everything needed to register an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub source: SourceLocator,
    pub language: DescriptorLanguage,
    pub primary_descriptor: String,
    pub test_parameter: Option<String>,
    pub kind: EntryKind,
}

/// Outcome of synchronizing one reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub version: Version,
    /// Imports and test parameter files that could not be fetched.
    pub missing_files: Vec<String>,
    pub image_failures: Vec<ImageFailure>,
    /// The version was frozen and returned without contacting anything.
    pub unchanged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshFailure {
    pub reference: String,
    pub error: String,
}

/// Outcome of synchronizing every upstream reference of an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub synced: Vec<SyncReport>,
    pub failed: Vec<RefreshFailure>,
    /// Stored references no longer listed upstream. They are kept.
    pub retained: Vec<String>,
}

fn graph_slot(version: &mut Version) -> &mut Option<String> {
    &mut version.graph
}

fn tool_table_slot(version: &mut Version) -> &mut Option<String> {
    &mut version.tool_table
}

impl Engine {
    /// Open (and initialize if needed) the store at `store_root`.
    ///
    /// Interrupted commits from earlier runs are rolled back, unless another
    /// process currently holds the store lock.
    pub fn new(
        store_root: impl Into<PathBuf>,
        scm: Arc<dyn SourceControl>,
        registries: Arc<RegistryClients>,
        sync: SyncConfig,
    ) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(store_root);
        layout.initialize()?;

        match StoreLock::try_exclusive(&layout.store_lock_file()) {
            Ok(Some(_lock)) => {
                if let Err(e) = WriteAheadLog::new(&layout).recover() {
                    warn!("WAL recovery failed: {e}");
                }
            }
            Ok(None) => debug!("store lock held; skipping WAL recovery"),
            Err(e) => warn!("store lock check failed; skipping WAL recovery: {e}"),
        }

        Ok(Self {
            catalog: CatalogStore::new(layout.clone()),
            layout,
            scm,
            registries,
            sync,
        })
    }

    /// Engine wired to the HTTP source-control and registry clients.
    pub fn from_config(config: &DockyardConfig) -> Result<Self, CoreError> {
        Self::new(
            &config.store_root,
            Arc::new(HttpSourceControl::new(config.scm.clone())),
            Arc::new(RegistryClients::new(config.registries.clone())),
            config.sync.clone(),
        )
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn commit(
        &self,
        work: impl FnOnce(&mut FileSession) -> Result<(), StoreError>,
    ) -> Result<(), CoreError> {
        let _lock = StoreLock::shared(&self.layout.store_lock_file())?;
        let mut helper = TransactionHelper::new(FileSession::new(self.layout.clone()));
        helper.run_in_transaction(|session| Ok(work(session)?))
    }

    fn commit_version(&self, version: &Version, expected: Option<u64>) -> Result<(), CoreError> {
        self.commit(|session| session.stage_version(version.clone(), expected))
    }

    fn load_version(&self, version_id: &VersionId) -> Result<Option<Version>, CoreError> {
        match self.catalog.get_version(version_id) {
            Ok(v) => Ok(Some(v)),
            Err(StoreError::VersionNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn require_version(&self, entry: &Entry, reference: &str) -> Result<Version, CoreError> {
        let version_id = compute_version_id(&entry.id, reference);
        self.load_version(&version_id)?
            .ok_or_else(|| CoreError::VersionNotFound(format!("{}@{reference}", entry.path)))
    }

    fn version_lock(&self, version_id: &VersionId) -> Result<VersionLock, CoreError> {
        VersionLock::acquire(&self.layout.version_lock_file(version_id))
    }

    /// Retry `op` while it keeps losing optimistic revision races.
    fn with_retries<T>(
        &self,
        version_id: &VersionId,
        mut op: impl FnMut() -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let attempts = self.sync.retry_attempts.max(1);
        for attempt in 1..=attempts {
            match op() {
                Err(e) if e.is_revision_conflict() => {
                    warn!("version {version_id}: revision conflict (attempt {attempt}/{attempts})");
                }
                other => return other,
            }
        }
        Err(CoreError::Contention {
            version_id: version_id.to_string(),
            attempts,
        })
    }

    // Entries

    /// Register an entry, or update the settings of an existing one.
    /// The id derives from the source locator, so re-registering is
    /// idempotent.
    pub fn register_entry(&self, request: RegisterRequest) -> Result<Entry, CoreError> {
        let id = compute_entry_id(&request.source);
        info!("registering {}", request.source.display_path());
        parser_for(request.language)?;

        let now = chrono::Utc::now().to_rfc3339();
        let created_at = match self.catalog.get_entry(&id) {
            Ok(existing) => existing.created_at,
            Err(StoreError::EntryNotFound(_)) => now.clone(),
            Err(e) => return Err(e.into()),
        };
        let entry = Entry {
            id,
            path: request.source.display_path(),
            source: request.source,
            language: request.language,
            primary_descriptor: request.primary_descriptor,
            test_parameter: request.test_parameter,
            kind: request.kind,
            created_at,
            updated_at: now,
        };
        self.commit(|session| session.stage_entry(entry.clone()))?;
        Ok(entry)
    }

    pub fn get_entry(&self, entry_id: &str) -> Result<Entry, CoreError> {
        self.catalog.get_entry(entry_id).map_err(|e| match e {
            StoreError::EntryNotFound(id) => CoreError::EntryNotFound(id),
            other => other.into(),
        })
    }

    /// Look an entry up by id or by catalog path.
    pub fn find_entry(&self, id_or_path: &str) -> Result<Entry, CoreError> {
        match self.get_entry(id_or_path) {
            Err(CoreError::EntryNotFound(_)) => self
                .list_entries()?
                .into_iter()
                .find(|e| e.path == id_or_path)
                .ok_or_else(|| CoreError::EntryNotFound(id_or_path.to_owned())),
            other => other,
        }
    }

    pub fn list_entries(&self) -> Result<Vec<Entry>, CoreError> {
        Ok(self.catalog.list_entries()?)
    }

    // Versions

    pub fn get_version(&self, entry_id: &str, reference: &str) -> Result<Version, CoreError> {
        let entry = self.get_entry(entry_id)?;
        self.require_version(&entry, reference)
    }

    /// Stored versions of an entry, ordered by reference name.
    pub fn list_versions(&self, entry_id: &str) -> Result<Vec<Version>, CoreError> {
        let entry = self.get_entry(entry_id)?;
        Ok(self.catalog.list_versions(&entry.id)?)
    }

    /// Synchronize one reference of an entry with its upstream state.
    ///
    /// A frozen version is returned as stored without any external call.
    /// Missing imports, unresolvable images and invalid descriptors are
    /// recorded on the version; a missing primary descriptor, an unsupported
    /// language, cancellation or a store failure abort without committing.
    pub fn synchronize(
        &self,
        entry_id: &str,
        reference: &str,
        force_full: bool,
        cancel: &CancelToken,
    ) -> Result<SyncReport, CoreError> {
        let entry = self.get_entry(entry_id)?;
        self.synchronize_entry(&entry, reference, None, force_full, cancel)
    }

    fn synchronize_entry(
        &self,
        entry: &Entry,
        reference: &str,
        kind: Option<ReferenceKind>,
        force_full: bool,
        cancel: &CancelToken,
    ) -> Result<SyncReport, CoreError> {
        info!("synchronizing {}@{reference}", entry.path);
        let version_id = compute_version_id(&entry.id, reference);
        let _lock = self.version_lock(&version_id)?;
        self.with_retries(&version_id, || {
            self.sync_once(entry, &version_id, reference, kind, force_full, cancel)
        })
    }

    fn reference_kind(&self, entry: &Entry, reference: &str) -> ReferenceKind {
        match self.scm.list_references(&entry.source) {
            Ok(refs) => refs
                .into_iter()
                .find(|r| r.name == reference)
                .map_or(ReferenceKind::Branch, |r| r.kind),
            Err(e) => {
                debug!("cannot list references of {}: {e}", entry.path);
                ReferenceKind::Branch
            }
        }
    }

    fn sync_once(
        &self,
        entry: &Entry,
        version_id: &VersionId,
        reference: &str,
        kind: Option<ReferenceKind>,
        force_full: bool,
        cancel: &CancelToken,
    ) -> Result<SyncReport, CoreError> {
        let previous = self.load_version(version_id)?;
        if let Some(frozen) = previous.as_ref().filter(|v| v.frozen) {
            info!("{}@{reference} is frozen; left untouched", entry.path);
            return Ok(SyncReport {
                missing_files: frozen.diagnostics.missing_files.clone(),
                image_failures: frozen.diagnostics.image_failures.clone(),
                version: frozen.clone(),
                unchanged: true,
            });
        }
        if let Some(prev) = &previous {
            validate_transition(prev.state(), VersionState::Mutable)?;
        }

        let parser = parser_for(entry.language)?;
        cancel.check()?;
        let files = ImportResolver::new(self.scm.as_ref(), parser.as_ref(), self.sync.workers, cancel)
            .resolve(
                &entry.source,
                reference,
                &entry.primary_descriptor,
                entry.test_parameter.as_deref(),
            )?;
        let outcome = parser.parse(&files);
        if let Some(reason) = &outcome.error {
            warn!("{}@{reference}: invalid descriptor: {reason}", entry.path);
        }

        let previous_images = previous.as_ref().map_or(&[][..], |p| p.images.as_slice());
        let resolution = ImageResolver::new(&self.registries, self.sync.workers, cancel).resolve(
            &outcome.declared_images,
            previous_images,
            force_full,
        )?;
        cancel.check()?;

        let kind = match (&previous, kind) {
            (_, Some(kind)) => kind,
            (Some(prev), None) => prev.reference_kind,
            (None, None) => self.reference_kind(entry, reference),
        };
        let expected = previous.as_ref().map(|p| p.revision);
        let mut version = previous.unwrap_or_else(|| {
            Version::new(version_id.clone(), entry.id.clone(), reference, kind)
        });
        version.reference_kind = kind;
        version.files = files.to_source_files();
        version.images = resolution.images;
        version.valid = outcome.valid;
        version.metadata = outcome.metadata;
        version.parsed_info = outcome.parsed_info;
        version.diagnostics = Diagnostics {
            missing_files: files.missing().to_vec(),
            image_failures: resolution.failures,
            parse_error: outcome.error,
        };
        version.clear_derived();
        let now = chrono::Utc::now().to_rfc3339();
        version.updated_at.clone_from(&now);
        version.synced_at = Some(now);
        version.revision = expected.unwrap_or(0) + 1;

        self.commit_version(&version, expected)?;
        info!(
            "{}@{reference}: {} file(s), {} image(s), revision {}",
            entry.path,
            version.files.len(),
            version.images.len(),
            version.revision
        );
        Ok(SyncReport {
            missing_files: version.diagnostics.missing_files.clone(),
            image_failures: version.diagnostics.image_failures.clone(),
            version,
            unchanged: false,
        })
    }

    /// Synchronize every reference currently listed upstream. Failures are
    /// collected per reference; cancellation stops the whole refresh.
    pub fn refresh(
        &self,
        entry_id: &str,
        force_full: bool,
        cancel: &CancelToken,
    ) -> Result<RefreshReport, CoreError> {
        let entry = self.get_entry(entry_id)?;
        info!("refreshing {}", entry.path);
        let upstream = self.scm.list_references(&entry.source)?;

        let mut report = RefreshReport::default();
        for reference in &upstream {
            cancel.check()?;
            match self.synchronize_entry(
                &entry,
                &reference.name,
                Some(reference.kind),
                force_full,
                cancel,
            ) {
                Ok(synced) => report.synced.push(synced),
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(e) => {
                    warn!("{}@{}: {e}", entry.path, reference.name);
                    report.failed.push(RefreshFailure {
                        reference: reference.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.retained = self
            .catalog
            .list_versions(&entry.id)?
            .into_iter()
            .map(|v| v.reference)
            .filter(|name| !upstream.iter().any(|r| &r.name == name))
            .collect();
        Ok(report)
    }

    /// Freeze a version into an immutable snapshot.
    ///
    /// Every image must be resolved and pinned; otherwise a
    /// [`FreezeError`](crate::FreezeError) names the offenders and nothing
    /// changes. Both derived artifacts are computed before the flag flips.
    /// Freezing a frozen version returns it unchanged.
    pub fn freeze(&self, entry_id: &str, reference: &str) -> Result<Version, CoreError> {
        let entry = self.get_entry(entry_id)?;
        info!("freezing {}@{reference}", entry.path);
        let version_id = compute_version_id(&entry.id, reference);
        let _lock = self.version_lock(&version_id)?;
        self.with_retries(&version_id, || {
            let mut version = self.require_version(&entry, reference)?;
            if version.frozen {
                debug!("{}@{reference} already frozen", entry.path);
                return Ok(version);
            }
            check_freezable(&version)?;
            validate_transition(version.state(), VersionState::Frozen)?;

            let parser = parser_for(entry.language)?;
            let steps = version_steps(&version, parser.as_ref());
            if version.graph.is_none() {
                version.graph = Some(serde_json::to_string(&build_graph(&steps))?);
            }
            if version.tool_table.is_none() {
                version.tool_table = Some(serde_json::to_string(&build_tool_table(
                    &steps,
                    &version.images,
                ))?);
            }
            let expected = version.revision;
            version.frozen = true;
            version.revision += 1;
            version.updated_at = chrono::Utc::now().to_rfc3339();
            self.commit_version(&version, Some(expected))?;
            info!("{}@{reference} frozen", entry.path);
            Ok(version)
        })
    }

    // Derived artifacts

    /// Step dependency graph, computed on first request and cached on the
    /// version until its next synchronization.
    pub fn get_graph(&self, entry_id: &str, reference: &str) -> Result<Graph, CoreError> {
        self.artifact(entry_id, reference, graph_slot, |_, steps| build_graph(steps))
    }

    /// Tool table, computed on first request and cached like the graph.
    pub fn get_tool_table(&self, entry_id: &str, reference: &str) -> Result<ToolTable, CoreError> {
        self.artifact(entry_id, reference, tool_table_slot, |version, steps| {
            build_tool_table(steps, &version.images)
        })
    }

    fn artifact<T>(
        &self,
        entry_id: &str,
        reference: &str,
        slot: fn(&mut Version) -> &mut Option<String>,
        build: impl Fn(&Version, &[Step]) -> T,
    ) -> Result<T, CoreError>
    where
        T: Serialize + DeserializeOwned,
    {
        let entry = self.get_entry(entry_id)?;
        let mut version = self.require_version(&entry, reference)?;
        if let Some(cached) = slot(&mut version).as_deref() {
            return Ok(serde_json::from_str(cached)?);
        }

        // Re-read under the lock so a concurrent sync either finishes first
        // or waits for this write.
        let _lock = self.version_lock(&version.id)?;
        let mut version = self.require_version(&entry, reference)?;
        if let Some(cached) = slot(&mut version).as_deref() {
            return Ok(serde_json::from_str(cached)?);
        }

        let parser = parser_for(entry.language)?;
        let value = build(&version, &version_steps(&version, parser.as_ref()));
        let expected = version.revision;
        *slot(&mut version) = Some(serde_json::to_string(&value)?);
        version.revision += 1;
        match self.commit_version(&version, Some(expected)) {
            Ok(()) => debug!("{}@{reference}: derived artifact cached", entry.path),
            Err(e) if e.is_revision_conflict() => {
                warn!("{}@{reference}: version moved on, artifact not cached", entry.path);
            }
            Err(e) => return Err(e),
        }
        Ok(value)
    }
}
