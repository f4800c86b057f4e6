//! Persistence of widget instances and their settings.
//!
//! All instances live in one JSON document:
//!
//! ```json
//! { "format_version": 1, "widgets": [ { "id": "...", "plugin_id": "...",
//!   "type_tag": "...", "pinned": true, "settings": { ... } } ] }
//! ```
//!
//! A settings block is decoded only when its plugin is loaded. Otherwise it
//! is kept as the exact bytes read and written back unchanged. Records that
//! cannot be read at all are retained the same way, so nothing written by a
//! newer host or a missing plugin is ever lost by a save.
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;

use crate::kernel::component::KernelComponent;
use crate::kernel::constants::SETTINGS_FORMAT_VERSION;
use crate::kernel::error::Result as KernelResult;
use crate::plugin_system::error::WidgetCallError;
use crate::plugin_system::traits::WidgetSettings;
use crate::storage::error::{StorageResult, StorageSystemError};
use crate::storage::local::LocalStorageProvider;
use crate::storage::provider::StorageProvider;

/// Decodes settings blocks for plugins that are currently loaded.
pub trait SettingsResolver: Send + Sync {
    /// `None` when the owning plugin is not loaded.
    fn resolve_settings(
        &self,
        plugin_id: &str,
        type_tag: &str,
        raw: &str,
    ) -> Option<Result<Box<dyn WidgetSettings>, WidgetCallError>>;
}

/// Resolver for when no plugin is loaded: every block stays verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreserveAll;

impl SettingsResolver for PreserveAll {
    fn resolve_settings(
        &self,
        _plugin_id: &str,
        _type_tag: &str,
        _raw: &str,
    ) -> Option<Result<Box<dyn WidgetSettings>, WidgetCallError>> {
        None
    }
}

/// Settings of one widget instance.
#[derive(Debug, Clone)]
pub enum SettingsBlob {
    /// Decoded by the owning plugin.
    Typed(Box<dyn WidgetSettings>),
    /// Kept exactly as read because the owning plugin is not loaded.
    Preserved(Box<RawValue>),
}

impl SettingsBlob {
    pub fn typed<S: WidgetSettings>(settings: S) -> Self {
        SettingsBlob::Typed(Box::new(settings))
    }

    pub fn preserved(raw: &str) -> Result<Self, serde_json::Error> {
        RawValue::from_string(raw.to_string()).map(SettingsBlob::Preserved)
    }

    pub fn as_typed(&self) -> Option<&dyn WidgetSettings> {
        match self {
            SettingsBlob::Typed(settings) => Some(settings.as_ref()),
            SettingsBlob::Preserved(_) => None,
        }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.as_typed().and_then(|s| s.downcast_ref::<T>())
    }

    pub fn raw_json(&self) -> Option<&str> {
        match self {
            SettingsBlob::Typed(_) => None,
            SettingsBlob::Preserved(raw) => Some(raw.get()),
        }
    }

    pub fn is_preserved(&self) -> bool {
        matches!(self, SettingsBlob::Preserved(_))
    }

    /// Serialized form of the settings, whichever variant holds them.
    pub fn to_raw(&self) -> Result<Box<RawValue>, serde_json::Error> {
        match self {
            SettingsBlob::Typed(settings) => serde_json::value::to_raw_value(&settings.to_json()?),
            SettingsBlob::Preserved(raw) => Ok(raw.clone()),
        }
    }
}

impl Serialize for SettingsBlob {
    /// Both variants are written compact, so demoting a block leaves the file unchanged.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_raw().map_err(S::Error::custom)?.serialize(serializer)
    }
}

/// Window position and size, owned by the window layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// One persisted widget instance.
#[derive(Debug, Clone)]
pub struct WidgetInstance {
    pub id: String,
    pub plugin_id: String,
    pub type_tag: String,
    /// Pinned instances are enabled and get a window.
    pub pinned: bool,
    pub placement: Option<Placement>,
    pub settings: SettingsBlob,
}

#[derive(Serialize)]
struct InstanceRecordRef<'a> {
    id: &'a str,
    plugin_id: &'a str,
    type_tag: &'a str,
    pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    placement: Option<Placement>,
    settings: &'a SettingsBlob,
}

#[derive(Deserialize)]
struct InstanceRecord {
    id: String,
    plugin_id: String,
    type_tag: String,
    #[serde(default = "default_pinned")]
    pinned: bool,
    #[serde(default)]
    placement: Option<Placement>,
    settings: Box<RawValue>,
}

fn default_pinned() -> bool {
    true
}

#[derive(Serialize)]
#[serde(untagged)]
enum RecordRef<'a> {
    Instance(InstanceRecordRef<'a>),
    Retained(&'a RawValue),
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    format_version: u32,
    widgets: Vec<RecordRef<'a>>,
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    format_version: u32,
    #[serde(default)]
    widgets: Vec<Box<RawValue>>,
}

#[derive(Debug, Clone)]
enum StoredRecord {
    Instance(WidgetInstance),
    Unreadable(Box<RawValue>),
}

/// Canonical owner of the persisted widget instances.
///
/// Mutations are applied to a copy of the list, which is written out and
/// only then swapped in. A failed write leaves both the file and the
/// in-memory list as they were. All mutations hold one write gate.
pub struct SettingsStore {
    name: &'static str,
    provider: Arc<dyn StorageProvider>,
    file: PathBuf,
    records: Mutex<Vec<StoredRecord>>,
    write_gate: tokio::sync::Mutex<()>,
}

impl SettingsStore {
    /// `file` is relative to the provider's base.
    pub fn new(provider: Arc<dyn StorageProvider>, file: impl Into<PathBuf>) -> Self {
        Self {
            name: "SettingsStore",
            provider,
            file: file.into(),
            records: Mutex::new(Vec::new()),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Store backed by the local filesystem at `path`.
    pub fn at_path(path: &Path) -> Self {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file = path.file_name().map(PathBuf::from).unwrap_or_else(|| path.to_path_buf());
        Self::new(Arc::new(LocalStorageProvider::new(parent.to_path_buf())), file)
    }

    pub fn path(&self) -> PathBuf {
        self.provider.resolve(&self.file)
    }

    /// Reads the settings file, replacing the in-memory list. A missing file
    /// is an empty list. A file that is not a settings document at all is
    /// copied aside with a `.corrupt` suffix and treated as empty.
    pub async fn load_all(&self, resolver: &dyn SettingsResolver) -> StorageResult<Vec<WidgetInstance>> {
        let provider = self.provider.clone();
        let file = self.file.clone();
        let content = tokio::task::spawn_blocking(move || {
            if provider.is_file(&file) {
                provider.read_to_string(&file).map(Some)
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(|e| join_error("load_all", &self.file, e))??;
        let _gate = self.write_gate.lock().await;

        let records = match content {
            None => {
                debug!("No settings file at '{}'", self.path().display());
                Vec::new()
            }
            Some(text) => match serde_json::from_str::<Document>(&text) {
                Ok(document) => decode_document(document, resolver),
                Err(e) => {
                    error!("Settings file '{}' is unreadable: {}", self.path().display(), e);
                    self.set_aside_corrupt().await;
                    Vec::new()
                }
            },
        };

        let retained = records
            .iter()
            .filter(|r| matches!(r, StoredRecord::Unreadable(_)))
            .count();
        *self.records.lock() = records;
        let instances = self.instances();
        info!(
            "Loaded {} widget instance(s) from '{}'{}",
            instances.len(),
            self.path().display(),
            if retained > 0 {
                format!(", {} unreadable record(s) retained", retained)
            } else {
                String::new()
            }
        );
        Ok(instances)
    }

    /// Replaces every instance with `instances` and persists. Unreadable
    /// records are kept.
    pub async fn save_all(&self, instances: Vec<WidgetInstance>) -> StorageResult<()> {
        self.commit(|records| {
            let retained: Vec<StoredRecord> = records
                .drain(..)
                .filter(|r| matches!(r, StoredRecord::Unreadable(_)))
                .collect();
            records.extend(instances.into_iter().map(StoredRecord::Instance));
            records.extend(retained);
            Ok(())
        })
        .await
    }

    pub fn load_one(&self, instance_id: &str) -> Option<SettingsBlob> {
        self.get(instance_id).map(|i| i.settings)
    }

    pub async fn save_one(&self, instance_id: &str, settings: SettingsBlob) -> StorageResult<()> {
        self.update(instance_id, |instance| instance.settings = settings)
            .await
            .map(|_| ())
    }

    /// Inserts or replaces an instance by id and persists.
    pub async fn upsert(&self, instance: WidgetInstance) -> StorageResult<()> {
        self.commit(|records| {
            match records.iter_mut().find_map(|r| match r {
                StoredRecord::Instance(existing) if existing.id == instance.id => Some(existing),
                _ => None,
            }) {
                Some(existing) => *existing = instance,
                None => records.push(StoredRecord::Instance(instance)),
            }
            Ok(())
        })
        .await
    }

    /// Applies `change` to one instance and persists. Returns the updated instance.
    pub async fn update(
        &self,
        instance_id: &str,
        change: impl FnOnce(&mut WidgetInstance),
    ) -> StorageResult<WidgetInstance> {
        self.commit(|records| {
            let instance = records
                .iter_mut()
                .find_map(|r| match r {
                    StoredRecord::Instance(i) if i.id == instance_id => Some(i),
                    _ => None,
                })
                .ok_or_else(|| StorageSystemError::InstanceNotFound(instance_id.to_string()))?;
            change(instance);
            Ok(instance.clone())
        })
        .await
    }

    pub async fn remove(&self, instance_id: &str) -> StorageResult<Option<WidgetInstance>> {
        if self.get(instance_id).is_none() {
            return Ok(None);
        }
        self.commit(|records| {
            let position = records
                .iter()
                .position(|r| matches!(r, StoredRecord::Instance(i) if i.id == instance_id));
            Ok(position.and_then(|p| match records.remove(p) {
                StoredRecord::Instance(i) => Some(i),
                StoredRecord::Unreadable(_) => None,
            }))
        })
        .await
    }

    pub fn get(&self, instance_id: &str) -> Option<WidgetInstance> {
        self.records.lock().iter().find_map(|r| match r {
            StoredRecord::Instance(i) if i.id == instance_id => Some(i.clone()),
            _ => None,
        })
    }

    pub fn instances(&self) -> Vec<WidgetInstance> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                StoredRecord::Instance(i) => Some(i.clone()),
                StoredRecord::Unreadable(_) => None,
            })
            .collect()
    }

    pub fn instances_of(&self, plugin_id: &str) -> Vec<WidgetInstance> {
        self.instances()
            .into_iter()
            .filter(|i| i.plugin_id == plugin_id)
            .collect()
    }

    pub fn retained_count(&self) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| matches!(r, StoredRecord::Unreadable(_)))
            .count()
    }

    /// Turns the typed settings of a plugin being unloaded back into raw
    /// blocks. Nothing is written; the serialized form is unchanged.
    pub async fn demote_plugin(&self, plugin_id: &str) -> usize {
        let _gate = self.write_gate.lock().await;
        let mut demoted = 0;
        for record in self.records.lock().iter_mut() {
            let StoredRecord::Instance(instance) = record else {
                continue;
            };
            if instance.plugin_id != plugin_id || instance.settings.is_preserved() {
                continue;
            }
            match instance.settings.to_raw() {
                Ok(raw) => {
                    instance.settings = SettingsBlob::Preserved(raw);
                    demoted += 1;
                }
                Err(e) => warn!(
                    "Could not serialize settings of widget '{}', keeping them in memory: {}",
                    instance.id, e
                ),
            }
        }
        demoted
    }

    /// Decodes preserved settings of a plugin that has just been loaded.
    pub async fn promote_plugin(&self, plugin_id: &str, resolver: &dyn SettingsResolver) -> usize {
        let _gate = self.write_gate.lock().await;
        let mut promoted = 0;
        for record in self.records.lock().iter_mut() {
            let StoredRecord::Instance(instance) = record else {
                continue;
            };
            if instance.plugin_id != plugin_id {
                continue;
            }
            if let SettingsBlob::Preserved(raw) = &instance.settings {
                let resolved = resolve_blob(resolver, &instance.id, plugin_id, &instance.type_tag, raw.clone());
                if !resolved.is_preserved() {
                    promoted += 1;
                }
                instance.settings = resolved;
            }
        }
        promoted
    }

    /// Applies `change` to a copy of the records, writes the copy and swaps
    /// it in. Nothing changes in memory unless the write succeeds.
    async fn commit<R>(
        &self,
        change: impl FnOnce(&mut Vec<StoredRecord>) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let _gate = self.write_gate.lock().await;
        let mut next = self.records.lock().clone();
        let outcome = change(&mut next)?;
        let bytes = render(&next)?;
        let provider = self.provider.clone();
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || provider.write_bytes(&file, &bytes))
            .await
            .map_err(|e| join_error("persist", &self.file, e))??;
        *self.records.lock() = next;
        debug!("Persisted widget settings to '{}'", self.path().display());
        Ok(outcome)
    }

    async fn set_aside_corrupt(&self) {
        let mut backup = self.file.clone().into_os_string();
        backup.push(".corrupt");
        let backup = PathBuf::from(backup);
        let provider = self.provider.clone();
        let file = self.file.clone();
        let result = tokio::task::spawn_blocking(move || provider.copy(&file, &backup)).await;
        match result {
            Ok(Ok(())) => warn!("Copied unreadable settings file aside with a '.corrupt' suffix"),
            Ok(Err(e)) => error!("Could not back up unreadable settings file: {}", e),
            Err(e) => error!("Could not back up unreadable settings file: {}", e),
        }
    }
}

fn render(records: &[StoredRecord]) -> StorageResult<Vec<u8>> {
    let document = DocumentRef {
        format_version: SETTINGS_FORMAT_VERSION,
        widgets: records
            .iter()
            .map(|r| match r {
                StoredRecord::Instance(i) => RecordRef::Instance(InstanceRecordRef {
                    id: &i.id,
                    plugin_id: &i.plugin_id,
                    type_tag: &i.type_tag,
                    pinned: i.pinned,
                    placement: i.placement,
                    settings: &i.settings,
                }),
                StoredRecord::Unreadable(raw) => RecordRef::Retained(raw),
            })
            .collect(),
    };
    serde_json::to_vec_pretty(&document).map_err(|e| StorageSystemError::serialization("json", e))
}

fn decode_document(document: Document, resolver: &dyn SettingsResolver) -> Vec<StoredRecord> {
    if document.format_version > SETTINGS_FORMAT_VERSION {
        warn!(
            "Settings file has format version {}, newer than supported {}",
            document.format_version, SETTINGS_FORMAT_VERSION
        );
    }
    let mut seen = HashSet::new();
    document
        .widgets
        .into_iter()
        .map(|raw| decode_record(raw, resolver, &mut seen))
        .collect()
}

fn decode_record(raw: Box<RawValue>, resolver: &dyn SettingsResolver, seen: &mut HashSet<String>) -> StoredRecord {
    let record: InstanceRecord = match serde_json::from_str(raw.get()) {
        Ok(record) => record,
        Err(e) => {
            warn!("Retaining unreadable widget record: {}", e);
            return StoredRecord::Unreadable(raw);
        }
    };
    if !seen.insert(record.id.clone()) {
        warn!("Retaining duplicate widget record '{}' as unreadable", record.id);
        return StoredRecord::Unreadable(raw);
    }
    let settings = resolve_blob(resolver, &record.id, &record.plugin_id, &record.type_tag, record.settings);
    StoredRecord::Instance(WidgetInstance {
        id: record.id,
        plugin_id: record.plugin_id,
        type_tag: record.type_tag,
        pinned: record.pinned,
        placement: record.placement,
        settings,
    })
}

fn resolve_blob(
    resolver: &dyn SettingsResolver,
    instance_id: &str,
    plugin_id: &str,
    type_tag: &str,
    raw: Box<RawValue>,
) -> SettingsBlob {
    match resolver.resolve_settings(plugin_id, type_tag, raw.get()) {
        Some(Ok(settings)) => SettingsBlob::Typed(settings),
        Some(Err(e)) => {
            warn!("Settings of widget '{}' kept verbatim: {}", instance_id, e);
            SettingsBlob::Preserved(raw)
        }
        None => SettingsBlob::Preserved(raw),
    }
}

fn join_error(operation: &str, file: &Path, err: tokio::task::JoinError) -> StorageSystemError {
    StorageSystemError::OperationFailed {
        operation: operation.to_string(),
        path: Some(file.to_path_buf()),
        message: format!("background task failed: {}", err),
    }
}

impl fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsStore")
            .field("provider", &self.provider)
            .field("file", &self.file)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KernelComponent for SettingsStore {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&self) -> KernelResult<()> {
        if let Some(parent) = self.file.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.provider.create_dir_all(parent)?;
        } else {
            self.provider.create_dir_all(Path::new(""))?;
        }
        Ok(())
    }

    async fn start(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn stop(&self) -> KernelResult<()> {
        Ok(())
    }
}
