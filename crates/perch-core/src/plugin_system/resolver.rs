//! Plugin discovery and validation.
//!
//! Each configured root is scanned one level deep. A subdirectory is a
//! plugin candidate when it holds a `manifest.json`; candidates carrying the
//! deletion marker are removed from disk instead. Candidates failing
//! validation are skipped with a logged reason, and surviving manifests are
//! de-duplicated by plugin id.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use semver::Version;
use tokio::fs;

use crate::kernel::constants::{DELETE_MARKER_FILE_NAME, MANIFEST_FILE_NAME, SUPPORTED_LANGUAGES};
use crate::plugin_system::error::{PluginSystemError, PluginSystemErrorSource};
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::version::host_api_version;

/// A candidate directory that did not yield a usable manifest.
#[derive(Debug)]
pub struct SkippedPlugin {
    pub dir: PathBuf,
    pub reason: PluginSystemError,
}

/// Result of a discovery pass.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Unique, validated manifests sorted by id.
    pub manifests: Vec<PluginManifest>,
    /// Manifests that lost de-duplication.
    pub duplicates: Vec<PluginManifest>,
    pub skipped: Vec<SkippedPlugin>,
    /// Plugin directories removed because of a pending-deletion marker.
    pub removed: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MetadataResolver {
    supported_languages: Vec<String>,
    host_api: Version,
}

impl Default for MetadataResolver {
    fn default() -> Self {
        Self::new(
            SUPPORTED_LANGUAGES.iter().map(|l| l.to_string()).collect(),
            host_api_version(),
        )
    }
}

impl MetadataResolver {
    pub fn new(supported_languages: Vec<String>, host_api: Version) -> Self {
        Self {
            supported_languages,
            host_api,
        }
    }

    /// Scans every root and returns the unique, validated manifests.
    /// Missing roots are skipped silently.
    pub async fn resolve(&self, roots: &[PathBuf]) -> Resolution {
        let mut resolution = Resolution::default();
        let mut candidates = Vec::new();

        for root in roots {
            match fs::metadata(root).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    warn!("Plugin root '{}' is not a directory", root.display());
                    continue;
                }
                Err(e) => {
                    debug!("Skipping plugin root '{}': {}", root.display(), e);
                    continue;
                }
            }
            for dir in Self::plugin_dirs(root).await {
                match self.inspect(&dir).await {
                    Ok(Inspection::Manifest(manifest)) => candidates.push(manifest),
                    Ok(Inspection::Removed) => resolution.removed.push(dir),
                    Ok(Inspection::NotAPlugin) => {}
                    Err(reason) => {
                        warn!("Skipping plugin at '{}': {}", dir.display(), reason);
                        resolution.skipped.push(SkippedPlugin { dir, reason });
                    }
                }
            }
        }

        let (manifests, duplicates) = deduplicate(candidates);
        info!(
            "Plugin discovery found {} plugin(s), {} duplicate(s) discarded, {} skipped",
            manifests.len(),
            duplicates.len(),
            resolution.skipped.len()
        );
        resolution.manifests = manifests;
        resolution.duplicates = duplicates;
        resolution
    }

    /// Checks a manifest against the host: language, API compatibility and
    /// entry module location. The entry module must exist on disk unless
    /// `entry_on_disk` is false, as for built-in modules.
    pub fn validate(&self, manifest: &PluginManifest, entry_on_disk: bool) -> Result<(), PluginSystemError> {
        if !self
            .supported_languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(&manifest.language))
        {
            return Err(PluginSystemError::UnsupportedLanguage {
                plugin_id: manifest.id.clone(),
                language: manifest.language.clone(),
            });
        }

        if let Some(range) = &manifest.api_version {
            if !range.includes(&self.host_api) {
                return Err(PluginSystemError::IncompatibleApi {
                    plugin_id: manifest.id.clone(),
                    required: range.to_string(),
                    host: self.host_api.to_string(),
                });
            }
        }

        if !manifest.has_safe_entry_module() {
            return Err(PluginSystemError::InvalidEntryModule {
                plugin_id: manifest.id.clone(),
                entry_module: manifest.entry_module.clone(),
            });
        }

        if entry_on_disk && !manifest.entry_module_path().is_file() {
            return Err(PluginSystemError::MissingEntryModule {
                plugin_id: manifest.id.clone(),
                path: manifest.entry_module_path(),
            });
        }
        Ok(())
    }

    async fn plugin_dirs(root: &Path) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        let mut entries = match fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read plugin root '{}': {}", root.display(), e);
                return dirs;
            }
        };
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                    if is_dir {
                        dirs.push(entry.path());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Error while listing plugin root '{}': {}", root.display(), e);
                    break;
                }
            }
        }
        dirs.sort();
        dirs
    }

    async fn inspect(&self, dir: &Path) -> Result<Inspection, PluginSystemError> {
        // A half-uninstalled plugin may have lost its manifest already.
        if fs::try_exists(dir.join(DELETE_MARKER_FILE_NAME)).await.unwrap_or(false) {
            info!("Removing plugin directory '{}' marked for deletion", dir.display());
            fs::remove_dir_all(dir).await.map_err(|e| PluginSystemError::LoadingError {
                plugin_id: dir.display().to_string(),
                path: Some(dir.to_path_buf()),
                source: Box::new(PluginSystemErrorSource::Io(e)),
            })?;
            return Ok(Inspection::Removed);
        }

        let manifest_path = dir.join(MANIFEST_FILE_NAME);
        if !fs::try_exists(&manifest_path).await.unwrap_or(false) {
            return Ok(Inspection::NotAPlugin);
        }

        let content = fs::read_to_string(&manifest_path).await.map_err(|e| {
            PluginSystemError::ManifestError {
                path: manifest_path.clone(),
                message: "Failed to read manifest".to_string(),
                source: Some(Box::new(e)),
            }
        })?;
        let manifest = PluginManifest::from_json_str(&content, &manifest_path, dir.to_path_buf())?;
        self.validate(&manifest, true)?;
        Ok(Inspection::Manifest(manifest))
    }
}

enum Inspection {
    Manifest(PluginManifest),
    Removed,
    NotAPlugin,
}

/// Keeps, per plugin id, the single manifest whose version is strictly
/// newer than every other manifest with that id. When no such manifest
/// exists (a tie for the highest version) every manifest of that id is
/// discarded. Returns `(kept, discarded)`, both sorted by id.
pub fn deduplicate(manifests: Vec<PluginManifest>) -> (Vec<PluginManifest>, Vec<PluginManifest>) {
    let mut by_id: BTreeMap<String, Vec<PluginManifest>> = BTreeMap::new();
    for manifest in manifests {
        by_id.entry(manifest.id.clone()).or_default().push(manifest);
    }

    let mut kept = Vec::new();
    let mut discarded = Vec::new();
    for (id, mut group) in by_id {
        if group.len() == 1 {
            kept.append(&mut group);
            continue;
        }
        let winner = (0..group.len()).find(|&i| {
            group
                .iter()
                .enumerate()
                .all(|(j, other)| i == j || group[i].version.is_newer_than(&other.version))
        });
        match winner {
            Some(i) => {
                let chosen = group.swap_remove(i);
                info!(
                    "Plugin '{}' found {} times, keeping v{} from '{}'",
                    id,
                    group.len() + 1,
                    chosen.version,
                    chosen.plugin_base_dir.display()
                );
                kept.push(chosen);
            }
            None => warn!(
                "Plugin '{}' found {} times with no single newest version, discarding all",
                id,
                group.len()
            ),
        }
        group.sort_by(|a, b| a.plugin_base_dir.cmp(&b.plugin_base_dir));
        discarded.append(&mut group);
    }
    (kept, discarded)
}
