use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::kernel::constants::SUPPORTED_LANGUAGES;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::version::{PluginVersion, VersionRange};

/// Size of a widget window, in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSize {
    pub width: u32,
    pub height: u32,
}

impl WidgetSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A widget type offered by a plugin, identified by its type tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetTypeDescriptor {
    pub type_tag: String,
    #[serde(default)]
    pub name: Option<String>,
    pub default_size: WidgetSize,
    #[serde(default)]
    pub min_size: Option<WidgetSize>,
    #[serde(default)]
    pub max_size: Option<WidgetSize>,
    /// Icon paths relative to the plugin directory.
    #[serde(default)]
    pub icons: Vec<String>,
}

impl WidgetTypeDescriptor {
    pub fn new(type_tag: &str, default_size: WidgetSize) -> Self {
        Self {
            type_tag: type_tag.to_string(),
            name: None,
            default_size,
            min_size: None,
            max_size: None,
            icons: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.type_tag)
    }
}

/// Describes a widget plugin: its identity, entry module and widget types.
#[derive(Debug, Clone)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: PluginVersion,
    pub description: String,
    pub author: Option<String>,
    /// Language the entry module targets. Only supported languages are loaded.
    pub language: String,
    /// Entry module path, relative to `plugin_base_dir`.
    pub entry_module: String,
    /// Host API versions this plugin works against. `None` accepts any host.
    pub api_version: Option<VersionRange>,
    pub widgets: Vec<WidgetTypeDescriptor>,
    /// Disabled plugins are discovered and listed but never loaded.
    pub disabled: bool,
    pub preinstalled: bool,
    pub plugin_base_dir: PathBuf,
}

#[derive(Deserialize)]
struct RawPluginManifest {
    id: String,
    name: String,
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default = "default_language")]
    language: String,
    entry_module: String,
    #[serde(default)]
    api_version: Option<String>,
    #[serde(default)]
    widgets: Vec<WidgetTypeDescriptor>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    preinstalled: bool,
}

fn default_language() -> String {
    SUPPORTED_LANGUAGES[0].to_string()
}

impl PluginManifest {
    /// Parses a `manifest.json` body. `plugin_base_dir` is the directory the
    /// manifest was found in.
    pub fn from_json_str(
        content: &str,
        manifest_path: &Path,
        plugin_base_dir: PathBuf,
    ) -> Result<Self, PluginSystemError> {
        let raw: RawPluginManifest =
            serde_json::from_str(content).map_err(|e| PluginSystemError::ManifestError {
                path: manifest_path.to_path_buf(),
                message: format!("Failed to parse manifest JSON: {}", e),
                source: Some(Box::new(e)),
            })?;

        if raw.id.trim().is_empty() {
            return Err(PluginSystemError::ManifestError {
                path: manifest_path.to_path_buf(),
                message: "Plugin id must not be empty".to_string(),
                source: None,
            });
        }

        let version = PluginVersion::parse(&raw.version).map_err(|e| {
            PluginSystemError::ManifestError {
                path: manifest_path.to_path_buf(),
                message: format!("Invalid version '{}'", raw.version),
                source: Some(Box::new(e)),
            }
        })?;

        let api_version = match raw.api_version.as_deref() {
            Some(constraint) => Some(VersionRange::from_constraint(constraint).map_err(|e| {
                PluginSystemError::ManifestError {
                    path: manifest_path.to_path_buf(),
                    message: format!("Invalid api_version constraint '{}'", constraint),
                    source: Some(Box::new(e)),
                }
            })?),
            None => None,
        };

        Ok(Self {
            id: raw.id,
            name: raw.name,
            version,
            description: raw.description,
            author: raw.author,
            language: raw.language,
            entry_module: raw.entry_module,
            api_version,
            widgets: raw.widgets,
            disabled: raw.disabled,
            preinstalled: raw.preinstalled,
            plugin_base_dir,
        })
    }

    pub fn entry_module_path(&self) -> PathBuf {
        self.plugin_base_dir.join(&self.entry_module)
    }

    pub fn widget_type(&self, type_tag: &str) -> Option<&WidgetTypeDescriptor> {
        self.widgets.iter().find(|w| w.type_tag == type_tag)
    }

    /// True when `entry_module` stays inside the plugin directory.
    pub fn has_safe_entry_module(&self) -> bool {
        let path = Path::new(&self.entry_module);
        !self.entry_module.is_empty()
            && path.is_relative()
            && !path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
    }
}

/// Builder used for built-in plugins and tests.
pub struct ManifestBuilder {
    manifest: PluginManifest,
}

impl ManifestBuilder {
    pub fn new(id: &str, name: &str, version: PluginVersion) -> Self {
        Self {
            manifest: PluginManifest {
                id: id.to_string(),
                name: name.to_string(),
                version,
                description: String::new(),
                author: None,
                language: default_language(),
                entry_module: format!("lib{}.so", id.replace('-', "_")),
                api_version: None,
                widgets: Vec::new(),
                disabled: false,
                preinstalled: false,
                plugin_base_dir: PathBuf::new(),
            },
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.manifest.description = description.to_string();
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.manifest.author = Some(author.to_string());
        self
    }

    pub fn language(mut self, language: &str) -> Self {
        self.manifest.language = language.to_string();
        self
    }

    pub fn entry_module(mut self, entry_module: &str) -> Self {
        self.manifest.entry_module = entry_module.to_string();
        self
    }

    pub fn api_version(mut self, range: VersionRange) -> Self {
        self.manifest.api_version = Some(range);
        self
    }

    pub fn widget(mut self, descriptor: WidgetTypeDescriptor) -> Self {
        self.manifest.widgets.push(descriptor);
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.manifest.disabled = disabled;
        self
    }

    pub fn preinstalled(mut self, preinstalled: bool) -> Self {
        self.manifest.preinstalled = preinstalled;
        self
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.manifest.plugin_base_dir = dir.into();
        self
    }

    pub fn build(self) -> PluginManifest {
        self.manifest
    }
}
