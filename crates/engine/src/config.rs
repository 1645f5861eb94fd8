//! Repository configuration
//!
//! [`RepositoryConfig`] is the validated configuration a repository is
//! opened with. It can be built in code with [`RepositoryConfig::new`] or
//! loaded from a `repository.toml` through [`RepositorySettings`], the
//! file form, which selects the layout with one boolean per layout.
//! Contradictory settings (no layout, or more than one) are rejected when
//! the config is built, never later.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use kvrepo_core::{CollectionName, RepoError, RepoResult};
use serde::{Deserialize, Serialize};

use crate::layout::Layout;
use crate::observer::StoreErrorObserver;

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "repository.toml";

/// Validated repository configuration
#[derive(Clone)]
pub struct RepositoryConfig {
    collection: CollectionName,
    layout: Layout,
    observer: Option<Arc<dyn StoreErrorObserver>>,
}

impl RepositoryConfig {
    /// Configuration for `collection` stored in `layout`
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the collection name is invalid.
    pub fn new(collection: &str, layout: Layout) -> RepoResult<Self> {
        Ok(Self {
            collection: CollectionName::new(collection)?,
            layout,
            observer: None,
        })
    }

    /// Build from file settings
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument { param: "layout" }` unless exactly one
    /// layout is selected, and `InvalidArgument { param: "collection" }`
    /// for an invalid collection name.
    pub fn from_settings(settings: &RepositorySettings) -> RepoResult<Self> {
        let layout = settings.layout()?;
        Self::new(&settings.collection, layout)
    }

    /// Observe store errors surfaced by the repository
    pub fn with_observer(mut self, observer: Arc<dyn StoreErrorObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Collection name
    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    /// Storage layout
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Installed observer, if any
    pub fn observer(&self) -> Option<&Arc<dyn StoreErrorObserver>> {
        self.observer.as_ref()
    }
}

impl fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryConfig")
            .field("collection", &self.collection)
            .field("layout", &self.layout)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Repository settings as stored in `repository.toml`
///
/// # Example
///
/// ```toml
/// collection = "people"
/// # Select exactly one layout
/// value = true
/// # hash = true
/// # value_in_hash = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySettings {
    /// Collection name
    pub collection: String,
    /// One value per entity
    #[serde(default)]
    pub value: bool,
    /// One shared hash, one field per entity
    #[serde(default)]
    pub hash: bool,
    /// One hash per entity
    #[serde(default)]
    pub value_in_hash: bool,
}

impl RepositorySettings {
    /// Settings selecting `layout` for `collection`
    pub fn new(collection: &str, layout: Layout) -> Self {
        Self {
            collection: collection.to_string(),
            value: layout == Layout::Value,
            hash: layout == Layout::Hash,
            value_in_hash: layout == Layout::ValueInHash,
        }
    }

    /// The single selected layout
    pub fn layout(&self) -> RepoResult<Layout> {
        let selected: Vec<Layout> = [
            (self.value, Layout::Value),
            (self.hash, Layout::Hash),
            (self.value_in_hash, Layout::ValueInHash),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .map(|(_, layout)| layout)
        .collect();

        match selected.as_slice() {
            [layout] => Ok(*layout),
            [] => Err(RepoError::invalid_argument("layout", "no layout selected")),
            many => Err(RepoError::invalid_argument(
                "layout",
                format!(
                    "exactly one layout must be selected, got {}",
                    many.iter()
                        .map(Layout::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )),
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# kvrepo repository configuration
#
# Collection name: no ':' and no reserved suffix such as '_lock'
collection = "entities"

# Storage layout, select exactly one:
#   value         = one value per entity at "<collection>:<id>"
#   hash          = one hash at "<collection>", one field per entity (no expiry)
#   value_in_hash = one hash of entity fields per entity at "<collection>:<id>"
value = true
# hash = true
# value_in_hash = true
"#
    }

    /// Parse settings from TOML text
    pub fn from_toml_str(content: &str) -> RepoResult<Self> {
        toml::from_str(content)
            .map_err(|e| RepoError::configuration(format!("failed to parse settings: {}", e)))
    }

    /// Read and parse settings from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> RepoResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RepoError::configuration(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            RepoError::configuration(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Serialize these settings to TOML and write them to the given path.
    pub fn write_to_file(&self, path: &Path) -> RepoResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RepoError::configuration(format!("failed to serialize settings: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            RepoError::configuration(format!(
                "failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
