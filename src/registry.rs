//! Node registry: which node indices each scenario provisions.
//!
//! The registry is a JSON object mapping symbolic keys to lists of node
//! indices, for example `{"quorum": [0, 1, 2, 3, 4], "rbt_transfer": [4, 5]}`.
//! It is required configuration, so a missing file is an error.

use crate::error::{Error, Result};
use crate::topology::load_json;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Parsed registry file.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRegistry {
    path: PathBuf,
    entries: BTreeMap<String, Value>,
}

impl NodeRegistry {
    /// Load the registry at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingRegistry` if the file does not exist,
    /// `Error::MalformedConfig` if it is not a JSON object and
    /// `Error::Config` if the object is empty.
    pub fn load(path: &Path) -> Result<Self> {
        let entries: BTreeMap<String, Value> =
            load_json(path)?.ok_or_else(|| Error::MissingRegistry(path.to_path_buf()))?;
        if entries.is_empty() {
            return Err(Error::Config(format!(
                "node registry {} is empty",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Build a registry from in-memory entries.
    #[must_use]
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u16>)>,
        K: Into<String>,
    {
        Self {
            path: PathBuf::new(),
            entries: entries
                .into_iter()
                .map(|(key, indices)| (key.into(), Value::from(indices)))
                .collect(),
        }
    }

    /// Registry keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Node indices listed under `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingRegistryKey` for an empty or absent key,
    /// `Error::MalformedConfig` if the value is not a list of port-sized
    /// integers and `Error::EmptyRegistryEntry` if the list is empty.
    pub fn indices(&self, key: &str) -> Result<Vec<u16>> {
        if key.is_empty() {
            return Err(Error::MissingRegistryKey(String::new()));
        }
        let Some(value) = self.entries.get(key) else {
            warn!(
                key,
                registry = %self.path.display(),
                known = ?self.keys().collect::<Vec<_>>(),
                "Registry key not found"
            );
            return Err(Error::MissingRegistryKey(key.to_string()));
        };

        let malformed = |reason: String| Error::MalformedConfig {
            path: self.path.clone(),
            reason,
        };
        let list = value
            .as_array()
            .ok_or_else(|| malformed(format!("value of {key:?} should be a list, got {value}")))?;
        if list.is_empty() {
            return Err(Error::EmptyRegistryEntry(key.to_string()));
        }

        list.iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|n| u16::try_from(n).ok())
                    .ok_or_else(|| malformed(format!("{key:?} holds a non-index entry {item}")))
            })
            .collect()
    }
}
