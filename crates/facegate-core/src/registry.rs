//! Persistent label ↔ identity registry.
//!
//! The whole mapping is loaded at once and written back in full on every
//! change. The file is a JSON object of `"label": "identity"` pairs.

use crate::types::Label;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry io ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt registry {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// How a fresh label is chosen for a new identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPolicy {
    /// Lowest integer not already used as a label.
    #[default]
    SmallestUnused,
    /// One past the highest label in use.
    AfterHighest,
}

impl std::str::FromStr for LabelPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "smallest_unused" => Ok(Self::SmallestUnused),
            "after_highest" => Ok(Self::AfterHighest),
            other => Err(format!("unknown label policy: {other}")),
        }
    }
}

/// In-memory view of the persisted label map.
#[derive(Debug, Clone)]
pub struct LabelRegistry {
    path: PathBuf,
    entries: BTreeMap<Label, String>,
}

impl LabelRegistry {
    /// An empty registry that will persist to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Load the registry from `path`.
    ///
    /// A missing file is the cold-start state and yields an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no label map yet");
                return Ok(Self::empty(path));
            }
            Err(source) => return Err(RegistryError::Io { path, source }),
        };

        let stored: BTreeMap<String, String> =
            serde_json::from_slice(&raw).map_err(|e| RegistryError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let mut entries = BTreeMap::new();
        for (key, identity) in stored {
            match key.parse::<Label>() {
                Ok(label) => {
                    entries.insert(label, identity);
                }
                Err(_) => {
                    return Err(RegistryError::Corrupt {
                        path,
                        reason: format!("label {key:?} is not an integer"),
                    })
                }
            }
        }

        tracing::debug!(path = %path.display(), entries = entries.len(), "loaded label map");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn identity(&self, label: Label) -> Option<&str> {
        self.entries.get(&label).map(String::as_str)
    }

    /// Label already mapped to `identity`, if any. The highest such label wins.
    pub fn label_for(&self, identity: &str) -> Option<Label> {
        self.entries
            .iter()
            .rev()
            .find(|(_, id)| id.as_str() == identity)
            .map(|(label, _)| *label)
    }

    /// A label not currently present in the registry.
    ///
    /// `AfterHighest` falls back to the smallest unused label once the
    /// highest label is `u32::MAX`.
    pub fn next_label(&self, policy: LabelPolicy) -> Label {
        match policy {
            LabelPolicy::SmallestUnused => self.smallest_unused(),
            LabelPolicy::AfterHighest => match self.entries.keys().next_back() {
                None => Label(0),
                Some(highest) => highest
                    .0
                    .checked_add(1)
                    .map_or_else(|| self.smallest_unused(), Label),
            },
        }
    }

    fn smallest_unused(&self) -> Label {
        let mut candidate = 0u32;
        for label in self.entries.keys() {
            if label.0 != candidate {
                break;
            }
            candidate += 1;
        }
        Label(candidate)
    }

    /// Insert or overwrite `label → identity`, then persist the whole map.
    ///
    /// The in-memory view is updated even when persisting fails.
    pub fn assign(&mut self, label: Label, identity: &str) -> Result<(), RegistryError> {
        self.entries.insert(label, identity.to_string());
        tracing::info!(%label, identity, "assigned label");
        self.persist()
    }

    /// Write the full map to a sibling temp file, then rename it over the target.
    fn persist(&self) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: self.path.clone(),
            source,
        };
        let stored: BTreeMap<String, &str> = self
            .entries
            .iter()
            .map(|(l, id)| (l.to_string(), id.as_str()))
            .collect();
        let json = serde_json::to_vec_pretty(&stored).map_err(|e| RegistryError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let reg = LabelRegistry::load(dir.path().join("label_id_map.json")).unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_assign_persists_whole_map() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("label_id_map.json");

        let mut reg = LabelRegistry::load(&path).unwrap();
        reg.assign(Label(0), "E001").unwrap();
        reg.assign(Label(1), "E002").unwrap();
        reg.assign(Label(0), "E003").unwrap();

        let reloaded = LabelRegistry::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.identity(Label(0)), Some("E003"));
        assert_eq!(reloaded.identity(Label(1)), Some("E002"));

        let raw: BTreeMap<String, String> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw.get("1").map(String::as_str), Some("E002"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("label_id_map.json");
        std::fs::write(&path, b"[1, 2").unwrap();
        assert!(matches!(LabelRegistry::load(&path), Err(RegistryError::Corrupt { .. })));

        std::fs::write(&path, br#"{"s0": "E001"}"#).unwrap();
        assert!(matches!(LabelRegistry::load(&path), Err(RegistryError::Corrupt { .. })));
    }

    #[test]
    fn test_next_label_smallest_unused() {
        let mut reg = LabelRegistry::empty("unused.json");
        assert_eq!(reg.next_label(LabelPolicy::SmallestUnused), Label(0));
        reg.entries.insert(Label(0), "a".into());
        reg.entries.insert(Label(1), "b".into());
        reg.entries.insert(Label(3), "c".into());
        assert_eq!(reg.next_label(LabelPolicy::SmallestUnused), Label(2));
        assert_eq!(reg.next_label(LabelPolicy::AfterHighest), Label(4));
    }

    #[test]
    fn test_next_label_is_never_in_use() {
        let mut reg = LabelRegistry::empty("unused.json");
        for policy in [LabelPolicy::SmallestUnused, LabelPolicy::AfterHighest] {
            for _ in 0..5 {
                let label = reg.next_label(policy);
                assert!(reg.identity(label).is_none());
                reg.entries.insert(label, format!("id{label}"));
            }
        }
        assert_eq!(reg.len(), 10);
    }

    #[test]
    fn test_after_highest_at_max_falls_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("label_id_map.json");
        std::fs::write(&path, br#"{"0": "E001", "4294967295": "E002"}"#).unwrap();
        let reg = LabelRegistry::load(&path).unwrap();
        assert_eq!(reg.next_label(LabelPolicy::AfterHighest), Label(1));
    }

    #[test]
    fn test_label_for_existing_identity() {
        let mut reg = LabelRegistry::empty("unused.json");
        reg.entries.insert(Label(2), "E001".into());
        reg.entries.insert(Label(5), "E002".into());
        assert_eq!(reg.label_for("E002"), Some(Label(5)));
        assert_eq!(reg.label_for("E404"), None);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("after_highest".parse::<LabelPolicy>(), Ok(LabelPolicy::AfterHighest));
        assert!("random".parse::<LabelPolicy>().is_err());
    }
}
