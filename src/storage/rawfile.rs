//! The raw-file JSON mirror.
//!
//! Directory tree and create/update/delete semantics are ported from
//! `original_source/python/teatype/hsdb/RawFileStructure.py` (the fixed
//! `hsdb/...` tree) and `RawFileHandler.py` (the "file already exists" guard
//! on create, and the collection-scoped subdirectory per model).

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;

use crate::config::PersistenceStrategy;
use crate::entity::Entity;
use crate::error::{HsdbError, HsdbResult};

/// Subdirectories created under `<root>/hsdb/` at startup, mirroring the
/// original's `_FS` tree. Not every directory is written to by this crate's
/// operations (`backups`, `dumps`, `exports`, `rejectpile` are reserved for
/// operator tooling outside this crate's scope) but all are created up front
/// so external tooling can rely on the layout being complete.
const FS_TREE: &[&str] = &[
    "backups/index",
    "backups/migration",
    "backups/rawfiles",
    "dumps/migrations",
    "exports",
    "index",
    "rawfiles",
    "logs/migrations",
    "meta",
    "models/adapters",
    "redundancy",
    "rejectpile/index",
    "rejectpile/rawfiles",
];

pub struct RawFileHandler {
    root: PathBuf,
    strategy: PersistenceStrategy,
}

impl RawFileHandler {
    pub fn new(root: impl Into<PathBuf>, strategy: PersistenceStrategy) -> Self {
        Self { root: root.into(), strategy }
    }

    /// Creates the fixed `hsdb/` directory tree. A no-op under
    /// `PersistenceStrategy::InMemory`.
    pub fn ensure_fs_created(&self) -> HsdbResult<()> {
        if self.strategy.is_in_memory() {
            return Ok(());
        }
        for segment in FS_TREE {
            let dir = self.root.join("hsdb").join(segment);
            fs::create_dir_all(&dir).map_err(|err| HsdbError::persistence(dir.display().to_string(), err.to_string()))?;
        }
        Ok(())
    }

    fn entry_path(&self, entity: &Entity) -> PathBuf {
        self.root.join("hsdb/index").join(entity.path())
    }

    /// Writes a brand-new entry. Fails if the file already exists, matching
    /// the original's explicit guard.
    pub fn create_entry(&self, entity: &Entity, serialized: &JsonValue) -> HsdbResult<()> {
        if self.strategy.is_in_memory() {
            return Ok(());
        }
        let path = self.entry_path(entity);
        if path.exists() {
            return Err(HsdbError::persistence(path.display().to_string(), "file already exists"));
        }
        write_json(&path, serialized)
    }

    /// Overwrites an existing entry.
    pub fn update_entry(&self, entity: &Entity, serialized: &JsonValue) -> HsdbResult<()> {
        if self.strategy.is_in_memory() {
            return Ok(());
        }
        write_json(&self.entry_path(entity), serialized)
    }

    pub fn delete_entry(&self, entity: &Entity) -> HsdbResult<()> {
        if self.strategy.is_in_memory() {
            return Ok(());
        }
        let path = self.entry_path(entity);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(HsdbError::persistence(path.display().to_string(), err.to_string())),
        }
    }

    pub fn read_entry(&self, entity: &Entity) -> HsdbResult<JsonValue> {
        let path = self.entry_path(entity);
        read_json(&path)
    }
}

fn write_json(path: &Path, value: &JsonValue) -> HsdbResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| HsdbError::persistence(parent.display().to_string(), err.to_string()))?;
    }
    let text = serde_json::to_string_pretty(value).map_err(|err| HsdbError::persistence(path.display().to_string(), err.to_string()))?;
    fs::write(path, text).map_err(|err| HsdbError::persistence(path.display().to_string(), err.to_string()))
}

fn read_json(path: &Path) -> HsdbResult<JsonValue> {
    let text = fs::read_to_string(path).map_err(|err| HsdbError::persistence(path.display().to_string(), err.to_string()))?;
    serde_json::from_str(&text).map_err(|err| HsdbError::persistence(path.display().to_string(), err.to_string()))
}
