//! Durable storage for the connection-target override.
//!
//! A single key holds the override origin.  Absence of the key means "use the
//! resolved default"; the key is never written with an empty value.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Key under which the override origin is stored.
pub const TARGET_STORAGE_KEY: &str = "matrix.device_origin";

pub trait TargetStore: Send {
    /// The persisted override, if any.
    fn load(&self) -> Option<String>;
    fn save(&mut self, origin: &str) -> anyhow::Result<()>;
    fn clear(&mut self) -> anyhow::Result<()>;
}

/// JSON file holding a flat key/value map.  Unknown keys are preserved.
pub struct FileTargetStore {
    path: PathBuf,
}

impl FileTargetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> BTreeMap<String, String> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return BTreeMap::new();
        };
        match serde_json::from_str(&content) {
            Ok(map) => map,
            Err(e) => {
                warn!("target store {:?} unreadable, ignoring: {}", self.path, e);
                BTreeMap::new()
            }
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl TargetStore for FileTargetStore {
    fn load(&self) -> Option<String> {
        self.read_map()
            .remove(TARGET_STORAGE_KEY)
            .filter(|v| !v.is_empty())
    }

    fn save(&mut self, origin: &str) -> anyhow::Result<()> {
        let mut map = self.read_map();
        map.insert(TARGET_STORAGE_KEY.to_string(), origin.to_string());
        self.write_map(&map)?;
        debug!("target store: saved {} to {:?}", origin, self.path);
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        let mut map = self.read_map();
        if map.remove(TARGET_STORAGE_KEY).is_some() {
            self.write_map(&map)?;
            debug!("target store: cleared {:?}", self.path);
        }
        Ok(())
    }
}

/// Process-local store, for tests and for runs that must not touch disk.
#[derive(Debug, Default, Clone)]
pub struct MemoryTargetStore {
    value: Option<String>,
}

impl MemoryTargetStore {
    pub fn with_value(origin: &str) -> Self {
        Self {
            value: Some(origin.to_string()),
        }
    }
}

impl TargetStore for MemoryTargetStore {
    fn load(&self) -> Option<String> {
        self.value.clone().filter(|v| !v.is_empty())
    }

    fn save(&mut self, origin: &str) -> anyhow::Result<()> {
        self.value = Some(origin.to_string());
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        self.value = None;
        Ok(())
    }
}
