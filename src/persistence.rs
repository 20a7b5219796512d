//! Persistence: save and load the record store to a JSON file.
//! Enables recovery after restart: lanes, vendors, and bids are restored as stored.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Full persisted state: collection name → record key → record.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PersistedState {
    pub collections: BTreeMap<String, BTreeMap<String, Value>>,
}

/// File-based persistence: one JSON file. Save after state changes; load on startup.
#[derive(Clone, Debug)]
pub struct FilePersistence {
    path: std::path::PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save state to file. Writes a sibling temp file first, then renames over the target.
    pub fn save(&self, state: &PersistedState) -> Result<(), String> {
        let json = serde_json::to_string_pretty(state).map_err(|e| e.to_string())?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| e.to_string())?;
        std::fs::rename(&tmp, &self.path).map_err(|e| e.to_string())
    }

    /// Load state from file. Returns None if the file does not exist.
    pub fn load(&self) -> Result<Option<PersistedState>, String> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        let state: PersistedState = serde_json::from_str(&data).map_err(|e| e.to_string())?;
        Ok(Some(state))
    }
}
