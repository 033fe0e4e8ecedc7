use splitlink_core::{Paths, PeerRecord, Result};
use std::path::PathBuf;
use tracing::debug;

use crate::store::PeerStateStore;

/// JSON file per tab under the state directory.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(paths: &Paths, tab_id: &str) -> Self {
        Self {
            path: paths.peer_state_file(tab_id),
        }
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl PeerStateStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    fn save(&self, record: &PeerRecord) -> Result<()> {
        // Ensure directory exists
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    fn load_raw(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(&self.path)?))
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            debug!(path = %self.path.display(), "Removed peer state file");
        }
        Ok(())
    }
}
