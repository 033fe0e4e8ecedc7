//! String-slot backends owned by the host tab.

use splitlink_core::{Error, PeerRecord, Result};
use std::sync::{Arc, Mutex};

use crate::store::PeerStateStore;

fn write_slot(slot: &Mutex<Option<String>>, value: Option<String>) -> Result<()> {
    let mut guard = slot
        .lock()
        .map_err(|_| Error::Storage("slot lock poisoned".into()))?;
    *guard = value;
    Ok(())
}

fn read_slot(slot: &Mutex<Option<String>>) -> Result<Option<String>> {
    let guard = slot
        .lock()
        .map_err(|_| Error::Storage("slot lock poisoned".into()))?;
    Ok(guard.clone().filter(|s| !s.trim().is_empty()))
}

/// Per-tab object the host keeps across reloads. Only this protocol writes it.
#[derive(Clone, Default)]
pub struct TabSlotStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl TabSlotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeerStateStore for TabSlotStore {
    fn name(&self) -> &str {
        "tab"
    }

    fn save(&self, record: &PeerRecord) -> Result<()> {
        write_slot(&self.slot, Some(serde_json::to_string(record)?))
    }

    fn load_raw(&self) -> Result<Option<String>> {
        read_slot(&self.slot)
    }

    fn clear(&self) -> Result<()> {
        write_slot(&self.slot, None)
    }
}

/// Window-name style slot: survives navigation, but pages write it too.
#[derive(Clone, Default)]
pub struct WindowNameStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl WindowNameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot the way a page script would.
    pub fn set_raw(&self, value: &str) {
        let _ = write_slot(&self.slot, Some(value.to_string()));
    }
}

impl PeerStateStore for WindowNameStore {
    fn name(&self) -> &str {
        "window-name"
    }

    fn save(&self, record: &PeerRecord) -> Result<()> {
        write_slot(&self.slot, Some(serde_json::to_string(record)?))
    }

    fn load_raw(&self) -> Result<Option<String>> {
        read_slot(&self.slot)
    }

    fn clear(&self) -> Result<()> {
        write_slot(&self.slot, Some(String::new()))
    }
}
