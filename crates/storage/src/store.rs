use splitlink_core::{Error, PeerRecord, Result};
use tracing::{debug, warn};

/// One place a peer record can be kept for "this tab".
pub trait PeerStateStore: Send + Sync {
    fn name(&self) -> &str;

    fn save(&self, record: &PeerRecord) -> Result<()>;

    /// Raw stored text, unvalidated. Other writers may share the slot.
    fn load_raw(&self) -> Result<Option<String>>;

    fn clear(&self) -> Result<()>;
}

/// Backends tried in priority order; the first record that parses and
/// validates wins.
#[derive(Default)]
pub struct PrioritizedStore {
    backends: Vec<Box<dyn PeerStateStore>>,
}

impl PrioritizedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: impl PeerStateStore + 'static) -> Self {
        self.backends.push(Box::new(backend));
        self
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Write to every backend. Succeeds if at least one accepted the record.
    pub fn save(&self, record: &PeerRecord) -> Result<()> {
        let mut saved = 0usize;
        for backend in &self.backends {
            match backend.save(record) {
                Ok(()) => saved += 1,
                Err(e) => warn!(backend = backend.name(), error = %e, "Failed to persist peer state"),
            }
        }
        if saved == 0 && !self.backends.is_empty() {
            return Err(Error::Storage("no backend accepted the peer record".into()));
        }
        Ok(())
    }

    pub fn load(&self) -> Option<PeerRecord> {
        for backend in &self.backends {
            let raw = match backend.load_raw() {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Failed to read peer state");
                    continue;
                }
            };
            match parse_record(&raw) {
                Ok(record) => {
                    debug!(backend = backend.name(), role = %record.role, "Restored peer state");
                    return Some(record);
                }
                Err(e) => {
                    debug!(backend = backend.name(), error = %e, "Rejecting foreign peer state");
                }
            }
        }
        None
    }

    pub fn clear(&self) {
        for backend in &self.backends {
            if let Err(e) = backend.clear() {
                warn!(backend = backend.name(), error = %e, "Failed to clear peer state");
            }
        }
    }
}

fn parse_record(raw: &str) -> Result<PeerRecord> {
    let record: PeerRecord = serde_json::from_str(raw)?;
    record.validate()?;
    Ok(record)
}
