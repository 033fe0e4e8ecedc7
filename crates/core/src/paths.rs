use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".splitlink"))
            .unwrap_or_else(|| PathBuf::from(".splitlink"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base.join("state")
    }

    pub fn peer_state_file(&self, tab_id: &str) -> PathBuf {
        let safe_key = tab_id.replace([':', '/', '\\'], "_");
        self.state_dir().join(format!("{}.json", safe_key))
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
