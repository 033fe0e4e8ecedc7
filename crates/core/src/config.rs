use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::keys::{Keyspace, DEFAULT_KEY_PREFIX};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolConfig {
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Pairing requests older than this are ignored.
    #[serde(default = "default_pair_max_age_ms")]
    pub pair_max_age_ms: i64,
    /// How long a bidder waits for competing bids before electing.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_interest_grace_ms")]
    pub interest_grace_ms: u64,
    /// Added to a focused window's score; must dwarf any timestamp.
    #[serde(default = "default_focus_bonus")]
    pub focus_bonus: i64,
    #[serde(default = "default_presence_dedupe_window")]
    pub presence_dedupe_window: usize,
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_pair_max_age_ms() -> i64 {
    5000
}

fn default_settle_delay_ms() -> u64 {
    200
}

fn default_interest_grace_ms() -> u64 {
    1000
}

fn default_focus_bonus() -> i64 {
    1_000_000_000_000_000
}

fn default_presence_dedupe_window() -> usize {
    64
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            pair_max_age_ms: default_pair_max_age_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            interest_grace_ms: default_interest_grace_ms(),
            focus_bonus: default_focus_bonus(),
            presence_dedupe_window: default_presence_dedupe_window(),
        }
    }
}

/// Which presence notices reach the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub notify_on_join: bool,
    #[serde(default = "default_true")]
    pub notify_on_disconnect: bool,
    /// Also surface events from groups this peer is not part of.
    #[serde(default)]
    pub notify_other_groups: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            notify_on_join: true,
            notify_on_disconnect: true,
            notify_other_groups: false,
        }
    }
}

/// A mouse button plus modifier combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MouseBinding {
    pub button: u8,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
}

impl MouseBinding {
    pub fn matches(&self, press: &MouseBinding) -> bool {
        self == press
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotkeyConfig {
    #[serde(default = "default_source_key")]
    pub source_key: MouseBinding,
    #[serde(default = "default_target_key")]
    pub target_key: MouseBinding,
}

fn default_source_key() -> MouseBinding {
    MouseBinding { button: 1, ctrl: true, alt: false, shift: false }
}

fn default_target_key() -> MouseBinding {
    MouseBinding { button: 1, ctrl: false, alt: true, shift: false }
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            source_key: default_source_key(),
            target_key: default_target_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub hotkeys: HotkeyConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn keyspace(&self) -> Keyspace {
        Keyspace::new(self.protocol.key_prefix.clone())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.protocol.settle_delay_ms)
    }

    pub fn interest_grace(&self) -> Duration {
        Duration::from_millis(self.protocol.interest_grace_ms)
    }
}
