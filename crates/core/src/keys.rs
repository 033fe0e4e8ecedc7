//! Shared-channel keyspace. Every key carries the configured prefix so several
//! protocol versions can share one store without reading each other's data.

use crate::types::Role;

pub const DEFAULT_KEY_PREFIX: &str = "splitlink_v1_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

/// Key families whose suffix is a group id.
const GROUP_SCOPED: [&str; 4] = ["url_", "ts_", "disconnect_", "sources_"];

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    pub fn config(&self) -> String {
        self.key("config")
    }

    pub fn ui_position(&self) -> String {
        self.key("ui_position")
    }

    pub fn latest_source(&self) -> String {
        self.key("latest_source")
    }

    pub fn sources(&self, group_id: &str) -> String {
        self.key(&format!("sources_{}", group_id))
    }

    pub fn disconnect(&self, group_id: &str) -> String {
        self.key(&format!("disconnect_{}", group_id))
    }

    pub fn global_reset(&self) -> String {
        self.key("global_reset")
    }

    pub fn target_url(&self, group_id: &str) -> String {
        self.key(&format!("url_{}", group_id))
    }

    pub fn target_timestamp(&self, group_id: &str) -> String {
        self.key(&format!("ts_{}", group_id))
    }

    pub fn pair_request(&self) -> String {
        self.key("pair_request")
    }

    /// Prefix shared by every interest record ever written.
    pub fn interest_root(&self) -> String {
        self.key("interest_")
    }

    pub fn interest_prefix(&self, request_id: &str) -> String {
        self.key(&format!("interest_{}_", request_id))
    }

    pub fn interest(&self, request_id: &str, instance_id: &str) -> String {
        self.key(&format!("interest_{}_{}", request_id, instance_id))
    }

    pub fn presence(&self, group_id: &str) -> String {
        self.key(&format!("presence_{}", group_id))
    }

    pub fn latest_presence(&self) -> String {
        self.key("latest_presence")
    }

    pub fn mute(&self, tab_id: &str, role: Role) -> String {
        self.key(&format!("mute_{}_{}", tab_id, role))
    }

    pub fn mute_gate(&self, tab_id: &str, role: Role) -> String {
        self.key(&format!("mute_gate_{}_{}", tab_id, role))
    }

    /// Group id encoded in a group-scoped key, if `key` is one.
    pub fn group_id_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        let rest = key.strip_prefix(self.prefix.as_str())?;
        GROUP_SCOPED
            .iter()
            .find_map(|family| rest.strip_prefix(family))
            .filter(|id| !id.is_empty())
    }

    /// Keys that survive a global reset.
    pub fn is_preserved(&self, key: &str) -> bool {
        key == self.config() || key == self.ui_position() || key == self.global_reset()
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_id_of_group_scoped_keys() {
        let keys = Keyspace::default();
        assert_eq!(keys.group_id_of(&keys.target_url("g1")), Some("g1"));
        assert_eq!(keys.group_id_of(&keys.target_timestamp("g2")), Some("g2"));
        assert_eq!(keys.group_id_of(&keys.disconnect("g3")), Some("g3"));
        assert_eq!(keys.group_id_of(&keys.sources("g4")), Some("g4"));
    }

    #[test]
    fn test_group_id_of_ignores_other_keys() {
        let keys = Keyspace::default();
        assert_eq!(keys.group_id_of(&keys.presence("g1")), None);
        assert_eq!(keys.group_id_of(&keys.latest_source()), None);
        assert_eq!(keys.group_id_of("unrelated_url_g1"), None);
        assert_eq!(keys.group_id_of(&keys.mute("tab", Role::Source)), None);
    }

    #[test]
    fn test_interest_keys_share_request_prefix() {
        let keys = Keyspace::new("p_");
        let key = keys.interest("req", "inst");
        assert!(key.starts_with(&keys.interest_prefix("req")));
        assert!(key.starts_with(&keys.interest_root()));
        assert_eq!(key, "p_interest_req_inst");
    }

    #[test]
    fn test_preserved_keys() {
        let keys = Keyspace::default();
        assert!(keys.is_preserved(&keys.config()));
        assert!(keys.is_preserved(&keys.ui_position()));
        assert!(!keys.is_preserved(&keys.latest_source()));
    }
}
