use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mint a short random identifier for instances, groups, members and requests.
pub fn generate_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    raw[..9].to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Idle,
    Source,
    Target,
}

impl Role {
    /// The role a counterpart takes when linking to a peer holding `self`.
    pub fn opposite(self) -> Option<Role> {
        match self {
            Role::Source => Some(Role::Target),
            Role::Target => Some(Role::Source),
            Role::Idle => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Idle => "idle",
            Role::Source => "source",
            Role::Target => "target",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live state of one peer. Transitions replace the value wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerState {
    /// Fresh on every attach.
    pub instance_id: String,
    /// Stable for the lifetime of the tab; survives reloads through the record.
    pub tab_id: String,
    pub role: Role,
    pub group_id: Option<String>,
    /// Set only while `role == Source`.
    pub source_member_id: Option<String>,
    pub last_applied_ts: i64,
    /// When the current role was taken; teardown signals older than this
    /// belong to an earlier membership.
    pub joined_at: i64,
    pub is_muted: bool,
    pub mute_gate_active: bool,
}

impl PeerState {
    pub fn fresh(tab_id: String) -> Self {
        Self {
            instance_id: generate_id(),
            tab_id,
            role: Role::Idle,
            group_id: None,
            source_member_id: None,
            last_applied_ts: 0,
            joined_at: 0,
            is_muted: false,
            mute_gate_active: false,
        }
    }

    /// Rebuild live state from a validated record. The gate flag lives in the
    /// shared channel and is restored separately.
    pub fn restore(instance_id: String, record: PeerRecord) -> Self {
        let idle = record.role == Role::Idle;
        Self {
            instance_id,
            tab_id: record.tab_id,
            role: record.role,
            group_id: if idle { None } else { record.group_id },
            source_member_id: if record.role == Role::Source {
                record.source_member_id
            } else {
                None
            },
            last_applied_ts: if idle { 0 } else { record.last_applied_ts.max(0) },
            joined_at: if idle { 0 } else { record.joined_at },
            is_muted: !idle && record.is_muted,
            mute_gate_active: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.role == Role::Idle
    }

    pub fn with_source(&self, group_id: String, source_member_id: String, joined_at: i64) -> Self {
        Self {
            role: Role::Source,
            group_id: Some(group_id),
            source_member_id: Some(source_member_id),
            last_applied_ts: 0,
            joined_at,
            is_muted: false,
            mute_gate_active: false,
            ..self.clone()
        }
    }

    pub fn with_target(&self, group_id: String, joined_at: i64) -> Self {
        Self {
            role: Role::Target,
            group_id: Some(group_id),
            source_member_id: None,
            last_applied_ts: 0,
            joined_at,
            is_muted: false,
            mute_gate_active: false,
            ..self.clone()
        }
    }

    /// Idle keeps only the identities; mute is forced off.
    pub fn to_idle(&self) -> Self {
        Self {
            role: Role::Idle,
            group_id: None,
            source_member_id: None,
            last_applied_ts: 0,
            joined_at: 0,
            is_muted: false,
            mute_gate_active: false,
            ..self.clone()
        }
    }

    pub fn to_record(&self) -> PeerRecord {
        PeerRecord {
            owner: PeerRecord::OWNER_TAG.to_string(),
            tab_id: self.tab_id.clone(),
            role: self.role,
            group_id: self.group_id.clone(),
            source_member_id: self.source_member_id.clone(),
            last_applied_ts: self.last_applied_ts,
            joined_at: self.joined_at,
            is_muted: self.is_muted,
        }
    }
}

/// Persisted form of [`PeerState`], tagged with the protocol that wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub owner: String,
    pub tab_id: String,
    pub role: Role,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub source_member_id: Option<String>,
    #[serde(default)]
    pub last_applied_ts: i64,
    #[serde(default)]
    pub joined_at: i64,
    #[serde(default)]
    pub is_muted: bool,
}

impl PeerRecord {
    pub const OWNER_TAG: &'static str = "splitlink/v1";

    /// Reject records written by something else, or internally inconsistent ones.
    pub fn validate(&self) -> Result<()> {
        if self.owner != Self::OWNER_TAG {
            return Err(Error::Validation(format!(
                "record owned by '{}', expected '{}'",
                self.owner,
                Self::OWNER_TAG
            )));
        }
        if self.tab_id.trim().is_empty() {
            return Err(Error::Validation("record has no tab id".into()));
        }
        if self.last_applied_ts < 0 {
            return Err(Error::Validation("negative applied timestamp".into()));
        }
        match self.role {
            Role::Idle => Ok(()),
            Role::Target if self.group_id.is_none() => {
                Err(Error::Validation("target record without group".into()))
            }
            Role::Source if self.group_id.is_none() || self.source_member_id.is_none() => {
                Err(Error::Validation("source record without group or member id".into()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_shape() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), 9);
        assert_ne!(a, b);
    }

    #[test]
    fn test_role_opposite() {
        assert_eq!(Role::Source.opposite(), Some(Role::Target));
        assert_eq!(Role::Target.opposite(), Some(Role::Source));
        assert_eq!(Role::Idle.opposite(), None);
    }

    #[test]
    fn test_to_idle_forces_mute_off() {
        let mut state = PeerState::fresh("tab".into()).with_target("g1".into(), 5);
        state.is_muted = true;
        state.mute_gate_active = true;
        state.last_applied_ts = 42;
        let idle = state.to_idle();
        assert!(idle.is_idle());
        assert!(!idle.is_muted);
        assert!(!idle.mute_gate_active);
        assert_eq!(idle.group_id, None);
        assert_eq!(idle.instance_id, state.instance_id);
        assert_eq!(idle.tab_id, "tab");
    }

    #[test]
    fn test_record_round_trip_restores_role() {
        let state = PeerState::fresh("tab".into()).with_source("g1".into(), "m1".into(), 5);
        let record = state.to_record();
        assert!(record.validate().is_ok());
        let restored = PeerState::restore("new-instance".into(), record);
        assert_eq!(restored.role, Role::Source);
        assert_eq!(restored.group_id.as_deref(), Some("g1"));
        assert_eq!(restored.source_member_id.as_deref(), Some("m1"));
        assert_eq!(restored.instance_id, "new-instance");
        assert_eq!(restored.joined_at, 5);
    }

    #[test]
    fn test_validate_rejects_foreign_owner() {
        let mut record = PeerState::fresh("tab".into()).to_record();
        record.owner = "someone-else".into();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_source_without_member() {
        let mut record = PeerState::fresh("tab".into())
            .with_source("g1".into(), "m1".into(), 5)
            .to_record();
        record.source_member_id = None;
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = PeerState::fresh("tab".into()).with_target("g1".into(), 5).to_record();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["owner"], "splitlink/v1");
        assert_eq!(json["role"], "target");
        assert_eq!(json["groupId"], "g1");
        assert_eq!(json["lastAppliedTs"], 0);
        assert_eq!(json["joinedAt"], 5);
    }
}
