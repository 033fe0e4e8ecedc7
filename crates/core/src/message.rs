//! Payloads exchanged through the shared channel.

use serde::{Deserialize, Serialize};

use crate::types::Role;

/// Written on every source assignment; resolves ambiguous join requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestSource {
    pub group_id: String,
    pub timestamp: i64,
}

/// The group a pairing gesture links into, and the role of the peer that started it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkTarget {
    pub group_id: String,
    pub initiator_role: Role,
}

impl LinkTarget {
    /// Role the winning idle peer takes.
    pub fn responder_role(&self) -> Option<Role> {
        self.initiator_role.opposite()
    }
}

/// Coordinate-only pairing request, resolved by contention bidding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRequest {
    pub request_id: String,
    pub link_target: LinkTarget,
    pub timestamp: i64,
    pub drop_x: f64,
    pub drop_y: f64,
}

/// Identity-carrying drag payload; names exactly one counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakePayload {
    /// Group id of the initiator.
    pub link_target: String,
    /// Role of the initiator.
    pub role: Role,
    pub instance_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairingGesture {
    Coordinate(PairingRequest),
    Handshake(HandshakePayload),
}

/// One bidder's claim on a pairing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestRecord {
    pub score: i64,
    pub id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PresenceChange {
    Joined {
        #[serde(rename = "newRole")]
        new_role: Role,
    },
    Disconnected {
        #[serde(rename = "disconnectedRole")]
        disconnected_role: Role,
    },
}

impl PresenceChange {
    pub fn role(&self) -> Role {
        match self {
            PresenceChange::Joined { new_role } => *new_role,
            PresenceChange::Disconnected { disconnected_role } => *disconnected_role,
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self, PresenceChange::Joined { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub group_id: String,
    pub origin_id: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub change: PresenceChange,
}
