pub mod config;
pub mod error;
pub mod keys;
pub mod message;
pub mod paths;
pub mod types;

pub use config::{Config, HotkeyConfig, MouseBinding, NotificationConfig, ProtocolConfig};
pub use error::{Error, Result};
pub use keys::Keyspace;
pub use message::{
    HandshakePayload, InterestRecord, LatestSource, LinkTarget, PairingGesture, PairingRequest,
    PresenceChange, PresenceEvent,
};
pub use paths::Paths;
pub use types::{generate_id, PeerRecord, PeerState, Role};
