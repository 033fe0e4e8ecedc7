//! Per-peer protocol engine: role coordination, navigation mirroring,
//! pairing, presence, shared settings and the mute gate, all driven from
//! one owned [`Peer`].

pub mod coordinator;
pub mod env;
pub mod mute;
pub mod navigation;
pub mod pairing;
pub mod peer;
pub mod presence;
pub mod runtime;
pub mod settings;

pub use coordinator::HotkeyAction;
pub use env::{
    Clock, HeadlessWindow, HistoryNavigator, LogNotifier, ManualClock, MediaHandle, MediaRegistry,
    Navigator, NoMedia, Notice, SystemClock, UiNotifier, WindowBounds, WindowEnv,
};
pub use pairing::{IgnoreReason, PairingOutcome};
pub use peer::{Peer, PeerDeps, PeerInbox, PeerTimer};
pub use presence::{PresenceNotice, PresenceNoticeKind};
pub use runtime::{PeerHandle, PeerRuntime};
