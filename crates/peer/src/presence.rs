use serde_json::Value;
use splitlink_channel::{decode, write_json};
use splitlink_core::{NotificationConfig, PresenceChange, PresenceEvent, Role};
use std::collections::VecDeque;
use tracing::{trace, warn};

use crate::env::Notice;
use crate::peer::Peer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceNoticeKind {
    SourceJoined,
    TargetJoined,
    SourceLeft,
    TargetLeft,
}

/// A presence event from another peer, classified for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceNotice {
    pub kind: PresenceNoticeKind,
    pub group_id: String,
    pub origin_id: String,
    /// The event concerns the group this peer belongs to.
    pub same_group: bool,
}

impl PresenceNotice {
    pub fn is_join(&self) -> bool {
        matches!(
            self.kind,
            PresenceNoticeKind::SourceJoined | PresenceNoticeKind::TargetJoined
        )
    }

    pub fn message(&self) -> String {
        let what = match self.kind {
            PresenceNoticeKind::SourceJoined => "A source joined",
            PresenceNoticeKind::TargetJoined => "A target joined",
            PresenceNoticeKind::SourceLeft => "A source disconnected",
            PresenceNoticeKind::TargetLeft => "A target disconnected",
        };
        if self.same_group {
            format!("{} your group", what)
        } else {
            format!("{} group {}", what, self.group_id)
        }
    }
}

/// `None` for events that carry no role worth reporting.
pub fn classify(event: &PresenceEvent, own_group: Option<&str>) -> Option<PresenceNotice> {
    let kind = match (&event.change, event.change.role()) {
        (PresenceChange::Joined { .. }, Role::Source) => PresenceNoticeKind::SourceJoined,
        (PresenceChange::Joined { .. }, Role::Target) => PresenceNoticeKind::TargetJoined,
        (PresenceChange::Disconnected { .. }, Role::Source) => PresenceNoticeKind::SourceLeft,
        (PresenceChange::Disconnected { .. }, Role::Target) => PresenceNoticeKind::TargetLeft,
        (_, Role::Idle) => return None,
    };
    Some(PresenceNotice {
        kind,
        group_id: event.group_id.clone(),
        origin_id: event.origin_id.clone(),
        same_group: own_group == Some(event.group_id.as_str()),
    })
}

pub fn should_forward(notice: &PresenceNotice, toggles: &NotificationConfig) -> bool {
    let wanted = if notice.is_join() {
        toggles.notify_on_join
    } else {
        toggles.notify_on_disconnect
    };
    wanted && (notice.same_group || toggles.notify_other_groups)
}

type EventKey = (String, i64, bool, Role);

/// Bounded memory of recently delivered events. Each event is written to
/// two keys, so most arrive twice.
pub(crate) struct RecentEvents {
    seen: VecDeque<EventKey>,
    capacity: usize,
}

impl RecentEvents {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            seen: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// False if the event was already seen.
    pub(crate) fn insert(&mut self, event: &PresenceEvent) -> bool {
        let key = (
            event.origin_id.clone(),
            event.timestamp,
            event.change.is_join(),
            event.change.role(),
        );
        if self.seen.contains(&key) {
            return false;
        }
        if self.seen.len() == self.capacity {
            self.seen.pop_front();
        }
        self.seen.push_back(key);
        true
    }
}

impl Peer {
    /// Best effort: a lost presence event only costs a notice.
    pub(crate) async fn announce_presence(&self, group_id: &str, change: PresenceChange) {
        let event = PresenceEvent {
            group_id: group_id.to_string(),
            origin_id: self.state.instance_id.clone(),
            timestamp: self.clock.now_ms(),
            change,
        };
        for key in [self.keys.presence(group_id), self.keys.latest_presence()] {
            if let Err(e) = write_json(self.channel.as_ref(), &key, &event).await {
                warn!(key = %key, error = %e, "Failed to publish presence");
            }
        }
    }

    pub(crate) fn on_presence(&mut self, key: &str, value: Value) {
        let Some(event) = decode::<PresenceEvent>(key, value) else {
            return;
        };
        if event.origin_id == self.state.instance_id {
            return;
        }
        if !self.presence_seen.insert(&event) {
            trace!(origin = %event.origin_id, "Duplicate presence event");
            return;
        }
        let Some(notice) = classify(&event, self.state.group_id.as_deref()) else {
            return;
        };
        if should_forward(&notice, &self.config.notifications) {
            self.notifier.notice(Notice::Presence(notice));
        } else {
            trace!(kind = ?notice.kind, group = %notice.group_id, "Presence notice suppressed");
        }
    }
}
