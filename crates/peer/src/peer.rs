use splitlink_channel::{read_json, ChangeNotification, ChangeSink, SharedChannel, SubscriptionId};
use splitlink_core::{generate_id, Config, Keyspace, LinkTarget, PeerState, Result, Role};
use splitlink_storage::PrioritizedStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::env::{Clock, MediaRegistry, Navigator, UiNotifier, WindowEnv};
use crate::presence::RecentEvents;

/// Everything a peer talks to besides its own state.
pub struct PeerDeps {
    /// Identity the host already has for this tab. Minted on first attach
    /// when absent.
    pub tab_id: Option<String>,
    pub channel: Arc<dyn SharedChannel>,
    pub store: PrioritizedStore,
    pub window: Arc<dyn WindowEnv>,
    pub navigator: Arc<dyn Navigator>,
    pub notifier: Arc<dyn UiNotifier>,
    pub media: Arc<dyn MediaRegistry>,
    pub clock: Arc<dyn Clock>,
}

/// Deferred work a peer schedules for itself.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerTimer {
    /// Settling delay of a contention bid elapsed.
    ResolveBid { request_id: String, link: LinkTarget },
    /// Grace period of an interest record elapsed.
    ExpireInterest { key: String },
}

/// Receiving ends of a peer's channel subscriptions and timers.
pub struct PeerInbox {
    pub notifications: mpsc::UnboundedReceiver<ChangeNotification>,
    pub timers: mpsc::UnboundedReceiver<PeerTimer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Watch {
    Disconnect,
    GlobalReset,
    Navigation,
    GroupPresence,
    LatestPresence,
    PairRequest,
    SharedConfig,
}

impl Watch {
    /// Torn down and re-registered on every role transition.
    fn is_role_scoped(self) -> bool {
        !matches!(
            self,
            Watch::LatestPresence | Watch::PairRequest | Watch::SharedConfig
        )
    }
}

/// One protocol instance bound to one tab.
///
/// All mutation happens through `&mut self`, so a peer processes commands,
/// channel notifications and timers strictly one at a time. Role operations
/// live in `coordinator`, navigation in `navigation`, and so on; this module
/// holds the shared plumbing.
pub struct Peer {
    pub(crate) state: PeerState,
    pub(crate) config: Config,
    pub(crate) keys: Keyspace,
    pub(crate) channel: Arc<dyn SharedChannel>,
    pub(crate) store: PrioritizedStore,
    pub(crate) window: Arc<dyn WindowEnv>,
    pub(crate) navigator: Arc<dyn Navigator>,
    pub(crate) notifier: Arc<dyn UiNotifier>,
    pub(crate) media: Arc<dyn MediaRegistry>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) presence_seen: RecentEvents,
    pub(crate) last_focus_ms: i64,
    tab_hint: Option<String>,
    watches: HashMap<SubscriptionId, Watch>,
    notify_tx: ChangeSink,
    timer_tx: mpsc::UnboundedSender<PeerTimer>,
}

impl Peer {
    pub fn new(config: Config, deps: PeerDeps) -> (Self, PeerInbox) {
        let (notify_tx, notifications) = mpsc::unbounded_channel();
        let (timer_tx, timers) = mpsc::unbounded_channel();
        let peer = Self {
            state: PeerState::fresh(deps.tab_id.clone().unwrap_or_else(generate_id)),
            keys: config.keyspace(),
            presence_seen: RecentEvents::new(config.protocol.presence_dedupe_window),
            config,
            channel: deps.channel,
            store: deps.store,
            window: deps.window,
            navigator: deps.navigator,
            notifier: deps.notifier,
            media: deps.media,
            clock: deps.clock,
            last_focus_ms: 0,
            tab_hint: deps.tab_id,
            watches: HashMap::new(),
            notify_tx,
            timer_tx,
        };
        (peer, PeerInbox { notifications, timers })
    }

    /// Bind to the tab: restore persisted state under a fresh instance id,
    /// arm subscriptions, catch up on missed navigation and teardown signals,
    /// and sweep interest records abandoned by earlier sessions.
    pub async fn attach(&mut self) -> Result<()> {
        let record = self.store.load().filter(|record| match &self.tab_hint {
            Some(tab) if *tab != record.tab_id => {
                debug!(expected = %tab, found = %record.tab_id, "Ignoring record of another tab");
                false
            }
            _ => true,
        });
        let tab_id = self.tab_hint.clone().unwrap_or_else(generate_id);
        self.state = match record {
            Some(record) => PeerState::restore(generate_id(), record),
            None => PeerState::fresh(tab_id),
        };
        self.last_focus_ms = 0;

        self.watch(Watch::SharedConfig, self.keys.config()).await?;
        self.sync_shared_config().await?;
        self.watch(Watch::PairRequest, self.keys.pair_request()).await?;
        self.watch(Watch::LatestPresence, self.keys.latest_presence()).await?;
        if self.rearm_watches().await? {
            self.force_idle("group torn down while detached").await?;
        }
        self.restore_mute_gate().await?;
        self.sweep_stale_interests().await?;
        self.persist();

        info!(
            instance = %self.state.instance_id,
            tab = %self.state.tab_id,
            role = %self.state.role,
            group = self.state.group_id.as_deref().unwrap_or("-"),
            "Peer attached"
        );
        self.notifier.role_changed(&self.state);
        Ok(())
    }

    pub fn state(&self) -> &PeerState {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn instance_id(&self) -> &str {
        &self.state.instance_id
    }

    pub fn role(&self) -> Role {
        self.state.role
    }

    /// Record a focus or pointer event; feeds the contention bid score.
    pub fn note_focus(&mut self) {
        self.last_focus_ms = self.clock.now_ms();
    }

    pub fn last_focus_ms(&self) -> i64 {
        self.last_focus_ms
    }

    pub async fn handle_notification(&mut self, notification: ChangeNotification) -> Result<()> {
        let Some(watch) = self.watches.get(&notification.subscription).copied() else {
            trace!(
                subscription = %notification.subscription,
                key = %notification.key,
                "Dropping notification for retired subscription"
            );
            return Ok(());
        };
        let Some(value) = notification.new_value else {
            trace!(key = %notification.key, "Key deleted");
            return Ok(());
        };

        match watch {
            Watch::Disconnect => self.on_disconnect_signal(&notification.key).await,
            Watch::GlobalReset => self.on_global_reset_signal().await,
            Watch::Navigation => self.on_navigation_timestamp(&notification.key, value).await,
            Watch::GroupPresence | Watch::LatestPresence => {
                self.on_presence(&notification.key, value);
                Ok(())
            }
            Watch::PairRequest => self.on_pair_request(&notification.key, value).await,
            Watch::SharedConfig => {
                self.on_shared_config(&notification.key, value);
                Ok(())
            }
        }
    }

    pub async fn handle_timer(&mut self, timer: PeerTimer) -> Result<()> {
        match timer {
            PeerTimer::ResolveBid { request_id, link } => {
                self.resolve_bid(&request_id, link).await?;
                Ok(())
            }
            PeerTimer::ExpireInterest { key } => {
                trace!(key = %key, "Interest record expired");
                self.channel.delete(&key).await
            }
        }
    }

    /// Drain everything already queued in `inbox` without waiting.
    /// Returns the number of events handled.
    pub async fn pump(&mut self, inbox: &mut PeerInbox) -> usize {
        let mut handled = 0;
        loop {
            if let Ok(notification) = inbox.notifications.try_recv() {
                let key = notification.key.clone();
                if let Err(e) = self.handle_notification(notification).await {
                    warn!(key = %key, error = %e, "Failed to handle channel notification");
                }
                handled += 1;
                continue;
            }
            if let Ok(timer) = inbox.timers.try_recv() {
                if let Err(e) = self.handle_timer(timer).await {
                    warn!(error = %e, "Failed to handle timer");
                }
                handled += 1;
                continue;
            }
            return handled;
        }
    }

    /// Replace the state wholesale, then persist, re-arm role watches and
    /// notify the UI. Leaving a held role clears its mute state. A group whose
    /// teardown signal landed before the watches were armed is left again at
    /// once.
    pub(crate) async fn transition(&mut self, mut next: PeerState) -> Result<()> {
        loop {
            let previous = std::mem::replace(&mut self.state, next);
            let left_role = !previous.is_idle()
                && (previous.role != self.state.role || previous.group_id != self.state.group_id);
            if left_role {
                self.clear_mute(&previous).await;
            }
            self.persist();
            let torn_down = self.rearm_watches().await?;
            debug!(
                from = %previous.role,
                to = %self.state.role,
                group = self.state.group_id.as_deref().unwrap_or("-"),
                "Role transition"
            );
            self.notifier.role_changed(&self.state);
            if !torn_down {
                return Ok(());
            }
            info!(
                group = self.state.group_id.as_deref().unwrap_or("-"),
                "Group was torn down while joining"
            );
            self.drop_membership().await?;
            next = self.state.to_idle();
        }
    }

    /// Persistence failures are logged; the live state stays authoritative.
    pub(crate) fn persist(&self) {
        if let Err(e) = self.store.save(&self.state.to_record()) {
            warn!(error = %e, "Failed to persist peer state");
        }
    }

    pub(crate) fn schedule(&self, delay: Duration, timer: PeerTimer) {
        let tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the peer shut down.
            let _ = tx.send(timer);
        });
    }

    async fn watch(&mut self, watch: Watch, key: String) -> Result<()> {
        let id = self.channel.subscribe(&key, self.notify_tx.clone()).await?;
        self.watches.insert(id, watch);
        Ok(())
    }

    /// Returns true when a teardown signal newer than the current membership
    /// is already stored; the caller must leave the group.
    async fn rearm_watches(&mut self) -> Result<bool> {
        let retired: Vec<SubscriptionId> = self
            .watches
            .iter()
            .filter(|(_, w)| w.is_role_scoped())
            .map(|(id, _)| *id)
            .collect();
        for id in retired {
            self.watches.remove(&id);
            if let Err(e) = self.channel.unsubscribe(id).await {
                warn!(subscription = %id, error = %e, "Failed to unsubscribe");
            }
        }

        let Some(group) = self.state.group_id.clone() else {
            return Ok(false);
        };
        self.watch(Watch::Disconnect, self.keys.disconnect(&group)).await?;
        self.watch(Watch::GlobalReset, self.keys.global_reset()).await?;
        self.watch(Watch::GroupPresence, self.keys.presence(&group)).await?;
        if self.missed_teardown(&group).await? {
            return Ok(true);
        }
        if self.state.role == Role::Target {
            self.watch(Watch::Navigation, self.keys.target_timestamp(&group))
                .await?;
            self.catch_up_navigation().await?;
        }
        Ok(false)
    }

    /// Signals written before the watches existed never arrive as
    /// notifications, so compare what is stored against `joined_at`.
    async fn missed_teardown(&self, group: &str) -> Result<bool> {
        let joined_at = self.state.joined_at;
        let disconnect: Option<i64> =
            read_json(self.channel.as_ref(), &self.keys.disconnect(group)).await?;
        let reset: Option<i64> = read_json(self.channel.as_ref(), &self.keys.global_reset()).await?;
        let missed = disconnect.into_iter().chain(reset).any(|ts| ts > joined_at);
        if missed {
            debug!(group = %group, joined_at, ?disconnect, ?reset, "Teardown signal predates watches");
        }
        Ok(missed)
    }

    #[cfg(test)]
    pub(crate) fn watch_count(&self) -> usize {
        self.watches.len()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::harness;
    use super::*;
    use crate::env::ManualClock;
    use splitlink_channel::MemoryChannel;
    use splitlink_storage::PeerStateStore;

    #[tokio::test]
    async fn test_attach_starts_idle_with_global_watches() {
        let channel = MemoryChannel::new();
        let h = harness(&channel, Arc::new(ManualClock::new(1_000))).await;
        assert!(h.peer.state().is_idle());
        assert_eq!(h.peer.watch_count(), 3);
        assert!(h.slot.load_raw().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_role_watches_follow_transitions() {
        let channel = MemoryChannel::new();
        let mut h = harness(&channel, Arc::new(ManualClock::new(1_000))).await;
        h.peer.create_target(Some("g1".into())).await.unwrap();
        assert_eq!(h.peer.watch_count(), 3 + 4);
        h.peer.revoke_role().await.unwrap();
        assert_eq!(h.peer.watch_count(), 3);
    }

    #[tokio::test]
    async fn test_notifications_for_retired_subscriptions_are_dropped() {
        let channel = MemoryChannel::new();
        let mut h = harness(&channel, Arc::new(ManualClock::new(1_000))).await;
        h.peer.create_target(Some("g1".into())).await.unwrap();
        let stale = ChangeNotification {
            subscription: SubscriptionId(9_999),
            key: h.peer.keys.disconnect("g1"),
            old_value: None,
            new_value: Some(serde_json::json!(1)),
            remote: true,
        };
        h.peer.handle_notification(stale).await.unwrap();
        assert_eq!(h.peer.role(), Role::Target);
    }

    #[tokio::test]
    async fn test_host_tab_id_names_record_and_state_file() {
        use crate::env::{HeadlessWindow, HistoryNavigator, LogNotifier, NoMedia, WindowBounds};
        use splitlink_core::{Paths, PeerRecord};
        use splitlink_storage::FileStore;

        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let channel = MemoryChannel::new();
        let deps = |tab: &str, file: &str| PeerDeps {
            tab_id: Some(tab.to_string()),
            channel: Arc::new(channel.connect()),
            store: PrioritizedStore::new().with_backend(FileStore::new(&paths, file)),
            window: Arc::new(HeadlessWindow::new(WindowBounds::new(0.0, 0.0, 10.0, 10.0))),
            navigator: Arc::new(HistoryNavigator::new(tab)),
            notifier: Arc::new(LogNotifier::new(tab)),
            media: Arc::new(NoMedia),
            clock: Arc::new(ManualClock::new(1_000)),
        };

        let (mut peer, _inbox) = Peer::new(Config::default(), deps("left", "left"));
        peer.attach().await.unwrap();
        assert_eq!(peer.state().tab_id, "left");
        peer.create_target(Some("g".into())).await.unwrap();
        let raw = std::fs::read_to_string(paths.peer_state_file("left")).unwrap();
        let record: PeerRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.tab_id, "left");
        drop(peer);

        let (mut reloaded, _inbox) = Peer::new(Config::default(), deps("left", "left"));
        reloaded.attach().await.unwrap();
        assert_eq!(reloaded.role(), Role::Target);

        // The file holds the record of "left"; a tab named "right" starts fresh.
        let (mut other, _inbox) = Peer::new(Config::default(), deps("right", "left"));
        other.attach().await.unwrap();
        assert!(other.state().is_idle());
        assert_eq!(other.state().tab_id, "right");
    }

    #[tokio::test]
    async fn test_pump_reports_handled_events() {
        let channel = MemoryChannel::new();
        let mut h = harness(&channel, Arc::new(ManualClock::new(1_000))).await;
        assert_eq!(h.peer.pump(&mut h.inbox).await, 0);
    }
}
