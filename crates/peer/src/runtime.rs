//! Runs a [`Peer`] on its own task and hands out a cloneable handle.

use splitlink_core::{
    Config, Error, HandshakePayload, MouseBinding, PairingGesture, PairingRequest, PeerState, Result, Role,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::coordinator::HotkeyAction;
use crate::pairing::PairingOutcome;
use crate::peer::{Peer, PeerInbox};

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    SetRole {
        role: Role,
        group_id: Option<String>,
        join_existing: bool,
        reply: Reply<()>,
    },
    RevokeRole(Reply<()>),
    BroadcastDisconnect(Reply<()>),
    ResetAllRoles(Reply<()>),
    JoinLatestAsTarget(Reply<String>),
    JoinLatestAsSource(Reply<String>),
    PublishNavigation { url: String, reply: Reply<i64> },
    BeginCoordinatePairing { x: f64, y: f64, reply: Reply<PairingRequest> },
    HandshakePayload(Reply<HandshakePayload>),
    PairingGesture { gesture: PairingGesture, reply: Reply<PairingOutcome> },
    ToggleMute(Reply<bool>),
    ActivateMuteGate(Reply<()>),
    UpdateConfig { config: Box<Config>, reply: Reply<()> },
    Hotkey { press: MouseBinding, reply: Reply<Option<HotkeyAction>> },
    MediaActivity,
    Focus,
    Snapshot(oneshot::Sender<PeerState>),
    Shutdown,
}

pub struct PeerRuntime;

impl PeerRuntime {
    /// Attach the peer, then spawn its event loop. The loop ends on
    /// [`PeerHandle::shutdown`], when `shutdown_rx` fires, or when every
    /// handle is dropped.
    pub async fn start(
        mut peer: Peer,
        inbox: PeerInbox,
        shutdown_rx: Option<broadcast::Receiver<()>>,
    ) -> Result<(PeerHandle, JoinHandle<()>)> {
        peer.attach().await?;
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(run_loop(peer, inbox, rx, shutdown_rx));
        Ok((PeerHandle { tx }, task))
    }
}

async fn run_loop(
    mut peer: Peer,
    mut inbox: PeerInbox,
    mut commands: mpsc::Receiver<Command>,
    mut shutdown_rx: Option<broadcast::Receiver<()>>,
) {
    info!(instance = %peer.instance_id(), "Peer loop started");
    loop {
        tokio::select! {
            _ = async {
                if let Some(ref mut rx) = shutdown_rx {
                    let _ = rx.recv().await;
                } else {
                    std::future::pending::<()>().await;
                }
            } => {
                break;
            }
            command = commands.recv() => {
                match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => dispatch(&mut peer, command).await,
                }
            }
            Some(notification) = inbox.notifications.recv() => {
                let key = notification.key.clone();
                if let Err(e) = peer.handle_notification(notification).await {
                    warn!(key = %key, error = %e, "Failed to handle channel notification");
                }
            }
            Some(timer) = inbox.timers.recv() => {
                if let Err(e) = peer.handle_timer(timer).await {
                    warn!(error = %e, "Failed to handle timer");
                }
            }
        }
    }
    info!(instance = %peer.instance_id(), role = %peer.role(), "Peer loop stopped");
}

async fn dispatch(peer: &mut Peer, command: Command) {
    match command {
        Command::SetRole { role, group_id, join_existing, reply } => {
            respond(reply, peer.set_role(role, group_id, join_existing).await)
        }
        Command::RevokeRole(reply) => respond(reply, peer.revoke_role().await),
        Command::BroadcastDisconnect(reply) => respond(reply, peer.broadcast_disconnect().await),
        Command::ResetAllRoles(reply) => respond(reply, peer.reset_all_roles().await),
        Command::JoinLatestAsTarget(reply) => respond(reply, peer.join_latest_as_target().await),
        Command::JoinLatestAsSource(reply) => respond(reply, peer.join_latest_as_source().await),
        Command::PublishNavigation { url, reply } => {
            respond(reply, peer.publish_navigation(&url).await)
        }
        Command::BeginCoordinatePairing { x, y, reply } => {
            respond(reply, peer.begin_coordinate_pairing(x, y).await)
        }
        Command::HandshakePayload(reply) => respond(reply, peer.handshake_payload()),
        Command::PairingGesture { gesture, reply } => {
            respond(reply, peer.handle_incoming_pairing_gesture(gesture).await)
        }
        Command::ToggleMute(reply) => respond(reply, peer.toggle_mute().await),
        Command::ActivateMuteGate(reply) => respond(reply, peer.activate_mute_gate().await),
        Command::UpdateConfig { config, reply } => {
            respond(reply, peer.update_config(*config).await)
        }
        Command::Hotkey { press, reply } => respond(reply, peer.handle_hotkey(&press).await),
        Command::MediaActivity => peer.on_media_activity(),
        Command::Focus => peer.note_focus(),
        Command::Snapshot(reply) => {
            let _ = reply.send(peer.state().clone());
        }
        Command::Shutdown => {}
    }
}

fn respond<T>(reply: Reply<T>, result: Result<T>) {
    if let Err(e) = &result {
        debug!(error = %e, "Command failed");
    }
    // Caller stopped waiting.
    let _ = reply.send(result);
}

/// Cloneable handle to a running peer.
#[derive(Clone)]
pub struct PeerHandle {
    tx: mpsc::Sender<Command>,
}

impl PeerHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await
            .map_err(|_| Error::Other("peer dropped the request".into()))?
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::Other("peer is not running".into()))
    }

    pub async fn set_role(&self, role: Role, group_id: Option<String>, join_existing: bool) -> Result<()> {
        self.request(|reply| Command::SetRole { role, group_id, join_existing, reply })
            .await
    }

    pub async fn revoke_role(&self) -> Result<()> {
        self.request(Command::RevokeRole).await
    }

    pub async fn broadcast_disconnect(&self) -> Result<()> {
        self.request(Command::BroadcastDisconnect).await
    }

    pub async fn reset_all_roles(&self) -> Result<()> {
        self.request(Command::ResetAllRoles).await
    }

    pub async fn join_latest_as_target(&self) -> Result<String> {
        self.request(Command::JoinLatestAsTarget).await
    }

    pub async fn join_latest_as_source(&self) -> Result<String> {
        self.request(Command::JoinLatestAsSource).await
    }

    pub async fn publish_navigation(&self, url: impl Into<String>) -> Result<i64> {
        let url = url.into();
        self.request(|reply| Command::PublishNavigation { url, reply })
            .await
    }

    pub async fn begin_coordinate_pairing(&self, x: f64, y: f64) -> Result<PairingRequest> {
        self.request(|reply| Command::BeginCoordinatePairing { x, y, reply })
            .await
    }

    pub async fn handshake_payload(&self) -> Result<HandshakePayload> {
        self.request(Command::HandshakePayload).await
    }

    pub async fn handle_incoming_pairing_gesture(&self, gesture: PairingGesture) -> Result<PairingOutcome> {
        self.request(|reply| Command::PairingGesture { gesture, reply })
            .await
    }

    pub async fn toggle_mute(&self) -> Result<bool> {
        self.request(Command::ToggleMute).await
    }

    pub async fn activate_mute_gate(&self) -> Result<()> {
        self.request(Command::ActivateMuteGate).await
    }

    pub async fn update_config(&self, config: Config) -> Result<()> {
        let config = Box::new(config);
        self.request(|reply| Command::UpdateConfig { config, reply })
            .await
    }

    pub async fn hotkey(&self, press: MouseBinding) -> Result<Option<HotkeyAction>> {
        self.request(|reply| Command::Hotkey { press, reply }).await
    }

    pub async fn media_activity(&self) -> Result<()> {
        self.send(Command::MediaActivity).await
    }

    pub async fn focus(&self) -> Result<()> {
        self.send(Command::Focus).await
    }

    pub async fn snapshot(&self) -> Result<PeerState> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        rx.await
            .map_err(|_| Error::Other("peer dropped the request".into()))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{HeadlessWindow, HistoryNavigator, LogNotifier, ManualClock, NoMedia, WindowBounds};
    use crate::peer::PeerDeps;
    use splitlink_channel::MemoryChannel;
    use splitlink_storage::{PrioritizedStore, TabSlotStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn spawnable(channel: &MemoryChannel, navigator: Arc<HistoryNavigator>) -> (Peer, PeerInbox) {
        let deps = PeerDeps {
            tab_id: None,
            channel: Arc::new(channel.connect()),
            store: PrioritizedStore::new().with_backend(TabSlotStore::new()),
            window: Arc::new(HeadlessWindow::new(WindowBounds::new(0.0, 0.0, 100.0, 100.0))),
            navigator,
            notifier: Arc::new(LogNotifier::new("rt")),
            media: Arc::new(NoMedia),
            clock: Arc::new(ManualClock::new(1_000)),
        };
        Peer::new(Config::default(), deps)
    }

    async fn wait_for_history(navigator: &HistoryNavigator, len: usize) {
        for _ in 0..100 {
            if navigator.history().len() >= len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_handles_drive_source_and_target() {
        let channel = MemoryChannel::new();
        let source_nav = Arc::new(HistoryNavigator::new("a"));
        let target_nav = Arc::new(HistoryNavigator::new("b"));
        let (a, a_inbox) = spawnable(&channel, source_nav);
        let (b, b_inbox) = spawnable(&channel, target_nav.clone());
        let (a, a_task) = PeerRuntime::start(a, a_inbox, None).await.unwrap();
        let (b, b_task) = PeerRuntime::start(b, b_inbox, None).await.unwrap();

        a.set_role(Role::Source, None, false).await.unwrap();
        let group = b.join_latest_as_target().await.unwrap();
        assert_eq!(a.snapshot().await.unwrap().group_id.as_deref(), Some(group.as_str()));

        a.publish_navigation("https://x/1").await.unwrap();
        wait_for_history(&target_nav, 1).await;
        assert_eq!(target_nav.history(), vec!["https://x/1"]);

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
        a_task.await.unwrap();
        b_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_shutdown_stops_loop() {
        let channel = MemoryChannel::new();
        let (peer, inbox) = spawnable(&channel, Arc::new(HistoryNavigator::new("x")));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (handle, task) = PeerRuntime::start(peer, inbox, Some(shutdown_rx)).await.unwrap();
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert!(handle.snapshot().await.is_err());
    }
}
