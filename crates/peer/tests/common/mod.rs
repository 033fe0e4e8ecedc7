#![allow(dead_code)]

use splitlink_channel::MemoryChannel;
use splitlink_core::{Config, PeerState};
use splitlink_peer::{
    HeadlessWindow, ManualClock, MediaHandle, MediaRegistry, Navigator, Notice, Peer, PeerDeps,
    PeerInbox, UiNotifier, WindowBounds,
};
use splitlink_storage::{PrioritizedStore, TabSlotStore};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, url: &str) {
        self.visits.lock().unwrap().push(url.to_string());
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
    role_changes: AtomicUsize,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn role_changes(&self) -> usize {
        self.role_changes.load(Ordering::SeqCst)
    }
}

impl UiNotifier for RecordingNotifier {
    fn notice(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }

    fn role_changed(&self, _state: &PeerState) {
        self.role_changes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct TestMedia {
    muted: AtomicBool,
}

impl TestMedia {
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

impl MediaHandle for TestMedia {
    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }
}

pub struct TestMediaRegistry(pub Arc<TestMedia>);

impl MediaRegistry for TestMediaRegistry {
    fn handles(&self) -> Vec<Arc<dyn MediaHandle>> {
        vec![self.0.clone()]
    }
}

/// One simulated tab and everything it is wired to.
pub struct TestPeer {
    pub peer: Peer,
    pub inbox: PeerInbox,
    pub window: Arc<HeadlessWindow>,
    pub navigator: Arc<RecordingNavigator>,
    pub notifier: Arc<RecordingNotifier>,
    pub media: Arc<TestMedia>,
    pub slot: TabSlotStore,
}

impl TestPeer {
    pub async fn attach(channel: &MemoryChannel, clock: &Arc<ManualClock>) -> Self {
        Self::attach_with(channel, clock, TabSlotStore::new(), Config::default()).await
    }

    /// Attach to an existing tab slot, as a reload would.
    pub async fn attach_with(
        channel: &MemoryChannel,
        clock: &Arc<ManualClock>,
        slot: TabSlotStore,
        config: Config,
    ) -> Self {
        let window = Arc::new(HeadlessWindow::new(WindowBounds::new(0.0, 0.0, 1280.0, 800.0)));
        let navigator = Arc::new(RecordingNavigator::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let media = Arc::new(TestMedia::default());
        let deps = PeerDeps {
            tab_id: None,
            channel: Arc::new(channel.connect()),
            store: PrioritizedStore::new().with_backend(slot.clone()),
            window: window.clone(),
            navigator: navigator.clone(),
            notifier: notifier.clone(),
            media: Arc::new(TestMediaRegistry(media.clone())),
            clock: clock.clone(),
        };
        let (mut peer, inbox) = Peer::new(config, deps);
        peer.attach().await.unwrap();
        Self { peer, inbox, window, navigator, notifier, media, slot }
    }

    pub async fn pump(&mut self) -> usize {
        self.peer.pump(&mut self.inbox).await
    }

    pub fn state(&self) -> &PeerState {
        self.peer.state()
    }
}

/// Pump every peer until none has anything left to handle.
pub async fn settle(peers: &mut [&mut TestPeer]) {
    for _ in 0..32 {
        let mut handled = 0;
        for peer in peers.iter_mut() {
            handled += peer.pump().await;
        }
        if handled == 0 {
            return;
        }
    }
    panic!("peers did not settle");
}
