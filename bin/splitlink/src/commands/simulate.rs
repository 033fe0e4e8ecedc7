use splitlink_channel::MemoryChannel;
use splitlink_core::{Config, PairingGesture, Paths, PeerState, Role};
use splitlink_peer::{
    HeadlessWindow, HistoryNavigator, LogNotifier, NoMedia, Peer, PeerDeps, PeerHandle,
    PeerRuntime, SystemClock, WindowBounds,
};
use splitlink_storage::{FileStore, PrioritizedStore, TabSlotStore, WindowNameStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

const DEFAULT_URLS: [&str; 3] = [
    "https://example.com/",
    "https://example.com/docs",
    "https://example.com/docs",
];

/// Delivery in the memory channel is immediate; this only lets peer loops run.
const HOP: Duration = Duration::from_millis(50);

struct SimTab {
    label: &'static str,
    handle: PeerHandle,
    window: Arc<HeadlessWindow>,
    navigator: Arc<HistoryNavigator>,
    task: JoinHandle<()>,
}

async fn open_tab(
    label: &'static str,
    bounds: WindowBounds,
    channel: &MemoryChannel,
    config: &Config,
    paths: Option<&Paths>,
    shutdown: &broadcast::Sender<()>,
) -> anyhow::Result<SimTab> {
    let window = Arc::new(HeadlessWindow::new(bounds));
    let navigator = Arc::new(HistoryNavigator::new(label));
    let mut store = PrioritizedStore::new()
        .with_backend(TabSlotStore::new())
        .with_backend(WindowNameStore::new());
    if let Some(paths) = paths {
        store = store.with_backend(FileStore::new(paths, label));
    }
    let deps = PeerDeps {
        tab_id: Some(label.to_string()),
        channel: Arc::new(channel.connect()),
        store,
        window: window.clone(),
        navigator: navigator.clone(),
        notifier: Arc::new(LogNotifier::new(label)),
        media: Arc::new(NoMedia),
        clock: Arc::new(SystemClock),
    };
    let (peer, inbox) = Peer::new(config.clone(), deps);
    let (handle, task) = PeerRuntime::start(peer, inbox, Some(shutdown.subscribe())).await?;
    Ok(SimTab { label, handle, window, navigator, task })
}

fn describe(label: &str, state: &PeerState) -> String {
    format!(
        "{:<8} {:<7} group={:<10} applied={}",
        label,
        state.role.as_str(),
        state.group_id.as_deref().unwrap_or("-"),
        state.last_applied_ts
    )
}

async fn print_tabs(title: &str, tabs: &[&SimTab]) -> anyhow::Result<()> {
    println!();
    println!("{}", title);
    for tab in tabs {
        let state = tab.handle.snapshot().await?;
        println!("  {}", describe(tab.label, &state));
    }
    Ok(())
}

/// Source/target mirroring, a contention bid between two overlapping idle
/// windows, a handshake recruit, a disconnect and a global reset.
pub async fn run(urls: Vec<String>, persist: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let channel = MemoryChannel::new();
    let (shutdown_tx, _) = broadcast::channel(1);
    let file_paths = if persist { Some(&paths) } else { None };

    let left = WindowBounds::new(0.0, 0.0, 960.0, 1080.0);
    let right = WindowBounds::new(960.0, 0.0, 960.0, 1080.0);
    let source = open_tab("source", left, &channel, &config, file_paths, &shutdown_tx).await?;
    let target = open_tab("target", right, &channel, &config, file_paths, &shutdown_tx).await?;
    let focused = open_tab("focused", right, &channel, &config, file_paths, &shutdown_tx).await?;
    let recent = open_tab("recent", right, &channel, &config, file_paths, &shutdown_tx).await?;

    source
        .handle
        .set_role(Role::Source, None, false)
        .await?;
    let group = target.handle.join_latest_as_target().await?;
    info!(group = %group, "Linked source and target");

    let urls = if urls.is_empty() {
        DEFAULT_URLS.iter().map(|u| u.to_string()).collect()
    } else {
        urls
    };
    for url in &urls {
        let ts = source.handle.publish_navigation(url.clone()).await?;
        info!(url = %url, ts, "Published");
        tokio::time::sleep(HOP).await;
    }
    println!();
    println!("Target visited {} of {} published urls:", target.navigator.history().len(), urls.len());
    for url in target.navigator.history() {
        println!("  {}", url);
    }

    // Two idle windows under the drop point: the focused one wins even though
    // the other saw pointer activity more recently.
    recent.handle.focus().await?;
    focused.window.set_focus(true);
    source.handle.begin_coordinate_pairing(1400.0, 500.0).await?;
    tokio::time::sleep(config.settle_delay() + HOP * 2).await;
    print_tabs("After contention bid:", &[&source, &target, &focused, &recent]).await?;

    let payload = target.handle.handshake_payload().await?;
    let outcome = recent
        .handle
        .handle_incoming_pairing_gesture(PairingGesture::Handshake(payload))
        .await?;
    info!(outcome = ?outcome, "Handshake resolved");
    print_tabs("After handshake:", &[&source, &target, &focused, &recent]).await?;

    target.handle.toggle_mute().await?;
    source.handle.broadcast_disconnect().await?;
    tokio::time::sleep(HOP).await;
    print_tabs("After disconnect:", &[&source, &target, &focused, &recent]).await?;

    source.handle.set_role(Role::Source, None, false).await?;
    target.handle.join_latest_as_target().await?;
    tokio::time::sleep(HOP).await;
    recent.handle.reset_all_roles().await?;
    tokio::time::sleep(HOP).await;
    print_tabs("After global reset:", &[&source, &target, &focused, &recent]).await?;

    let _ = shutdown_tx.send(());
    for tab in [source, target, focused, recent] {
        tab.task.await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_idle_peer() {
        let state = PeerState::fresh("tab".into());
        let line = describe("idle", &state);
        assert!(line.contains("idle"));
        assert!(line.contains("group=-"));
    }

    #[test]
    fn test_describe_target_peer() {
        let state = PeerState::fresh("tab".into()).with_target("g1".into(), 1);
        assert_eq!(state.role, Role::Target);
        assert!(describe("t", &state).contains("group=g1"));
    }
}
