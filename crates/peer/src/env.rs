//! Collaborators the protocol depends on but does not implement: the clock,
//! the host window, navigation, the on-screen UI and media discovery.

use splitlink_core::PeerState;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::presence::PresenceNotice;

pub trait Clock: Send + Sync {
    /// Wall-clock milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self { now: AtomicI64::new(start_ms) }
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Outer window rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowBounds {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl WindowBounds {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { left, top, width, height }
    }

    /// Edges are inclusive.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x <= self.left + self.width && y >= self.top && y <= self.top + self.height
    }
}

pub trait WindowEnv: Send + Sync {
    fn bounds(&self) -> WindowBounds;
    fn has_focus(&self) -> bool;
    fn is_hidden(&self) -> bool;
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &str);
}

/// Classified, non-blocking messages for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Presence(PresenceNotice),
    ConfigurationError(String),
    RolesReset,
}

pub trait UiNotifier: Send + Sync {
    fn notice(&self, notice: Notice);

    fn role_changed(&self, _state: &PeerState) {}

    /// Visual acknowledgement of a publish or an applied navigation.
    fn pulse(&self) {}
}

pub trait MediaHandle: Send + Sync {
    fn set_muted(&self, muted: bool);
}

/// Discovers the playable media a peer controls.
pub trait MediaRegistry: Send + Sync {
    fn handles(&self) -> Vec<Arc<dyn MediaHandle>>;
}

pub struct NoMedia;

impl MediaRegistry for NoMedia {
    fn handles(&self) -> Vec<Arc<dyn MediaHandle>> {
        Vec::new()
    }
}

/// Window with settable geometry and focus, for hosts without a real one.
pub struct HeadlessWindow {
    bounds: Mutex<WindowBounds>,
    focused: AtomicBool,
    hidden: AtomicBool,
}

impl HeadlessWindow {
    pub fn new(bounds: WindowBounds) -> Self {
        Self {
            bounds: Mutex::new(bounds),
            focused: AtomicBool::new(false),
            hidden: AtomicBool::new(false),
        }
    }

    pub fn set_bounds(&self, bounds: WindowBounds) {
        if let Ok(mut guard) = self.bounds.lock() {
            *guard = bounds;
        }
    }

    pub fn set_focus(&self, focused: bool) {
        self.focused.store(focused, Ordering::SeqCst);
    }

    pub fn set_hidden(&self, hidden: bool) {
        self.hidden.store(hidden, Ordering::SeqCst);
    }
}

impl WindowEnv for HeadlessWindow {
    fn bounds(&self) -> WindowBounds {
        match self.bounds.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn has_focus(&self) -> bool {
        self.focused.load(Ordering::SeqCst)
    }

    fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::SeqCst)
    }
}

/// Records every navigation instead of performing it.
#[derive(Default)]
pub struct HistoryNavigator {
    label: String,
    history: Mutex<Vec<String>>,
}

impl HistoryNavigator {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

impl Navigator for HistoryNavigator {
    fn navigate(&self, url: &str) {
        info!(peer = %self.label, url = %url, "Navigating");
        match self.history.lock() {
            Ok(mut history) => history.push(url.to_string()),
            Err(_) => warn!(peer = %self.label, "Navigation history unavailable"),
        }
    }
}

/// Sends notices to the log.
pub struct LogNotifier {
    label: String,
}

impl LogNotifier {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl UiNotifier for LogNotifier {
    fn notice(&self, notice: Notice) {
        match notice {
            Notice::Presence(p) => {
                info!(peer = %self.label, kind = ?p.kind, group = %p.group_id, same_group = p.same_group, "Presence")
            }
            Notice::ConfigurationError(message) => {
                warn!(peer = %self.label, message = %message, "Configuration error")
            }
            Notice::RolesReset => info!(peer = %self.label, "All roles have been reset"),
        }
    }

    fn role_changed(&self, state: &PeerState) {
        info!(
            peer = %self.label,
            role = %state.role,
            group = state.group_id.as_deref().unwrap_or("-"),
            "Role changed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_contains_edges() {
        let b = WindowBounds::new(100.0, 50.0, 800.0, 600.0);
        assert!(b.contains(100.0, 50.0));
        assert!(b.contains(900.0, 650.0));
        assert!(b.contains(500.0, 300.0));
        assert!(!b.contains(99.9, 300.0));
        assert!(!b.contains(500.0, 650.1));
    }

    #[test]
    fn test_manual_clock_moves_on_request() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.now_ms(), 10);
        clock.advance(5);
        assert_eq!(clock.now_ms(), 15);
        clock.set(1);
        assert_eq!(clock.now_ms(), 1);
    }

    #[test]
    fn test_history_navigator_records() {
        let nav = HistoryNavigator::new("t");
        nav.navigate("https://a");
        nav.navigate("https://b");
        assert_eq!(nav.history(), vec!["https://a", "https://b"]);
    }
}
