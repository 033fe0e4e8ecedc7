//! Mute gate. Until the user first touches mute or volume, media activity
//! is only observed so a page's own autoplay handling is left alone. Once
//! activated, the peer's mute flag is enforced on every media handle for as
//! long as the current role is held.

use serde_json::json;
use splitlink_channel::read_json;
use splitlink_core::{Error, PeerState, Result};
use tracing::{info, trace, warn};

use crate::peer::Peer;

impl Peer {
    pub fn is_muted(&self) -> bool {
        self.state.is_muted
    }

    pub fn mute_gate_active(&self) -> bool {
        self.state.mute_gate_active
    }

    pub async fn activate_mute_gate(&mut self) -> Result<()> {
        self.require_held_role("activate the mute gate")?;
        if !self.state.mute_gate_active {
            let mut next = self.state.clone();
            next.mute_gate_active = true;
            self.state = next;
            self.channel
                .set(&self.keys.mute_gate(&self.state.tab_id, self.state.role), json!(true))
                .await?;
            info!(role = %self.state.role, "Mute gate activated");
        }
        self.apply_mute();
        Ok(())
    }

    /// Flip the mute flag and enforce it, activating the gate if needed.
    /// Returns the new flag.
    pub async fn toggle_mute(&mut self) -> Result<bool> {
        self.require_held_role("toggle mute")?;
        let mut next = self.state.clone();
        next.is_muted = !next.is_muted;
        self.state = next;
        self.persist();
        self.channel
            .set(
                &self.keys.mute(&self.state.tab_id, self.state.role),
                json!(self.state.is_muted),
            )
            .await?;

        if self.state.mute_gate_active {
            self.apply_mute();
        } else {
            self.activate_mute_gate().await?;
        }
        Ok(self.state.is_muted)
    }

    /// Media started playing or changed volume.
    pub fn on_media_activity(&self) {
        if self.state.mute_gate_active {
            self.apply_mute();
        } else {
            trace!("Media activity observed, gate inactive");
        }
    }

    fn apply_mute(&self) {
        let muted = self.state.is_muted;
        for handle in self.media.handles() {
            handle.set_muted(muted);
        }
    }

    /// Forget the mute state of a role being left.
    pub(crate) async fn clear_mute(&self, previous: &PeerState) {
        for key in [
            self.keys.mute(&previous.tab_id, previous.role),
            self.keys.mute_gate(&previous.tab_id, previous.role),
        ] {
            if let Err(e) = self.channel.delete(&key).await {
                warn!(key = %key, error = %e, "Failed to clear mute state");
            }
        }
        if previous.mute_gate_active && previous.is_muted {
            for handle in self.media.handles() {
                handle.set_muted(false);
            }
        }
    }

    /// After reload both flags come back from the channel. The record's mute
    /// flag only stands in when the channel has none.
    pub(crate) async fn restore_mute_gate(&mut self) -> Result<()> {
        if self.state.is_idle() {
            return Ok(());
        }
        let (tab, role) = (self.state.tab_id.clone(), self.state.role);
        let muted: Option<bool> = read_json(self.channel.as_ref(), &self.keys.mute(&tab, role)).await?;
        let active: bool = read_json(self.channel.as_ref(), &self.keys.mute_gate(&tab, role))
            .await?
            .unwrap_or(false);

        let mut next = self.state.clone();
        if let Some(muted) = muted {
            next.is_muted = muted;
        }
        next.mute_gate_active = active;
        self.state = next;
        if active {
            self.apply_mute();
            info!(muted = self.state.is_muted, "Mute gate restored");
        }
        Ok(())
    }

    fn require_held_role(&self, action: &str) -> Result<()> {
        if self.state.is_idle() {
            return Err(Error::InvalidRole(format!("an idle peer cannot {}", action)));
        }
        Ok(())
    }
}
