//! Role state machine: idle, source and target, plus the group membership
//! and teardown signals that go with each transition.

use serde_json::json;
use splitlink_channel::{read_json, write_json};
use splitlink_core::{
    generate_id, Error, HotkeyConfig, LatestSource, MouseBinding, PresenceChange, Result, Role,
};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::env::Notice;
use crate::peer::Peer;

/// What a configured mouse binding asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyAction {
    CreateSource,
    JoinLatestAsTarget,
}

impl HotkeyAction {
    pub fn from_press(hotkeys: &HotkeyConfig, press: &MouseBinding) -> Option<Self> {
        if hotkeys.source_key.matches(press) {
            Some(HotkeyAction::CreateSource)
        } else if hotkeys.target_key.matches(press) {
            Some(HotkeyAction::JoinLatestAsTarget)
        } else {
            None
        }
    }
}

impl Peer {
    /// Take `role`. A peer already holding a role revokes it first; asking
    /// for the role and group it already holds is a no-op.
    pub async fn set_role(
        &mut self,
        role: Role,
        group_id: Option<String>,
        join_existing: bool,
    ) -> Result<()> {
        match role {
            Role::Idle => self.revoke_role().await,
            Role::Source => {
                let already_member = join_existing
                    && self.state.role == Role::Source
                    && group_id.is_some()
                    && self.state.group_id == group_id;
                if already_member {
                    debug!("Already a source of the requested group");
                    return Ok(());
                }
                self.create_source(group_id, join_existing).await.map(|_| ())
            }
            Role::Target => {
                if self.state.role == Role::Target
                    && group_id.is_some()
                    && self.state.group_id == group_id
                {
                    debug!("Already a target of the requested group");
                    return Ok(());
                }
                self.create_target(group_id).await
            }
        }
    }

    /// Become a source. `group_id` is reused only when joining an existing
    /// group; otherwise a fresh group is minted. Returns the group id.
    pub async fn create_source(
        &mut self,
        group_id: Option<String>,
        join_existing: bool,
    ) -> Result<String> {
        self.release_role().await?;

        let group = match group_id {
            Some(id) if join_existing && !id.trim().is_empty() => id,
            _ => generate_id(),
        };
        let member = generate_id();
        let next = self.state.with_source(group.clone(), member.clone(), self.clock.now_ms());
        self.transition(next).await?;
        self.ensure_joined(&group)?;

        self.add_member(&group, &member).await?;
        let latest = LatestSource {
            group_id: group.clone(),
            timestamp: self.clock.now_ms(),
        };
        write_json(self.channel.as_ref(), &self.keys.latest_source(), &latest).await?;
        self.announce_presence(&group, PresenceChange::Joined { new_role: Role::Source })
            .await;

        info!(group = %group, member = %member, joined = join_existing, "Became source");
        Ok(group)
    }

    /// Become a target of `group_id`. Without a group this is a
    /// configuration error and nothing changes.
    pub async fn create_target(&mut self, group_id: Option<String>) -> Result<()> {
        let Some(group) = group_id.filter(|g| !g.trim().is_empty()) else {
            return Err(self.configuration_error("Cannot become Target without a Source ID."));
        };
        self.release_role().await?;

        let next = self.state.with_target(group.clone(), self.clock.now_ms());
        self.transition(next).await?;
        self.ensure_joined(&group)?;
        self.announce_presence(&group, PresenceChange::Joined { new_role: Role::Target })
            .await;

        info!(group = %group, "Became target");
        Ok(())
    }

    /// Leave the current role without affecting anyone else.
    pub async fn revoke_role(&mut self) -> Result<()> {
        let previous = self.state.clone();
        let Some(group) = previous.group_id.clone() else {
            debug!("Revoke on idle peer ignored");
            return Ok(());
        };
        self.drop_membership().await?;
        self.transition(self.state.to_idle()).await?;
        self.announce_presence(
            &group,
            PresenceChange::Disconnected { disconnected_role: previous.role },
        )
        .await;

        info!(group = %group, role = %previous.role, "Role revoked");
        Ok(())
    }

    /// Leave the current role and signal every peer of the group to do the same.
    pub async fn broadcast_disconnect(&mut self) -> Result<()> {
        let previous = self.state.clone();
        let Some(group) = previous.group_id.clone() else {
            debug!("Disconnect on idle peer ignored");
            return Ok(());
        };
        self.drop_membership().await?;
        self.channel
            .set(&self.keys.disconnect(&group), json!(self.clock.now_ms()))
            .await?;
        self.transition(self.state.to_idle()).await?;
        self.announce_presence(
            &group,
            PresenceChange::Disconnected { disconnected_role: previous.role },
        )
        .await;

        info!(group = %group, "Group disconnected");
        Ok(())
    }

    /// Force every peer back to idle and wipe the protocol keyspace, keeping
    /// stored configuration and UI layout.
    pub async fn reset_all_roles(&mut self) -> Result<()> {
        let prefix = self.keys.prefix().to_string();
        let existing = self.channel.list_keys(&prefix).await?;
        let groups: BTreeSet<String> = existing
            .iter()
            .filter_map(|k| self.keys.group_id_of(k))
            .map(str::to_string)
            .collect();

        let now = self.clock.now_ms();
        for group in &groups {
            self.channel.set(&self.keys.disconnect(group), json!(now)).await?;
        }
        self.channel.set(&self.keys.global_reset(), json!(now)).await?;

        let mut cleared = 0usize;
        for key in self.channel.list_keys(&prefix).await? {
            if self.keys.is_preserved(&key) {
                continue;
            }
            self.channel.delete(&key).await?;
            cleared += 1;
        }

        self.store.clear();
        self.transition(self.state.to_idle()).await?;
        self.notifier.notice(Notice::RolesReset);

        info!(groups = groups.len(), cleared, "All roles reset");
        Ok(())
    }

    /// Join the most recently created group as a target.
    pub async fn join_latest_as_target(&mut self) -> Result<String> {
        let latest = self.require_latest_source().await?;
        self.set_role(Role::Target, Some(latest.group_id.clone()), false)
            .await?;
        Ok(latest.group_id)
    }

    /// Join the most recently created group as an additional source.
    pub async fn join_latest_as_source(&mut self) -> Result<String> {
        let latest = self.require_latest_source().await?;
        self.set_role(Role::Source, Some(latest.group_id.clone()), true)
            .await?;
        Ok(latest.group_id)
    }

    pub async fn latest_source(&self) -> Result<Option<LatestSource>> {
        read_json(self.channel.as_ref(), &self.keys.latest_source()).await
    }

    pub async fn group_members(&self, group_id: &str) -> Result<Vec<String>> {
        Ok(read_json(self.channel.as_ref(), &self.keys.sources(group_id))
            .await?
            .unwrap_or_default())
    }

    /// Dispatch a configured mouse binding. Unbound presses return `None`.
    pub async fn handle_hotkey(&mut self, press: &MouseBinding) -> Result<Option<HotkeyAction>> {
        let Some(action) = HotkeyAction::from_press(&self.config.hotkeys, press) else {
            return Ok(None);
        };
        match action {
            HotkeyAction::CreateSource => {
                self.set_role(Role::Source, None, false).await?;
            }
            HotkeyAction::JoinLatestAsTarget => {
                self.join_latest_as_target().await?;
            }
        }
        Ok(Some(action))
    }

    /// Remote disconnect signal for the group this peer belongs to.
    pub(crate) async fn on_disconnect_signal(&mut self, key: &str) -> Result<()> {
        let signalled = self.keys.group_id_of(key);
        if signalled.is_none() || signalled != self.state.group_id.as_deref() {
            return Ok(());
        }
        self.force_idle("group disconnected").await
    }

    pub(crate) async fn on_global_reset_signal(&mut self) -> Result<()> {
        self.force_idle("global reset").await
    }

    /// Idempotent: an idle peer stays as it is.
    pub(crate) async fn force_idle(&mut self, reason: &str) -> Result<()> {
        if self.state.is_idle() {
            return Ok(());
        }
        let group = self.state.group_id.clone();
        self.drop_membership().await?;
        self.transition(self.state.to_idle()).await?;
        info!(group = group.as_deref().unwrap_or("-"), reason, "Forced to idle");
        Ok(())
    }

    /// `transition` leaves a group whose teardown raced the join.
    fn ensure_joined(&self, group: &str) -> Result<()> {
        if self.state.group_id.as_deref() == Some(group) {
            return Ok(());
        }
        Err(Error::InvalidRole(format!(
            "group {} was disconnected while joining",
            group
        )))
    }

    async fn release_role(&mut self) -> Result<()> {
        if self.state.is_idle() {
            return Ok(());
        }
        self.revoke_role().await
    }

    async fn require_latest_source(&self) -> Result<LatestSource> {
        match self.latest_source().await? {
            Some(latest) => Ok(latest),
            None => Err(self.configuration_error("No source found")),
        }
    }

    pub(crate) fn configuration_error(&self, message: &str) -> Error {
        self.notifier
            .notice(Notice::ConfigurationError(message.to_string()));
        Error::Config(message.to_string())
    }

    pub(crate) async fn drop_membership(&self) -> Result<()> {
        if let (Role::Source, Some(group), Some(member)) = (
            self.state.role,
            self.state.group_id.as_deref(),
            self.state.source_member_id.as_deref(),
        ) {
            self.remove_member(group, member).await?;
        }
        Ok(())
    }

    async fn add_member(&self, group_id: &str, member_id: &str) -> Result<()> {
        let mut members = self.group_members(group_id).await?;
        if members.iter().any(|m| m == member_id) {
            return Ok(());
        }
        members.push(member_id.to_string());
        write_json(self.channel.as_ref(), &self.keys.sources(group_id), &members).await
    }

    /// The membership key is deleted once the last member leaves.
    async fn remove_member(&self, group_id: &str, member_id: &str) -> Result<()> {
        let key = self.keys.sources(group_id);
        let members: Vec<String> = self
            .group_members(group_id)
            .await?
            .into_iter()
            .filter(|m| m != member_id)
            .collect();
        if members.is_empty() {
            debug!(group = %group_id, "Last source left, removing group");
            self.channel.delete(&key).await
        } else {
            write_json(self.channel.as_ref(), &key, &members).await
        }
    }
}
