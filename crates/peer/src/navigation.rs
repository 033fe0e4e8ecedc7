use serde_json::{json, Value};
use splitlink_channel::{decode, read_json};
use splitlink_core::{Error, Result, Role};
use tracing::{debug, warn};

use crate::peer::Peer;

/// Strictly greater than `current`, and the wall clock when that is later.
/// Saturates at `i64::MAX`, which only a foreign writer can reach.
pub fn next_timestamp(current: i64, now: i64) -> i64 {
    if now > current {
        now
    } else {
        current.saturating_add(1)
    }
}

/// Script and in-page anchors never leave the page, so there is nothing to mirror.
fn validate_url(url: &str) -> Result<()> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("empty url".into()));
    }
    if trimmed.starts_with('#') {
        return Err(Error::Validation(format!("fragment-only url '{}'", trimmed)));
    }
    if trimmed
        .get(..11)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("javascript:"))
    {
        return Err(Error::Validation("javascript: urls are not mirrored".into()));
    }
    Ok(())
}

impl Peer {
    /// Announce `url` to the group's targets. Returns the timestamp written.
    ///
    /// The url is written before the timestamp; targets only react to the
    /// timestamp key.
    pub async fn publish_navigation(&mut self, url: &str) -> Result<i64> {
        if self.state.role != Role::Source {
            return Err(Error::InvalidRole(format!(
                "only a source can publish navigation, this peer is {}",
                self.state.role
            )));
        }
        let group = self
            .state
            .group_id
            .clone()
            .ok_or_else(|| Error::InvalidRole("source without group".into()))?;
        validate_url(url)?;

        let ts_key = self.keys.target_timestamp(&group);
        let current: i64 = read_json(self.channel.as_ref(), &ts_key)
            .await?
            .unwrap_or(0);
        let next = next_timestamp(current, self.clock.now_ms());

        self.channel
            .set(&self.keys.target_url(&group), json!(url))
            .await?;
        self.channel.set(&ts_key, json!(next)).await?;
        self.notifier.pulse();

        debug!(group = %group, ts = next, url = %url, "Published navigation");
        Ok(next)
    }

    pub(crate) async fn on_navigation_timestamp(&mut self, key: &str, value: Value) -> Result<()> {
        let Some(announced) = decode::<i64>(key, value) else {
            return Ok(());
        };
        self.apply_navigation(announced).await?;
        Ok(())
    }

    /// Navigate if `announced` is newer than anything applied so far.
    /// The applied timestamp is persisted before navigating, so a replay
    /// after reload is a no-op.
    pub(crate) async fn apply_navigation(&mut self, announced: i64) -> Result<bool> {
        if self.state.role != Role::Target || announced <= self.state.last_applied_ts {
            return Ok(false);
        }
        let Some(group) = self.state.group_id.clone() else {
            return Ok(false);
        };

        let mut next = self.state.clone();
        next.last_applied_ts = announced;
        self.state = next;
        self.persist();

        let url: Option<String> = read_json(self.channel.as_ref(), &self.keys.target_url(&group)).await?;
        match url {
            Some(url) => {
                self.notifier.pulse();
                self.navigator.navigate(&url);
                debug!(group = %group, ts = announced, url = %url, "Applied navigation");
            }
            None => warn!(group = %group, ts = announced, "Timestamp announced without a url"),
        }
        Ok(true)
    }

    /// Compare the stored timestamp with the last applied one; covers
    /// notifications missed while subscribing.
    pub(crate) async fn catch_up_navigation(&mut self) -> Result<()> {
        let Some(group) = self.state.group_id.clone() else {
            return Ok(());
        };
        let stored: i64 = read_json(self.channel.as_ref(), &self.keys.target_timestamp(&group))
            .await?
            .unwrap_or(0);
        if self.apply_navigation(stored).await? {
            debug!(group = %group, ts = stored, "Caught up on missed navigation");
        }
        Ok(())
    }
}
