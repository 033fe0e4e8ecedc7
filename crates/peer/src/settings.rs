//! Configuration shared through the channel. The first peer to attach seeds
//! the `config` key from its local copy; every later peer adopts the shared
//! copy and follows updates to it.

use serde_json::Value;
use splitlink_channel::{decode, read_json, write_json};
use splitlink_core::{Config, Result};
use tracing::{debug, info};

use crate::peer::Peer;
use crate::presence::RecentEvents;

impl Peer {
    pub(crate) async fn sync_shared_config(&mut self) -> Result<()> {
        let key = self.keys.config();
        match read_json::<Config>(self.channel.as_ref(), &key).await? {
            Some(shared) => {
                self.adopt_config(shared);
                debug!(key = %key, "Adopted shared configuration");
            }
            None => {
                write_json(self.channel.as_ref(), &key, &self.config).await?;
                debug!(key = %key, "Seeded shared configuration");
            }
        }
        Ok(())
    }

    /// Replace the configuration of this peer and every other attached one.
    pub async fn update_config(&mut self, config: Config) -> Result<()> {
        self.adopt_config(config);
        write_json(self.channel.as_ref(), &self.keys.config(), &self.config).await?;
        info!("Shared configuration updated");
        Ok(())
    }

    pub(crate) fn on_shared_config(&mut self, key: &str, value: Value) {
        if let Some(config) = decode::<Config>(key, value) {
            self.adopt_config(config);
            debug!(key = %key, "Shared configuration changed");
        }
    }

    fn adopt_config(&mut self, mut config: Config) {
        // Subscriptions are keyed under the prefix this peer attached with.
        config.protocol.key_prefix = self.keys.prefix().to_string();
        if config.protocol.presence_dedupe_window != self.config.protocol.presence_dedupe_window {
            self.presence_seen = RecentEvents::new(config.protocol.presence_dedupe_window);
        }
        self.config = config;
    }
}
