//! Linking an idle peer to a group on a cross-window gesture.
//!
//! A gesture that only carries a drop coordinate is resolved by contention
//! bidding: every idle, visible peer under the point writes an interest
//! record, waits out the settling delay, then reads all bids for the request
//! and pairs only if its own bid ranks first. A gesture that carries the
//! initiator's identity names its counterpart directly and needs no bidding.

use serde_json::Value;
use splitlink_channel::{decode, read_json, write_json};
use splitlink_core::{
    generate_id, Error, HandshakePayload, InterestRecord, LinkTarget, PairingGesture,
    PairingRequest, Result, Role,
};
use tracing::{debug, info, warn};

use crate::peer::{Peer, PeerTimer};

/// Why a gesture did not lead to a bid or a pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotIdle,
    Hidden,
    Stale,
    SelfPairing,
    OutsideWindow,
    InvalidPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Ignored(IgnoreReason),
    /// Interest recorded; the outcome is decided when the settling delay ends.
    Bidding { request_id: String },
    Paired { role: Role, group_id: String },
    /// Another bidder ranked first.
    Lost,
}

/// Focus dominates: any focused window outranks every unfocused one.
pub fn bid_score(last_focus_ms: i64, has_focus: bool, focus_bonus: i64) -> i64 {
    if has_focus {
        last_focus_ms.saturating_add(focus_bonus)
    } else {
        last_focus_ms
    }
}

/// Highest score wins; equal scores fall back to the greater id.
pub fn elect_winner(bids: &[InterestRecord]) -> Option<&InterestRecord> {
    bids.iter()
        .max_by(|a, b| a.score.cmp(&b.score).then_with(|| a.id.cmp(&b.id)))
}

impl Peer {
    /// Broadcast a coordinate-only pairing request from this peer's group.
    pub async fn begin_coordinate_pairing(&mut self, x: f64, y: f64) -> Result<PairingRequest> {
        let link_target = self.link_target()?;
        let request = PairingRequest {
            request_id: generate_id(),
            link_target,
            timestamp: self.clock.now_ms(),
            drop_x: x,
            drop_y: y,
        };
        write_json(self.channel.as_ref(), &self.keys.pair_request(), &request).await?;
        info!(
            request = %request.request_id,
            group = %request.link_target.group_id,
            x, y,
            "Pairing request broadcast"
        );
        Ok(request)
    }

    /// Payload for a drag that can carry this peer's identity.
    pub fn handshake_payload(&self) -> Result<HandshakePayload> {
        let link = self.link_target()?;
        Ok(HandshakePayload {
            link_target: link.group_id,
            role: link.initiator_role,
            instance_id: self.state.instance_id.clone(),
            timestamp: self.clock.now_ms(),
        })
    }

    pub async fn handle_incoming_pairing_gesture(
        &mut self,
        gesture: PairingGesture,
    ) -> Result<PairingOutcome> {
        match gesture {
            PairingGesture::Coordinate(request) => self.consider_request(request).await,
            PairingGesture::Handshake(payload) => self.accept_handshake(payload).await,
        }
    }

    pub(crate) async fn on_pair_request(&mut self, key: &str, value: Value) -> Result<()> {
        let Some(request) = decode::<PairingRequest>(key, value) else {
            return Ok(());
        };
        let outcome = self.consider_request(request).await?;
        debug!(outcome = ?outcome, "Pairing request considered");
        Ok(())
    }

    /// Announce phase of a contention bid.
    async fn consider_request(&mut self, request: PairingRequest) -> Result<PairingOutcome> {
        if !self.state.is_idle() {
            return Ok(PairingOutcome::Ignored(IgnoreReason::NotIdle));
        }
        if self.window.is_hidden() {
            return Ok(PairingOutcome::Ignored(IgnoreReason::Hidden));
        }
        if self.is_stale(request.timestamp) {
            debug!(request = %request.request_id, "Ignoring stale pairing request");
            return Ok(PairingOutcome::Ignored(IgnoreReason::Stale));
        }
        if !request.drop_x.is_finite()
            || !request.drop_y.is_finite()
            || request.link_target.responder_role().is_none()
        {
            return Ok(PairingOutcome::Ignored(IgnoreReason::InvalidPayload));
        }
        if !self.window.bounds().contains(request.drop_x, request.drop_y) {
            return Ok(PairingOutcome::Ignored(IgnoreReason::OutsideWindow));
        }

        let bid = InterestRecord {
            score: bid_score(
                self.last_focus_ms,
                self.window.has_focus(),
                self.config.protocol.focus_bonus,
            ),
            id: self.state.instance_id.clone(),
            timestamp: self.clock.now_ms(),
        };
        let key = self.keys.interest(&request.request_id, &bid.id);
        write_json(self.channel.as_ref(), &key, &bid).await?;
        self.schedule(
            self.config.settle_delay(),
            PeerTimer::ResolveBid {
                request_id: request.request_id.clone(),
                link: request.link_target,
            },
        );

        debug!(request = %request.request_id, score = bid.score, "Bid placed");
        Ok(PairingOutcome::Bidding { request_id: request.request_id })
    }

    /// Resolve phase: read every bid for the request and pair if ours ranks first.
    pub(crate) async fn resolve_bid(
        &mut self,
        request_id: &str,
        link: LinkTarget,
    ) -> Result<PairingOutcome> {
        let own_key = self.keys.interest(request_id, &self.state.instance_id);
        self.schedule(
            self.config.interest_grace(),
            PeerTimer::ExpireInterest { key: own_key },
        );

        if !self.state.is_idle() {
            debug!(request = %request_id, "No longer idle, abandoning bid");
            return Ok(PairingOutcome::Ignored(IgnoreReason::NotIdle));
        }

        let mut bids = Vec::new();
        for key in self.channel.list_keys(&self.keys.interest_prefix(request_id)).await? {
            if let Some(bid) = read_json::<InterestRecord>(self.channel.as_ref(), &key).await? {
                bids.push(bid);
            }
        }
        let won = elect_winner(&bids).is_some_and(|w| w.id == self.state.instance_id);
        if bids.len() > 1 {
            info!(
                request = %request_id,
                bids = bids.len(),
                won,
                winner = elect_winner(&bids).map(|w| w.id.as_str()).unwrap_or("-"),
                "Contention resolved"
            );
        }
        if !won {
            return Ok(PairingOutcome::Lost);
        }
        self.pair_with(link).await
    }

    async fn accept_handshake(&mut self, payload: HandshakePayload) -> Result<PairingOutcome> {
        if payload.instance_id == self.state.instance_id {
            debug!("Ignoring handshake from this peer");
            return Ok(PairingOutcome::Ignored(IgnoreReason::SelfPairing));
        }
        if !self.state.is_idle() {
            return Ok(PairingOutcome::Ignored(IgnoreReason::NotIdle));
        }
        if self.is_stale(payload.timestamp) {
            debug!(initiator = %payload.instance_id, "Ignoring stale handshake");
            return Ok(PairingOutcome::Ignored(IgnoreReason::Stale));
        }
        if payload.link_target.trim().is_empty() || payload.role.opposite().is_none() {
            return Ok(PairingOutcome::Ignored(IgnoreReason::InvalidPayload));
        }
        self.pair_with(LinkTarget {
            group_id: payload.link_target,
            initiator_role: payload.role,
        })
        .await
    }

    async fn pair_with(&mut self, link: LinkTarget) -> Result<PairingOutcome> {
        let Some(role) = link.responder_role() else {
            return Ok(PairingOutcome::Ignored(IgnoreReason::InvalidPayload));
        };
        match role {
            Role::Target => self.create_target(Some(link.group_id.clone())).await?,
            _ => {
                self.create_source(Some(link.group_id.clone()), true).await?;
            }
        }
        info!(group = %link.group_id, role = %role, "Paired");
        Ok(PairingOutcome::Paired { role, group_id: link.group_id })
    }

    fn link_target(&self) -> Result<LinkTarget> {
        match (&self.state.group_id, self.state.role) {
            (Some(group_id), Role::Source | Role::Target) => Ok(LinkTarget {
                group_id: group_id.clone(),
                initiator_role: self.state.role,
            }),
            _ => Err(Error::InvalidRole(
                "an idle peer has no group to pair into".into(),
            )),
        }
    }

    /// Timestamps come from other writers and may be anything.
    fn is_stale(&self, timestamp: i64) -> bool {
        self.clock.now_ms().saturating_sub(timestamp) > self.config.protocol.pair_max_age_ms
    }

    /// Interest records outlive a crashed bidder; drop any past the max age.
    pub(crate) async fn sweep_stale_interests(&self) -> Result<()> {
        let mut swept = 0usize;
        for key in self.channel.list_keys(&self.keys.interest_root()).await? {
            let bid: Option<InterestRecord> = read_json(self.channel.as_ref(), &key).await?;
            let expired = bid.map(|b| self.is_stale(b.timestamp)).unwrap_or(true);
            if expired {
                if let Err(e) = self.channel.delete(&key).await {
                    warn!(key = %key, error = %e, "Failed to delete stale interest");
                    continue;
                }
                swept += 1;
            }
        }
        if swept > 0 {
            debug!(swept, "Removed stale interest records");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ManualClock;
    use crate::peer::test_support::harness;
    use splitlink_channel::{MemoryChannel, SharedChannel};
    use std::sync::Arc;

    fn bid(score: i64, id: &str) -> InterestRecord {
        InterestRecord { score, id: id.into(), timestamp: 0 }
    }

    #[test]
    fn test_focus_bonus_dominates_recency() {
        let bonus = splitlink_core::ProtocolConfig::default().focus_bonus;
        let now = chrono::Utc::now().timestamp_millis();
        let focused_never_clicked = bid_score(0, true, bonus);
        let unfocused_recent = bid_score(now, false, bonus);
        assert!(focused_never_clicked > unfocused_recent);
        assert_eq!(bid_score(i64::MAX - 1, true, bonus), i64::MAX);
    }

    #[test]
    fn test_elect_highest_score_then_greatest_id() {
        let bids = vec![bid(5, "a"), bid(9, "b"), bid(7, "c")];
        assert_eq!(elect_winner(&bids).unwrap().id, "b");

        let tied = vec![bid(9, "a"), bid(9, "c"), bid(9, "b")];
        assert_eq!(elect_winner(&tied).unwrap().id, "c");

        assert!(elect_winner(&[]).is_none());
    }

    #[tokio::test]
    async fn test_handshake_from_self_is_ignored() {
        let channel = MemoryChannel::new();
        let mut h = harness(&channel, Arc::new(ManualClock::new(1_000))).await;
        h.peer.create_source(None, false).await.unwrap();
        let payload = h.peer.handshake_payload().unwrap();
        let outcome = h
            .peer
            .handle_incoming_pairing_gesture(PairingGesture::Handshake(payload))
            .await
            .unwrap();
        assert_eq!(outcome, PairingOutcome::Ignored(IgnoreReason::SelfPairing));
    }

    #[tokio::test]
    async fn test_idle_peer_cannot_initiate() {
        let channel = MemoryChannel::new();
        let mut h = harness(&channel, Arc::new(ManualClock::new(1_000))).await;
        assert!(h.peer.handshake_payload().is_err());
        assert!(h.peer.begin_coordinate_pairing(1.0, 1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_request_filters() {
        let channel = MemoryChannel::new();
        let clock = Arc::new(ManualClock::new(10_000));
        let mut h = harness(&channel, clock.clone()).await;
        let request = |ts: i64, x: f64| PairingRequest {
            request_id: "r".into(),
            link_target: LinkTarget { group_id: "g".into(), initiator_role: Role::Source },
            timestamp: ts,
            drop_x: x,
            drop_y: 10.0,
        };

        let stale = h.peer.handle_incoming_pairing_gesture(PairingGesture::Coordinate(request(4_000, 10.0)));
        assert_eq!(stale.await.unwrap(), PairingOutcome::Ignored(IgnoreReason::Stale));

        let outside = h.peer.handle_incoming_pairing_gesture(PairingGesture::Coordinate(request(9_000, 5_000.0)));
        assert_eq!(outside.await.unwrap(), PairingOutcome::Ignored(IgnoreReason::OutsideWindow));

        h.window.set_hidden(true);
        let hidden = h.peer.handle_incoming_pairing_gesture(PairingGesture::Coordinate(request(9_000, 10.0)));
        assert_eq!(hidden.await.unwrap(), PairingOutcome::Ignored(IgnoreReason::Hidden));
    }

    #[tokio::test]
    async fn test_extreme_timestamps_count_as_stale() {
        let channel = MemoryChannel::new();
        let mut h = harness(&channel, Arc::new(ManualClock::new(10_000))).await;
        let payload = HandshakePayload {
            link_target: "g".into(),
            role: Role::Source,
            instance_id: "someone".into(),
            timestamp: i64::MIN,
        };
        let outcome = h
            .peer
            .handle_incoming_pairing_gesture(PairingGesture::Handshake(payload))
            .await
            .unwrap();
        assert_eq!(outcome, PairingOutcome::Ignored(IgnoreReason::Stale));
        assert!(h.peer.state().is_idle());

        let keys = splitlink_core::Keyspace::default();
        let writer = channel.connect();
        write_json(&writer, &keys.interest("r", "x"), &InterestRecord { score: 1, id: "x".into(), timestamp: i64::MIN })
            .await
            .unwrap();
        h.peer.sweep_stale_interests().await.unwrap();
        assert!(writer.list_keys(&keys.interest_root()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attach_sweeps_only_expired_interests() {
        let channel = MemoryChannel::new();
        let keys = splitlink_core::Keyspace::default();
        let writer = channel.connect();
        write_json(&writer, &keys.interest("old", "x"), &InterestRecord { score: 1, id: "x".into(), timestamp: 1_000 })
            .await
            .unwrap();
        write_json(&writer, &keys.interest("new", "y"), &InterestRecord { score: 1, id: "y".into(), timestamp: 9_500 })
            .await
            .unwrap();
        writer.set(&keys.interest("junk", "z"), serde_json::json!("garbage")).await.unwrap();

        let _h = harness(&channel, Arc::new(ManualClock::new(10_000))).await;
        let mut remaining = writer.list_keys(&keys.interest_root()).await.unwrap();
        remaining.sort();
        assert_eq!(remaining, vec![keys.interest("new", "y")]);
    }
}
