pub mod agent;

use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use ishare_utils::time;

use crate::codec::{self, Verified};
use crate::config::TrackerConfig;
use crate::constants::{MAX_DHT_NODES_PER_RESPONSE, MESSAGE_VALIDITY_WINDOW_MS};
use crate::identity::{b32_of, Identity};
use crate::models::common::{Destination, Nonce};
use crate::models::message::{
    AnnouncePayload, DhtNodesListPayload, Envelope, Message, PeerOfflinePayload, PeersListPayload,
};
use crate::models::peer::{DhtNode, PeerRecord};
use crate::sam::DatagramSender;
use crate::storage::PeerStore;

/// Capacity of the lifecycle event channel; slow subscribers lose events
/// rather than stalling the engine.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Presence deltas surfaced to the hosting process.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    PeerOnline(PeerRecord),
    PeerOffline(Destination),
}

/// The discovery protocol engine: validates inbound datagrams, mutates the
/// peer store, answers requests and fans presence deltas out.
///
/// The engine holds no peer state of its own; the store is the single
/// source of truth. It owns only the replay cache and a send capability.
pub struct DiscoveryEngine {
    store: Arc<PeerStore>,
    config: Arc<TrackerConfig>,
    identity: Arc<Identity>,
    sender: Arc<dyn DatagramSender>,
    seen_nonces: Mutex<HashSet<Nonce>>,
    events: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryEngine {
    pub fn new(
        store: Arc<PeerStore>,
        config: Arc<TrackerConfig>,
        identity: Arc<Identity>,
        sender: Arc<dyn DatagramSender>,
    ) -> DiscoveryEngine {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        DiscoveryEngine {
            store,
            config,
            identity,
            sender,
            seen_nonces: Mutex::new(HashSet::new()),
            events,
        }
    }

    /// Lifecycle events; lagging receivers drop, they are never waited on.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// Full validation-and-dispatch pipeline for one inbound datagram.
    /// Invalid traffic is logged and dropped, never answered.
    pub async fn handle_datagram(&self, raw: &[u8]) {
        if !raw.trim_ascii_start().starts_with(b"{") {
            debug!("Dropping non-JSON datagram of {} bytes", raw.len());
            return;
        }

        let envelope: Envelope = match serde_json::from_slice(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!("Dropping unparseable datagram: {}", err);
                return;
            }
        };

        let verified = match codec::verify(&envelope) {
            Ok(verified) => verified,
            Err(err) => {
                debug!("Dropping envelope: {}", err);
                return;
            }
        };

        let Some(from) = envelope.from.clone() else {
            debug!("Dropping envelope: {}", codec::VerifyError::MissingSender);
            return;
        };

        let signing_key = match &verified {
            Verified::Signed { signing_key, nonce } => {
                if self.is_replayed(nonce) {
                    debug!("Nonce already used, dropping message from {:?}", from);
                    return;
                }
                Some(signing_key.clone())
            }
            Verified::Legacy => {
                warn!("Accepting legacy unsigned message from {:?}", from);
                None
            }
        };

        let message = match Message::parse(&envelope.data) {
            Ok(message) => message,
            Err(err) => {
                debug!("Dropping message from {:?}: {}", from, err);
                return;
            }
        };

        // Signing-key consistency: a bound key can never change, and a
        // peer that bound one can no longer announce unsigned.
        if matches!(message, Message::Announce(_)) {
            if let Ok(Some(existing)) = self.store.get_peer(&from) {
                if existing.signing_key.is_some() && existing.signing_key != signing_key {
                    warn!(
                        "Rejecting ANNOUNCE from {:?}: signing key does not match binding",
                        from
                    );
                    return;
                }
            }
        }

        if let Verified::Signed { nonce, .. } = &verified {
            self.mark_nonce(nonce);
        }

        self.dispatch(message, &from, signing_key).await;
    }

    async fn dispatch(&self, message: Message, from: &Destination, signing_key: Option<String>) {
        match message {
            Message::Announce(payload) => self.handle_announce(from, payload, signing_key).await,
            Message::GetPeers => self.handle_get_peers(from).await,
            Message::Ping => self.handle_ping(from).await,
            Message::Disconnect => self.handle_disconnect(from).await,
            Message::GetDhtNodes => self.handle_get_dht_nodes(from).await,

            // Tracker-to-client and peer-to-peer kinds are not for us.
            other => {
                debug!("Ignoring {} from {:?}", other.kind(), from);
            }
        }
    }

    async fn handle_announce(
        &self,
        from: &Destination,
        payload: AnnouncePayload,
        signing_key: Option<String>,
    ) {
        let now = time::now_millis();
        let peer = PeerRecord {
            destination: from.clone(),
            b32_address: b32_of(from.as_str()),
            display_name: payload.display_name,
            files_count: payload.files_count,
            total_size: payload.total_size,
            last_seen: now,
            streaming_destination: payload.streaming_destination,
            signing_key,
        };

        let was_new = match self.store.upsert_peer(&peer) {
            Ok(was_new) => was_new,
            Err(err) => {
                warn!("Failed to store peer {}: {}", peer.b32_address, err);
                return;
            }
        };

        if was_new {
            info!("New peer {} ({})", peer.display_name, peer.b32_address);
            self.broadcast(Message::PeerOnline(peer.clone()), from).await;
            let _ = self.events.send(DiscoveryEvent::PeerOnline(peer.clone()));
        } else {
            debug!("Peer {} refreshed", peer.b32_address);
        }

        self.send_to(from, self.peers_list_for(from)).await;
        self.send_to(from, self.dht_nodes_list()).await;
    }

    async fn handle_get_peers(&self, from: &Destination) {
        let now = time::now_millis();

        // Unknown requesters are auto-registered with defaults so they
        // show up in other peers' lists.
        match self.store.touch(from, now) {
            Ok(true) => {}
            Ok(false) => {
                let peer = PeerRecord::new(from.clone(), b32_of(from.as_str()), now);
                if let Err(err) = self.store.upsert_peer(&peer) {
                    warn!("Failed to auto-register {}: {}", peer.b32_address, err);
                }
            }
            Err(err) => {
                warn!("Failed to touch peer: {}", err);
            }
        }

        self.send_to(from, self.peers_list_for(from)).await;
    }

    async fn handle_ping(&self, from: &Destination) {
        if let Err(err) = self.store.touch(from, time::now_millis()) {
            warn!("Failed to touch peer: {}", err);
        }
        self.send_to(from, Message::Pong).await;
    }

    async fn handle_disconnect(&self, from: &Destination) {
        match self.store.delete_peer(from) {
            Ok(Some(peer)) => {
                info!("Peer {} disconnected", peer.b32_address);
                self.broadcast(
                    Message::PeerOffline(PeerOfflinePayload {
                        destination: peer.destination.clone(),
                        b32_address: Some(peer.b32_address),
                    }),
                    from,
                )
                .await;
                let _ = self.events.send(DiscoveryEvent::PeerOffline(peer.destination));
            }
            Ok(None) => debug!("DISCONNECT from unknown peer {:?}", from),
            Err(err) => warn!("Failed to delete peer: {}", err),
        }
    }

    async fn handle_get_dht_nodes(&self, from: &Destination) {
        let mut nodes = self
            .store
            .get_dht_nodes(MAX_DHT_NODES_PER_RESPONSE)
            .unwrap_or_default();

        // No bootstrap data yet: synthesise nodes from the live peers so
        // a fresh overlay can still form.
        if nodes.is_empty() {
            nodes = self
                .active_peers(Some(from))
                .into_iter()
                .take(MAX_DHT_NODES_PER_RESPONSE)
                .map(|peer| DhtNode {
                    node_id: None,
                    destination: peer.destination,
                    last_seen: peer.last_seen,
                })
                .collect();
        }

        self.send_to(from, Message::DhtNodesList(DhtNodesListPayload { nodes }))
            .await;
    }

    /// Drops expired peers and announces each departure exactly once.
    pub async fn sweep(&self) {
        let now = time::now_millis();
        let cutoff = now.saturating_sub(self.config.peer_timeout_ms());

        let removed = match self.store.sweep(cutoff) {
            Ok(removed) => removed,
            Err(err) => {
                warn!("Peer sweep failed: {}", err);
                return;
            }
        };

        for peer in removed {
            info!("Peer {} timed out", peer.b32_address);
            self.broadcast(
                Message::PeerOffline(PeerOfflinePayload {
                    destination: peer.destination.clone(),
                    b32_address: Some(peer.b32_address),
                }),
                &peer.destination,
            )
            .await;
            let _ = self.events.send(DiscoveryEvent::PeerOffline(peer.destination));
        }

        if let Err(err) = self.store.sweep_dht_nodes(cutoff) {
            warn!("DHT node sweep failed: {}", err);
        }
    }

    /// Forgets nonces older than the message-validity window.
    pub fn sweep_nonces(&self) {
        let now = time::now_millis();
        let cutoff = now.saturating_sub(MESSAGE_VALIDITY_WINDOW_MS);

        if let Err(err) = self.store.sweep_nonces(cutoff) {
            warn!("Nonce sweep failed: {}", err);
        }

        // The in-memory set carries no timestamps; it mirrors the table
        // and is rebuilt from fresh traffic after each sweep.
        match self.seen_nonces.lock() {
            Ok(mut seen) => seen.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// Trust shortcut for the hosting process: inserts a peer record
    /// directly, without a signed envelope.
    pub fn register_local_peer(&self, destination: &Destination, payload: AnnouncePayload) {
        let now = time::now_millis();
        let peer = PeerRecord {
            destination: destination.clone(),
            b32_address: b32_of(destination.as_str()),
            display_name: payload.display_name,
            files_count: payload.files_count,
            total_size: payload.total_size,
            last_seen: now,
            streaming_destination: payload.streaming_destination,
            signing_key: None,
        };

        if let Err(err) = self.store.upsert_peer(&peer) {
            warn!("Failed to register local peer: {}", err);
        }
    }

    pub fn active_peer_count(&self) -> u64 {
        let cutoff = time::now_millis().saturating_sub(self.config.peer_timeout_ms());
        self.store.count_active(cutoff).unwrap_or(0)
    }

    fn peers_list_for(&self, requester: &Destination) -> Message {
        Message::PeersList(PeersListPayload {
            peers: self.active_peers(Some(requester)),
        })
    }

    fn dht_nodes_list(&self) -> Message {
        let nodes = self
            .store
            .get_dht_nodes(MAX_DHT_NODES_PER_RESPONSE)
            .unwrap_or_default();
        Message::DhtNodesList(DhtNodesListPayload { nodes })
    }

    fn active_peers(&self, exclude: Option<&Destination>) -> Vec<PeerRecord> {
        let cutoff = time::now_millis().saturating_sub(self.config.peer_timeout_ms());
        self.store
            .get_active_peers(exclude, cutoff, self.config.max_peers_per_response())
            .unwrap_or_else(|err| {
                warn!("Failed to query active peers: {}", err);
                Vec::new()
            })
    }

    /// Opportunistic fan-out to every fresh peer except the subject.
    /// Lost datagrams are not retransmitted.
    async fn broadcast(&self, message: Message, exclude: &Destination) {
        let cutoff = time::now_millis().saturating_sub(self.config.peer_timeout_ms());
        let recipients = self
            .store
            .get_active_peers(Some(exclude), cutoff, usize::MAX >> 1)
            .unwrap_or_default();

        for recipient in recipients {
            self.send_to(&recipient.destination, message.clone()).await;
        }
    }

    async fn send_to(&self, destination: &Destination, message: Message) {
        let envelope = codec::sign(&message, &self.identity.signing, &self.identity.destination);
        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Failed to serialize {}: {}", message.kind(), err);
                return;
            }
        };

        if let Err(err) = self.sender.send(destination, &bytes).await {
            debug!("Send of {} failed: {}", message.kind(), err);
        }
    }

    fn is_replayed(&self, nonce: &Nonce) -> bool {
        let in_memory = match self.seen_nonces.lock() {
            Ok(seen) => seen.contains(nonce),
            Err(poisoned) => poisoned.into_inner().contains(nonce),
        };

        in_memory || self.store.is_nonce_used(nonce).unwrap_or(false)
    }

    fn mark_nonce(&self, nonce: &Nonce) {
        match self.seen_nonces.lock() {
            Ok(mut seen) => {
                seen.insert(*nonce);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(*nonce);
            }
        }

        if let Err(err) = self.store.mark_nonce_used(nonce, time::now_millis()) {
            warn!("Failed to persist nonce: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SigningKeys;
    use crate::sam;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Captures outbound datagrams for assertions.
    #[derive(Default)]
    struct CapturingSender {
        sent: Mutex<Vec<(Destination, Vec<u8>)>>,
    }

    #[async_trait]
    impl DatagramSender for CapturingSender {
        async fn send(&self, destination: &Destination, payload: &[u8]) -> sam::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((destination.clone(), payload.to_vec()));
            Ok(())
        }
    }

    impl CapturingSender {
        fn drain(&self) -> Vec<(Destination, Message)> {
            self.sent
                .lock()
                .unwrap()
                .drain(..)
                .map(|(dest, bytes)| {
                    let envelope: Envelope = serde_json::from_slice(&bytes).unwrap();
                    // Everything the tracker emits is signed.
                    assert!(matches!(
                        codec::verify(&envelope).unwrap(),
                        Verified::Signed { .. }
                    ));
                    (dest, Message::parse(&envelope.data).unwrap())
                })
                .collect()
        }
    }

    struct Fixture {
        engine: DiscoveryEngine,
        sender: Arc<CapturingSender>,
        store: Arc<PeerStore>,
    }

    fn fixture() -> Fixture {
        fixture_with_timeout(Duration::from_millis(90_000))
    }

    fn fixture_with_timeout(peer_timeout: Duration) -> Fixture {
        let mut config = TrackerConfig::default();
        config.discovery.peer_timeout = peer_timeout;

        let store = Arc::new(PeerStore::open(None).unwrap());
        let sender = Arc::new(CapturingSender::default());
        let identity = Arc::new(Identity::mint("T".repeat(400), "tracker-priv".into()));

        let engine = DiscoveryEngine::new(
            store.clone(),
            Arc::new(config),
            identity,
            sender.clone(),
        );

        Fixture {
            engine,
            sender,
            store,
        }
    }

    fn client(n: u8) -> (SigningKeys, Destination) {
        (
            SigningKeys::generate(),
            Destination::new(format!("client-{:02}", n).repeat(40)),
        )
    }

    fn announce_payload(name: &str, files: u32, size: u64) -> AnnouncePayload {
        AnnouncePayload {
            display_name: name.into(),
            files_count: files,
            total_size: size,
            streaming_destination: None,
        }
    }

    fn signed(message: &Message, keys: &SigningKeys, from: &Destination) -> Vec<u8> {
        serde_json::to_vec(&codec::sign(message, keys, from)).unwrap()
    }

    #[tokio::test]
    async fn test_presence_delta_fan_out() {
        let f = fixture();
        let (keys_a, dest_a) = client(1);
        let (keys_b, dest_b) = client(2);

        // A announces into an empty tracker.
        let announce_a = Message::Announce(announce_payload("A", 3, 1024));
        f.engine
            .handle_datagram(&signed(&announce_a, &keys_a, &dest_a))
            .await;

        let sent = f.sender.drain();
        assert_eq!(sent.len(), 2);
        match &sent[0] {
            (dest, Message::PeersList(payload)) => {
                assert_eq!(dest, &dest_a);
                assert!(payload.peers.is_empty());
            }
            other => panic!("expected PEERS_LIST to A, got {:?}", other),
        }
        assert!(matches!(sent[1].1, Message::DhtNodesList(_)));

        // B announces; A learns about it, B learns about A.
        let announce_b = Message::Announce(announce_payload("B", 0, 0));
        f.engine
            .handle_datagram(&signed(&announce_b, &keys_b, &dest_b))
            .await;

        let sent = f.sender.drain();
        let online_to_a = sent
            .iter()
            .find(|(dest, msg)| dest == &dest_a && matches!(msg, Message::PeerOnline(_)));
        match online_to_a {
            Some((_, Message::PeerOnline(peer))) => assert_eq!(peer.display_name, "B"),
            _ => panic!("A did not receive PEER_ONLINE for B"),
        }

        let list_to_b = sent
            .iter()
            .find(|(dest, msg)| dest == &dest_b && matches!(msg, Message::PeersList(_)));
        match list_to_b {
            Some((_, Message::PeersList(payload))) => {
                assert_eq!(payload.peers.len(), 1);
                assert_eq!(payload.peers[0].display_name, "A");
            }
            _ => panic!("B did not receive PEERS_LIST"),
        }
    }

    #[tokio::test]
    async fn test_replay_is_rejected() {
        let f = fixture();
        let (keys_a, dest_a) = client(1);

        let envelope = signed(
            &Message::Announce(announce_payload("A", 3, 1024)),
            &keys_a,
            &dest_a,
        );

        f.engine.handle_datagram(&envelope).await;
        let first_seen = f.store.get_peer(&dest_a).unwrap().unwrap().last_seen;
        f.sender.drain();

        tokio::time::sleep(Duration::from_millis(5)).await;
        f.engine.handle_datagram(&envelope).await;

        // No store mutation and no replies on the replay.
        let stored = f.store.get_peer(&dest_a).unwrap().unwrap();
        assert_eq!(stored.last_seen, first_seen);
        assert!(f.sender.drain().is_empty());
    }

    #[tokio::test]
    async fn test_signing_key_hijack_is_rejected() {
        let f = fixture();
        let (keys_a, dest_a) = client(1);
        let (keys_mallory, _) = client(3);

        f.engine
            .handle_datagram(&signed(
                &Message::Announce(announce_payload("A", 3, 1024)),
                &keys_a,
                &dest_a,
            ))
            .await;
        f.sender.drain();

        // Same destination, different signing key.
        f.engine
            .handle_datagram(&signed(
                &Message::Announce(announce_payload("Mallory", 0, 0)),
                &keys_mallory,
                &dest_a,
            ))
            .await;

        let stored = f.store.get_peer(&dest_a).unwrap().unwrap();
        assert_eq!(stored.display_name, "A");
        assert_eq!(stored.signing_key, Some(keys_a.public_base64()));
        assert!(f.sender.drain().is_empty());
    }

    #[tokio::test]
    async fn test_unsigned_cannot_mutate_signed_binding() {
        let f = fixture();
        let (keys_a, dest_a) = client(1);

        f.engine
            .handle_datagram(&signed(
                &Message::Announce(announce_payload("A", 3, 1024)),
                &keys_a,
                &dest_a,
            ))
            .await;
        f.sender.drain();

        let legacy = Envelope {
            data: serde_json::value::RawValue::from_string(
                serde_json::to_string(&Message::Announce(announce_payload("Evil", 0, 0)).to_data())
                    .unwrap(),
            )
            .unwrap(),
            nonce: None,
            timestamp: None,
            signature: None,
            signing_key: None,
            from: Some(dest_a.clone()),
        };

        f.engine
            .handle_datagram(&serde_json::to_vec(&legacy).unwrap())
            .await;

        let stored = f.store.get_peer(&dest_a).unwrap().unwrap();
        assert_eq!(stored.display_name, "A");
    }

    #[tokio::test]
    async fn test_legacy_announce_accepted_for_new_peer() {
        let f = fixture();
        let (_, dest_a) = client(1);

        let legacy = Envelope {
            data: serde_json::value::RawValue::from_string(
                serde_json::to_string(
                    &Message::Announce(announce_payload("Legacy", 1, 10)).to_data(),
                )
                .unwrap(),
            )
            .unwrap(),
            nonce: None,
            timestamp: None,
            signature: None,
            signing_key: None,
            from: Some(dest_a.clone()),
        };

        f.engine
            .handle_datagram(&serde_json::to_vec(&legacy).unwrap())
            .await;

        let stored = f.store.get_peer(&dest_a).unwrap().unwrap();
        assert_eq!(stored.display_name, "Legacy");
        assert!(stored.signing_key.is_none());
    }

    #[tokio::test]
    async fn test_missing_sender_is_dropped() {
        let f = fixture();
        let (keys_a, dest_a) = client(1);

        let mut envelope = codec::sign(
            &Message::Announce(announce_payload("A", 0, 0)),
            &keys_a,
            &dest_a,
        );
        envelope.from = None;

        f.engine
            .handle_datagram(&serde_json::to_vec(&envelope).unwrap())
            .await;

        assert!(f.store.get_peer(&dest_a).unwrap().is_none());
        assert!(f.sender.drain().is_empty());
    }

    #[tokio::test]
    async fn test_ping_touches_and_pongs() {
        let f = fixture();
        let (keys_a, dest_a) = client(1);

        f.engine
            .handle_datagram(&signed(
                &Message::Announce(announce_payload("A", 0, 0)),
                &keys_a,
                &dest_a,
            ))
            .await;
        f.sender.drain();

        f.engine
            .handle_datagram(&signed(&Message::Ping, &keys_a, &dest_a))
            .await;

        let sent = f.sender.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, dest_a);
        assert!(matches!(sent[0].1, Message::Pong));
    }

    #[tokio::test]
    async fn test_get_peers_auto_registers() {
        let f = fixture();
        let (keys_a, dest_a) = client(1);

        f.engine
            .handle_datagram(&signed(&Message::GetPeers, &keys_a, &dest_a))
            .await;

        assert!(f.store.get_peer(&dest_a).unwrap().is_some());
        let sent = f.sender.drain();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].1, Message::PeersList(_)));
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_offline() {
        let f = fixture();
        let (keys_a, dest_a) = client(1);
        let (keys_b, dest_b) = client(2);

        for (keys, dest, name) in [(&keys_a, &dest_a, "A"), (&keys_b, &dest_b, "B")] {
            f.engine
                .handle_datagram(&signed(
                    &Message::Announce(announce_payload(name, 0, 0)),
                    keys,
                    dest,
                ))
                .await;
        }
        f.sender.drain();

        f.engine
            .handle_datagram(&signed(&Message::Disconnect, &keys_a, &dest_a))
            .await;

        assert!(f.store.get_peer(&dest_a).unwrap().is_none());
        let sent = f.sender.drain();
        let offline: Vec<_> = sent
            .iter()
            .filter(|(_, msg)| matches!(msg, Message::PeerOffline(_)))
            .collect();
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].0, dest_b);
    }

    #[tokio::test]
    async fn test_sweep_broadcasts_one_offline_per_peer() {
        let f = fixture_with_timeout(Duration::from_millis(30));
        let (keys_a, dest_a) = client(1);
        let (keys_b, dest_b) = client(2);

        f.engine
            .handle_datagram(&signed(
                &Message::Announce(announce_payload("A", 0, 0)),
                &keys_a,
                &dest_a,
            ))
            .await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        // B is fresh, A has expired.
        f.engine
            .handle_datagram(&signed(
                &Message::Announce(announce_payload("B", 0, 0)),
                &keys_b,
                &dest_b,
            ))
            .await;
        f.sender.drain();

        f.engine.sweep().await;

        assert!(f.store.get_peer(&dest_a).unwrap().is_none());
        assert!(f.store.get_peer(&dest_b).unwrap().is_some());

        let sent = f.sender.drain();
        let offline: Vec<_> = sent
            .iter()
            .filter_map(|(dest, msg)| match msg {
                Message::PeerOffline(payload) => Some((dest.clone(), payload.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].0, dest_b);
        assert_eq!(offline[0].1.destination, dest_a);

        // A second sweep finds nothing new.
        f.engine.sweep().await;
        assert!(f.sender.drain().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_kind_is_dropped() {
        let f = fixture();
        let (_, dest_a) = client(1);

        let raw = serde_json::to_vec(&serde_json::json!({
            "data": {"type": "GOSSIP", "payload": {}},
            "_from": dest_a.as_str(),
        }))
        .unwrap();

        f.engine.handle_datagram(&raw).await;
        assert!(f.sender.drain().is_empty());
    }

    #[tokio::test]
    async fn test_register_local_peer() {
        let f = fixture();
        let dest = Destination::new("local-peer".repeat(40));

        f.engine
            .register_local_peer(&dest, announce_payload("Local", 7, 70));

        let stored = f.store.get_peer(&dest).unwrap().unwrap();
        assert_eq!(stored.display_name, "Local");
        assert_eq!(stored.files_count, 7);
        assert_eq!(f.engine.active_peer_count(), 1);
    }
}
