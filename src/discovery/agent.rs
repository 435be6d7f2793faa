use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use ishare_utils::hex;

use crate::codec;
use crate::identity::Identity;
use crate::models::common::Destination;
use crate::models::message::{
    AnnouncePayload, Envelope, FileDataPayload, FileInfo, Message, RequestFilePayload,
    SearchPayload, SearchResultsPayload,
};
use crate::models::peer::{DhtNode, PeerRecord};
use crate::sam::DatagramSender;
use crate::signals::StopSignalRx;

/// How often the agent re-announces its presence to the tracker.
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(120);

/// Heartbeat cadence.
const PING_INTERVAL: Duration = Duration::from_secs(60);

/// How long a search fan-out keeps aggregating results.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Budget for file-list and file-fetch request/reply exchanges.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_CHANNEL_SIZE: usize = 256;

/// What the agent surfaces to higher layers. Incoming peer-to-peer
/// requests are forwarded as events; answering them is the host
/// application's business.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    PeerDiscovered(PeerRecord),
    PeerLost(Destination),
    IncomingSearch {
        from: Destination,
        payload: SearchPayload,
    },
    IncomingFilesRequest {
        from: Destination,
    },
    IncomingFileRequest {
        from: Destination,
        payload: RequestFilePayload,
    },
}

/// Client-side counterpart of the discovery engine: announces to a
/// tracker, keeps an in-memory view of the peer population and runs the
/// request/reply exchanges of the peer-to-peer message family.
pub struct DiscoveryAgent {
    tracker: Destination,
    identity: Arc<Identity>,
    sender: Arc<dyn DatagramSender>,
    profile: Mutex<AnnouncePayload>,
    peers: Mutex<HashMap<Destination, PeerRecord>>,
    dht_nodes: Mutex<Vec<DhtNode>>,
    pending_searches: Mutex<HashMap<String, mpsc::UnboundedSender<Vec<FileInfo>>>>,
    pending_file_lists: Mutex<HashMap<Destination, oneshot::Sender<Vec<FileInfo>>>>,
    pending_fetches: Mutex<HashMap<String, oneshot::Sender<FileDataPayload>>>,
    events: broadcast::Sender<AgentEvent>,
}

impl DiscoveryAgent {
    pub fn new(
        tracker: Destination,
        identity: Arc<Identity>,
        sender: Arc<dyn DatagramSender>,
    ) -> DiscoveryAgent {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        DiscoveryAgent {
            tracker,
            identity,
            sender,
            profile: Mutex::new(AnnouncePayload {
                display_name: "Unknown".into(),
                files_count: 0,
                total_size: 0,
                streaming_destination: None,
            }),
            peers: Mutex::new(HashMap::new()),
            dht_nodes: Mutex::new(Vec::new()),
            pending_searches: Mutex::new(HashMap::new()),
            pending_file_lists: Mutex::new(HashMap::new()),
            pending_fetches: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Updates the presence the next announce will carry.
    pub fn set_profile(&self, profile: AnnouncePayload) {
        *lock(&self.profile) = profile;
    }

    pub fn known_peers(&self) -> Vec<PeerRecord> {
        lock(&self.peers).values().cloned().collect()
    }

    pub fn dht_nodes(&self) -> Vec<DhtNode> {
        lock(&self.dht_nodes).clone()
    }

    /// Spawns the periodic announce and ping tasks.
    pub fn start(self: &Arc<Self>, stop_signal_rx: StopSignalRx) -> Vec<JoinHandle<()>> {
        let announce = {
            let agent = self.clone();
            let mut rx = stop_signal_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(ANNOUNCE_INTERVAL);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => agent.announce().await,
                        _ = rx.changed() => break,
                    }
                }
            })
        };

        let ping = {
            let agent = self.clone();
            let mut rx = stop_signal_rx;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(PING_INTERVAL);
                // The first announce already proves liveness.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => agent.ping().await,
                        _ = rx.changed() => break,
                    }
                }
            })
        };

        vec![announce, ping]
    }

    pub async fn announce(&self) {
        let payload = lock(&self.profile).clone();
        self.send_to(&self.tracker, Message::Announce(payload)).await;
    }

    pub async fn ping(&self) {
        self.send_to(&self.tracker, Message::Ping).await;
    }

    pub async fn request_peers(&self) {
        self.send_to(&self.tracker, Message::GetPeers).await;
    }

    pub async fn request_dht_nodes(&self) {
        self.send_to(&self.tracker, Message::GetDhtNodes).await;
    }

    pub async fn disconnect(&self) {
        self.send_to(&self.tracker, Message::Disconnect).await;
    }

    /// Fans a SEARCH out to every known peer and aggregates results until
    /// the timeout; resolves with whatever arrived.
    pub async fn search(&self, query: &str) -> Vec<FileInfo> {
        self.search_with_timeout(query, SEARCH_TIMEOUT).await
    }

    pub async fn search_with_timeout(&self, query: &str, timeout: Duration) -> Vec<FileInfo> {
        let request_id = random_request_id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        lock(&self.pending_searches).insert(request_id.clone(), tx);

        let message = Message::Search(SearchPayload {
            request_id: request_id.clone(),
            query: query.to_owned(),
        });

        let recipients: Vec<Destination> = lock(&self.peers).keys().cloned().collect();
        for peer in recipients {
            self.send_to(&peer, message.clone()).await;
        }

        let mut results = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(batch)) => results.extend(batch),
                Ok(None) | Err(_) => break,
            }
        }

        lock(&self.pending_searches).remove(&request_id);
        results
    }

    /// Asks one peer for its shared-file list; empty on timeout.
    pub async fn fetch_file_list(&self, peer: &Destination) -> Vec<FileInfo> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending_file_lists).insert(peer.clone(), tx);

        self.send_to(peer, Message::GetFiles).await;

        let files = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(files)) => files,
            _ => Vec::new(),
        };

        lock(&self.pending_file_lists).remove(peer);
        files
    }

    /// Requests one file from a peer; `None` on timeout.
    pub async fn fetch_file(&self, peer: &Destination, file_hash: &str) -> Option<FileDataPayload> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending_fetches).insert(file_hash.to_owned(), tx);

        self.send_to(
            peer,
            Message::RequestFile(RequestFilePayload {
                file_hash: file_hash.to_owned(),
            }),
        )
        .await;

        let data = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(data)) => Some(data),
            _ => None,
        };

        lock(&self.pending_fetches).remove(file_hash);
        data
    }

    /// Handles one inbound datagram addressed to this client.
    pub async fn handle_datagram(&self, raw: &[u8]) {
        let envelope: Envelope = match serde_json::from_slice(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!("Dropping unparseable datagram: {}", err);
                return;
            }
        };

        if let Err(err) = codec::verify(&envelope) {
            debug!("Dropping envelope: {}", err);
            return;
        }

        let Some(from) = envelope.from.clone() else {
            debug!("Dropping envelope without sender");
            return;
        };

        let message = match Message::parse(&envelope.data) {
            Ok(message) => message,
            Err(err) => {
                debug!("Dropping message from {:?}: {}", from, err);
                return;
            }
        };

        match message {
            Message::PeersList(payload) => {
                info!("Received {} peers from tracker", payload.peers.len());
                let mut peers = lock(&self.peers);
                for peer in payload.peers {
                    let newly_seen = peers.insert(peer.destination.clone(), peer.clone()).is_none();
                    if newly_seen {
                        let _ = self.events.send(AgentEvent::PeerDiscovered(peer));
                    }
                }
            }

            Message::PeerOnline(peer) => {
                debug!("Peer online: {}", peer.b32_address);
                lock(&self.peers).insert(peer.destination.clone(), peer.clone());
                let _ = self.events.send(AgentEvent::PeerDiscovered(peer));
            }

            Message::PeerOffline(payload) => {
                debug!("Peer offline: {:?}", payload.destination);
                lock(&self.peers).remove(&payload.destination);
                let _ = self
                    .events
                    .send(AgentEvent::PeerLost(payload.destination));
            }

            Message::DhtNodesList(payload) => {
                *lock(&self.dht_nodes) = payload.nodes;
            }

            Message::Pong => {
                debug!("Tracker heartbeat acknowledged");
            }

            Message::SearchResults(payload) => self.route_search_results(payload),

            Message::FilesList(payload) => {
                if let Some(tx) = lock(&self.pending_file_lists).remove(&from) {
                    let _ = tx.send(payload.files);
                } else {
                    debug!("Unsolicited FILES_LIST from {:?}", from);
                }
            }

            Message::FileData(payload) => {
                if let Some(tx) = lock(&self.pending_fetches).remove(&payload.file_hash) {
                    let _ = tx.send(payload);
                } else {
                    debug!("Unsolicited FILE_DATA from {:?}", from);
                }
            }

            Message::Search(payload) => {
                let _ = self.events.send(AgentEvent::IncomingSearch { from, payload });
            }

            Message::GetFiles => {
                let _ = self.events.send(AgentEvent::IncomingFilesRequest { from });
            }

            Message::RequestFile(payload) => {
                let _ = self
                    .events
                    .send(AgentEvent::IncomingFileRequest { from, payload });
            }

            other => {
                debug!("Ignoring {} from {:?}", other.kind(), from);
            }
        }
    }

    /// Replies to a peer-to-peer request. The host application drives this
    /// after an `Incoming*` event.
    pub async fn reply(&self, to: &Destination, message: Message) {
        self.send_to(to, message).await;
    }

    fn route_search_results(&self, payload: SearchResultsPayload) {
        match lock(&self.pending_searches).get(&payload.request_id) {
            Some(tx) => {
                let _ = tx.send(payload.results);
            }
            None => debug!("Results for unknown search {:?}", payload.request_id),
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
}

fn random_request_id() -> String {
    let mut bytes = [0u8; 8];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes[..]);
    hex::encode(&bytes)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
