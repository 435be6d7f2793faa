use ahash::RandomState;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::common::{Destination, EpochMillis};

/// The peers of one torrent, keyed by their I2P destination.
pub type SwarmPeerDict = IndexMap<Destination, SwarmPeer, RandomState>;

/// One peer's standing inside a swarm.
#[derive(Debug, Clone, PartialEq)]
pub struct SwarmPeer {
    pub last_seen: EpochMillis,
    pub is_seeder: bool,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Whether this peer's `completed` event has already been counted into
    /// the swarm's `downloaded` aggregate.
    pub counted_completion: bool,
}

impl SwarmPeer {
    pub fn new(last_seen: EpochMillis, is_seeder: bool, uploaded: u64, downloaded: u64) -> Self {
        Self {
            last_seen,
            is_seeder,
            uploaded,
            downloaded,
            counted_completion: false,
        }
    }
}

/// The swarm for a single info-hash.
#[derive(Debug, Default)]
pub struct TorrentSwarm {
    pub peers: SwarmPeerDict,
    /// Times the tracker has registered a completion for this torrent.
    pub downloaded: u32,
}

impl TorrentSwarm {
    pub fn complete_count(&self) -> u32 {
        self.peers.values().filter(|p| p.is_seeder).count() as u32
    }

    pub fn incomplete_count(&self) -> u32 {
        self.peers.values().filter(|p| !p.is_seeder).count() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Inserts or refreshes a peer, carrying the completion-counted flag
    /// across refreshes so `downloaded` never double-counts.
    pub fn update_or_insert_peer(&mut self, destination: &Destination, peer: SwarmPeer) {
        match self.peers.get_mut(destination) {
            Some(existing) => {
                existing.last_seen = peer.last_seen;
                existing.is_seeder = existing.is_seeder || peer.is_seeder;
                existing.uploaded = peer.uploaded;
                existing.downloaded = peer.downloaded;
            }
            None => {
                self.peers.insert(destination.clone(), peer);
            }
        }
    }

    /// Marks a peer as seeder. The swarm's `downloaded` counter moves at
    /// most once per peer, however many `completed` events it repeats.
    pub fn promote_peer(&mut self, destination: &Destination, now: EpochMillis) {
        let peer = self
            .peers
            .entry(destination.clone())
            .or_insert_with(|| SwarmPeer::new(now, true, 0, 0));

        peer.last_seen = now;
        peer.is_seeder = true;

        if !peer.counted_completion {
            peer.counted_completion = true;
            self.downloaded += 1;
        }
    }

    pub fn remove_peer(&mut self, destination: &Destination) -> Option<SwarmPeer> {
        self.peers.shift_remove(destination)
    }

    pub fn stats(&self) -> SwarmStats {
        SwarmStats {
            complete: self.complete_count(),
            incomplete: self.incomplete_count(),
            downloaded: self.downloaded,
        }
    }
}

/// Aggregate swarm counters as reported by announce and scrape.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwarmStats {
    /// The number of peers with the entire torrent.
    pub complete: u32,

    /// The number of non-seeder peers.
    pub incomplete: u32,

    /// The total number of registered completions.
    pub downloaded: u32,
}

/// The event type a BEP3 client attaches to an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnounceEvent {
    /// Sent when a download first begins.
    Started,

    /// Sent when a downloader ceases downloading.
    Stopped,

    /// Sent when the download completes. Not sent if the file was already
    /// complete when started.
    Completed,

    /// A regular-interval announce.
    #[default]
    None,
}

impl AnnounceEvent {
    pub fn from_query_bytes(raw: &[u8]) -> Self {
        match raw {
            b"started" => AnnounceEvent::Started,
            b"stopped" => AnnounceEvent::Stopped,
            b"completed" => AnnounceEvent::Completed,
            _ => AnnounceEvent::None,
        }
    }
}
