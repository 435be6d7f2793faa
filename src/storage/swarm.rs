use ahash::RandomState;
use indexmap::IndexMap;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;

use crate::models::common::{Destination, EpochMillis, InfoHash};
use crate::models::swarm::{SwarmPeer, SwarmStats, TorrentSwarm};

static DEFAULT_SHARDS: usize = 64;

type SwarmDict = IndexMap<InfoHash, TorrentSwarm, RandomState>;

/// In-memory swarm state for the BEP3 engine, sharded by info-hash prefix
/// so concurrent announces for unrelated torrents do not contend.
#[derive(Debug)]
pub struct SwarmStore {
    shards: Vec<Shard>,
}

#[derive(Debug, Default)]
struct Shard {
    swarms: RwLock<SwarmDict>,
}

impl SwarmStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    #[must_use]
    pub fn with_shards(shard_count: usize) -> Self {
        assert!(shard_count > 0);

        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(Shard::default());
        }

        Self { shards }
    }

    fn shard(&self, info_hash: &InfoHash) -> &Shard {
        let bytes = info_hash.0[0..4].try_into().unwrap();
        let index = u32::from_be_bytes(bytes) as usize % self.shards.len();
        &self.shards[index]
    }

    /// Inserts or refreshes a swarm peer, creating the swarm when absent.
    pub async fn update_or_insert_peer(
        &self,
        info_hash: &InfoHash,
        destination: &Destination,
        peer: SwarmPeer,
    ) {
        let mut swarms = self.shard(info_hash).swarms.write().await;
        swarms
            .entry(*info_hash)
            .or_default()
            .update_or_insert_peer(destination, peer);
    }

    /// Applies a `completed` event: the peer becomes a seeder and the
    /// torrent's completion counter moves at most once for it.
    pub async fn promote_peer(
        &self,
        info_hash: &InfoHash,
        destination: &Destination,
        now: EpochMillis,
    ) {
        let mut swarms = self.shard(info_hash).swarms.write().await;
        swarms
            .entry(*info_hash)
            .or_default()
            .promote_peer(destination, now);
    }

    /// Applies a `stopped` event. An emptied swarm keeps its completion
    /// count until the sweep drops it.
    pub async fn remove_peer(&self, info_hash: &InfoHash, destination: &Destination) {
        let mut swarms = self.shard(info_hash).swarms.write().await;
        if let Some(swarm) = swarms.get_mut(info_hash) {
            swarm.remove_peer(destination);
        }
    }

    /// Fresh peers for an announce response: requester excluded, shuffled,
    /// capped at `limit`. Also returns the aggregate counters observed in
    /// the same read so the response is self-consistent.
    pub async fn extract_peers(
        &self,
        info_hash: &InfoHash,
        exclude: &Destination,
        cutoff: EpochMillis,
        limit: usize,
    ) -> (Vec<Destination>, SwarmStats) {
        let swarms = self.shard(info_hash).swarms.read().await;
        let Some(swarm) = swarms.get(info_hash) else {
            return (Vec::new(), SwarmStats::default());
        };

        let mut peers: Vec<Destination> = swarm
            .peers
            .iter()
            .filter(|(dest, peer)| *dest != exclude && peer.last_seen >= cutoff)
            .map(|(dest, _)| dest.clone())
            .collect();

        peers.shuffle(&mut rand::thread_rng());
        peers.truncate(limit);

        (peers, swarm.stats())
    }

    pub async fn stats(&self, info_hash: &InfoHash) -> SwarmStats {
        let swarms = self.shard(info_hash).swarms.read().await;
        swarms
            .get(info_hash)
            .map(TorrentSwarm::stats)
            .unwrap_or_default()
    }

    pub async fn multi_stats(&self, info_hashes: &[InfoHash]) -> Vec<(InfoHash, SwarmStats)> {
        let mut result = Vec::with_capacity(info_hashes.len());
        for info_hash in info_hashes {
            result.push((*info_hash, self.stats(info_hash).await));
        }
        result
    }

    /// Removes peers not seen since `cutoff` and drops torrents whose
    /// peer map becomes empty. Returns the number of peers removed.
    pub async fn sweep(&self, cutoff: EpochMillis) -> usize {
        let mut removed = 0;

        for shard in &self.shards {
            let mut swarms = shard.swarms.write().await;

            for swarm in swarms.values_mut() {
                let before = swarm.peers.len();
                swarm.peers.retain(|_, peer| peer.last_seen >= cutoff);
                removed += before - swarm.peers.len();
            }

            swarms.retain(|_, swarm| !swarm.is_empty());
        }

        removed
    }

    pub async fn torrent_count(&self) -> usize {
        let mut count = 0;
        for shard in &self.shards {
            count += shard.swarms.read().await.len();
        }
        count
    }

    pub async fn peer_count(&self) -> usize {
        let mut count = 0;
        for shard in &self.shards {
            count += shard
                .swarms
                .read()
                .await
                .values()
                .map(|swarm| swarm.peers.len())
                .sum::<usize>();
        }
        count
    }
}

impl Default for SwarmStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFOHASH_A: &str = "2a7b9e1f5c8d3a6b0f2e4c5a9b7d1e3a6c8b5d99";
    const INFOHASH_B: &str = "3b8c2d0e6f9a4b7c1d4e5f6a2b8c3d9e4f5a6b7c";

    fn hash(hex: &str) -> InfoHash {
        hex.parse().unwrap()
    }

    fn dest(n: u8) -> Destination {
        Destination::new(format!("swarm-dest-{}", n).repeat(24))
    }

    #[tokio::test]
    async fn test_announce_then_extract() {
        let store = SwarmStore::new();
        let info_hash = hash(INFOHASH_A);

        store
            .update_or_insert_peer(&info_hash, &dest(1), SwarmPeer::new(100, false, 0, 0))
            .await;
        store
            .update_or_insert_peer(&info_hash, &dest(2), SwarmPeer::new(100, true, 0, 0))
            .await;

        let (peers, stats) = store.extract_peers(&info_hash, &dest(1), 0, 50).await;
        assert_eq!(peers, vec![dest(2)]);
        assert_eq!(stats.complete, 1);
        assert_eq!(stats.incomplete, 1);
    }

    #[tokio::test]
    async fn test_counter_invariant_over_events() {
        let store = SwarmStore::new();
        let info_hash = hash(INFOHASH_A);

        for n in 0..6 {
            let seeder = n % 2 == 0;
            store
                .update_or_insert_peer(&info_hash, &dest(n), SwarmPeer::new(100, seeder, 0, 0))
                .await;
        }
        store.remove_peer(&info_hash, &dest(1)).await;
        store.promote_peer(&info_hash, &dest(3), 101).await;

        let stats = store.stats(&info_hash).await;
        let live = store.peer_count().await as u32;
        assert_eq!(stats.complete + stats.incomplete, live);
    }

    #[tokio::test]
    async fn test_downloaded_increments_once_per_peer() {
        let store = SwarmStore::new();
        let info_hash = hash(INFOHASH_A);

        store.promote_peer(&info_hash, &dest(1), 100).await;
        store.promote_peer(&info_hash, &dest(1), 101).await;
        store.promote_peer(&info_hash, &dest(2), 102).await;

        assert_eq!(store.stats(&info_hash).await.downloaded, 2);
    }

    #[tokio::test]
    async fn test_extract_respects_cutoff_and_limit() {
        let store = SwarmStore::new();
        let info_hash = hash(INFOHASH_A);

        for n in 0..10 {
            store
                .update_or_insert_peer(&info_hash, &dest(n), SwarmPeer::new(100, false, 0, 0))
                .await;
        }
        store
            .update_or_insert_peer(&info_hash, &dest(10), SwarmPeer::new(5, false, 0, 0))
            .await;

        let (peers, _) = store.extract_peers(&info_hash, &dest(0), 50, 4).await;
        assert_eq!(peers.len(), 4);
        assert!(!peers.contains(&dest(10)));
        assert!(!peers.contains(&dest(0)));
    }

    #[tokio::test]
    async fn test_sweep_drops_stale_and_empty() {
        let store = SwarmStore::new();

        store
            .update_or_insert_peer(&hash(INFOHASH_A), &dest(1), SwarmPeer::new(10, false, 0, 0))
            .await;
        store
            .update_or_insert_peer(&hash(INFOHASH_B), &dest(2), SwarmPeer::new(100, true, 0, 0))
            .await;

        assert_eq!(store.sweep(50).await, 1);
        assert_eq!(store.torrent_count().await, 1);
        assert_eq!(store.peer_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_hash_has_default_stats() {
        let store = SwarmStore::new();
        let stats = store.stats(&hash(INFOHASH_B)).await;
        assert_eq!(stats, SwarmStats::default());
    }
}
