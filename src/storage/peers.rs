use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::Result;
use crate::models::common::{Destination, EpochMillis, Nonce};
use crate::models::peer::{DhtNode, PeerRecord};

/// The embedded peer store: peers, used nonces and DHT bootstrap nodes.
///
/// The live database is in-memory; a snapshot is copied to disk
/// periodically and on shutdown, and restored at startup. All access is
/// serialised by one lock, which is the concurrency contract the engines
/// rely on (sweep collects and deletes in a single critical section).
pub struct PeerStore {
    conn: Mutex<Connection>,
    snapshot_path: Option<PathBuf>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS peers (
    destination          TEXT PRIMARY KEY,
    b32Address           TEXT NOT NULL,
    displayName          TEXT NOT NULL DEFAULT 'Unknown',
    filesCount           INTEGER NOT NULL DEFAULT 0,
    totalSize            INTEGER NOT NULL DEFAULT 0,
    lastSeen             INTEGER NOT NULL,
    streamingDestination TEXT,
    signingKey           TEXT
);
CREATE INDEX IF NOT EXISTS idx_peers_lastSeen ON peers(lastSeen);
CREATE INDEX IF NOT EXISTS idx_peers_b32Address ON peers(b32Address);

CREATE TABLE IF NOT EXISTS used_nonces (
    nonce     TEXT PRIMARY KEY,
    createdAt INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_used_nonces_createdAt ON used_nonces(createdAt);

CREATE TABLE IF NOT EXISTS dht_nodes (
    nodeId      TEXT PRIMARY KEY,
    destination TEXT NOT NULL,
    lastSeen    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_dht_nodes_lastSeen ON dht_nodes(lastSeen);
";

impl PeerStore {
    /// Opens the in-memory store, restoring the snapshot at `path` when one
    /// exists.
    pub fn open(snapshot_path: Option<&Path>) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "journal_mode", "MEMORY")?;
        conn.pragma_update(None, "synchronous", "OFF")?;

        if let Some(path) = snapshot_path {
            if path.exists() {
                restore(&mut conn, path)?;
                info!("Restored peer store snapshot from {}", path.display());
            }
        }

        conn.execute_batch(SCHEMA)?;

        Ok(PeerStore {
            conn: Mutex::new(conn),
            snapshot_path: snapshot_path.map(Path::to_path_buf),
        })
    }

    /// Copies the live database to its snapshot path. Failure is logged by
    /// the caller and never fatal.
    pub fn snapshot(&self) -> Result<()> {
        let Some(ref path) = self.snapshot_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = self.lock();
        let mut disk = Connection::open(path)?;
        disk.pragma_update(None, "journal_mode", "WAL")?;
        {
            let backup = rusqlite::backup::Backup::new(&conn, &mut disk)?;
            backup.run_to_completion(64, std::time::Duration::ZERO, None)?;
        }

        debug!("Peer store snapshot written to {}", path.display());
        Ok(())
    }

    /// Inserts or refreshes a peer. Dynamic fields are overwritten; an
    /// existing signing-key binding is never replaced (hijack prevention)
    /// and a known streaming destination is kept when the update omits it.
    /// Returns whether the peer was previously unknown.
    pub fn upsert_peer(&self, peer: &PeerRecord) -> Result<bool> {
        let conn = self.lock();

        let existed: bool = conn
            .query_row(
                "SELECT 1 FROM peers WHERE destination = ?1",
                [peer.destination.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        conn.execute(
            "INSERT INTO peers (destination, b32Address, displayName, filesCount, totalSize,
                                lastSeen, streamingDestination, signingKey)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(destination) DO UPDATE SET
                 b32Address = excluded.b32Address,
                 displayName = excluded.displayName,
                 filesCount = excluded.filesCount,
                 totalSize = excluded.totalSize,
                 lastSeen = excluded.lastSeen,
                 streamingDestination = COALESCE(excluded.streamingDestination, streamingDestination),
                 signingKey = COALESCE(signingKey, excluded.signingKey)",
            params![
                peer.destination.as_str(),
                peer.b32_address,
                peer.display_name,
                peer.files_count,
                peer.total_size,
                peer.last_seen,
                peer.streaming_destination.as_ref().map(|d| d.as_str()),
                peer.signing_key,
            ],
        )?;

        Ok(!existed)
    }

    pub fn get_peer(&self, destination: &Destination) -> Result<Option<PeerRecord>> {
        let conn = self.lock();
        let peer = conn
            .query_row(
                "SELECT destination, b32Address, displayName, filesCount, totalSize,
                        lastSeen, streamingDestination, signingKey
                 FROM peers WHERE destination = ?1",
                [destination.as_str()],
                row_to_peer,
            )
            .optional()?;
        Ok(peer)
    }

    /// Removes a peer, returning the stored record so the engine can
    /// broadcast PEER_OFFLINE with its alias.
    pub fn delete_peer(&self, destination: &Destination) -> Result<Option<PeerRecord>> {
        let conn = self.lock();
        let peer = conn
            .query_row(
                "DELETE FROM peers WHERE destination = ?1
                 RETURNING destination, b32Address, displayName, filesCount, totalSize,
                           lastSeen, streamingDestination, signingKey",
                [destination.as_str()],
                row_to_peer,
            )
            .optional()?;
        Ok(peer)
    }

    /// Refreshes only `lastSeen`. Returns false for unknown peers.
    pub fn touch(&self, destination: &Destination, now: EpochMillis) -> Result<bool> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE peers SET lastSeen = ?2 WHERE destination = ?1",
            params![destination.as_str(), now],
        )?;
        Ok(updated > 0)
    }

    /// Fresh peers excluding the requester, in randomised order so load
    /// spreads across the population, capped at `limit`.
    pub fn get_active_peers(
        &self,
        exclude: Option<&Destination>,
        cutoff: EpochMillis,
        limit: usize,
    ) -> Result<Vec<PeerRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT destination, b32Address, displayName, filesCount, totalSize,
                    lastSeen, streamingDestination, signingKey
             FROM peers
             WHERE lastSeen > ?1 AND destination != ?2
             ORDER BY RANDOM()
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(
            params![
                cutoff,
                exclude.map(|d| d.as_str()).unwrap_or(""),
                limit as i64
            ],
            row_to_peer,
        )?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn count_active(&self, cutoff: EpochMillis) -> Result<u64> {
        let conn = self.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM peers WHERE lastSeen > ?1",
            [cutoff],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Deletes every peer with `lastSeen < cutoff` and returns the removed
    /// rows. Collection and deletion share one transaction so each
    /// PEER_OFFLINE corresponds to a row that was present at sweep time.
    pub fn sweep(&self, cutoff: EpochMillis) -> Result<Vec<PeerRecord>> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let removed = {
            let mut stmt = tx.prepare(
                "SELECT destination, b32Address, displayName, filesCount, totalSize,
                        lastSeen, streamingDestination, signingKey
                 FROM peers WHERE lastSeen < ?1",
            )?;
            let rows = stmt.query_map([cutoff], row_to_peer)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        tx.execute("DELETE FROM peers WHERE lastSeen < ?1", [cutoff])?;
        tx.commit()?;

        Ok(removed)
    }

    pub fn is_nonce_used(&self, nonce: &Nonce) -> Result<bool> {
        let conn = self.lock();
        let used = conn
            .query_row(
                "SELECT 1 FROM used_nonces WHERE nonce = ?1",
                [nonce.to_string()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(used)
    }

    pub fn mark_nonce_used(&self, nonce: &Nonce, now: EpochMillis) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO used_nonces (nonce, createdAt) VALUES (?1, ?2)",
            params![nonce.to_string(), now],
        )?;
        Ok(())
    }

    /// Drops nonces older than the message-validity window; their replay
    /// would be rejected on timestamp alone.
    pub fn sweep_nonces(&self, cutoff: EpochMillis) -> Result<usize> {
        let conn = self.lock();
        let removed = conn.execute("DELETE FROM used_nonces WHERE createdAt < ?1", [cutoff])?;
        Ok(removed)
    }

    pub fn upsert_dht_node(&self, node: &DhtNode) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO dht_nodes (nodeId, destination, lastSeen)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(nodeId) DO UPDATE SET
                 destination = excluded.destination,
                 lastSeen = excluded.lastSeen",
            params![
                node.node_id
                    .clone()
                    .unwrap_or_else(|| node.destination.as_str().to_owned()),
                node.destination.as_str(),
                node.last_seen,
            ],
        )?;
        Ok(())
    }

    pub fn get_dht_nodes(&self, limit: usize) -> Result<Vec<DhtNode>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT nodeId, destination, lastSeen FROM dht_nodes
             ORDER BY lastSeen DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok(DhtNode {
                node_id: row.get(0)?,
                destination: Destination::new(row.get(1)?),
                last_seen: row.get(2)?,
            })
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn sweep_dht_nodes(&self, cutoff: EpochMillis) -> Result<usize> {
        let conn = self.lock();
        let removed = conn.execute("DELETE FROM dht_nodes WHERE lastSeen < ?1", [cutoff])?;
        Ok(removed)
    }

    pub fn peer_count(&self) -> Result<u64> {
        let conn = self.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM peers", [], |row| row.get(0))?;
        Ok(count)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("peer store lock poisoned; continuing");
                poisoned.into_inner()
            }
        }
    }
}

fn row_to_peer(row: &Row) -> rusqlite::Result<PeerRecord> {
    Ok(PeerRecord {
        destination: Destination::new(row.get(0)?),
        b32_address: row.get(1)?,
        display_name: row.get(2)?,
        files_count: row.get(3)?,
        total_size: row.get(4)?,
        last_seen: row.get(5)?,
        streaming_destination: row.get::<_, Option<String>>(6)?.map(Destination::new),
        signing_key: row.get(7)?,
    })
}

/// Restores an on-disk snapshot into the in-memory connection.
fn restore(conn: &mut Connection, path: &Path) -> Result<()> {
    let disk = Connection::open(path)?;
    let backup = rusqlite::backup::Backup::new(&disk, conn)?;
    backup.run_to_completion(64, std::time::Duration::ZERO, None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest(n: u32) -> Destination {
        Destination::new(format!("destination-{:04}", n).repeat(24))
    }

    fn peer(n: u32, last_seen: EpochMillis) -> PeerRecord {
        PeerRecord::new(dest(n), format!("peer{}.b32.i2p", n), last_seen)
    }

    fn store() -> PeerStore {
        PeerStore::open(None).unwrap()
    }

    #[test]
    fn test_upsert_reports_new() {
        let store = store();
        assert!(store.upsert_peer(&peer(1, 10)).unwrap());
        assert!(!store.upsert_peer(&peer(1, 20)).unwrap());
        assert_eq!(store.get_peer(&dest(1)).unwrap().unwrap().last_seen, 20);
    }

    #[test]
    fn test_upsert_preserves_signing_key() {
        let store = store();

        let mut first = peer(1, 10);
        first.signing_key = Some("KEY-A".into());
        store.upsert_peer(&first).unwrap();

        // A later update without a key must not clear the binding.
        store.upsert_peer(&peer(1, 20)).unwrap();
        let stored = store.get_peer(&dest(1)).unwrap().unwrap();
        assert_eq!(stored.signing_key.as_deref(), Some("KEY-A"));
        assert_eq!(stored.last_seen, 20);

        // And a different key must not replace it either.
        let mut hijack = peer(1, 30);
        hijack.signing_key = Some("KEY-B".into());
        store.upsert_peer(&hijack).unwrap();
        let stored = store.get_peer(&dest(1)).unwrap().unwrap();
        assert_eq!(stored.signing_key.as_deref(), Some("KEY-A"));
    }

    #[test]
    fn test_upsert_keeps_streaming_destination() {
        let store = store();

        let mut first = peer(1, 10);
        first.streaming_destination = Some(dest(99));
        store.upsert_peer(&first).unwrap();

        store.upsert_peer(&peer(1, 20)).unwrap();
        let stored = store.get_peer(&dest(1)).unwrap().unwrap();
        assert_eq!(stored.streaming_destination, Some(dest(99)));
    }

    #[test]
    fn test_touch_only_updates_last_seen() {
        let store = store();
        let mut original = peer(1, 10);
        original.display_name = "Alice".into();
        store.upsert_peer(&original).unwrap();

        assert!(store.touch(&dest(1), 50).unwrap());
        let stored = store.get_peer(&dest(1)).unwrap().unwrap();
        assert_eq!(stored.last_seen, 50);
        assert_eq!(stored.display_name, "Alice");

        assert!(!store.touch(&dest(2), 50).unwrap());
    }

    #[test]
    fn test_active_peers_excludes_requester_and_caps() {
        let store = store();
        for n in 0..20 {
            store.upsert_peer(&peer(n, 100)).unwrap();
        }
        store.upsert_peer(&peer(99, 1)).unwrap(); // stale

        let active = store.get_active_peers(Some(&dest(0)), 50, 10).unwrap();
        assert_eq!(active.len(), 10);
        assert!(active.iter().all(|p| p.destination != dest(0)));
        assert!(active.iter().all(|p| p.last_seen > 50));
    }

    #[test]
    fn test_random_sampling_covers_population() {
        let store = store();
        for n in 0..10 {
            store.upsert_peer(&peer(n, 100)).unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            for p in store.get_active_peers(None, 0, 3).unwrap() {
                seen.insert(p.b32_address);
            }
        }

        // Over many draws every peer should appear at least once.
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn test_sweep_returns_removed_rows() {
        let store = store();
        store.upsert_peer(&peer(1, 10)).unwrap();
        store.upsert_peer(&peer(2, 100)).unwrap();

        let removed = store.sweep(50).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].destination, dest(1));

        assert!(store.get_peer(&dest(1)).unwrap().is_none());
        assert!(store.get_peer(&dest(2)).unwrap().is_some());

        // Idempotent: a second sweep finds nothing.
        assert!(store.sweep(50).unwrap().is_empty());
    }

    #[test]
    fn test_nonce_lifecycle() {
        let store = store();
        let nonce = Nonce::generate();

        assert!(!store.is_nonce_used(&nonce).unwrap());
        store.mark_nonce_used(&nonce, 100).unwrap();
        assert!(store.is_nonce_used(&nonce).unwrap());

        assert_eq!(store.sweep_nonces(200).unwrap(), 1);
        assert!(!store.is_nonce_used(&nonce).unwrap());
    }

    #[test]
    fn test_dht_nodes() {
        let store = store();
        for n in 0..5 {
            store
                .upsert_dht_node(&DhtNode {
                    node_id: Some(format!("node-{}", n)),
                    destination: dest(n),
                    last_seen: n as u64,
                })
                .unwrap();
        }

        let nodes = store.get_dht_nodes(3).unwrap();
        assert_eq!(nodes.len(), 3);
        // Most recently seen first.
        assert_eq!(nodes[0].last_seen, 4);

        assert_eq!(store.sweep_dht_nodes(3).unwrap(), 3);
        assert_eq!(store.get_dht_nodes(10).unwrap().len(), 2);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.db");

        {
            let store = PeerStore::open(Some(&path)).unwrap();
            store.upsert_peer(&peer(1, 42)).unwrap();
            store.snapshot().unwrap();
        }

        let reopened = PeerStore::open(Some(&path)).unwrap();
        let stored = reopened.get_peer(&dest(1)).unwrap().unwrap();
        assert_eq!(stored.last_seen, 42);
    }

    #[test]
    fn test_delete_returns_record() {
        let store = store();
        store.upsert_peer(&peer(1, 10)).unwrap();

        let removed = store.delete_peer(&dest(1)).unwrap().unwrap();
        assert_eq!(removed.b32_address, "peer1.b32.i2p");
        assert!(store.delete_peer(&dest(1)).unwrap().is_none());
    }
}
