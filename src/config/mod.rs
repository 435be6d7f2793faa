use config::{Config, ConfigError, Environment, File};
use ishare_utils::serde::deserialize_ms_to_duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for reaching the SAM bridge.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SamConfig {
    /// Host the SAM bridge listens on.
    pub host: String,

    /// TCP control port of the bridge.
    pub tcp_port: u16,

    /// UDP data port of the bridge.
    pub udp_port: u16,
}

/// Configuration options for the discovery engine.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DiscoveryConfig {
    /// Base UDP port for inbound datagrams; randomised by +rand(0..99).
    pub listen_port: u16,

    #[serde(deserialize_with = "deserialize_ms_to_duration")]
    /// Age after which a peer is swept and declared offline.
    pub peer_timeout: Duration,

    #[serde(deserialize_with = "deserialize_ms_to_duration")]
    /// Cadence of the peer sweep.
    pub cleanup_interval: Duration,

    /// Hard cap on peer-list replies.
    pub max_peers_per_response: usize,
}

/// Configuration options for the BEP3 tracker.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BtTrackerConfig {
    /// Whether to start the BEP3 engine and its HTTP front end at all.
    pub enabled: bool,

    /// Base local TCP port for the HTTP server; randomised by +rand(0..99).
    pub http_port: u16,

    #[serde(deserialize_with = "deserialize_ms_to_duration")]
    /// Age after which a swarm peer is dropped. Deliberately much longer
    /// than the discovery timeout: announces come every half hour.
    pub peer_timeout: Duration,

    #[serde(deserialize_with = "deserialize_ms_to_duration")]
    /// Cadence of the stale-swarm sweep.
    pub cleanup_interval: Duration,

    /// Announce interval advertised to clients, seconds.
    pub announce_interval: u32,

    /// Minimum announce interval advertised to clients, seconds.
    pub min_announce_interval: u32,

    /// Cap on info_hash values in one scrape request.
    pub max_multi_scrape_count: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Directory holding keys, snapshots and destination files.
    pub data_dir: PathBuf,

    #[serde(deserialize_with = "deserialize_ms_to_duration")]
    /// Cadence of the store snapshot to disk.
    pub snapshot_interval: Duration,
}

/// Configuration for a tracker node. Layers, lowest to highest:
/// built-in defaults < `conf/default` < `conf/local` < `ISHARE_*`
/// environment < CLI flags.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TrackerConfig {
    pub sam: SamConfig,
    pub discovery: DiscoveryConfig,
    pub bt_tracker: BtTrackerConfig,
    pub storage: StorageConfig,

    /// The log level controlling verbosity.
    pub log_level: String,
}

impl TrackerConfig {
    /// Loads the layered configuration.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("sam.host", "127.0.0.1")?
            .set_default("sam.tcp_port", 7656)?
            .set_default("sam.udp_port", 7655)?
            .set_default("discovery.listen_port", 7670)?
            .set_default("discovery.peer_timeout", 90_000)?
            .set_default("discovery.cleanup_interval", 30_000)?
            .set_default("discovery.max_peers_per_response", 100)?
            .set_default("bt_tracker.enabled", true)?
            .set_default("bt_tracker.http_port", 7680)?
            .set_default("bt_tracker.peer_timeout", 3_600_000)?
            .set_default("bt_tracker.cleanup_interval", 60_000)?
            .set_default("bt_tracker.announce_interval", 1_800)?
            .set_default("bt_tracker.min_announce_interval", 60)?
            .set_default("bt_tracker.max_multi_scrape_count", 64)?
            .set_default("storage.data_dir", "./tracker-data")?
            .set_default("storage.snapshot_interval", 30_000)?
            .set_default("log_level", "info")?
            .add_source(File::with_name("conf/default").required(false))
            .add_source(File::with_name("conf/local").required(false))
            .add_source(Environment::with_prefix("ishare").separator("__"));

        builder.build()?.try_deserialize()
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_ref()
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.storage.data_dir
    }

    pub fn snapshot_interval(&self) -> Duration {
        self.storage.snapshot_interval
    }

    pub fn peer_timeout_ms(&self) -> u64 {
        self.discovery.peer_timeout.as_millis() as u64
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.discovery.cleanup_interval
    }

    pub fn max_peers_per_response(&self) -> usize {
        self.discovery.max_peers_per_response
    }

    pub fn listen_port(&self) -> u16 {
        self.discovery.listen_port
    }

    pub fn bt_enabled(&self) -> bool {
        self.bt_tracker.enabled
    }

    pub fn bt_http_port(&self) -> u16 {
        self.bt_tracker.http_port
    }

    pub fn bt_peer_timeout_ms(&self) -> u64 {
        self.bt_tracker.peer_timeout.as_millis() as u64
    }

    pub fn bt_cleanup_interval(&self) -> Duration {
        self.bt_tracker.cleanup_interval
    }

    pub fn announce_interval(&self) -> u32 {
        self.bt_tracker.announce_interval
    }

    pub fn min_announce_interval(&self) -> u32 {
        self.bt_tracker.min_announce_interval
    }

    pub fn max_multi_scrape_count(&self) -> usize {
        self.bt_tracker.max_multi_scrape_count
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::load().expect("built-in defaults always deserialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();

        assert_eq!(config.sam.host, "127.0.0.1");
        assert_eq!(config.sam.tcp_port, 7656);
        assert_eq!(config.sam.udp_port, 7655);
        assert_eq!(config.listen_port(), 7670);
        assert_eq!(config.peer_timeout_ms(), 90_000);
        assert_eq!(config.cleanup_interval(), Duration::from_secs(30));
        assert_eq!(config.max_peers_per_response(), 100);
        assert!(config.bt_enabled());
        assert_eq!(config.bt_http_port(), 7680);
        assert_eq!(config.bt_peer_timeout_ms(), 3_600_000);
        assert_eq!(config.announce_interval(), 1_800);
        assert_eq!(config.min_announce_interval(), 60);
        assert_eq!(config.data_dir(), std::path::Path::new("./tracker-data"));
    }
}
