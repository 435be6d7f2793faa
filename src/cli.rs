use clap::Parser;

use crate::config::TrackerConfig;

/// Launcher arguments. These sit on top of the file/env configuration
/// layers; the launcher's documented defaults win for the knobs it owns.
#[derive(Parser, Debug)]
#[command(
    name = "ishare-tracker",
    about = "Anonymous peer-discovery and BitTorrent tracker over I2P",
    version
)]
pub struct Args {
    /// Host of the SAM bridge.
    #[arg(long, default_value = "127.0.0.1")]
    pub sam_host: String,

    /// TCP control port of the SAM bridge.
    #[arg(long, default_value_t = 7656)]
    pub sam_port_tcp: u16,

    /// UDP data port of the SAM bridge.
    #[arg(long, default_value_t = 7655)]
    pub sam_port_udp: u16,

    /// Base UDP port for inbound datagrams (randomised by +0..99).
    #[arg(long, default_value_t = 7670)]
    pub listen_port: u16,

    /// Peer timeout in seconds.
    #[arg(long, default_value_t = 300)]
    pub peer_timeout: u64,

    /// Use an already-running I2P router instead of starting i2pd.
    #[arg(long)]
    pub no_i2pd: bool,
}

impl Args {
    pub fn apply(&self, config: &mut TrackerConfig) {
        config.sam.host = self.sam_host.clone();
        config.sam.tcp_port = self.sam_port_tcp;
        config.sam.udp_port = self.sam_port_udp;
        config.discovery.listen_port = self.listen_port;
        config.discovery.peer_timeout = std::time::Duration::from_secs(self.peer_timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let args = Args::parse_from(["ishare-tracker"]);
        assert_eq!(args.sam_host, "127.0.0.1");
        assert_eq!(args.sam_port_tcp, 7656);
        assert_eq!(args.sam_port_udp, 7655);
        assert_eq!(args.listen_port, 7670);
        assert_eq!(args.peer_timeout, 300);
        assert!(!args.no_i2pd);
    }

    #[test]
    fn test_apply_converts_seconds() {
        let args = Args::parse_from(["ishare-tracker", "--peer-timeout", "9"]);
        let mut config = TrackerConfig::default();
        args.apply(&mut config);
        assert_eq!(config.peer_timeout_ms(), 9_000);
    }
}
