use serde::{Deserialize, Serialize};

use super::common::{Destination, EpochMillis};

/// A peer known to the discovery engine. Field names are the wire and
/// database contract; both use camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    /// The full I2P destination, primary key of the peer store.
    pub destination: Destination,

    /// Short deterministic hash of the destination, for display only.
    pub b32_address: String,

    #[serde(default = "default_display_name")]
    pub display_name: String,

    #[serde(default)]
    pub files_count: u32,

    #[serde(default)]
    /// Total size of the peer's shared folder, in bytes.
    pub total_size: u64,

    pub last_seen: EpochMillis,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// A second destination some peers open for content transfers.
    pub streaming_destination: Option<Destination>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Base64 Ed25519 public key bound to this destination. Immutable once
    /// set; announcements carrying a different key are rejected.
    pub signing_key: Option<String>,
}

pub fn default_display_name() -> String {
    "Unknown".to_owned()
}

impl PeerRecord {
    pub fn new(destination: Destination, b32_address: String, last_seen: EpochMillis) -> Self {
        Self {
            destination,
            b32_address,
            display_name: default_display_name(),
            files_count: 0,
            total_size: 0,
            last_seen,
            streaming_destination: None,
            signing_key: None,
        }
    }
}

/// A Kademlia bootstrap node advertised through GET_DHT_NODES.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhtNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    pub destination: Destination,

    pub last_seen: EpochMillis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let peer = PeerRecord::new(Destination::from("dest"), "b32.b32.i2p".into(), 42);
        let json = serde_json::to_value(&peer).unwrap();

        assert_eq!(json["b32Address"], "b32.b32.i2p");
        assert_eq!(json["displayName"], "Unknown");
        assert_eq!(json["filesCount"], 0);
        assert_eq!(json["lastSeen"], 42);
        // Unset optionals stay off the wire entirely.
        assert!(json.get("signingKey").is_none());
    }

    #[test]
    fn test_defaults_on_sparse_input() {
        let peer: PeerRecord =
            serde_json::from_str(r#"{"destination":"d","b32Address":"b","lastSeen":1}"#).unwrap();
        assert_eq!(peer.display_name, "Unknown");
        assert_eq!(peer.files_count, 0);
        assert!(peer.signing_key.is_none());
    }
}
