use ishare_utils::hex;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::str::FromStr;

macro_rules! fmt_as_display {
    () => {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "{}", self)
        }
    };
}

/// The length of the info-hash used in the BitTorrent protocol.
pub const INFOHASH_LENGTH: usize = 20;

/// The length of a BitTorrent peer id.
pub const PEER_ID_LENGTH: usize = 20;

/// The length of a discovery-message nonce, in bytes.
pub const NONCE_LENGTH: usize = 16;

/// Milliseconds since the UNIX epoch; the unit every `lastSeen` and
/// envelope timestamp is carried in.
pub type EpochMillis = u64;

/// A 20-byte SHA-1 identifier of a torrent's info dictionary.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct InfoHash(pub [u8; INFOHASH_LENGTH]);

impl InfoHash {
    /// Accepts the two encodings BEP3 clients send: 20 raw bytes or 40 hex
    /// characters.
    pub fn from_query_bytes(raw: &[u8]) -> Option<Self> {
        match raw.len() {
            INFOHASH_LENGTH => {
                let mut hash = [0u8; INFOHASH_LENGTH];
                hash.copy_from_slice(raw);
                Some(InfoHash(hash))
            }
            40 => std::str::from_utf8(raw).ok().and_then(|s| s.parse().ok()),
            _ => None,
        }
    }
}

impl AsRef<[u8]> for InfoHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl Debug for InfoHash {
    fmt_as_display!();
}

impl FromStr for InfoHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let hash: [u8; INFOHASH_LENGTH] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(InfoHash(hash))
    }
}

impl Serialize for InfoHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A BitTorrent peer id: 20 opaque bytes chosen by the client.
#[derive(PartialEq, Eq, Hash, Clone, Copy)]
pub struct PeerId(pub [u8; PEER_ID_LENGTH]);

impl PeerId {
    pub fn from_query_bytes(raw: &[u8]) -> Option<Self> {
        let bytes: [u8; PEER_ID_LENGTH] = raw.try_into().ok()?;
        Some(PeerId(bytes))
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl Debug for PeerId {
    fmt_as_display!();
}

/// A full I2P destination: the long base64 public-key blob that names an
/// endpoint. Only this form can be used to send.
#[derive(PartialEq, Eq, Hash, Clone, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Destination(String);

/// Destinations are ~400 base64 chars; anything much shorter is garbage or
/// a numeric TCP port smuggled into the BEP3 `port` parameter.
const MIN_DESTINATION_LENGTH: usize = 64;

impl Destination {
    pub fn new(raw: String) -> Self {
        Destination(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the string can plausibly be a full destination.
    pub fn is_plausible(&self) -> bool {
        self.0.len() >= MIN_DESTINATION_LENGTH && !self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl From<&str> for Destination {
    fn from(raw: &str) -> Self {
        Destination(raw.to_owned())
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // Full destinations drown log lines; show a prefix.
        let prefix = self.0.get(..16).unwrap_or(&self.0);
        write!(f, "Destination({}…)", prefix)
    }
}

/// A 128-bit per-message random value, hex-encoded on the wire.
#[derive(PartialEq, Eq, Hash, Clone, Copy)]
pub struct Nonce(pub [u8; NONCE_LENGTH]);

impl Nonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LENGTH];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes[..]);
        Nonce(bytes)
    }
}

impl std::fmt::Display for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl Debug for Nonce {
    fmt_as_display!();
}

impl FromStr for Nonce {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let nonce: [u8; NONCE_LENGTH] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Nonce(nonce))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_HEX: &str = "2a7b9e1f5c8d3a6b0f2e4c5a9b7d1e3a6c8b5d99";

    #[test]
    fn test_infohash_from_hex() {
        let hash: InfoHash = HASH_HEX.parse().unwrap();
        assert_eq!(hash.to_string(), HASH_HEX);
    }

    #[test]
    fn test_infohash_from_query_bytes() {
        let raw = [0xabu8; 20];
        assert_eq!(InfoHash::from_query_bytes(&raw), Some(InfoHash(raw)));
        assert_eq!(
            InfoHash::from_query_bytes(HASH_HEX.as_bytes()),
            Some(HASH_HEX.parse().unwrap())
        );
        assert_eq!(InfoHash::from_query_bytes(&[0u8; 19]), None);
    }

    #[test]
    fn test_nonce_round_trip() {
        let nonce = Nonce::generate();
        let parsed: Nonce = nonce.to_string().parse().unwrap();
        assert_eq!(nonce, parsed);
        assert_eq!(nonce.to_string().len(), NONCE_LENGTH * 2);
    }

    #[test]
    fn test_destination_plausibility() {
        assert!(!Destination::from("6881").is_plausible());
        assert!(!Destination::from("short~base64").is_plausible());
        assert!(Destination::new("Z".repeat(400)).is_plausible());
    }
}
