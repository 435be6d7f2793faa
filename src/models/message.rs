use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{json, Value};

use super::common::{Destination, EpochMillis};
use super::peer::{DhtNode, PeerRecord};
use crate::constants;

/// The outer wire envelope of every discovery datagram.
///
/// `data` is kept as raw JSON text: the signature covers the exact bytes the
/// sender serialised, so re-serialising before verification would break
/// otherwise-valid messages.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub data: Box<RawValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<EpochMillis>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(
        rename = "signingKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub signing_key: Option<String>,

    #[serde(rename = "_from", default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Destination>,
}

/// A decoded discovery message. The `data` JSON is `{type, payload}`;
/// the tracker handles the first ten kinds, the rest travel peer-to-peer
/// and only matter to the client agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Announce(AnnouncePayload),
    GetPeers,
    Ping,
    Pong,
    Disconnect,
    GetDhtNodes,
    PeersList(PeersListPayload),
    DhtNodesList(DhtNodesListPayload),
    PeerOnline(PeerRecord),
    PeerOffline(PeerOfflinePayload),
    Search(SearchPayload),
    SearchResults(SearchResultsPayload),
    GetFiles,
    FilesList(FilesListPayload),
    RequestFile(RequestFilePayload),
    FileData(FileDataPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncePayload {
    #[serde(default = "super::peer::default_display_name")]
    pub display_name: String,

    #[serde(default)]
    pub files_count: u32,

    #[serde(default)]
    pub total_size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_destination: Option<Destination>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeersListPayload {
    pub peers: Vec<PeerRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhtNodesListPayload {
    pub nodes: Vec<DhtNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerOfflinePayload {
    pub destination: Destination,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b32_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPayload {
    pub request_id: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultsPayload {
    pub request_id: String,

    #[serde(default)]
    pub results: Vec<FileInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesListPayload {
    #[serde(default)]
    pub files: Vec<FileInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFilePayload {
    pub file_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDataPayload {
    pub file_hash: String,

    /// Base64 chunk contents; transfers themselves are out of the
    /// tracker's hands.
    #[serde(default)]
    pub data: String,
}

/// A file entry exchanged by SEARCH/FILES_LIST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub hash: String,
}

/// Raw `{type, payload}` shape, decoded before dispatch so unknown kinds
/// can be logged with their name.
#[derive(Deserialize)]
struct WireData {
    #[serde(rename = "type")]
    kind: String,

    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, PartialEq)]
pub enum ParseError {
    /// The `data` field was not a `{type, payload}` object.
    NotAnObject,
    /// The kind string is not one of the known message types.
    UnknownKind(String),
    /// The payload did not match the kind's schema.
    BadPayload(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ParseError::NotAnObject => write!(f, "message data is not an object"),
            ParseError::UnknownKind(kind) => write!(f, "unknown message type {:?}", kind),
            ParseError::BadPayload(kind) => write!(f, "malformed {} payload", kind),
        }
    }
}

impl std::error::Error for ParseError {}

impl Message {
    /// Decodes the envelope's `data` JSON into a typed message.
    pub fn parse(data: &RawValue) -> Result<Message, ParseError> {
        let wire: WireData =
            serde_json::from_str(data.get()).map_err(|_| ParseError::NotAnObject)?;

        let payload = wire.payload.unwrap_or(Value::Null);

        fn typed<T: serde::de::DeserializeOwned>(
            kind: &str,
            payload: Value,
        ) -> Result<T, ParseError> {
            serde_json::from_value(payload).map_err(|_| ParseError::BadPayload(kind.to_owned()))
        }

        let kind = wire.kind.as_str();
        let message = match kind {
            constants::MSG_ANNOUNCE => Message::Announce(typed(kind, payload)?),
            constants::MSG_GET_PEERS => Message::GetPeers,
            constants::MSG_PING => Message::Ping,
            constants::MSG_PONG => Message::Pong,
            constants::MSG_DISCONNECT => Message::Disconnect,
            constants::MSG_GET_DHT_NODES => Message::GetDhtNodes,
            constants::MSG_PEERS_LIST => Message::PeersList(typed(kind, payload)?),
            constants::MSG_DHT_NODES_LIST => Message::DhtNodesList(typed(kind, payload)?),
            constants::MSG_PEER_ONLINE => Message::PeerOnline(typed(kind, payload)?),
            constants::MSG_PEER_OFFLINE => Message::PeerOffline(typed(kind, payload)?),
            constants::MSG_SEARCH => Message::Search(typed(kind, payload)?),
            constants::MSG_SEARCH_RESULTS => Message::SearchResults(typed(kind, payload)?),
            constants::MSG_GET_FILES => Message::GetFiles,
            constants::MSG_FILES_LIST => Message::FilesList(typed(kind, payload)?),
            constants::MSG_REQUEST_FILE => Message::RequestFile(typed(kind, payload)?),
            constants::MSG_FILE_DATA => Message::FileData(typed(kind, payload)?),
            _ => return Err(ParseError::UnknownKind(wire.kind)),
        };

        Ok(message)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Announce(_) => constants::MSG_ANNOUNCE,
            Message::GetPeers => constants::MSG_GET_PEERS,
            Message::Ping => constants::MSG_PING,
            Message::Pong => constants::MSG_PONG,
            Message::Disconnect => constants::MSG_DISCONNECT,
            Message::GetDhtNodes => constants::MSG_GET_DHT_NODES,
            Message::PeersList(_) => constants::MSG_PEERS_LIST,
            Message::DhtNodesList(_) => constants::MSG_DHT_NODES_LIST,
            Message::PeerOnline(_) => constants::MSG_PEER_ONLINE,
            Message::PeerOffline(_) => constants::MSG_PEER_OFFLINE,
            Message::Search(_) => constants::MSG_SEARCH,
            Message::SearchResults(_) => constants::MSG_SEARCH_RESULTS,
            Message::GetFiles => constants::MSG_GET_FILES,
            Message::FilesList(_) => constants::MSG_FILES_LIST,
            Message::RequestFile(_) => constants::MSG_REQUEST_FILE,
            Message::FileData(_) => constants::MSG_FILE_DATA,
        }
    }

    /// Renders the `{type, payload}` data object this message signs as.
    pub fn to_data(&self) -> Value {
        let payload = match self {
            Message::Announce(p) => Some(json!(p)),
            Message::PeersList(p) => Some(json!(p)),
            Message::DhtNodesList(p) => Some(json!(p)),
            Message::PeerOnline(p) => Some(json!(p)),
            Message::PeerOffline(p) => Some(json!(p)),
            Message::Search(p) => Some(json!(p)),
            Message::SearchResults(p) => Some(json!(p)),
            Message::FilesList(p) => Some(json!(p)),
            Message::RequestFile(p) => Some(json!(p)),
            Message::FileData(p) => Some(json!(p)),
            Message::GetPeers
            | Message::Ping
            | Message::Pong
            | Message::Disconnect
            | Message::GetDhtNodes
            | Message::GetFiles => None,
        };

        match payload {
            Some(payload) => json!({ "type": self.kind(), "payload": payload }),
            None => json!({ "type": self.kind() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> Box<RawValue> {
        RawValue::from_string(json.to_owned()).unwrap()
    }

    #[test]
    fn test_parse_announce() {
        let data = raw(
            r#"{"type":"ANNOUNCE","payload":{"displayName":"A","filesCount":3,"totalSize":1024}}"#,
        );
        let message = Message::parse(&data).unwrap();

        match message {
            Message::Announce(p) => {
                assert_eq!(p.display_name, "A");
                assert_eq!(p.files_count, 3);
                assert_eq!(p.total_size, 1024);
            }
            other => panic!("expected ANNOUNCE, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_payloadless_kinds() {
        assert_eq!(
            Message::parse(&raw(r#"{"type":"PING"}"#)).unwrap(),
            Message::Ping
        );
        assert_eq!(
            Message::parse(&raw(r#"{"type":"GET_PEERS","payload":null}"#)).unwrap(),
            Message::GetPeers
        );
    }

    #[test]
    fn test_unknown_kind_is_reported_by_name() {
        let err = Message::parse(&raw(r#"{"type":"GOSSIP"}"#)).unwrap_err();
        assert_eq!(err, ParseError::UnknownKind("GOSSIP".to_owned()));
    }

    #[test]
    fn test_announce_defaults() {
        let data = raw(r#"{"type":"ANNOUNCE","payload":{}}"#);
        match Message::parse(&data).unwrap() {
            Message::Announce(p) => assert_eq!(p.display_name, "Unknown"),
            other => panic!("expected ANNOUNCE, got {:?}", other),
        }
    }

    #[test]
    fn test_data_round_trip() {
        let message = Message::Search(SearchPayload {
            request_id: "r-1".into(),
            query: "flac".into(),
        });

        let data = serde_json::to_string(&message.to_data()).unwrap();
        let parsed = Message::parse(&RawValue::from_string(data).unwrap()).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_envelope_wire_names() {
        let envelope = Envelope {
            data: raw(r#"{"type":"PING"}"#),
            nonce: Some("00".repeat(16)),
            timestamp: Some(7),
            signature: Some("sig".into()),
            signing_key: Some("key".into()),
            from: Some(Destination::from("dest")),
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("signingKey").is_some());
        assert!(json.get("_from").is_some());
        assert!(json.get("from").is_none());
    }
}
