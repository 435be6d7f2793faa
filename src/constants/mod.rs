macro_rules! constant_strings {
    (
        $(
            $(#[$docs:meta])*
            ($name_upcase:ident, $value:expr),
        )+
    ) => {
        $(
            $(#[$docs])*
            #[allow(dead_code)]
            pub const $name_upcase: &'static str = $value;
        )+
    }
}

constant_strings! {
    // DISCOVERY MESSAGE KINDS
    (MSG_ANNOUNCE, "ANNOUNCE"),
    (MSG_GET_PEERS, "GET_PEERS"),
    (MSG_PING, "PING"),
    (MSG_PONG, "PONG"),
    (MSG_DISCONNECT, "DISCONNECT"),
    (MSG_GET_DHT_NODES, "GET_DHT_NODES"),
    (MSG_PEERS_LIST, "PEERS_LIST"),
    (MSG_DHT_NODES_LIST, "DHT_NODES_LIST"),
    (MSG_PEER_ONLINE, "PEER_ONLINE"),
    (MSG_PEER_OFFLINE, "PEER_OFFLINE"),
    (MSG_SEARCH, "SEARCH"),
    (MSG_SEARCH_RESULTS, "SEARCH_RESULTS"),
    (MSG_GET_FILES, "GET_FILES"),
    (MSG_FILES_LIST, "FILES_LIST"),
    (MSG_REQUEST_FILE, "REQUEST_FILE"),
    (MSG_FILE_DATA, "FILE_DATA"),

    // HTTP RESPONSE
    (NOT_FOUND, "Not Found"),
    (BAD_REQUEST, "Bad Request"),
    (PAYLOAD_TOO_LARGE, "Payload Too Large"),
    (INTERNAL_ERROR, "Internal Server Error"),

    // BEP3 RESPONSE KEYS
    (TRACKER_RESPONSE_FAILURE_REASON, "failure reason"),
    (TRACKER_RESPONSE_INTERVAL, "interval"),
    (TRACKER_RESPONSE_MIN_INTERVAL, "min interval"),
    (TRACKER_RESPONSE_COMPLETE, "complete"),
    (TRACKER_RESPONSE_INCOMPLETE, "incomplete"),
    (TRACKER_RESPONSE_DOWNLOADED, "downloaded"),
    (TRACKER_RESPONSE_FILES, "files"),
    (TRACKER_RESPONSE_PEERS, "peers"),
    (TRACKER_RESPONSE_DESTINATION, "destination"),

    // BEP3 ERRORS
    (TRACKER_ERROR_MISSING_INFOHASH, "missing info_hash"),
    (TRACKER_ERROR_MISSING_PEERID, "missing peer id"),
    (TRACKER_ERROR_MISSING_DESTINATION, "missing destination"),
    (TRACKER_ERROR_INVALID_INFOHASH, "invalid infohash: infohash is not 20 bytes long"),
    (TRACKER_ERROR_INVALID_PEERID, "invalid peerid: peerid is not 20 bytes long"),
    (TRACKER_ERROR_INVALID_DESTINATION, "invalid destination"),
    (TRACKER_ERROR_COMPACT_UNSUPPORTED, "compact responses cannot carry I2P destinations"),
    (TRACKER_ERROR_TOO_MANY_SCRAPE_HASHES, "too many info_hash values in scrape"),

    // PERSISTENT FILES
    (KEYS_FILE, "tracker-keys.json"),
    (DB_FILE, "tracker.db"),
    (DESTINATION_FILE, "tracker-destination.txt"),
    (BT_DESTINATION_FILE, "bt-tracker-destination.txt"),
}

/// Nonces older than this are forgotten; envelope timestamps outside this
/// window are rejected, so a forgotten nonce can no longer be replayed.
pub const MESSAGE_VALIDITY_WINDOW_MS: u64 = 10 * 60 * 1000;

/// Cap on DHT_NODES_LIST and GET_DHT_NODES replies.
pub const MAX_DHT_NODES_PER_RESPONSE: usize = 50;
