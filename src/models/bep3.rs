use bytes::Bytes;
use ishare_utils::bencode::Writer;
use ishare_utils::query;
use ishare_utils::{bencode_dict, bencode_list};

use super::common::{Destination, InfoHash, PeerId};
use super::swarm::{AnnounceEvent, SwarmStats};
use crate::constants;

/// A parsed `/announce` query. The BEP3 `port` parameter carries the
/// peer's full I2P destination; TCP ports mean nothing inside I2P.
#[derive(Debug, PartialEq)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub destination: Destination,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: AnnounceEvent,
    pub numwant: Option<usize>,
    pub compact: bool,
}

impl AnnounceRequest {
    /// Parses the raw query string. Returns the BEP3 failure string for
    /// requests that are well-formed HTTP but invalid announces.
    pub fn from_query(raw: &[u8]) -> Result<Self, &'static str> {
        let info_hash = query::first_value(raw, "info_hash")
            .ok_or(constants::TRACKER_ERROR_MISSING_INFOHASH)?;
        let info_hash = InfoHash::from_query_bytes(&info_hash)
            .ok_or(constants::TRACKER_ERROR_INVALID_INFOHASH)?;

        let peer_id =
            query::first_value(raw, "peer_id").ok_or(constants::TRACKER_ERROR_MISSING_PEERID)?;
        let peer_id = PeerId::from_query_bytes(&peer_id)
            .ok_or(constants::TRACKER_ERROR_INVALID_PEERID)?;

        let destination =
            query::first_value(raw, "port").ok_or(constants::TRACKER_ERROR_MISSING_DESTINATION)?;
        let destination = Destination::new(
            String::from_utf8(destination.into_owned())
                .map_err(|_| constants::TRACKER_ERROR_INVALID_DESTINATION)?,
        );
        if !destination.is_plausible() {
            return Err(constants::TRACKER_ERROR_INVALID_DESTINATION);
        }

        let event = query::first_value(raw, "event")
            .map(|v| AnnounceEvent::from_query_bytes(&v))
            .unwrap_or_default();

        let compact = query::first_value(raw, "compact")
            .map(|v| v.as_ref() == b"1")
            .unwrap_or(false);

        Ok(AnnounceRequest {
            info_hash,
            peer_id,
            destination,
            uploaded: uint_param(raw, "uploaded"),
            downloaded: uint_param(raw, "downloaded"),
            left: uint_param(raw, "left"),
            event,
            numwant: parse_uint(query::first_value(raw, "numwant").as_deref())
                .map(|n| n as usize),
            compact,
        })
    }
}

fn uint_param(raw: &[u8], name: &str) -> u64 {
    parse_uint(query::first_value(raw, name).as_deref()).unwrap_or(0)
}

fn parse_uint(raw: Option<&[u8]>) -> Option<u64> {
    std::str::from_utf8(raw?).ok()?.parse().ok()
}

/// The bencoded reply to a successful announce.
#[derive(Debug, Default)]
pub struct AnnounceResponse {
    pub interval: u32,
    pub min_interval: u32,
    pub complete: u32,
    pub incomplete: u32,
    pub peers: Vec<Destination>,
}

impl AnnounceResponse {
    pub fn bencode(&self) -> Bytes {
        let capacity = 96 + self.peers.iter().map(|p| p.as_str().len() + 24).sum::<usize>();
        let mut w = Writer::with_capacity(capacity);

        bencode_dict! { w,
            constants::TRACKER_RESPONSE_COMPLETE => w.int(self.complete),
            constants::TRACKER_RESPONSE_INCOMPLETE => w.int(self.incomplete),
            constants::TRACKER_RESPONSE_INTERVAL => w.int(self.interval),
            constants::TRACKER_RESPONSE_MIN_INTERVAL => w.int(self.min_interval),
            constants::TRACKER_RESPONSE_PEERS => bencode_list!(w, for peer in &self.peers => {
                bencode_dict! { w,
                    constants::TRACKER_RESPONSE_DESTINATION => w.str(peer.as_str()),
                }
            }),
        };

        w.finish()
    }
}

/// A parsed `/scrape` query: one or more info-hashes.
#[derive(Debug, PartialEq)]
pub struct ScrapeRequest {
    pub info_hashes: Vec<InfoHash>,
}

impl ScrapeRequest {
    pub fn from_query(raw: &[u8]) -> Result<Self, &'static str> {
        let values = query::all_values(raw, "info_hash");
        if values.is_empty() {
            return Err(constants::TRACKER_ERROR_MISSING_INFOHASH);
        }

        let mut info_hashes = Vec::with_capacity(values.len());
        for value in values {
            info_hashes.push(
                InfoHash::from_query_bytes(&value)
                    .ok_or(constants::TRACKER_ERROR_INVALID_INFOHASH)?,
            );
        }

        Ok(ScrapeRequest { info_hashes })
    }
}

/// The bencoded reply to a scrape: `files` keyed by hex info-hash.
#[derive(Debug, Default)]
pub struct ScrapeResponse {
    pub files: Vec<(InfoHash, SwarmStats)>,
}

impl ScrapeResponse {
    pub fn bencode(&self) -> Bytes {
        // Bencode dictionaries carry their keys in sorted raw-string
        // order. Entries arrive in request order, and hex keys sort the
        // same as the hash bytes, so sort on those; a hash requested
        // twice gets one entry.
        let mut files: Vec<&(InfoHash, SwarmStats)> = self.files.iter().collect();
        files.sort_by_key(|entry| (entry.0).0);
        files.dedup_by_key(|entry| (entry.0).0);

        let mut w = Writer::with_capacity(32 + files.len() * 112);

        bencode_dict! { w,
            constants::TRACKER_RESPONSE_FILES => {
                w.begin_dict();
                for (info_hash, stats) in files {
                    w.key(&info_hash.to_string());
                    bencode_dict! { w,
                        constants::TRACKER_RESPONSE_COMPLETE => w.int(stats.complete),
                        constants::TRACKER_RESPONSE_DOWNLOADED => w.int(stats.downloaded),
                        constants::TRACKER_RESPONSE_INCOMPLETE => w.int(stats.incomplete),
                    }
                }
                w.end_dict();
            },
        };

        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest_param() -> String {
        "D".repeat(400)
    }

    fn announce_query(extra: &str) -> Vec<u8> {
        format!(
            "info_hash={}&peer_id=-IS0001-0123456789ab&port={}{}",
            "%aa".repeat(20),
            dest_param(),
            extra
        )
        .into_bytes()
    }

    #[test]
    fn test_announce_parse() {
        let req =
            AnnounceRequest::from_query(&announce_query("&left=100&event=started&numwant=10"))
                .unwrap();

        assert_eq!(req.info_hash, InfoHash([0xaa; 20]));
        assert_eq!(req.destination.as_str(), dest_param());
        assert_eq!(req.left, 100);
        assert_eq!(req.event, AnnounceEvent::Started);
        assert_eq!(req.numwant, Some(10));
        assert!(!req.compact);
    }

    #[test]
    fn test_announce_rejects_numeric_port() {
        let raw = format!(
            "info_hash={}&peer_id=-IS0001-0123456789ab&port=6881",
            "%aa".repeat(20)
        );
        assert_eq!(
            AnnounceRequest::from_query(raw.as_bytes()),
            Err(constants::TRACKER_ERROR_INVALID_DESTINATION)
        );
    }

    #[test]
    fn test_announce_rejects_short_infohash() {
        let raw = format!("info_hash=%aa%bb&peer_id=x&port={}", dest_param());
        assert_eq!(
            AnnounceRequest::from_query(raw.as_bytes()),
            Err(constants::TRACKER_ERROR_INVALID_INFOHASH)
        );
    }

    #[test]
    fn test_announce_missing_fields() {
        assert_eq!(
            AnnounceRequest::from_query(b"peer_id=x"),
            Err(constants::TRACKER_ERROR_MISSING_INFOHASH)
        );
        let raw = format!("info_hash={}", "%aa".repeat(20));
        assert_eq!(
            AnnounceRequest::from_query(raw.as_bytes()),
            Err(constants::TRACKER_ERROR_MISSING_PEERID)
        );
    }

    #[test]
    fn test_announce_response_shape() {
        let response = AnnounceResponse {
            interval: 1800,
            min_interval: 60,
            complete: 0,
            incomplete: 1,
            peers: vec![],
        };

        assert_eq!(
            response.bencode().as_ref(),
            &b"d8:completei0e10:incompletei1e8:intervali1800e12:min intervali60e5:peerslee"[..]
        );
    }

    #[test]
    fn test_announce_response_peer_dicts() {
        let response = AnnounceResponse {
            interval: 1800,
            min_interval: 60,
            complete: 1,
            incomplete: 1,
            peers: vec![Destination::from("abcd")],
        };

        let body = response.bencode();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("5:peersld11:destination4:abcdee"));
    }

    #[test]
    fn test_scrape_sorts_files_by_hash() {
        let low: InfoHash = "2a7b9e1f5c8d3a6b0f2e4c5a9b7d1e3a6c8b5d99".parse().unwrap();
        let high: InfoHash = "3b8c2d0e6f9a4b7c1d4e5f6a2b8c3d9e4f5a6b7c".parse().unwrap();

        // Request order is high-then-low; the dict must still come out
        // sorted.
        let response = ScrapeResponse {
            files: vec![
                (high, SwarmStats::default()),
                (low, SwarmStats::default()),
            ],
        };

        let body = response.bencode();
        let text = String::from_utf8_lossy(&body);
        let low_at = text.find(&low.to_string()).unwrap();
        let high_at = text.find(&high.to_string()).unwrap();
        assert!(low_at < high_at);
    }

    #[test]
    fn test_scrape_deduplicates_repeated_hash() {
        let hash: InfoHash = "2a7b9e1f5c8d3a6b0f2e4c5a9b7d1e3a6c8b5d99".parse().unwrap();
        let stats = SwarmStats {
            complete: 1,
            incomplete: 2,
            downloaded: 3,
        };

        let response = ScrapeResponse {
            files: vec![(hash, stats), (hash, stats)],
        };

        let body = response.bencode();
        let text = String::from_utf8_lossy(&body);
        assert_eq!(text.matches(&hash.to_string()).count(), 1);
    }

    #[test]
    fn test_scrape_round_trip() {
        let hash_hex = "2a7b9e1f5c8d3a6b0f2e4c5a9b7d1e3a6c8b5d99";
        let req = ScrapeRequest::from_query(format!("info_hash={}", hash_hex).as_bytes()).unwrap();
        assert_eq!(req.info_hashes.len(), 1);

        let response = ScrapeResponse {
            files: vec![(
                req.info_hashes[0],
                SwarmStats {
                    complete: 1,
                    incomplete: 1,
                    downloaded: 0,
                },
            )],
        };

        let expected = format!(
            "d5:filesd40:{}d8:completei1e10:downloadedi0e10:incompletei1eeee",
            hash_hex
        );
        assert_eq!(response.bencode().as_ref(), expected.as_bytes());
    }
}
