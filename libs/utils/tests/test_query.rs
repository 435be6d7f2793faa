use ishare_utils::query;

#[test]
fn test_announce_query_shape() {
    let raw: &[u8] = b"info_hash=%124Vx%9a%bc%de%f0%124Vx%9a%bc%de%f0%124Vx\
&peer_id=-IS0001-abcdefghijkl&port=longdestinationstring&uploaded=0\
&downloaded=0&left=100&event=started&numwant=10";

    let info_hash = query::first_value(raw, "info_hash").unwrap();
    assert_eq!(info_hash.len(), 20);
    assert_eq!(info_hash[0], 0x12);
    assert_eq!(info_hash[19], b'x');

    assert_eq!(
        query::first_value(raw, "event").unwrap().as_ref(),
        b"started"
    );
    assert_eq!(query::first_value(raw, "numwant").unwrap().as_ref(), b"10");
    assert!(query::first_value(raw, "compact").is_none());
}

#[test]
fn test_multi_scrape_hashes() {
    let raw: &[u8] = b"info_hash=aaaaaaaaaaaaaaaaaaaa&info_hash=bbbbbbbbbbbbbbbbbbbb";
    let hashes = query::all_values(raw, "info_hash");
    assert_eq!(hashes.len(), 2);
    assert!(hashes.iter().all(|h| h.len() == 20));
}

#[test]
fn test_empty_query() {
    assert_eq!(query::parse(b"").count(), 0);
    assert_eq!(query::parse(b"&&").count(), 0);
}
