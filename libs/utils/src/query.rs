use percent_encoding::percent_decode;
use std::borrow::Cow;

/// A single decoded `key=value` pair. Values stay as raw bytes because
/// BEP3 `info_hash` parameters are percent-encoded binary, not UTF-8.
pub type Pair<'a> = (Cow<'a, str>, Cow<'a, [u8]>);

/// Iterator over the `&`-separated pairs of a query string.
pub struct QueryParse<'a> {
    input: &'a [u8],
}

/// Parses an `application/x-www-form-urlencoded` query string.
///
/// ```
/// let mut pairs = ishare_utils::query::parse(b"left=0&event=started");
/// let (k, v) = pairs.next().unwrap();
/// assert_eq!(k, "left");
/// assert_eq!(v.as_ref(), b"0");
/// ```
pub fn parse(input: &[u8]) -> QueryParse<'_> {
    QueryParse { input }
}

impl<'a> Iterator for QueryParse<'a> {
    type Item = Pair<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.input.is_empty() {
                return None;
            }

            let mut split2 = self.input.splitn(2, |&b| b == b'&');
            let sequence = split2.next().unwrap();
            self.input = split2.next().unwrap_or(&[][..]);

            if sequence.is_empty() {
                continue;
            }

            let mut split2 = sequence.splitn(2, |&b| b == b'=');
            let key = split2.next().unwrap();
            let value = split2.next().unwrap_or(&[][..]);

            return Some((decode_str(key), decode_bytes(value)));
        }
    }
}

/// Returns the first value for `name`, if present.
pub fn first_value<'a>(input: &'a [u8], name: &str) -> Option<Cow<'a, [u8]>> {
    parse(input).find(|(k, _)| k == name).map(|(_, v)| v)
}

/// Returns every value for `name`, in order of appearance. BEP3 scrape
/// repeats `info_hash` once per torrent.
pub fn all_values<'a>(input: &'a [u8], name: &str) -> Vec<Cow<'a, [u8]>> {
    parse(input)
        .filter(|(k, _)| k == name)
        .map(|(_, v)| v)
        .collect()
}

fn decode_bytes(input: &[u8]) -> Cow<'_, [u8]> {
    match replace_plus(input) {
        Cow::Borrowed(bytes) => percent_decode(bytes).into(),
        Cow::Owned(bytes) => Cow::Owned(percent_decode(&bytes).collect()),
    }
}

fn decode_str(input: &[u8]) -> Cow<'_, str> {
    match decode_bytes(input) {
        Cow::Borrowed(bytes) => String::from_utf8_lossy(bytes),
        Cow::Owned(vec) => Cow::Owned(String::from_utf8_lossy(&vec).into_owned()),
    }
}

fn replace_plus(input: &[u8]) -> Cow<'_, [u8]> {
    match input.iter().position(|&b| b == b'+') {
        None => Cow::Borrowed(input),
        Some(first) => {
            let mut replaced = input.to_owned();
            replaced[first] = b' ';
            for byte in &mut replaced[first + 1..] {
                if *byte == b'+' {
                    *byte = b' ';
                }
            }
            Cow::Owned(replaced)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let pairs: Vec<_> = parse(b"bread=baguette&cheese=comt%C3%A9&empty=").collect();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].0, "bread");
        assert_eq!(pairs[0].1.as_ref(), b"baguette");
        assert_eq!(pairs[1].1.as_ref(), "comté".as_bytes());
        assert_eq!(pairs[2].1.as_ref(), b"");
    }

    #[test]
    fn test_binary_value() {
        let (_, v) = parse(b"info_hash=%00%ff%20x").next().unwrap();
        assert_eq!(v.as_ref(), &[0x00, 0xff, 0x20, b'x']);
    }

    #[test]
    fn test_plus_is_space() {
        let (_, v) = parse(b"name=two+words").next().unwrap();
        assert_eq!(v.as_ref(), b"two words");
    }

    #[test]
    fn test_repeated_keys() {
        let values = all_values(b"info_hash=aa&peer_id=x&info_hash=bb", "info_hash");
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].as_ref(), b"aa");
        assert_eq!(values[1].as_ref(), b"bb");
    }

    #[test]
    fn test_first_value_missing() {
        assert!(first_value(b"a=1", "b").is_none());
    }
}
