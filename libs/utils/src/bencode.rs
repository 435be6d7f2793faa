use bytes::{BufMut, Bytes, BytesMut};

const TOKEN_END: u8 = b'e';
const TOKEN_DICT: u8 = b'd';
const TOKEN_LIST: u8 = b'l';
const TOKEN_INT: u8 = b'i';
const TOKEN_LEN: u8 = b':';

/// Append-only bencode writer.
///
/// Dictionary keys are emitted in the order given; callers are expected to
/// write them in sorted order as BEP3 requires.
#[derive(Default, Debug)]
pub struct Writer {
    output: BytesMut,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            output: BytesMut::new(),
        }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            output: BytesMut::with_capacity(capacity),
        }
    }

    fn push(&mut self, token: u8) {
        self.output.put_u8(token);
    }

    fn push_slice<T: AsRef<[u8]>>(&mut self, token: T) {
        self.output.extend_from_slice(token.as_ref());
    }

    pub fn begin_dict(&mut self) {
        self.push(TOKEN_DICT);
    }

    pub fn end_dict(&mut self) {
        self.push(TOKEN_END);
    }

    pub fn begin_list(&mut self) {
        self.push(TOKEN_LIST);
    }

    pub fn end_list(&mut self) {
        self.push(TOKEN_END);
    }

    /// Writes a length-prefixed byte string.
    pub fn bytes(&mut self, v: &[u8]) {
        let mut buffer = itoa::Buffer::new();
        self.push_slice(buffer.format(v.len()));
        self.push(TOKEN_LEN);
        self.push_slice(v);
    }

    pub fn str(&mut self, v: &str) {
        self.bytes(v.as_bytes());
    }

    /// Writes a dictionary key. Identical encoding to `str`, split out so
    /// call sites read as key/value pairs.
    pub fn key(&mut self, k: &str) {
        self.str(k);
    }

    pub fn int<T: itoa::Integer>(&mut self, v: T) {
        let mut buffer = itoa::Buffer::new();
        self.push(TOKEN_INT);
        self.push_slice(buffer.format(v));
        self.push(TOKEN_END);
    }

    pub fn finish(self) -> Bytes {
        self.output.freeze()
    }
}

/// Writes a whole dictionary: `bencode_dict!(w, "key" => w.int(1), ...)`.
/// Expands to a block so nested dict/list values compose.
#[macro_export]
macro_rules! bencode_dict {
    ($writer:expr, $($key:expr => $value:expr),* $(,)?) => {{
        $writer.begin_dict();
        $(
            $writer.key($key);
            $value;
        )*
        $writer.end_dict();
    }};
}

/// Writes a whole list: `bencode_list!(w, for x in xs => w.int(*x))`.
#[macro_export]
macro_rules! bencode_list {
    ($writer:expr, for $item:pat in $iter:expr => $value:expr) => {{
        $writer.begin_list();
        for $item in $iter {
            $value;
        }
        $writer.end_list();
    }};
}

/// Renders the single-key failure dictionary used by BEP3 error responses.
pub fn failure(reason: &str) -> Bytes {
    let mut w = Writer::with_capacity(reason.len() + 24);
    bencode_dict! { w,
        "failure reason" => w.str(reason),
    };
    w.finish()
}
