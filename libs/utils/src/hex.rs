pub use hex::FromHexError;

use hex::ToHex;
use serde::Serializer;

/// Encodes a binary slice into a lowercase hexadecimal string.
pub fn encode(bin: &[u8]) -> String {
    bin.encode_hex::<String>()
}

/// Decodes a hexadecimal string into a binary vector.
pub fn decode(hex: &str) -> Result<Vec<u8>, FromHexError> {
    hex::decode(hex)
}

/// Serializes a binary slice as a hexadecimal string.
pub fn serialize<T: AsRef<[u8]>, S>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&encode(bytes.as_ref()))
}
