/*!
 * Binary Serialization with bincode
 * Fixed-width little-endian encoding for records placed in shared queues
 */

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};
use std::io::Cursor;

/// Upper bound for one bincode-encoded structure (headers, subscriptions).
/// Application payloads are appended raw and do not count against this.
pub const MAX_ENCODED_SIZE: u64 = 64 * 1024;

/// Result type for bincode operations
pub type BincodeResult<T> = Result<T, BincodeError>;

/// Binary serialization errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum BincodeError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

#[inline]
fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_ENCODED_SIZE)
}

/// Serialize to binary bytes using bincode
#[inline]
pub fn to_vec<T: Serialize>(value: &T) -> BincodeResult<Vec<u8>> {
    options()
        .serialize(value)
        .map_err(|e| BincodeError::Serialization(e.to_string()))
}

/// Append the encoding of `value` to `out`
pub fn extend_vec<T: Serialize>(out: &mut Vec<u8>, value: &T) -> BincodeResult<()> {
    options()
        .serialize_into(&mut *out, value)
        .map_err(|e| BincodeError::Serialization(e.to_string()))
}

/// Deserialize a value that must span the whole slice
#[inline]
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> BincodeResult<T> {
    options()
        .reject_trailing_bytes()
        .deserialize(bytes)
        .map_err(|e| BincodeError::Deserialization(e.to_string()))
}

/// Deserialize a value from the front of `bytes`.
///
/// Returns the value and the number of bytes it occupied, so callers can
/// treat the remainder as an opaque payload.
pub fn from_prefix<T: DeserializeOwned>(bytes: &[u8]) -> BincodeResult<(T, usize)> {
    let mut cursor = Cursor::new(bytes);
    let value = options()
        .allow_trailing_bytes()
        .deserialize_from(&mut cursor)
        .map_err(|e| BincodeError::Deserialization(e.to_string()))?;
    Ok((value, cursor.position() as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Header {
        origin: String,
        kind: u32,
    }

    #[test]
    fn test_from_prefix_leaves_payload() {
        let header = Header {
            origin: "alpha".into(),
            kind: 7,
        };
        let mut bytes = to_vec(&header).unwrap();
        let header_len = bytes.len();
        bytes.extend_from_slice(b"payload");

        let (decoded, used): (Header, usize) = from_prefix(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(used, header_len);
        assert_eq!(&bytes[used..], b"payload");
    }

    #[test]
    fn test_from_slice_rejects_trailing_bytes() {
        let mut bytes = to_vec(&42u32).unwrap();
        bytes.push(0);
        assert!(from_slice::<u32>(&bytes).is_err());
    }

    #[test]
    fn test_truncated_input_fails() {
        let bytes = to_vec(&Header {
            origin: "alpha".into(),
            kind: 1,
        })
        .unwrap();
        assert!(from_prefix::<Header>(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        // String length claims far more than the limit allows
        let mut bytes = (u64::MAX / 2).to_le_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        assert!(from_prefix::<String>(&bytes).is_err());
    }
}
