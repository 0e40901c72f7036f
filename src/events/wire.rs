/*!
 * Wire Records
 *
 * Layout of every record placed in an event queue:
 *
 * ```text
 * [kind: u8][bincode body][payload...]
 * ```
 *
 * `kind` is `S` for a subscription (body = `Subscription`, no payload) or
 * `E` for an event (body = `EventHeader`, payload = remaining bytes). The
 * header can be decoded without touching the payload.
 */

use super::types::{EventHeader, Subscription};
use crate::core::bincode;
use thiserror::Error;

pub const RECORD_SUBSCRIPTION: u8 = b'S';
pub const RECORD_EVENT: u8 = b'E';

/// Record encoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Empty record")]
    Empty,

    #[error("Unknown record kind {0:#04x}")]
    UnknownKind(u8),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

impl From<bincode::BincodeError> for WireError {
    fn from(err: bincode::BincodeError) -> Self {
        WireError::Malformed(err.to_string())
    }
}

/// Decoded view of a queued record; event payloads borrow the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireRecord<'a> {
    Subscription(Subscription),
    Event {
        header: EventHeader,
        payload: &'a [u8],
    },
}

pub fn encode_subscription(subscription: &Subscription) -> Result<Vec<u8>, WireError> {
    let mut out = vec![RECORD_SUBSCRIPTION];
    bincode::extend_vec(&mut out, subscription)?;
    Ok(out)
}

pub fn encode_event(header: &EventHeader, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::with_capacity(1 + 64 + payload.len());
    out.push(RECORD_EVENT);
    bincode::extend_vec(&mut out, header)?;
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<WireRecord<'_>, WireError> {
    let (&kind, body) = bytes.split_first().ok_or(WireError::Empty)?;
    match kind {
        RECORD_SUBSCRIPTION => Ok(WireRecord::Subscription(bincode::from_slice(body)?)),
        RECORD_EVENT => {
            let (header, used) = bincode::from_prefix::<EventHeader>(body)?;
            Ok(WireRecord::Event {
                header,
                payload: &body[used..],
            })
        }
        other => Err(WireError::UnknownKind(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn test_subscription_fields_survive() {
        let sub = Subscription::new(Uuid::new_v4(), true).withdrawal();
        let bytes = encode_subscription(&sub).unwrap();
        assert_eq!(bytes[0], RECORD_SUBSCRIPTION);
        assert_eq!(decode(&bytes).unwrap(), WireRecord::Subscription(sub));
    }

    #[test]
    fn test_event_header_and_payload_split() {
        let header = EventHeader::new(Uuid::new_v4(), "host-a").with_last_hop("router-b");
        let bytes = encode_event(&header, b"\x00\x01payload").unwrap();

        match decode(&bytes).unwrap() {
            WireRecord::Event {
                header: decoded,
                payload,
            } => {
                assert_eq!(decoded, header);
                assert_eq!(payload, b"\x00\x01payload");
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(decode(&[]), Err(WireError::Empty));
        assert_eq!(decode(b"Zabc"), Err(WireError::UnknownKind(b'Z')));
        assert!(matches!(decode(b"E\x05"), Err(WireError::Malformed(_))));
        assert!(matches!(decode(b"S\x00\x00"), Err(WireError::Malformed(_))));
    }
}
