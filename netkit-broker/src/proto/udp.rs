//! Publisher datagram format: a 50-byte null-padded topic, a payload type
//! byte and the typed payload body.

use super::{Payload, ProtoError, STRING_PAYLOAD_MAX_LEN, TOPIC_MAX_LEN};

/// Largest datagram the broker accepts: topic, type byte and the largest
/// payload variant. Longer string payloads are truncated to the maximum.
pub const DATAGRAM_MAX_LEN: usize = TOPIC_MAX_LEN + 1 + STRING_PAYLOAD_MAX_LEN;

/// Smallest decodable datagram: topic, type byte, one payload byte.
pub const DATAGRAM_MIN_LEN: usize = TOPIC_MAX_LEN + 1 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpMessage {
    pub topic: String,
    pub payload: Payload,
}

/// Decode one publisher datagram.
pub fn parse_datagram(buf: &[u8]) -> Result<UdpMessage, ProtoError> {
    if buf.len() < DATAGRAM_MIN_LEN {
        return Err(ProtoError::Truncated("udp datagram"));
    }

    let topic_field = &buf[..TOPIC_MAX_LEN];
    let topic_len = topic_field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(TOPIC_MAX_LEN);
    let topic = String::from_utf8_lossy(&topic_field[..topic_len]).into_owned();

    let tag = buf[TOPIC_MAX_LEN];
    let payload = parse_payload(tag, &buf[TOPIC_MAX_LEN + 1..])?;

    Ok(UdpMessage { topic, payload })
}

fn parse_payload(tag: u8, body: &[u8]) -> Result<Payload, ProtoError> {
    match tag {
        0 => {
            if body.len() < 5 {
                return Err(ProtoError::Truncated("INT payload"));
            }
            Ok(Payload::Int {
                negative: body[0] != 0,
                value: u32::from_be_bytes([body[1], body[2], body[3], body[4]]),
            })
        }
        1 => {
            if body.len() < 2 {
                return Err(ProtoError::Truncated("SHORT_REAL payload"));
            }
            Ok(Payload::ShortReal {
                centi: u16::from_be_bytes([body[0], body[1]]),
            })
        }
        2 => {
            if body.len() < 6 {
                return Err(ProtoError::Truncated("FLOAT payload"));
            }
            Ok(Payload::Float {
                negative: body[0] != 0,
                mantissa: u32::from_be_bytes([body[1], body[2], body[3], body[4]]),
                exponent: body[5],
            })
        }
        3 => {
            // No terminator on the wire; a null, the datagram end or the
            // maximum length ends the string, whichever comes first.
            let body = &body[..usize::min(body.len(), STRING_PAYLOAD_MAX_LEN)];
            let len = body.iter().position(|&b| b == 0).unwrap_or(body.len());
            Ok(Payload::String(
                String::from_utf8_lossy(&body[..len]).into_owned(),
            ))
        }
        value => Err(ProtoError::UnknownTag {
            what: "udp payload",
            value,
        }),
    }
}
