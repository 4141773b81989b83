//! Subscriber stream framing.
//!
//! Every message is `type : u8`, `payload_len : u16` big-endian, then
//! `payload_len` payload bytes. Requests flow subscriber → broker,
//! responses broker → subscriber.

use std::net::Ipv4Addr;

use super::{Payload, ProtoError, CLIENT_ID_MAX_LEN, STRING_PAYLOAD_MAX_LEN, TOPIC_MAX_LEN};

/// Outer frame header: type byte plus big-endian payload length.
pub const FRAME_HEADER_LEN: usize = 3;

const fn max(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

/// Upper bound on any frame payload; reads beyond it are rejected before
/// buffering.
pub const MAX_PAYLOAD_LEN: usize = max(Request::MAX_PAYLOAD_LEN, Response::MAX_PAYLOAD_LEN);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Request = 0,
    Response = 1,
}

impl FrameType {
    pub fn from_tag(value: u8) -> Result<Self, ProtoError> {
        match value {
            0 => Ok(FrameType::Request),
            1 => Ok(FrameType::Response),
            value => Err(ProtoError::UnknownTag {
                what: "frame type",
                value,
            }),
        }
    }
}

/// A subscriber request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Connect { id: String },
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

impl Request {
    /// Request type byte plus the larger of the two length-prefixed
    /// payloads (topics dominate ids).
    pub const MAX_PAYLOAD_LEN: usize = 1 + 1 + max(TOPIC_MAX_LEN, CLIENT_ID_MAX_LEN);

    /// Serialize the frame payload (without the outer header).
    pub fn serialize_payload(&self) -> Result<Vec<u8>, ProtoError> {
        let mut out = Vec::with_capacity(Self::MAX_PAYLOAD_LEN);
        match self {
            Request::Connect { id } => {
                out.push(0);
                push_prefixed(&mut out, id, "subscriber id", CLIENT_ID_MAX_LEN)?;
            }
            Request::Subscribe { topic } => {
                out.push(1);
                push_prefixed(&mut out, topic, "topic", TOPIC_MAX_LEN)?;
            }
            Request::Unsubscribe { topic } => {
                out.push(2);
                push_prefixed(&mut out, topic, "topic", TOPIC_MAX_LEN)?;
            }
        }
        Ok(out)
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, ProtoError> {
        let (&tag, rest) = buf.split_first().ok_or(ProtoError::Truncated("request"))?;
        match tag {
            0 => {
                let id = read_prefixed(rest, "subscriber id", CLIENT_ID_MAX_LEN)?;
                Ok(Request::Connect { id })
            }
            1 => {
                let topic = read_prefixed(rest, "topic", TOPIC_MAX_LEN)?;
                Ok(Request::Subscribe { topic })
            }
            2 => {
                let topic = read_prefixed(rest, "topic", TOPIC_MAX_LEN)?;
                Ok(Request::Unsubscribe { topic })
            }
            value => Err(ProtoError::UnknownTag {
                what: "request",
                value,
            }),
        }
    }
}

/// A broker response carrying one published value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Publisher address as seen on the UDP socket.
    pub source_ip: Ipv4Addr,
    pub source_port: u16,
    pub topic: String,
    pub payload: Payload,
}

impl Response {
    /// ip + port + prefixed topic + payload tag + largest variant
    /// (a STRING with its u16 length).
    pub const MAX_PAYLOAD_LEN: usize =
        4 + 2 + 1 + TOPIC_MAX_LEN + 1 + 2 + STRING_PAYLOAD_MAX_LEN;

    /// Serialize the frame payload (without the outer header).
    pub fn serialize_payload(&self) -> Result<Vec<u8>, ProtoError> {
        let mut out = Vec::with_capacity(7 + self.topic.len() + 8);
        out.extend_from_slice(&self.source_ip.octets());
        out.extend_from_slice(&self.source_port.to_be_bytes());
        push_prefixed(&mut out, &self.topic, "topic", TOPIC_MAX_LEN)?;
        out.push(self.payload.type_tag());
        match &self.payload {
            Payload::Int { negative, value } => {
                out.push(u8::from(*negative));
                out.extend_from_slice(&value.to_be_bytes());
            }
            Payload::ShortReal { centi } => {
                out.extend_from_slice(&centi.to_be_bytes());
            }
            Payload::Float {
                negative,
                mantissa,
                exponent,
            } => {
                out.push(u8::from(*negative));
                out.extend_from_slice(&mantissa.to_be_bytes());
                out.push(*exponent);
            }
            Payload::String(s) => {
                if s.len() > STRING_PAYLOAD_MAX_LEN {
                    return Err(ProtoError::Oversize {
                        what: "STRING payload",
                        len: s.len(),
                        max: STRING_PAYLOAD_MAX_LEN,
                    });
                }
                out.extend_from_slice(&(s.len() as u16).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
        Ok(out)
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < 7 {
            return Err(ProtoError::Truncated("response"));
        }
        let source_ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
        let source_port = u16::from_be_bytes([buf[4], buf[5]]);
        let topic = read_prefixed(&buf[6..], "topic", TOPIC_MAX_LEN)?;
        let rest = &buf[6 + 1 + topic.len()..];

        let (&tag, body) = rest.split_first().ok_or(ProtoError::Truncated("response"))?;
        let payload = match tag {
            0 => {
                if body.len() < 5 {
                    return Err(ProtoError::Truncated("INT payload"));
                }
                Payload::Int {
                    negative: body[0] != 0,
                    value: u32::from_be_bytes([body[1], body[2], body[3], body[4]]),
                }
            }
            1 => {
                if body.len() < 2 {
                    return Err(ProtoError::Truncated("SHORT_REAL payload"));
                }
                Payload::ShortReal {
                    centi: u16::from_be_bytes([body[0], body[1]]),
                }
            }
            2 => {
                if body.len() < 6 {
                    return Err(ProtoError::Truncated("FLOAT payload"));
                }
                Payload::Float {
                    negative: body[0] != 0,
                    mantissa: u32::from_be_bytes([body[1], body[2], body[3], body[4]]),
                    exponent: body[5],
                }
            }
            3 => {
                if body.len() < 2 {
                    return Err(ProtoError::Truncated("STRING payload"));
                }
                let len = usize::from(u16::from_be_bytes([body[0], body[1]]));
                if len > STRING_PAYLOAD_MAX_LEN {
                    return Err(ProtoError::Oversize {
                        what: "STRING payload",
                        len,
                        max: STRING_PAYLOAD_MAX_LEN,
                    });
                }
                let bytes = body
                    .get(2..2 + len)
                    .ok_or(ProtoError::Truncated("STRING payload"))?;
                Payload::String(String::from_utf8_lossy(bytes).into_owned())
            }
            value => {
                return Err(ProtoError::UnknownTag {
                    what: "response payload",
                    value,
                })
            }
        };

        Ok(Response {
            source_ip,
            source_port,
            topic,
            payload,
        })
    }
}

/// Wrap a serialized payload in the outer frame header.
pub fn encode_frame(kind: FrameType, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.push(kind as u8);
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub fn encode_request_frame(request: &Request) -> Result<Vec<u8>, ProtoError> {
    Ok(encode_frame(FrameType::Request, &request.serialize_payload()?))
}

pub fn encode_response_frame(response: &Response) -> Result<Vec<u8>, ProtoError> {
    Ok(encode_frame(
        FrameType::Response,
        &response.serialize_payload()?,
    ))
}

fn push_prefixed(
    out: &mut Vec<u8>,
    value: &str,
    what: &'static str,
    max: usize,
) -> Result<(), ProtoError> {
    if value.len() > max {
        return Err(ProtoError::Oversize {
            what,
            len: value.len(),
            max,
        });
    }
    out.push(value.len() as u8);
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn read_prefixed(buf: &[u8], what: &'static str, max: usize) -> Result<String, ProtoError> {
    let (&len, rest) = buf.split_first().ok_or(ProtoError::Truncated(what))?;
    let len = usize::from(len);
    if len > max {
        return Err(ProtoError::Oversize {
            what,
            len,
            max,
        });
    }
    let bytes = rest.get(..len).ok_or(ProtoError::Truncated(what))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trips() {
        let requests = [
            Request::Connect { id: "S1".into() },
            Request::Subscribe {
                topic: "sensor/+/temp".into(),
            },
            Request::Unsubscribe {
                topic: "a/*/c".into(),
            },
        ];
        for request in requests {
            let payload = request.serialize_payload().unwrap();
            assert!(payload.len() <= Request::MAX_PAYLOAD_LEN);
            assert_eq!(Request::deserialize(&payload).unwrap(), request);
        }
    }

    #[test]
    fn test_request_limits() {
        let request = Request::Connect {
            id: "x".repeat(CLIENT_ID_MAX_LEN + 1),
        };
        assert!(matches!(
            request.serialize_payload(),
            Err(ProtoError::Oversize { .. })
        ));

        // Declared id length runs past the buffer.
        assert_eq!(
            Request::deserialize(&[0, 5, b'a', b'b']),
            Err(ProtoError::Truncated("subscriber id"))
        );
        assert!(matches!(
            Request::deserialize(&[7, 1, b'a']),
            Err(ProtoError::UnknownTag { .. })
        ));
    }

    #[test]
    fn test_response_round_trips() {
        let payloads = [
            Payload::Int {
                negative: true,
                value: 999,
            },
            Payload::ShortReal { centi: 1234 },
            Payload::Float {
                negative: false,
                mantissa: 123456,
                exponent: 4,
            },
            Payload::String("reading ok".into()),
        ];
        for payload in payloads {
            let response = Response {
                source_ip: Ipv4Addr::new(192, 168, 1, 9),
                source_port: 4567,
                topic: "upb/precis/1".into(),
                payload,
            };
            let bytes = response.serialize_payload().unwrap();
            assert!(bytes.len() <= Response::MAX_PAYLOAD_LEN);
            assert_eq!(Response::deserialize(&bytes).unwrap(), response);
        }
    }

    #[test]
    fn test_response_rejects_bad_lengths() {
        let response = Response {
            source_ip: Ipv4Addr::LOCALHOST,
            source_port: 1,
            topic: "t".repeat(TOPIC_MAX_LEN + 1),
            payload: Payload::ShortReal { centi: 1 },
        };
        assert!(matches!(
            response.serialize_payload(),
            Err(ProtoError::Oversize { .. })
        ));

        // STRING length prefix larger than the remaining buffer.
        let mut bytes = Response {
            source_ip: Ipv4Addr::LOCALHOST,
            source_port: 1,
            topic: "t".into(),
            payload: Payload::String("abc".into()),
        }
        .serialize_payload()
        .unwrap();
        let len_at = 4 + 2 + 1 + 1 + 1;
        bytes[len_at..len_at + 2].copy_from_slice(&100u16.to_be_bytes());
        assert_eq!(
            Response::deserialize(&bytes),
            Err(ProtoError::Truncated("STRING payload"))
        );
    }

    #[test]
    fn test_frame_header_layout() {
        let frame = encode_request_frame(&Request::Connect { id: "ab".into() }).unwrap();
        assert_eq!(frame[0], 0);
        assert_eq!(u16::from_be_bytes([frame[1], frame[2]]), 4);
        assert_eq!(&frame[FRAME_HEADER_LEN..], &[0, 2, b'a', b'b']);

        assert_eq!(FrameType::from_tag(1).unwrap(), FrameType::Response);
        assert!(FrameType::from_tag(2).is_err());
    }
}
