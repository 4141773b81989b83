//! Wire formats shared by the UDP ingest side and the TCP subscriber side.

pub mod tcp;
pub mod udp;

use std::fmt;

use thiserror::Error;

/// Maximum topic length on either wire.
pub const TOPIC_MAX_LEN: usize = 50;

/// Maximum subscriber id length.
pub const CLIENT_ID_MAX_LEN: usize = 10;

/// Maximum STRING payload length.
pub const STRING_PAYLOAD_MAX_LEN: usize = 1500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("unknown {what} tag {value}")]
    UnknownTag { what: &'static str, value: u8 },

    #[error("{what} length {len} exceeds maximum {max}")]
    Oversize {
        what: &'static str,
        len: usize,
        max: usize,
    },
}

/// A typed message value. The wire layouts differ between the UDP and TCP
/// sides (see [`udp`] and [`tcp`]); the logical variants are identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Sign byte followed by a big-endian u32 magnitude.
    Int { negative: bool, value: u32 },
    /// Big-endian u16 holding the value multiplied by 100.
    ShortReal { centi: u16 },
    /// Sign byte, big-endian u32 mantissa, negative base-10 exponent.
    Float {
        negative: bool,
        mantissa: u32,
        exponent: u8,
    },
    String(String),
}

impl Payload {
    pub fn type_tag(&self) -> u8 {
        match self {
            Payload::Int { .. } => 0,
            Payload::ShortReal { .. } => 1,
            Payload::Float { .. } => 2,
            Payload::String(_) => 3,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Int { .. } => "INT",
            Payload::ShortReal { .. } => "SHORT_REAL",
            Payload::Float { .. } => "FLOAT",
            Payload::String(_) => "STRING",
        }
    }
}

/// Human-readable value: signed decimal for INT, two-decimal fixed point
/// for SHORT_REAL, the mantissa scaled by `10^-exponent` for FLOAT.
impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Int { negative, value } => {
                let value = i64::from(*value);
                write!(f, "{}", if *negative { -value } else { value })
            }
            Payload::ShortReal { centi } => {
                write!(f, "{}.{:02}", centi / 100, centi % 100)
            }
            Payload::Float {
                negative,
                mantissa,
                exponent,
            } => {
                if *negative && *mantissa != 0 {
                    f.write_str("-")?;
                }
                let digits = mantissa.to_string();
                let exponent = usize::from(*exponent);
                if exponent == 0 {
                    f.write_str(&digits)
                } else if digits.len() > exponent {
                    let (int, frac) = digits.split_at(digits.len() - exponent);
                    write!(f, "{int}.{frac}")
                } else {
                    write!(f, "0.{:0>width$}", digits, width = exponent)
                }
            }
            Payload::String(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_rendering() {
        let positive = Payload::Int {
            negative: false,
            value: 17,
        };
        let negative = Payload::Int {
            negative: true,
            value: 4294967295,
        };
        assert_eq!(positive.to_string(), "17");
        assert_eq!(negative.to_string(), "-4294967295");
    }

    #[test]
    fn test_short_real_rendering() {
        assert_eq!(Payload::ShortReal { centi: 1234 }.to_string(), "12.34");
        assert_eq!(Payload::ShortReal { centi: 1700 }.to_string(), "17.00");
        assert_eq!(Payload::ShortReal { centi: 5 }.to_string(), "0.05");
    }

    #[test]
    fn test_float_rendering() {
        let value = |negative, mantissa, exponent| Payload::Float {
            negative,
            mantissa,
            exponent,
        };
        assert_eq!(value(false, 1234, 2).to_string(), "12.34");
        assert_eq!(value(true, 1234, 2).to_string(), "-12.34");
        assert_eq!(value(false, 1234, 0).to_string(), "1234");
        assert_eq!(value(false, 5, 3).to_string(), "0.005");
        assert_eq!(value(false, 0, 2).to_string(), "0.00");
    }

    #[test]
    fn test_string_rendering() {
        assert_eq!(Payload::String("hello".into()).to_string(), "hello");
    }
}
