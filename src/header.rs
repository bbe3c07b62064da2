//! One-byte type tags stored in front of every scalar.
//!
//! Layout of a header byte:
//!
//! ```text
//!  7   4   3    2   0
//! +-----+------+-----+
//! | 0000| flag | size|
//! +-----+------+-----+
//! ```
//!
//! `size` is the payload width in bytes (`0`, `1`, `2` or `4`), except for
//! 64-bit values which use `3` since eight does not fit the field. For
//! non-zero widths `flag` is the signedness; for width `0` it holds the
//! boolean itself and there is no payload. A non-zero high nibble means the
//! byte is not a header at all.

use std::fmt;

const SIZE_MASK: u8 = 0b111;
const FLAG_BIT: u8 = 3;
const HIGH_NIBBLE: u8 = 0xF0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Width {
    Bit,
    Byte,
    Int,
    Int4,
    Int8,
}

impl Width {
    /// Payload size in bytes.
    pub const fn size(self) -> usize {
        match self {
            Width::Bit => 0,
            Width::Byte => 1,
            Width::Int => 2,
            Width::Int4 => 4,
            Width::Int8 => 8,
        }
    }

    const fn code(self) -> u8 {
        match self {
            Width::Int8 => 3,
            other => other.size() as u8,
        }
    }

    const fn from_code(code: u8) -> Option<Width> {
        match code {
            0 => Some(Width::Bit),
            1 => Some(Width::Byte),
            2 => Some(Width::Int),
            3 => Some(Width::Int8),
            4 => Some(Width::Int4),
            _ => None,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Width::Bit => "BIT",
            Width::Byte => "BYTE",
            Width::Int => "INT",
            Width::Int4 => "INT4",
            Width::Int8 => "INT8",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Header {
    Boolean(bool),
    Scalar { width: Width, signed: bool },
}

impl Header {
    /// Narrowest header able to hold `value`.
    pub const fn classify(value: i64) -> Header {
        if value >= 0 {
            let width = match value {
                0 | 1 => return Header::Boolean(value == 1),
                2..=0xFF => Width::Byte,
                0x100..=0xFFFF => Width::Int,
                0x1_0000..=0xFFFF_FFFF => Width::Int4,
                _ => Width::Int8,
            };
            Header::Scalar {
                width,
                signed: false,
            }
        } else {
            let width = if value >= i8::MIN as i64 {
                Width::Byte
            } else if value >= i16::MIN as i64 {
                Width::Int
            } else if value >= i32::MIN as i64 {
                Width::Int4
            } else {
                Width::Int8
            };
            Header::Scalar {
                width,
                signed: true,
            }
        }
    }

    pub const fn width(self) -> Width {
        match self {
            Header::Boolean(_) => Width::Bit,
            Header::Scalar { width, .. } => width,
        }
    }

    pub const fn encode(self) -> u8 {
        let (size, flag) = match self {
            Header::Boolean(value) => (0, value),
            Header::Scalar { width, signed } => (width.code(), signed),
        };
        (size & SIZE_MASK) | ((flag as u8) << FLAG_BIT)
    }

    /// Returns `None` when `byte` cannot be a header: the high nibble is set or
    /// the size class is not one of the known widths.
    pub const fn decode(byte: u8) -> Option<Header> {
        if byte & HIGH_NIBBLE != 0 {
            return None;
        }
        let flag = (byte >> FLAG_BIT) & 1 == 1;
        match Width::from_code(byte & SIZE_MASK) {
            Some(Width::Bit) => Some(Header::Boolean(flag)),
            Some(width) => Some(Header::Scalar {
                width,
                signed: flag,
            }),
            None => None,
        }
    }

    /// Header byte plus payload.
    pub const fn encoded_len(self) -> usize {
        1 + self.width().size()
    }

    /// Little-endian payload of `value`, truncated to this header's width.
    pub fn encode_payload(self, value: i64) -> Vec<u8> {
        let bytes: [u8; 8] = bytemuck::cast((value as u64).to_le());
        bytes[..self.width().size()].to_vec()
    }

    /// Inverse of [`Header::encode_payload`]. `payload` must be exactly the
    /// header's width long.
    pub fn decode_payload(self, payload: &[u8]) -> i64 {
        let Header::Scalar { width, signed } = self else {
            return matches!(self, Header::Boolean(true)) as i64;
        };
        let mut buf = [0u8; 8];
        buf[..width.size()].copy_from_slice(payload);
        let raw = u64::from_le(bytemuck::cast(buf));

        let shift = 64 - 8 * width.size() as u32;
        if signed {
            ((raw << shift) as i64) >> shift
        } else {
            raw as i64
        }
    }
}
