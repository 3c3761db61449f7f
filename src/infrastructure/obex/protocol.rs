//! OBEX Protocol
//!
//! Packet and header framing for the object-exchange protocol.
//!
//! # Packet Structure
//!
//! ```text
//! [0]     : Opcode (request) or response code, high bit = final
//! [1-2]   : Packet length including these 3 bytes (u16 big-endian)
//! [3..]   : Opcode-specific prefix (CONNECT: 4 bytes, otherwise none)
//! [..]    : Headers
//! ```
//!
//! The two high bits of a header ID select its encoding:
//!
//! ```text
//! 0x00 : Null-terminated UTF-16BE text, u16 length prefix
//! 0x40 : Byte sequence, u16 length prefix
//! 0x80 : Single byte
//! 0xC0 : Four-byte big-endian value
//! ```

use std::fmt;
use std::io::Read;

use tracing::trace;

use crate::error::{ProtocolError, PushError};

/// Request opcodes
pub mod opcode {
    pub const CONNECT: u8 = 0x80;
    pub const DISCONNECT: u8 = 0x81;
    pub const PUT: u8 = 0x02;
    pub const PUT_FINAL: u8 = 0x82;
    pub const SET_PATH: u8 = 0x85;
    pub const ABORT: u8 = 0xFF;
}

/// Header identifiers
pub mod header_id {
    pub const NAME: u8 = 0x01;
    pub const DESCRIPTION: u8 = 0x05;
    pub const TYPE: u8 = 0x42;
    pub const TARGET: u8 = 0x46;
    pub const BODY: u8 = 0x48;
    pub const END_OF_BODY: u8 = 0x49;
    pub const WHO: u8 = 0x4A;
    pub const LENGTH: u8 = 0xC3;
    pub const CONNECTION_ID: u8 = 0xCB;
}

/// Protocol version sent in the CONNECT prefix (1.0).
pub const OBEX_VERSION: u8 = 0x10;

/// Smallest maximum packet size a peer may announce.
pub const MIN_PACKET_SIZE: u16 = 255;

/// Maximum packet size this side announces on connect.
pub const DEFAULT_MAX_PACKET: u16 = 8192;

/// Opcode, length field.
pub const PACKET_HEADER_LEN: usize = 3;

/// Header ID plus u16 length for text and byte-sequence headers.
pub const HEADER_OVERHEAD: usize = 3;

/// Response code returned by the remote side.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode(u8);

impl ResponseCode {
    pub const CONTINUE: Self = Self(0x90);
    pub const OK: Self = Self(0xA0);
    pub const CREATED: Self = Self(0xA1);
    pub const BAD_REQUEST: Self = Self(0xC0);
    pub const UNAUTHORIZED: Self = Self(0xC1);
    pub const FORBIDDEN: Self = Self(0xC3);
    pub const NOT_FOUND: Self = Self(0xC4);
    pub const NOT_ACCEPTABLE: Self = Self(0xC6);
    pub const INTERNAL_ERROR: Self = Self(0xD0);
    pub const NOT_IMPLEMENTED: Self = Self(0xD1);
    pub const UNAVAILABLE: Self = Self(0xD3);

    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// Any code in the 0xA0-0xAF success class.
    pub fn is_success(&self) -> bool {
        (0xA0..=0xAF).contains(&self.0)
    }

    fn label(&self) -> &'static str {
        match *self {
            Self::CONTINUE => "Continue",
            Self::OK => "OK",
            Self::CREATED => "Created",
            Self::BAD_REQUEST => "Bad Request",
            Self::UNAUTHORIZED => "Unauthorized",
            Self::FORBIDDEN => "Forbidden",
            Self::NOT_FOUND => "Not Found",
            Self::NOT_ACCEPTABLE => "Not Acceptable",
            Self::INTERNAL_ERROR => "Internal Server Error",
            Self::NOT_IMPLEMENTED => "Not Implemented",
            Self::UNAVAILABLE => "Service Unavailable",
            _ if self.is_success() => "Success",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.label(), self.0)
    }
}

impl fmt::Debug for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseCode(0x{:02X})", self.0)
    }
}

/// A single OBEX header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    Name(String),
    Description(String),
    /// Media type, ASCII.
    Type(String),
    Target(Vec<u8>),
    Who(Vec<u8>),
    Body(Vec<u8>),
    EndOfBody(Vec<u8>),
    Length(u32),
    ConnectionId(u32),
    /// Header this codec has no name for; `value` holds the raw payload.
    Other { id: u8, value: Vec<u8> },
}

impl Header {
    pub fn id(&self) -> u8 {
        match self {
            Self::Name(_) => header_id::NAME,
            Self::Description(_) => header_id::DESCRIPTION,
            Self::Type(_) => header_id::TYPE,
            Self::Target(_) => header_id::TARGET,
            Self::Who(_) => header_id::WHO,
            Self::Body(_) => header_id::BODY,
            Self::EndOfBody(_) => header_id::END_OF_BODY,
            Self::Length(_) => header_id::LENGTH,
            Self::ConnectionId(_) => header_id::CONNECTION_ID,
            Self::Other { id, .. } => *id,
        }
    }

    /// Append the wire form of this header to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let id = self.id();
        match self {
            Self::Name(text) | Self::Description(text) => {
                put_prefixed(out, id, &encode_unicode(text))
            }
            Self::Type(text) => {
                if !text.is_ascii() {
                    return Err(ProtocolError::InvalidText(id));
                }
                let mut value = text.as_bytes().to_vec();
                value.push(0);
                put_prefixed(out, id, &value)
            }
            Self::Target(value) | Self::Who(value) | Self::Body(value) | Self::EndOfBody(value) => {
                put_prefixed(out, id, value)
            }
            Self::Length(value) | Self::ConnectionId(value) => {
                out.push(id);
                out.extend_from_slice(&value.to_be_bytes());
                Ok(())
            }
            Self::Other { value, .. } => match id & 0xC0 {
                0x00 | 0x40 => put_prefixed(out, id, value),
                0x80 if value.len() == 1 => {
                    out.push(id);
                    out.extend_from_slice(value);
                    Ok(())
                }
                0xC0 if value.len() == 4 => {
                    out.push(id);
                    out.extend_from_slice(value);
                    Ok(())
                }
                _ => Err(ProtocolError::InvalidHeaderLength(id)),
            },
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Name(text) | Self::Description(text) => {
                HEADER_OVERHEAD + encode_unicode(text).len()
            }
            Self::Type(text) => HEADER_OVERHEAD + text.len() + 1,
            Self::Target(value) | Self::Who(value) | Self::Body(value) | Self::EndOfBody(value) => {
                HEADER_OVERHEAD + value.len()
            }
            Self::Length(_) | Self::ConnectionId(_) => 5,
            Self::Other { id, value } => match id & 0xC0 {
                0x00 | 0x40 => HEADER_OVERHEAD + value.len(),
                _ => 1 + value.len(),
            },
        }
    }

    fn decode(id: u8, value: &[u8]) -> Result<Self, ProtocolError> {
        let header = match id {
            header_id::NAME => Self::Name(decode_unicode(id, value)?),
            header_id::DESCRIPTION => Self::Description(decode_unicode(id, value)?),
            header_id::TYPE => {
                let text = value.strip_suffix(&[0]).unwrap_or(value);
                if !text.is_ascii() {
                    return Err(ProtocolError::InvalidText(id));
                }
                Self::Type(String::from_utf8_lossy(text).into_owned())
            }
            header_id::TARGET => Self::Target(value.to_vec()),
            header_id::WHO => Self::Who(value.to_vec()),
            header_id::BODY => Self::Body(value.to_vec()),
            header_id::END_OF_BODY => Self::EndOfBody(value.to_vec()),
            header_id::LENGTH => Self::Length(be_u32(value)),
            header_id::CONNECTION_ID => Self::ConnectionId(be_u32(value)),
            _ => Self::Other {
                id,
                value: value.to_vec(),
            },
        };
        Ok(header)
    }
}

fn be_u32(value: &[u8]) -> u32 {
    u32::from_be_bytes([value[0], value[1], value[2], value[3]])
}

fn put_prefixed(out: &mut Vec<u8>, id: u8, value: &[u8]) -> Result<(), ProtocolError> {
    let total = HEADER_OVERHEAD + value.len();
    let length = u16::try_from(total).map_err(|_| ProtocolError::PacketTooLarge {
        size: total,
        max: u16::MAX,
    })?;
    out.push(id);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(value);
    Ok(())
}

/// UTF-16BE with a terminating null; the empty string encodes to nothing.
fn encode_unicode(text: &str) -> Vec<u8> {
    if text.is_empty() {
        return Vec::new();
    }
    text.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(|unit| unit.to_be_bytes())
        .collect()
}

fn decode_unicode(id: u8, value: &[u8]) -> Result<String, ProtocolError> {
    if value.len() % 2 != 0 {
        return Err(ProtocolError::InvalidText(id));
    }
    let mut units: Vec<u16> = value
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    if units.last() == Some(&0) {
        units.pop();
    }
    String::from_utf16(&units).map_err(|_| ProtocolError::InvalidText(id))
}

/// Ordered list of headers carried by one packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet(Vec<Header>);

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, header: Header) -> Self {
        self.0.push(header);
        self
    }

    pub fn push(&mut self, header: Header) {
        self.0.push(header);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encoded_len(&self) -> usize {
        self.0.iter().map(Header::encoded_len).sum()
    }

    pub fn name(&self) -> Option<&str> {
        self.0.iter().find_map(|h| match h {
            Header::Name(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn media_type(&self) -> Option<&str> {
        self.0.iter().find_map(|h| match h {
            Header::Type(t) => Some(t.as_str()),
            _ => None,
        })
    }

    pub fn connection_id(&self) -> Option<u32> {
        self.0.iter().find_map(|h| match h {
            Header::ConnectionId(id) => Some(*id),
            _ => None,
        })
    }

    /// Concatenated Body and EndOfBody payloads, in order.
    pub fn body(&self) -> Vec<u8> {
        self.0
            .iter()
            .filter_map(|h| match h {
                Header::Body(data) | Header::EndOfBody(data) => Some(data.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub fn has_end_of_body(&self) -> bool {
        self.0.iter().any(|h| matches!(h, Header::EndOfBody(_)))
    }
}

impl From<Vec<Header>> for HeaderSet {
    fn from(headers: Vec<Header>) -> Self {
        Self(headers)
    }
}

impl IntoIterator for HeaderSet {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Parse a run of headers filling `bytes` exactly.
pub fn parse_headers(bytes: &[u8]) -> Result<HeaderSet, ProtocolError> {
    let mut headers = HeaderSet::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let id = bytes[pos];
        let (value, next) = match id & 0xC0 {
            0x00 | 0x40 => {
                if bytes.len() < pos + HEADER_OVERHEAD {
                    return Err(ProtocolError::Truncated {
                        expected: pos + HEADER_OVERHEAD,
                        actual: bytes.len(),
                    });
                }
                let length = u16::from_be_bytes([bytes[pos + 1], bytes[pos + 2]]) as usize;
                if length < HEADER_OVERHEAD {
                    return Err(ProtocolError::InvalidHeaderLength(id));
                }
                (pos + HEADER_OVERHEAD..pos + length, pos + length)
            }
            0x80 => (pos + 1..pos + 2, pos + 2),
            _ => (pos + 1..pos + 5, pos + 5),
        };
        if next > bytes.len() {
            return Err(ProtocolError::Truncated {
                expected: next,
                actual: bytes.len(),
            });
        }
        headers.push(Header::decode(id, &bytes[value])?);
        pos = next;
    }
    Ok(headers)
}

/// CONNECT request and response prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectParams {
    pub version: u8,
    pub flags: u8,
    pub max_packet: u16,
}

impl ConnectParams {
    pub const LEN: usize = 4;

    pub fn new(max_packet: u16) -> Self {
        Self {
            version: OBEX_VERSION,
            flags: 0,
            max_packet,
        }
    }

    pub fn encode(&self) -> [u8; 4] {
        let [hi, lo] = self.max_packet.to_be_bytes();
        [self.version, self.flags, hi, lo]
    }

    pub fn decode(prefix: &[u8]) -> Result<Self, ProtocolError> {
        match prefix {
            [version, flags, hi, lo, ..] => Ok(Self {
                version: *version,
                flags: *flags,
                max_packet: u16::from_be_bytes([*hi, *lo]),
            }),
            _ => Err(ProtocolError::Truncated {
                expected: Self::LEN,
                actual: prefix.len(),
            }),
        }
    }
}

/// A decoded request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Opcode for requests, raw response code for responses.
    pub code: u8,
    pub prefix: Vec<u8>,
    pub headers: HeaderSet,
}

impl Packet {
    pub fn new(code: u8, headers: HeaderSet) -> Self {
        Self {
            code,
            prefix: Vec::new(),
            headers,
        }
    }

    pub fn with_prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::from_raw(self.code)
    }

    pub fn encoded_len(&self) -> usize {
        PACKET_HEADER_LEN + self.prefix.len() + self.headers.encoded_len()
    }

    /// Encode the packet, refusing anything larger than `max_packet`.
    pub fn encode(&self, max_packet: u16) -> Result<Vec<u8>, ProtocolError> {
        let size = self.encoded_len();
        if size > max_packet as usize {
            return Err(ProtocolError::PacketTooLarge {
                size,
                max: max_packet,
            });
        }
        let mut out = Vec::with_capacity(size);
        out.push(self.code);
        out.extend_from_slice(&(size as u16).to_be_bytes());
        out.extend_from_slice(&self.prefix);
        for header in self.headers.iter() {
            header.encode(&mut out)?;
        }
        Ok(out)
    }

    fn decode(code: u8, body: &[u8], prefix_len: usize) -> Result<Self, ProtocolError> {
        if body.len() < prefix_len {
            return Err(ProtocolError::Truncated {
                expected: PACKET_HEADER_LEN + prefix_len,
                actual: PACKET_HEADER_LEN + body.len(),
            });
        }
        let (prefix, rest) = body.split_at(prefix_len);
        Ok(Self {
            code,
            prefix: prefix.to_vec(),
            headers: parse_headers(rest)?,
        })
    }
}

fn read_raw<R: Read>(reader: &mut R) -> Result<(u8, Vec<u8>), PushError> {
    let mut head = [0u8; PACKET_HEADER_LEN];
    reader.read_exact(&mut head)?;
    let length = u16::from_be_bytes([head[1], head[2]]);
    if (length as usize) < PACKET_HEADER_LEN {
        return Err(ProtocolError::InvalidLength(length).into());
    }
    let mut body = vec![0u8; length as usize - PACKET_HEADER_LEN];
    reader.read_exact(&mut body)?;
    trace!("Read packet 0x{:02X}: {:02X?}", head[0], body);
    Ok((head[0], body))
}

/// Read one response. `connect` selects the CONNECT response layout.
pub fn read_response<R: Read>(reader: &mut R, connect: bool) -> Result<Packet, PushError> {
    let (code, body) = read_raw(reader)?;
    // Some peers drop the CONNECT fields from a refusal.
    let has_params = ResponseCode::from_raw(code).is_success() || body.len() >= ConnectParams::LEN;
    let prefix_len = if connect && has_params {
        ConnectParams::LEN
    } else {
        0
    };
    Ok(Packet::decode(code, &body, prefix_len)?)
}

/// Read one request, picking the prefix layout from its opcode.
pub fn read_request<R: Read>(reader: &mut R) -> Result<Packet, PushError> {
    let (code, body) = read_raw(reader)?;
    let prefix_len = match code {
        opcode::CONNECT => ConnectParams::LEN,
        opcode::SET_PATH => 2,
        _ => 0,
    };
    Ok(Packet::decode(code, &body, prefix_len)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_name_header_wire_form() {
        let mut out = Vec::new();
        Header::Name("Hi".into()).encode(&mut out).unwrap();
        assert_eq!(out, [0x01, 0x00, 0x09, 0x00, b'H', 0x00, b'i', 0x00, 0x00]);
        assert_eq!(Header::Name("Hi".into()).encoded_len(), out.len());
    }

    #[test]
    fn test_empty_name_is_bare_header() {
        let mut out = Vec::new();
        Header::Name(String::new()).encode(&mut out).unwrap();
        assert_eq!(out, [0x01, 0x00, 0x03]);
        let parsed = parse_headers(&out).unwrap();
        assert_eq!(parsed.name(), Some(""));
    }

    #[test]
    fn test_type_header_is_null_terminated_ascii() {
        let mut out = Vec::new();
        Header::Type("text".into()).encode(&mut out).unwrap();
        assert_eq!(out, [0x42, 0x00, 0x08, b't', b'e', b'x', b't', 0x00]);

        let err = Header::Type("tëxt".into()).encode(&mut Vec::new()).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidText(header_id::TYPE));
    }

    #[test]
    fn test_connect_request_layout() {
        let packet = Packet::new(
            opcode::CONNECT,
            HeaderSet::new().with(Header::ConnectionId(7)),
        )
        .with_prefix(&ConnectParams::new(0x2000).encode());
        let bytes = packet.encode(DEFAULT_MAX_PACKET).unwrap();
        assert_eq!(
            bytes,
            [0x80, 0x00, 0x0C, 0x10, 0x00, 0x20, 0x00, 0xCB, 0x00, 0x00, 0x00, 0x07]
        );

        let decoded = read_request(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(
            ConnectParams::decode(&decoded.prefix).unwrap().max_packet,
            0x2000
        );
    }

    #[test]
    fn test_headers_parse_in_order() {
        let headers = HeaderSet::new()
            .with(Header::Name("Hello.txt".into()))
            .with(Header::Type("text".into()))
            .with(Header::Length(6))
            .with(Header::Body(b"Hel".to_vec()))
            .with(Header::EndOfBody(b"lo!".to_vec()))
            .with(Header::Other {
                id: 0x97,
                value: vec![1],
            });
        let bytes = Packet::new(opcode::PUT_FINAL, headers.clone())
            .encode(u16::MAX)
            .unwrap();
        let decoded = read_request(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded.headers, headers);
        assert_eq!(decoded.headers.body(), b"Hello!");
        assert!(decoded.headers.has_end_of_body());
        assert_eq!(decoded.headers.media_type(), Some("text"));
    }

    #[test]
    fn test_truncated_header_is_rejected() {
        // Name header claims 9 bytes but only 5 follow.
        let err = parse_headers(&[0x01, 0x00, 0x09, 0x00, b'H']).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                expected: 9,
                actual: 5
            }
        );
        let err = parse_headers(&[0x48, 0x00, 0x01]).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidHeaderLength(0x48));
    }

    #[test]
    fn test_odd_unicode_payload_is_rejected() {
        let err = parse_headers(&[0x01, 0x00, 0x04, 0x41]).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidText(0x01));
    }

    #[test]
    fn test_oversized_packet_is_refused() {
        let packet = Packet::new(
            opcode::PUT,
            HeaderSet::new().with(Header::Body(vec![0; 300])),
        );
        let err = packet.encode(MIN_PACKET_SIZE).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::PacketTooLarge {
                size: 306,
                max: MIN_PACKET_SIZE
            }
        );
    }

    #[test]
    fn test_response_packet_length_below_minimum() {
        let err = read_response(&mut Cursor::new(vec![0xA0, 0x00, 0x02]), false).unwrap_err();
        assert!(matches!(
            err,
            PushError::Protocol(ProtocolError::InvalidLength(2))
        ));
    }

    #[test]
    fn test_short_stream_is_transport_failure() {
        let err = read_response(&mut Cursor::new(vec![0xA0, 0x00, 0x08, 0x10]), true).unwrap_err();
        assert!(matches!(err, PushError::TransportFailure(_)));
    }

    #[test]
    fn test_response_codes() {
        assert!(ResponseCode::OK.is_success());
        assert!(ResponseCode::from_raw(0xAF).is_success());
        assert!(!ResponseCode::CONTINUE.is_success());
        assert!(!ResponseCode::FORBIDDEN.is_success());
        assert_eq!(ResponseCode::FORBIDDEN.to_string(), "Forbidden (0xC3)");
        assert_eq!(ResponseCode::from_raw(0xE0).to_string(), "Unknown (0xE0)");
    }
}
