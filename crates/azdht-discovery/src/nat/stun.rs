//! STUN Message Codec (RFC 3489)
//!
//! Encodes and decodes classic STUN messages: a 20 byte header carrying the
//! message type, the attribute section length and a 128-bit transaction ID,
//! followed by type-length-value attributes.
//!
//! Only IPv4 address attributes are understood. Attribute records are walked
//! strictly by their declared length, and the walk must land exactly on the
//! end of the attribute section declared in the header.

use rand::RngCore;
use rand::rngs::OsRng;
use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;

/// STUN message header size (20 bytes)
pub const HEADER_SIZE: usize = 20;

/// Transaction ID length (RFC 3489 uses a full 128-bit identifier)
pub const TRANSACTION_ID_LEN: usize = 16;

/// Well-known STUN service port
pub const DEFAULT_STUN_PORT: u16 = 3478;

/// Address attribute value length: pad, family, port, IPv4 address
const ADDRESS_VALUE_LEN: usize = 8;

/// Attribute record header: type (2) + length (2)
const ATTR_HEADER_SIZE: usize = 4;

/// Address family code for IPv4
const FAMILY_IPV4: u8 = 0x01;

/// CHANGE-REQUEST flag bits
const CHANGE_IP_FLAG: u32 = 0x04;
const CHANGE_PORT_FLAG: u32 = 0x02;

/// Attribute type codes
pub mod attr {
    /// MAPPED-ADDRESS
    pub const MAPPED_ADDRESS: u16 = 0x0001;
    /// RESPONSE-ADDRESS
    pub const RESPONSE_ADDRESS: u16 = 0x0002;
    /// CHANGE-REQUEST
    pub const CHANGE_REQUEST: u16 = 0x0003;
    /// SOURCE-ADDRESS
    pub const SOURCE_ADDRESS: u16 = 0x0004;
    /// CHANGED-ADDRESS
    pub const CHANGED_ADDRESS: u16 = 0x0005;
    /// ERROR-CODE
    pub const ERROR_CODE: u16 = 0x0009;
    /// REFLECTED-FROM
    pub const REFLECTED_FROM: u16 = 0x000b;
    /// XOR-MAPPED-ADDRESS (RFC 5389 code)
    pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
    /// XOR-MAPPED-ADDRESS (pre-RFC 5389 drafts)
    pub const XOR_MAPPED_ADDRESS_DRAFT: u16 = 0x8020;
    /// SERVER
    pub const SERVER: u16 = 0x8022;
    /// ALTERNATE-SERVER
    pub const ALTERNATE_SERVER: u16 = 0x8023;
}

/// 128-bit STUN transaction ID
pub type TransactionId = [u8; TRANSACTION_ID_LEN];

/// Generate a fresh transaction ID from the OS random source
#[must_use]
pub fn random_transaction_id() -> TransactionId {
    let mut id = [0u8; TRANSACTION_ID_LEN];
    OsRng.fill_bytes(&mut id);
    id
}

/// STUN message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunMessageType {
    /// Binding Request (0x0001)
    BindingRequest,
    /// Binding Response (0x0101)
    BindingResponse,
    /// Binding Error Response (0x0111)
    BindingErrorResponse,
    /// Shared Secret Request (0x0002)
    SharedSecretRequest,
    /// Shared Secret Response (0x0102)
    SharedSecretResponse,
    /// Shared Secret Error Response (0x0112)
    SharedSecretErrorResponse,
    /// Any other type code
    Other(u16),
}

impl StunMessageType {
    /// Wire value of this message type
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::BindingRequest => 0x0001,
            Self::BindingResponse => 0x0101,
            Self::BindingErrorResponse => 0x0111,
            Self::SharedSecretRequest => 0x0002,
            Self::SharedSecretResponse => 0x0102,
            Self::SharedSecretErrorResponse => 0x0112,
            Self::Other(value) => value,
        }
    }

    /// Parse a wire value
    #[must_use]
    pub const fn from_u16(value: u16) -> Self {
        match value {
            0x0001 => Self::BindingRequest,
            0x0101 => Self::BindingResponse,
            0x0111 => Self::BindingErrorResponse,
            0x0002 => Self::SharedSecretRequest,
            0x0102 => Self::SharedSecretResponse,
            0x0112 => Self::SharedSecretErrorResponse,
            other => Self::Other(other),
        }
    }
}

/// Decoded STUN attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StunAttribute {
    /// Address the server saw the request arrive from
    MappedAddress(SocketAddrV4),
    /// Where the response should be sent
    ResponseAddress(SocketAddrV4),
    /// Ask the server to answer from a different IP and/or port
    ChangeRequest {
        /// Answer from the alternate IP
        change_ip: bool,
        /// Answer from the alternate port
        change_port: bool,
    },
    /// Address the response was sent from
    SourceAddress(SocketAddrV4),
    /// Alternate address the server would answer from on a change request
    ChangedAddress(SocketAddrV4),
    /// Error response code and reason phrase
    ErrorCode {
        /// Numeric code (class * 100 + number)
        code: u16,
        /// Reason phrase
        reason: String,
    },
    /// Identity of the requester when RESPONSE-ADDRESS was used
    ReflectedFrom(SocketAddrV4),
    /// Mapped address obfuscated with the transaction ID prefix
    XorMappedAddress(SocketAddrV4),
    /// Server software description
    Server(String),
    /// Alternate server to retry against
    AlternateServer(SocketAddrV4),
}

impl StunAttribute {
    /// Attribute type code
    fn attr_type(&self) -> u16 {
        match self {
            Self::MappedAddress(_) => attr::MAPPED_ADDRESS,
            Self::ResponseAddress(_) => attr::RESPONSE_ADDRESS,
            Self::ChangeRequest { .. } => attr::CHANGE_REQUEST,
            Self::SourceAddress(_) => attr::SOURCE_ADDRESS,
            Self::ChangedAddress(_) => attr::CHANGED_ADDRESS,
            Self::ErrorCode { .. } => attr::ERROR_CODE,
            Self::ReflectedFrom(_) => attr::REFLECTED_FROM,
            Self::XorMappedAddress(_) => attr::XOR_MAPPED_ADDRESS,
            Self::Server(_) => attr::SERVER,
            Self::AlternateServer(_) => attr::ALTERNATE_SERVER,
        }
    }

    /// Encode attribute (type, length, value) to bytes
    fn encode(&self, transaction_id: &TransactionId) -> Vec<u8> {
        let value = self.encode_value(transaction_id);

        let mut bytes = Vec::with_capacity(ATTR_HEADER_SIZE + value.len());
        bytes.extend_from_slice(&self.attr_type().to_be_bytes());
        bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&value);
        bytes
    }

    fn encode_value(&self, transaction_id: &TransactionId) -> Vec<u8> {
        match self {
            Self::MappedAddress(addr)
            | Self::ResponseAddress(addr)
            | Self::SourceAddress(addr)
            | Self::ChangedAddress(addr)
            | Self::ReflectedFrom(addr)
            | Self::AlternateServer(addr) => encode_address(*addr).to_vec(),
            Self::XorMappedAddress(addr) => {
                let xored = xor_address(*addr, transaction_id);
                encode_address(xored).to_vec()
            }
            Self::ChangeRequest {
                change_ip,
                change_port,
            } => {
                let mut flags = 0u32;
                if *change_ip {
                    flags |= CHANGE_IP_FLAG;
                }
                if *change_port {
                    flags |= CHANGE_PORT_FLAG;
                }
                flags.to_be_bytes().to_vec()
            }
            Self::ErrorCode { code, reason } => {
                let mut value = vec![0, 0, (code / 100) as u8 & 0x07, (code % 100) as u8];
                value.extend_from_slice(reason.as_bytes());
                value
            }
            Self::Server(name) => name.as_bytes().to_vec(),
        }
    }

    /// Decode one attribute value.
    ///
    /// Returns `Ok(None)` for attribute types this codec does not handle.
    fn decode(
        attr_type: u16,
        value: &[u8],
        transaction_id: &TransactionId,
    ) -> Result<Option<Self>, StunError> {
        let attribute = match attr_type {
            attr::MAPPED_ADDRESS => Self::MappedAddress(decode_address(attr_type, value)?),
            attr::RESPONSE_ADDRESS => Self::ResponseAddress(decode_address(attr_type, value)?),
            attr::SOURCE_ADDRESS => Self::SourceAddress(decode_address(attr_type, value)?),
            attr::CHANGED_ADDRESS => Self::ChangedAddress(decode_address(attr_type, value)?),
            attr::REFLECTED_FROM => Self::ReflectedFrom(decode_address(attr_type, value)?),
            attr::ALTERNATE_SERVER => Self::AlternateServer(decode_address(attr_type, value)?),
            attr::XOR_MAPPED_ADDRESS | attr::XOR_MAPPED_ADDRESS_DRAFT => {
                let xored = decode_address(attr_type, value)?;
                Self::XorMappedAddress(xor_address(xored, transaction_id))
            }
            attr::CHANGE_REQUEST => {
                let flags: [u8; 4] = value
                    .try_into()
                    .map_err(|_| StunError::InvalidAttribute(attr_type))?;
                let flags = u32::from_be_bytes(flags);
                Self::ChangeRequest {
                    change_ip: flags & CHANGE_IP_FLAG != 0,
                    change_port: flags & CHANGE_PORT_FLAG != 0,
                }
            }
            attr::ERROR_CODE => {
                if value.len() < 4 {
                    return Err(StunError::InvalidAttribute(attr_type));
                }
                let code = u16::from(value[2] & 0x07) * 100 + u16::from(value[3]);
                let reason = decode_string(&value[4..]);
                Self::ErrorCode { code, reason }
            }
            attr::SERVER => Self::Server(decode_string(value)),
            _ => return Ok(None),
        };

        Ok(Some(attribute))
    }
}

/// Encode an IPv4 address attribute value
fn encode_address(addr: SocketAddrV4) -> [u8; ADDRESS_VALUE_LEN] {
    let mut value = [0u8; ADDRESS_VALUE_LEN];
    value[1] = FAMILY_IPV4;
    value[2..4].copy_from_slice(&addr.port().to_be_bytes());
    value[4..8].copy_from_slice(&addr.ip().octets());
    value
}

/// Decode an IPv4 address attribute value
fn decode_address(attr_type: u16, value: &[u8]) -> Result<SocketAddrV4, StunError> {
    if value.len() != ADDRESS_VALUE_LEN {
        return Err(StunError::InvalidAddressLength {
            attr_type,
            len: value.len(),
        });
    }

    let family = value[1];
    if family != FAMILY_IPV4 {
        return Err(StunError::UnsupportedFamily(family));
    }

    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = Ipv4Addr::new(value[4], value[5], value[6], value[7]);
    Ok(SocketAddrV4::new(ip, port))
}

/// XOR an address with the first four bytes of the transaction ID.
///
/// For RFC 5389 peers those bytes are the magic cookie, so one routine serves
/// both generations of the protocol. The operation is its own inverse.
fn xor_address(addr: SocketAddrV4, transaction_id: &TransactionId) -> SocketAddrV4 {
    let key = &transaction_id[..4];
    let port = addr.port() ^ u16::from_be_bytes([key[0], key[1]]);
    let mut octets = addr.ip().octets();
    for (octet, k) in octets.iter_mut().zip(key) {
        *octet ^= k;
    }
    SocketAddrV4::new(Ipv4Addr::from(octets), port)
}

/// Decode a text attribute, dropping trailing NUL padding
fn decode_string(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches('\0')
        .to_string()
}

/// Encode a bare 20 byte header with an empty attribute section
#[must_use]
pub fn encode_stun_header(
    message_type: StunMessageType,
    transaction_id: &TransactionId,
) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..2].copy_from_slice(&message_type.as_u16().to_be_bytes());
    // header[2..4] stays zero until attributes are appended
    header[4..HEADER_SIZE].copy_from_slice(transaction_id);
    header
}

/// STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    /// Message type
    pub message_type: StunMessageType,
    /// Transaction ID (128 bits)
    pub transaction_id: TransactionId,
    /// Attributes in wire order
    pub attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// Create an empty message of the given type
    #[must_use]
    pub fn new(message_type: StunMessageType, transaction_id: TransactionId) -> Self {
        Self {
            message_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Create a Binding Request with a fresh random transaction ID
    #[must_use]
    pub fn binding_request() -> Self {
        Self::new(StunMessageType::BindingRequest, random_transaction_id())
    }

    /// Create a Binding Request carrying a CHANGE-REQUEST attribute
    #[must_use]
    pub fn change_request(change_ip: bool, change_port: bool) -> Self {
        let mut msg = Self::binding_request();
        msg.add_attribute(StunAttribute::ChangeRequest {
            change_ip,
            change_port,
        });
        msg
    }

    /// Add an attribute to the message
    pub fn add_attribute(&mut self, attr: StunAttribute) {
        self.attributes.push(attr);
    }

    /// Encode message to bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = encode_stun_header(self.message_type, &self.transaction_id).to_vec();

        for attr in &self.attributes {
            bytes.extend_from_slice(&attr.encode(&self.transaction_id));
        }

        let attr_length = (bytes.len() - HEADER_SIZE) as u16;
        bytes[2..4].copy_from_slice(&attr_length.to_be_bytes());

        bytes
    }

    /// Decode message from bytes
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the header is short, the attribute section
    /// is truncated, a record overruns the section, or an address attribute
    /// is malformed.
    pub fn decode(bytes: &[u8]) -> Result<Self, StunError> {
        if bytes.len() < HEADER_SIZE {
            return Err(StunError::MessageTooShort(bytes.len()));
        }

        let message_type = StunMessageType::from_u16(u16::from_be_bytes([bytes[0], bytes[1]]));
        let declared = usize::from(u16::from_be_bytes([bytes[2], bytes[3]]));

        let mut transaction_id = [0u8; TRANSACTION_ID_LEN];
        transaction_id.copy_from_slice(&bytes[4..HEADER_SIZE]);

        let mut section = bytes
            .get(HEADER_SIZE..HEADER_SIZE + declared)
            .ok_or(StunError::Truncated {
                declared,
                available: bytes.len() - HEADER_SIZE,
            })?;

        let mut attributes = Vec::new();
        while !section.is_empty() {
            if section.len() < ATTR_HEADER_SIZE {
                return Err(StunError::AttributeOverrun {
                    remaining: section.len(),
                });
            }

            let attr_type = u16::from_be_bytes([section[0], section[1]]);
            let attr_len = usize::from(u16::from_be_bytes([section[2], section[3]]));
            let end = ATTR_HEADER_SIZE + attr_len;

            let value = section
                .get(ATTR_HEADER_SIZE..end)
                .ok_or(StunError::AttributeOverrun {
                    remaining: section.len(),
                })?;

            match StunAttribute::decode(attr_type, value, &transaction_id)? {
                Some(attr) => attributes.push(attr),
                None => tracing::trace!("skipping STUN attribute 0x{attr_type:04x} ({attr_len} bytes)"),
            }

            section = &section[end..];
        }

        Ok(Self {
            message_type,
            transaction_id,
            attributes,
        })
    }

    fn find_address(&self, pick: impl Fn(&StunAttribute) -> Option<SocketAddrV4>) -> Option<SocketAddrV4> {
        self.attributes.iter().find_map(pick)
    }

    /// MAPPED-ADDRESS attribute
    #[must_use]
    pub fn mapped_address(&self) -> Option<SocketAddrV4> {
        self.find_address(|attr| match attr {
            StunAttribute::MappedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// XOR-MAPPED-ADDRESS attribute
    #[must_use]
    pub fn xor_mapped_address(&self) -> Option<SocketAddrV4> {
        self.find_address(|attr| match attr {
            StunAttribute::XorMappedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// MAPPED-ADDRESS, falling back to XOR-MAPPED-ADDRESS
    #[must_use]
    pub fn reflexive_address(&self) -> Option<SocketAddrV4> {
        self.mapped_address().or_else(|| self.xor_mapped_address())
    }

    /// CHANGED-ADDRESS attribute
    #[must_use]
    pub fn changed_address(&self) -> Option<SocketAddrV4> {
        self.find_address(|attr| match attr {
            StunAttribute::ChangedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// SOURCE-ADDRESS attribute
    #[must_use]
    pub fn source_address(&self) -> Option<SocketAddrV4> {
        self.find_address(|attr| match attr {
            StunAttribute::SourceAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// RESPONSE-ADDRESS attribute
    #[must_use]
    pub fn response_address(&self) -> Option<SocketAddrV4> {
        self.find_address(|attr| match attr {
            StunAttribute::ResponseAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// REFLECTED-FROM attribute
    #[must_use]
    pub fn reflected_from(&self) -> Option<SocketAddrV4> {
        self.find_address(|attr| match attr {
            StunAttribute::ReflectedFrom(addr) => Some(*addr),
            _ => None,
        })
    }

    /// ALTERNATE-SERVER attribute
    #[must_use]
    pub fn alternate_server(&self) -> Option<SocketAddrV4> {
        self.find_address(|attr| match attr {
            StunAttribute::AlternateServer(addr) => Some(*addr),
            _ => None,
        })
    }

    /// CHANGE-REQUEST flags as `(change_ip, change_port)`
    #[must_use]
    pub fn change_flags(&self) -> Option<(bool, bool)> {
        self.attributes.iter().find_map(|attr| match attr {
            StunAttribute::ChangeRequest {
                change_ip,
                change_port,
            } => Some((*change_ip, *change_port)),
            _ => None,
        })
    }

    /// SERVER attribute
    #[must_use]
    pub fn server(&self) -> Option<&str> {
        self.attributes.iter().find_map(|attr| match attr {
            StunAttribute::Server(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// ERROR-CODE attribute as `(code, reason)`
    #[must_use]
    pub fn error_code(&self) -> Option<(u16, &str)> {
        self.attributes.iter().find_map(|attr| match attr {
            StunAttribute::ErrorCode { code, reason } => Some((*code, reason.as_str())),
            _ => None,
        })
    }
}

/// STUN error types
#[derive(Debug, Error)]
pub enum StunError {
    /// Socket send or receive failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Retransmission budget exhausted without a valid response
    #[error("STUN query timeout")]
    Timeout,

    /// Exchange aborted by the cancellation token
    #[error("STUN exchange cancelled")]
    Cancelled,

    /// Datagram shorter than the fixed header
    #[error("STUN message too short: {0} bytes")]
    MessageTooShort(usize),

    /// Attribute section shorter than the header declares
    #[error("STUN message truncated: header declares {declared} attribute bytes, {available} present")]
    Truncated {
        /// Declared attribute section length
        declared: usize,
        /// Bytes actually present after the header
        available: usize,
    },

    /// Attribute record runs past the end of the attribute section
    #[error("STUN attribute overruns message ({remaining} bytes left in section)")]
    AttributeOverrun {
        /// Bytes left in the section when the overrun was detected
        remaining: usize,
    },

    /// Address attribute value is not exactly 8 bytes
    #[error("STUN address attribute 0x{attr_type:04x} has length {len}, expected 8")]
    InvalidAddressLength {
        /// Attribute type
        attr_type: u16,
        /// Declared value length
        len: usize,
    },

    /// Address family other than IPv4
    #[error("unsupported STUN address family 0x{0:02x}")]
    UnsupportedFamily(u8),

    /// Malformed non-address attribute
    #[error("invalid STUN attribute 0x{0:04x}")]
    InvalidAttribute(u16),

    /// Response transaction ID differs from the request
    #[error("Transaction ID mismatch")]
    TransactionMismatch,

    /// Zero-length datagram received
    #[error("empty STUN response")]
    EmptyResponse,

    /// Server answered with a Binding Error Response
    #[error("STUN error response (code {0:?})")]
    ErrorResponse(Option<u16>),

    /// Server answered with something other than a Binding Response
    #[error("unexpected STUN message type 0x{0:04x}")]
    UnexpectedMessageType(u16),

    /// Response lacks a mapped address
    #[error("Missing required STUN attribute")]
    MissingAttribute,
}

impl StunError {
    /// Whether this error is a protocol violation (as opposed to I/O,
    /// timeout or cancellation)
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Timeout | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(attrs: &[u8], transaction_id: &TransactionId) -> Vec<u8> {
        let mut bytes =
            encode_stun_header(StunMessageType::BindingResponse, transaction_id).to_vec();
        bytes[2..4].copy_from_slice(&(attrs.len() as u16).to_be_bytes());
        bytes.extend_from_slice(attrs);
        bytes
    }

    #[test]
    fn test_message_type_codes() {
        assert_eq!(StunMessageType::BindingRequest.as_u16(), 0x0001);
        assert_eq!(StunMessageType::BindingResponse.as_u16(), 0x0101);
        assert_eq!(StunMessageType::BindingErrorResponse.as_u16(), 0x0111);
        assert_eq!(
            StunMessageType::from_u16(0x0111),
            StunMessageType::BindingErrorResponse
        );
        assert_eq!(
            StunMessageType::from_u16(0x0abc),
            StunMessageType::Other(0x0abc)
        );
    }

    #[test]
    fn test_binding_request_is_twenty_bytes() {
        let msg = StunMessage::binding_request();
        let encoded = msg.encode();

        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(&encoded[0..2], &[0x00, 0x01]);
        assert_eq!(&encoded[2..4], &[0x00, 0x00]);
        assert_eq!(&encoded[4..], &msg.transaction_id);
    }

    #[test]
    fn test_header_matches_full_encoder() {
        let txid = [7u8; TRANSACTION_ID_LEN];
        let header = encode_stun_header(StunMessageType::BindingRequest, &txid);
        let full = StunMessage::new(StunMessageType::BindingRequest, txid).encode();
        assert_eq!(header.to_vec(), full);
    }

    #[test]
    fn test_decode_mapped_address_response() {
        let txid = [0x5au8; TRANSACTION_ID_LEN];
        let attrs = [
            0x00, 0x01, 0x00, 0x08, // MAPPED-ADDRESS, len 8
            0x00, 0x01, 0x9c, 0x40, // pad, IPv4, port 40000
            203, 0, 113, 5,
        ];
        let bytes = response_with(&attrs, &txid);
        assert_eq!(bytes.len(), 32);

        let msg = StunMessage::decode(&bytes).unwrap();
        assert_eq!(msg.message_type, StunMessageType::BindingResponse);
        assert_eq!(msg.transaction_id, txid);
        assert_eq!(
            msg.mapped_address(),
            Some("203.0.113.5:40000".parse().unwrap())
        );
    }

    #[test]
    fn test_decode_rejects_short_address_attribute() {
        let txid = [1u8; TRANSACTION_ID_LEN];
        let attrs = [0x00, 0x01, 0x00, 0x04, 0x00, 0x01, 0x9c, 0x40];
        let result = StunMessage::decode(&response_with(&attrs, &txid));

        assert!(matches!(
            result,
            Err(StunError::InvalidAddressLength {
                attr_type: attr::MAPPED_ADDRESS,
                len: 4
            })
        ));
    }

    #[test]
    fn test_decode_rejects_ipv6_family() {
        let txid = [1u8; TRANSACTION_ID_LEN];
        let attrs = [0x00, 0x05, 0x00, 0x08, 0x00, 0x02, 0x00, 0x50, 1, 2, 3, 4];
        let result = StunMessage::decode(&response_with(&attrs, &txid));
        assert!(matches!(result, Err(StunError::UnsupportedFamily(0x02))));
    }

    #[test]
    fn test_decode_skips_unknown_attributes() {
        let txid = [2u8; TRANSACTION_ID_LEN];
        let attrs = [
            0x7f, 0x00, 0x00, 0x03, 0xaa, 0xbb, 0xcc, // unknown, 3 bytes
            0x00, 0x01, 0x00, 0x08, 0x00, 0x01, 0x13, 0x88, 192, 0, 2, 10,
        ];
        let msg = StunMessage::decode(&response_with(&attrs, &txid)).unwrap();

        assert_eq!(msg.attributes.len(), 1);
        assert_eq!(msg.mapped_address(), Some("192.0.2.10:5000".parse().unwrap()));
    }

    #[test]
    fn test_decode_rejects_attribute_overrun() {
        let txid = [3u8; TRANSACTION_ID_LEN];
        // Declares 12 value bytes but the section holds only 8
        let attrs = [0x80, 0x22, 0x00, 0x0c, b'a', b'b', b'c', b'd'];
        let result = StunMessage::decode(&response_with(&attrs, &txid));
        assert!(matches!(result, Err(StunError::AttributeOverrun { .. })));
    }

    #[test]
    fn test_decode_rejects_trailing_garbage_in_section() {
        let txid = [3u8; TRANSACTION_ID_LEN];
        let attrs = [
            0x00, 0x01, 0x00, 0x08, 0x00, 0x01, 0x13, 0x88, 192, 0, 2, 10, 0xff, 0xff,
        ];
        let result = StunMessage::decode(&response_with(&attrs, &txid));
        assert!(matches!(
            result,
            Err(StunError::AttributeOverrun { remaining: 2 })
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_section() {
        let txid = [4u8; TRANSACTION_ID_LEN];
        let mut bytes = response_with(&[], &txid);
        bytes[2..4].copy_from_slice(&12u16.to_be_bytes());

        let result = StunMessage::decode(&bytes);
        assert!(matches!(
            result,
            Err(StunError::Truncated {
                declared: 12,
                available: 0
            })
        ));
    }

    #[test]
    fn test_decode_ignores_bytes_after_section() {
        let txid = [4u8; TRANSACTION_ID_LEN];
        let mut bytes = response_with(&[], &txid);
        bytes.extend_from_slice(&[0x00, 0x01, 0x00, 0x08]);

        let msg = StunMessage::decode(&bytes).unwrap();
        assert!(msg.attributes.is_empty());
    }

    #[test]
    fn test_decode_error_too_short() {
        let result = StunMessage::decode(&[0u8; 10]);
        assert!(matches!(result, Err(StunError::MessageTooShort(10))));
    }

    #[test]
    fn test_xor_mapped_address_roundtrip() {
        let addr: SocketAddrV4 = "198.51.100.9:33000".parse().unwrap();
        let mut txid = [0x11u8; TRANSACTION_ID_LEN];
        txid[..4].copy_from_slice(&[0x21, 0x12, 0xa4, 0x42]);

        let mut msg = StunMessage::new(StunMessageType::BindingResponse, txid);
        msg.add_attribute(StunAttribute::XorMappedAddress(addr));
        let encoded = msg.encode();

        // The wire value must not carry the plain address
        assert_ne!(&encoded[26..28], &addr.port().to_be_bytes());

        let decoded = StunMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.xor_mapped_address(), Some(addr));
        assert_eq!(decoded.reflexive_address(), Some(addr));
    }

    #[test]
    fn test_change_request_flags() {
        let msg = StunMessage::change_request(false, true);
        let decoded = StunMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.change_flags(), Some((false, true)));
        assert_eq!(msg.encode().len(), HEADER_SIZE + 8);
    }

    #[test]
    fn test_error_code_and_server_attributes() {
        let txid = random_transaction_id();
        let mut msg = StunMessage::new(StunMessageType::BindingErrorResponse, txid);
        msg.add_attribute(StunAttribute::ErrorCode {
            code: 420,
            reason: "Unknown Attribute".to_string(),
        });
        msg.add_attribute(StunAttribute::Server("azdht-test".to_string()));

        let decoded = StunMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.message_type, StunMessageType::BindingErrorResponse);
        assert_eq!(decoded.error_code(), Some((420, "Unknown Attribute")));
        assert_eq!(decoded.server(), Some("azdht-test"));
    }

    #[test]
    fn test_server_attribute_strips_nul_padding() {
        let txid = [9u8; TRANSACTION_ID_LEN];
        let attrs = [0x80, 0x22, 0x00, 0x08, b'v', b'o', b'v', b'i', b'd', 0, 0, 0];
        let msg = StunMessage::decode(&response_with(&attrs, &txid)).unwrap();
        assert_eq!(msg.server(), Some("vovid"));
    }

    #[test]
    fn test_all_address_attributes_decode() {
        let txid = random_transaction_id();
        let a: SocketAddrV4 = "192.0.2.1:1".parse().unwrap();
        let b: SocketAddrV4 = "192.0.2.2:2".parse().unwrap();
        let c: SocketAddrV4 = "192.0.2.3:3".parse().unwrap();
        let d: SocketAddrV4 = "192.0.2.4:4".parse().unwrap();
        let e: SocketAddrV4 = "192.0.2.5:5".parse().unwrap();

        let mut msg = StunMessage::new(StunMessageType::BindingResponse, txid);
        msg.add_attribute(StunAttribute::ResponseAddress(a));
        msg.add_attribute(StunAttribute::SourceAddress(b));
        msg.add_attribute(StunAttribute::ChangedAddress(c));
        msg.add_attribute(StunAttribute::ReflectedFrom(d));
        msg.add_attribute(StunAttribute::AlternateServer(e));

        let decoded = StunMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.response_address(), Some(a));
        assert_eq!(decoded.source_address(), Some(b));
        assert_eq!(decoded.changed_address(), Some(c));
        assert_eq!(decoded.reflected_from(), Some(d));
        assert_eq!(decoded.alternate_server(), Some(e));
        assert_eq!(decoded.mapped_address(), None);
    }

    #[test]
    fn test_stun_error_is_protocol() {
        assert!(StunError::TransactionMismatch.is_protocol());
        assert!(StunError::UnsupportedFamily(2).is_protocol());
        assert!(StunError::ErrorResponse(Some(400)).is_protocol());
        assert!(StunError::MissingAttribute.is_protocol());
        assert!(!StunError::Timeout.is_protocol());
        assert!(!StunError::Cancelled.is_protocol());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(!StunError::from(io).is_protocol());
    }

    #[test]
    fn test_random_transaction_ids_differ() {
        assert_ne!(random_transaction_id(), random_transaction_id());
    }
}
