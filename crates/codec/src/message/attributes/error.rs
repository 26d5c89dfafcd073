use bytes::{BufMut, BytesMut};
use num_enum::TryFromPrimitive;

use crate::Error as CodecError;

/// STUN/TURN error codes (RFC 8489 §18.3, RFC 8656 §19).
///
/// Discriminants are the wire encoding (class in the high byte, number in
/// the low byte of the second header word), not the decimal error code —
/// e.g. 486 (Allocation Quota Reached) is class 4 number 0x56, so `0x0456`.
#[repr(u16)]
#[derive(TryFromPrimitive, PartialEq, Eq, Copy, Clone, Debug)]
pub enum ErrorType {
    TryAlternate = 0x0300,
    BadRequest = 0x0400,
    Unauthorized = 0x0401,
    Forbidden = 0x0403,
    RequestTimedout = 0x0408,
    UnknownAttribute = 0x0414,
    AllocationMismatch = 0x0425,
    StaleNonce = 0x0426,
    AddressFamilyNotSupported = 0x0428,
    WrongCredentials = 0x0429,
    UnsupportedTransportProtocol = 0x042A,
    AllocationQuotaReached = 0x0456,
    ServerError = 0x0500,
    InsufficientCapacity = 0x0508,
}

impl From<ErrorType> for &'static str {
    fn from(val: ErrorType) -> Self {
        match val {
            ErrorType::TryAlternate => "Try Alternate",
            ErrorType::BadRequest => "Bad Request",
            ErrorType::Unauthorized => "Unauthorized",
            ErrorType::Forbidden => "Forbidden",
            ErrorType::RequestTimedout => "Request Timed out",
            ErrorType::UnknownAttribute => "Unknown Attribute",
            ErrorType::AllocationMismatch => "Allocation Mismatch",
            ErrorType::StaleNonce => "Stale Nonce",
            ErrorType::AddressFamilyNotSupported => "Address Family not Supported",
            ErrorType::WrongCredentials => "Wrong Credentials",
            ErrorType::UnsupportedTransportProtocol => "Unsupported Transport Protocol",
            ErrorType::AllocationQuotaReached => "Allocation Quota Reached",
            ErrorType::ServerError => "Server Error",
            ErrorType::InsufficientCapacity => "Insufficient Capacity",
        }
    }
}

/// The ERROR-CODE attribute value: a numeric code (300-699) plus a UTF-8
/// reason phrase, encoded as reserved(16) + class(8) + number(8) + phrase.
///
/// # Test
///
/// ```
/// use waf_edge_codec::message::attributes::{ErrorBody, ErrorType};
/// use bytes::BytesMut;
///
/// let buffer = [
///     0x00u8, 0x00, 0x03, 0x00, 0x54, 0x72, 0x79, 0x20, 0x41, 0x6c, 0x74, 0x65, 0x72, 0x6e, 0x61,
///     0x74, 0x65,
/// ];
///
/// let mut buf = BytesMut::with_capacity(32);
/// ErrorBody::from(ErrorType::TryAlternate).encode(&mut buf);
/// assert_eq!(&buf[..], &buffer);
/// ```
#[derive(Clone, Debug)]
pub struct ErrorBody<'a> {
    pub code: u16,
    pub message: &'a str,
}

impl ErrorBody<'_> {
    pub fn encode(self, buf: &mut BytesMut) {
        buf.put_u16(0x0000);
        buf.put_u16(self.code);
        buf.put(self.message.as_bytes());
    }

    /// # Test
    ///
    /// ```
    /// use waf_edge_codec::message::attributes::{ErrorBody, ErrorType};
    ///
    /// let buffer = [
    ///     0x00u8, 0x00, 0x03, 0x00, 0x54, 0x72, 0x79, 0x20, 0x41, 0x6c, 0x74, 0x65, 0x72, 0x6e, 0x61,
    ///     0x74, 0x65,
    /// ];
    ///
    /// let error = ErrorBody::decode(&buffer[..]).unwrap();
    /// assert_eq!(error.code, ErrorType::TryAlternate as u16);
    /// assert_eq!(error.message, "Try Alternate");
    /// ```
    pub fn decode(packet: &[u8]) -> Result<ErrorBody<'_>, CodecError> {
        if packet.len() < 4 || u16::from_be_bytes([packet[0], packet[1]]) != 0x0000 {
            return Err(CodecError::InvalidInput);
        }

        Ok(ErrorBody {
            code: u16::from_be_bytes([packet[2], packet[3]]),
            message: std::str::from_utf8(&packet[4..])?,
        })
    }
}

impl From<ErrorType> for ErrorBody<'_> {
    fn from(kind: ErrorType) -> Self {
        Self {
            code: kind as u16,
            message: kind.into(),
        }
    }
}

impl Eq for ErrorBody<'_> {}
impl PartialEq for ErrorBody<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}
