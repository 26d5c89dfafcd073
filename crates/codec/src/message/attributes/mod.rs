mod address;
mod error;

pub use address::Addr;
pub use crate::crypto::PasswordAlgorithm;
pub use error::{ErrorBody, ErrorType};

use std::net::SocketAddr;

use bytes::{BufMut, BytesMut};
use num_enum::TryFromPrimitive;

use crate::Error;

/// STUN/TURN attribute type registry (RFC 8489 §18.2, RFC 8656 §19).
#[repr(u16)]
#[derive(TryFromPrimitive, PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum AttributeType {
    MappedAddress = 0x0001,
    UserName = 0x0006,
    MessageIntegrity = 0x0008,
    ErrorCode = 0x0009,
    UnknownAttributes = 0x000A,
    ChannelNumber = 0x000C,
    Lifetime = 0x000D,
    XorPeerAddress = 0x0012,
    Data = 0x0013,
    Realm = 0x0014,
    Nonce = 0x0015,
    XorRelayedAddress = 0x0016,
    RequestedAddressFamily = 0x0017,
    EvenPort = 0x0018,
    RequestedTransport = 0x0019,
    DontFragment = 0x001A,
    MessageIntegritySha256 = 0x001C,
    PasswordAlgorithm = 0x001D,
    XorMappedAddress = 0x0020,
    ReservationToken = 0x0022,
    Software = 0x8022,
    Fingerprint = 0x8028,
    ResponseOrigin = 0x802B,
}

/// A STUN/TURN attribute codec: how to turn `Item` into bytes and back.
///
/// Implementors are marker types (zero-sized); the lifetime parameter ties
/// `Item` to the buffer a [`Message`](super::Message) was decoded from, so
/// string/byte-slice attributes can be read without copying.
pub trait Attribute<'a> {
    const TYPE: AttributeType;

    type Item;

    fn serialize(value: Self::Item, buf: &mut BytesMut, token: &[u8]);

    fn deserialize(buf: &'a [u8], token: &[u8]) -> Result<Self::Item, Error>;
}

macro_rules! utf8_attribute {
    ($name:ident, $kind:ident) => {
        pub struct $name;

        impl<'a> Attribute<'a> for $name {
            const TYPE: AttributeType = AttributeType::$kind;

            type Item = &'a str;

            fn serialize(value: Self::Item, buf: &mut BytesMut, _token: &[u8]) {
                buf.put(value.as_bytes());
            }

            fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
                Ok(std::str::from_utf8(buf)?)
            }
        }
    };
}

macro_rules! opaque_attribute {
    ($name:ident, $kind:ident) => {
        pub struct $name;

        impl<'a> Attribute<'a> for $name {
            const TYPE: AttributeType = AttributeType::$kind;

            type Item = &'a [u8];

            fn serialize(value: Self::Item, buf: &mut BytesMut, _token: &[u8]) {
                buf.put(value);
            }

            fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
                Ok(buf)
            }
        }
    };
}

macro_rules! address_attribute {
    ($name:ident, $kind:ident, $is_xor:expr) => {
        pub struct $name;

        impl<'a> Attribute<'a> for $name {
            const TYPE: AttributeType = AttributeType::$kind;

            type Item = SocketAddr;

            fn serialize(value: Self::Item, buf: &mut BytesMut, token: &[u8]) {
                Addr::encode(&value, token, buf, $is_xor)
            }

            fn deserialize(buf: &'a [u8], token: &[u8]) -> Result<Self::Item, Error> {
                Addr::decode(buf, token, $is_xor)
            }
        }
    };
}

/// Identifies the username/password pair used for the message-integrity check.
utf8_attribute!(UserName, UserName);
/// Long-term credential realm, present once long-term credentials are in use.
utf8_attribute!(Realm, Realm);
/// Server-issued nonce, echoed back by the client on the next request.
utf8_attribute!(Nonce, Nonce);
/// Free-text diagnostic identifying the implementation.
utf8_attribute!(Software, Software);

/// Application data carried by Send/Data indications.
opaque_attribute!(Data, Data);
/// HMAC-SHA1 digest over the message, keyed by an MD5 long-term-credential key.
opaque_attribute!(MessageIntegrity, MessageIntegrity);
/// HMAC-SHA256 digest over the message, keyed by a SHA-256 long-term-credential key.
opaque_attribute!(MessageIntegritySha256, MessageIntegritySha256);
/// Client-chosen reservation token echoed back unmodified.
opaque_attribute!(ReservationToken, ReservationToken);

/// Reflexive client address, obfuscated with the magic cookie/transaction id.
address_attribute!(XorMappedAddress, XorMappedAddress, true);
/// Address of the peer as seen from the TURN server.
address_attribute!(XorPeerAddress, XorPeerAddress, true);
/// Address/port allocated to the client on the relay.
address_attribute!(XorRelayedAddress, XorRelayedAddress, true);
/// RFC 3489-compatibility, unobfuscated reflexive address.
address_attribute!(MappedAddress, MappedAddress, false);
/// Source address/port the response was sent from; aids double-NAT detection.
address_attribute!(ResponseOrigin, ResponseOrigin, false);

/// Seconds remaining until an allocation/permission/binding expires.
pub struct Lifetime;
impl<'a> Attribute<'a> for Lifetime {
    const TYPE: AttributeType = AttributeType::Lifetime;

    type Item = u32;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _token: &[u8]) {
        buf.put_u32(value);
    }

    fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        Ok(u32::from_be_bytes(buf[..4].try_into()?))
    }
}

/// The channel number a ChannelBind request is installing, or a ChannelData
/// indication is framed under.
pub struct ChannelNumber;
impl<'a> Attribute<'a> for ChannelNumber {
    const TYPE: AttributeType = AttributeType::ChannelNumber;

    type Item = u16;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _token: &[u8]) {
        buf.put_u16(value);
        buf.put_u16(0);
    }

    fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        Ok(u16::from_be_bytes(buf[..2].try_into()?))
    }
}

/// CRC-32 of the message, XOR'ed with 0x5354554E.
pub struct Fingerprint;
impl<'a> Attribute<'a> for Fingerprint {
    const TYPE: AttributeType = AttributeType::Fingerprint;

    type Item = u32;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _token: &[u8]) {
        buf.put_u32(value);
    }

    fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        Ok(u32::from_be_bytes(buf[..4].try_into()?))
    }
}

/// Requested relay transport protocol. Only UDP (17) is defined by RFC 8656.
pub struct RequestedTransport;
impl<'a> Attribute<'a> for RequestedTransport {
    const TYPE: AttributeType = AttributeType::RequestedTransport;

    type Item = u8;

    fn serialize(_value: Self::Item, buf: &mut BytesMut, _token: &[u8]) {
        buf.put_u8(17);
        buf.put_u8(0);
        buf.put_u16(0);
    }

    fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        buf.first().copied().ok_or(Error::InvalidInput)
    }
}

/// ERROR-CODE: a numeric code plus reason phrase, carried on all error responses.
pub struct ErrorCode;
impl<'a> Attribute<'a> for ErrorCode {
    const TYPE: AttributeType = AttributeType::ErrorCode;

    type Item = ErrorBody<'a>;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _token: &[u8]) {
        value.encode(buf)
    }

    fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        ErrorBody::decode(buf)
    }
}

/// PASSWORD-ALGORITHM: which long-term-credential digest the client/server used.
pub struct PasswordAlgorithmAttr;
impl<'a> Attribute<'a> for PasswordAlgorithmAttr {
    const TYPE: AttributeType = AttributeType::PasswordAlgorithm;

    type Item = PasswordAlgorithm;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _token: &[u8]) {
        buf.put_u16(match value {
            PasswordAlgorithm::Md5 => 0x0001,
            PasswordAlgorithm::Sha256 => 0x0002,
        });
        buf.put_u16(0);
    }

    fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        match buf.get(0..2).map(|b| u16::from_be_bytes([b[0], b[1]])) {
            Some(0x0001) => Ok(PasswordAlgorithm::Md5),
            Some(0x0002) => Ok(PasswordAlgorithm::Sha256),
            _ => Err(Error::InvalidInput),
        }
    }
}

/// List of comprehension-required attribute types the server didn't understand.
pub struct UnknownAttributes;
impl<'a> Attribute<'a> for UnknownAttributes {
    const TYPE: AttributeType = AttributeType::UnknownAttributes;

    type Item = Vec<u16>;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _token: &[u8]) {
        for kind in value {
            buf.put_u16(kind);
        }
    }

    fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        Ok(buf.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect())
    }
}

/// Requests the server reserve the next higher port number for a subsequent
/// allocation; `true` pairs it with RESERVATION-TOKEN in the response.
pub struct EvenPort;
impl<'a> Attribute<'a> for EvenPort {
    const TYPE: AttributeType = AttributeType::EvenPort;

    type Item = bool;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _token: &[u8]) {
        buf.put_u8(if value { 0x80 } else { 0x00 });
    }

    fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        Ok(buf.first().map(|b| b & 0x80 != 0).unwrap_or(false))
    }
}

/// Flag attribute (zero-length value) asking the server to set DF on relayed
/// IPv4 packets.
pub struct DontFragment;
impl<'a> Attribute<'a> for DontFragment {
    const TYPE: AttributeType = AttributeType::DontFragment;

    type Item = ();

    fn serialize(_value: Self::Item, _buf: &mut BytesMut, _token: &[u8]) {}

    fn deserialize(_buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        Ok(())
    }
}
