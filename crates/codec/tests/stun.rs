use anyhow::Result;
use bytes::BytesMut;
use waf_edge_codec::{
    Attributes, DecodeResult, Decoder,
    crypto::{Password, PasswordAlgorithm, generate_password},
    message::{Message, MessageEncoder, attributes::*, methods::*},
};

#[test]
fn round_trips_an_allocate_response_with_integrity() -> Result<()> {
    let token: [u8; 12] = *b"ABCDEFGHIJKL";
    let password = generate_password("user1", "secret", "localhost", PasswordAlgorithm::Md5);

    let mut buf = BytesMut::with_capacity(128);
    let relayed: std::net::SocketAddr = "203.0.113.9:51000".parse()?;
    let mapped: std::net::SocketAddr = "198.51.100.2:4000".parse()?;

    {
        let mut message = MessageEncoder::new(ALLOCATE_RESPONSE, &token, &mut buf);
        message.append::<XorRelayedAddress>(relayed);
        message.append::<XorMappedAddress>(mapped);
        message.append::<Lifetime>(600);
        message.flush(Some(&password))?;
    }

    let decoded = match Decoder::default().decode(&buf)? {
        DecodeResult::Message(message) => message,
        DecodeResult::ChannelData(_) => panic!("expected a message"),
    };

    assert_eq!(decoded.method(), ALLOCATE_RESPONSE);
    assert_eq!(decoded.get::<XorRelayedAddress>(), Some(relayed));
    assert_eq!(decoded.get::<XorMappedAddress>(), Some(mapped));
    assert_eq!(decoded.get::<Lifetime>(), Some(600));
    decoded.checksum(&password)?;

    Ok(())
}

#[test]
fn rejects_integrity_after_tampering() -> Result<()> {
    let token: [u8; 12] = *b"MNOPQRSTUVWX";
    let password = generate_password("user1", "secret", "localhost", PasswordAlgorithm::Md5);

    let mut buf = BytesMut::with_capacity(64);
    {
        let mut message = MessageEncoder::new(BINDING_REQUEST, &token, &mut buf);
        message.flush(Some(&password))?;
    }

    // flip a byte inside the header, past the transaction id.
    buf[0] ^= 0xFF;

    let wrong_password = generate_password("user1", "not-it", "localhost", PasswordAlgorithm::Md5);
    let mut attributes = Attributes::default();
    let message = Message::decode(&buf, &mut attributes)?;
    assert!(message.checksum(&wrong_password).is_err());

    Ok(())
}

#[test]
fn error_response_carries_reason_phrase() -> Result<()> {
    let token: [u8; 12] = *b"ABCDEFGHIJKL";
    let mut buf = BytesMut::with_capacity(64);

    {
        let mut message = MessageEncoder::new(ALLOCATE_ERROR, &token, &mut buf);
        message.append::<ErrorCode>(ErrorBody::from(ErrorType::Unauthorized));
        message.append::<Realm>("localhost");
        message.append::<Nonce>("abc123");
        message.flush(None)?;
    }

    let mut attributes = Attributes::default();
    let message = Message::decode(&buf, &mut attributes)?;
    let error = message.get::<ErrorCode>().expect("error code present");

    assert_eq!(error.code, ErrorType::Unauthorized as u16);
    assert_eq!(error.message, "Unauthorized");
    assert_eq!(message.get::<Realm>(), Some("localhost"));
    assert_eq!(message.get::<Nonce>(), Some("abc123"));

    Ok(())
}

#[test]
fn channel_number_must_be_in_turn_range() {
    use waf_edge_codec::channel_data::ChannelData;

    let mut buf = BytesMut::with_capacity(16);
    ChannelData {
        number: 0x4000,
        bytes: &[1, 2, 3, 4],
    }
    .encode(&mut buf);
    assert!(ChannelData::decode(&buf).is_ok());

    let mut buf = BytesMut::with_capacity(16);
    ChannelData {
        number: 0x9000,
        bytes: &[1, 2, 3, 4],
    }
    .encode(&mut buf);
    assert!(ChannelData::decode(&buf).is_err());
}

#[test]
fn password_algorithm_selects_hash_width() {
    let md5 = generate_password("panda", "raspberry", "panda", PasswordAlgorithm::Md5);
    let sha256 = generate_password("panda", "raspberry", "panda", PasswordAlgorithm::Sha256);

    assert!(matches!(md5, Password::Md5(_)));
    assert!(matches!(sha256, Password::Sha256(_)));
}
