use std::net::{Ipv4Addr, SocketAddr};

use bytes::BytesMut;
use codec::{
    DecodeResult, Decoder,
    message::{
        Message, MessageEncoder,
        attributes::{Lifetime, RequestedTransport, UserName, XorPeerAddress, XorRelayedAddress},
        methods::{ALLOCATE_REQUEST, BINDING_REQUEST, BINDING_RESPONSE, CREATE_PERMISSION_REQUEST},
    },
};
use service::{Service, ServiceOptions, allocation::LifetimeBounds, router::Router, session::ports::PortRange};

fn test_service() -> Service {
    Service::new(ServiceOptions {
        port_range: PortRange::from(49500..49510),
        relay_bind_ip: Ipv4Addr::LOCALHOST.into(),
        external_ip: Ipv4Addr::LOCALHOST.into(),
        software: "waf-edge-test/0.1".to_string(),
        realm: "example.org".to_string(),
        turn_secret: "topsecret".to_string(),
        lifetime_bounds: LifetimeBounds::default(),
    })
}

fn client() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 40000))
}

fn interface() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 3478))
}

fn as_message(result: DecodeResult<'_>) -> Message<'_> {
    match result {
        DecodeResult::Message(message) => message,
        DecodeResult::ChannelData(_) => panic!("expected a STUN message"),
    }
}

#[tokio::test]
async fn binding_request_is_answered_without_authentication() {
    let mut router = Router::new(test_service(), interface());
    let token: [u8; 12] = *b"ABCDEFGHIJKL";
    let mut buf = BytesMut::with_capacity(64);
    {
        let mut message = MessageEncoder::new(BINDING_REQUEST, &token, &mut buf);
        message.flush(None).unwrap();
    }

    let outcome = router.route(&buf, client()).await.unwrap();
    let mut decoder = Decoder::default();
    let response = as_message(decoder.decode(outcome.bytes).unwrap());
    assert_eq!(response.method(), BINDING_RESPONSE);
}

#[tokio::test]
async fn allocate_without_credentials_is_rejected() {
    let mut router = Router::new(test_service(), interface());
    let token: [u8; 12] = *b"ABCDEFGHIJKL";
    let mut buf = BytesMut::with_capacity(64);
    {
        let mut message = MessageEncoder::new(ALLOCATE_REQUEST, &token, &mut buf);
        message.append::<RequestedTransport>(17);
        message.flush(None).unwrap();
    }

    let outcome = router.route(&buf, client()).await.unwrap();
    let mut decoder = Decoder::default();
    let response = as_message(decoder.decode(outcome.bytes).unwrap());
    assert!(response.method().error().is_some());
}

#[tokio::test]
async fn allocate_then_create_permission_succeeds_with_a_valid_credential() {
    let service = test_service();
    let password = service::auth::ephemeral_password(
        "alice",
        &service.turn_secret,
        &service.realm,
        codec::crypto::PasswordAlgorithm::Md5,
    );

    let mut router = Router::new(service, interface());

    let allocate_token: [u8; 12] = *b"ABCDEFGHIJKL";
    let mut allocate_buf = BytesMut::with_capacity(128);
    {
        let mut message = MessageEncoder::new(ALLOCATE_REQUEST, &allocate_token, &mut allocate_buf);
        message.append::<RequestedTransport>(17);
        message.append::<UserName>("alice");
        message.append::<Lifetime>(120);
        message.flush(Some(&password)).unwrap();
    }

    let allocate_outcome = router.route(&allocate_buf, client()).await.unwrap();
    let mut allocate_decoder = Decoder::default();
    let allocate_response = as_message(allocate_decoder.decode(allocate_outcome.bytes).unwrap());
    assert!(allocate_response.method().error().is_none());
    assert!(allocate_response.get::<XorRelayedAddress>().is_some());

    let permission_token: [u8; 12] = *b"MNOPQRSTUVWX";
    let mut permission_buf = BytesMut::with_capacity(128);
    let peer = SocketAddr::from((Ipv4Addr::new(198, 51, 100, 4), 9));
    {
        let mut message =
            MessageEncoder::new(CREATE_PERMISSION_REQUEST, &permission_token, &mut permission_buf);
        message.append::<UserName>("alice");
        message.append::<XorPeerAddress>(peer);
        message.flush(Some(&password)).unwrap();
    }

    let permission_outcome = router.route(&permission_buf, client()).await.unwrap();
    let mut permission_decoder = Decoder::default();
    let permission_response = as_message(permission_decoder.decode(permission_outcome.bytes).unwrap());
    assert!(permission_response.method().error().is_none());
}
