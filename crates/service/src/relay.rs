use std::net::SocketAddr;

use bytes::BytesMut;
use codec::{
    channel_data::ChannelData,
    message::{
        MessageEncoder,
        attributes::{Data, XorPeerAddress},
        methods::DATA_INDICATION,
    },
};
use rand::Rng;

use crate::allocation::Allocation;

/// Builds the frame to forward a peer→client datagram that arrived on an
/// allocation's relay socket: ChannelData if the peer has a channel
/// binding, otherwise a DATA indication naming the peer.
pub fn frame_from_peer<'a>(
    allocation: &Allocation,
    peer: SocketAddr,
    payload: &[u8],
    out: &'a mut BytesMut,
) -> &'a [u8] {
    if let Some(channel) = allocation.channel_for_peer(peer) {
        ChannelData {
            number: channel,
            bytes: payload,
        }
        .encode(out);
    } else {
        let token: [u8; 12] = rand::rng().random();
        let mut encoder = MessageEncoder::new(DATA_INDICATION, &token, out);
        encoder.append::<XorPeerAddress>(peer);
        encoder.append::<Data>(payload);
        let _ = encoder.flush(None);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{
        DecodeResult, Decoder,
        crypto::{PasswordAlgorithm, generate_password},
        message::attributes::{Data, XorPeerAddress},
    };
    use std::{net::Ipv4Addr, sync::Arc};
    use tokio::{net::UdpSocket, time::Instant};

    async fn test_allocation() -> Allocation {
        let socket = Arc::new(UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap());
        Allocation::new(
            crate::session::Identifier {
                source: "127.0.0.1:1".parse().unwrap(),
                interface: "127.0.0.1:3478".parse().unwrap(),
            },
            "a".into(),
            generate_password("a", "x", "r", PasswordAlgorithm::Md5),
            socket,
            0,
            Instant::now() + std::time::Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn frames_as_channel_data_when_a_binding_exists() {
        let allocation = test_allocation().await;
        let peer: SocketAddr = "198.51.100.4:9".parse().unwrap();
        allocation.bind_channel(0x4001, peer).unwrap();

        let mut buf = BytesMut::with_capacity(64);
        let frame = frame_from_peer(&allocation, peer, b"hi", &mut buf);

        assert_eq!(frame[0] >> 6, 1);
        let decoded = ChannelData::decode(frame).unwrap();
        assert_eq!(decoded.number, 0x4001);
        assert_eq!(decoded.bytes, b"hi");
    }

    #[tokio::test]
    async fn frames_as_a_data_indication_without_a_binding() {
        let allocation = test_allocation().await;
        let peer: SocketAddr = "198.51.100.4:9".parse().unwrap();

        let mut buf = BytesMut::with_capacity(64);
        let frame = frame_from_peer(&allocation, peer, b"hi", &mut buf).to_vec();

        match Decoder::default().decode(&frame).unwrap() {
            DecodeResult::Message(message) => {
                assert_eq!(message.get::<XorPeerAddress>(), Some(peer));
                assert_eq!(message.get::<Data>(), Some(&b"hi"[..]));
            }
            DecodeResult::ChannelData(_) => panic!("expected a DATA indication"),
        }
    }
}
