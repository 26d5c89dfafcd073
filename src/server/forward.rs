//! Drives the peer→client half of the relay plane for one allocation: reads
//! datagrams off its relay socket and frames them back to whichever
//! connection the allocation belongs to.

use std::{sync::Arc, time::Duration};

use bytes::BytesMut;
use log::debug;
use service::{allocation::Allocation, relay};
use tokio::time::{Instant, timeout};

use super::sink::Sink;

/// How often the loop wakes up with no traffic, just to check whether the
/// allocation has expired and it should stop reading its relay socket.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub fn spawn(allocation: Arc<Allocation>, sink: Sink) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        let mut out = BytesMut::with_capacity(1500);

        loop {
            if allocation.is_expired(Instant::now()) {
                break;
            }

            let (size, peer) = match timeout(POLL_INTERVAL, allocation.relay_socket.recv_from(&mut buf)).await {
                Ok(Ok(pair)) => pair,
                Ok(Err(_)) => break,
                Err(_) => continue,
            };

            if !allocation.has_permission(peer.ip()) {
                continue;
            }

            out.clear();
            let frame = relay::frame_from_peer(&allocation, peer, &buf[..size], &mut out);
            if sink.send(frame).await.is_err() {
                break;
            }
        }

        debug!("relay forwarder for {} stopped", allocation.id.source);
    });
}
