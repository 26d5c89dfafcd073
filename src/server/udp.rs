use std::{net::SocketAddr, sync::Arc};

use log::{error, info};
use service::{Service, router::Router, session::Identifier};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::{forward, sink::Sink};

/// Runs the STUN/TURN wire protocol on one UDP socket. One task, one
/// `Router`: UDP is connectionless, so there's nothing to demultiplex by
/// connection the way the TCP listener has to.
pub async fn run(listen: SocketAddr, service: Service, shutdown: CancellationToken) {
    let socket = match UdpSocket::bind(listen).await {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            error!("udp bind failed: addr={listen}, err={e}");
            return;
        }
    };

    info!("turn udp listening: addr={listen}");

    let interface = socket.local_addr().unwrap_or(listen);
    let mut router = Router::new(service.clone(), interface);
    let mut buf = vec![0u8; 1500];

    loop {
        let (size, source) = tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok(pair) if pair.0 >= 4 => pair,
                Ok(_) => continue,
                Err(_) => continue,
            },
            _ = shutdown.cancelled() => break,
        };

        let id = Identifier { source, interface };

        let Some(outcome) = router.route(&buf[..size], source).await else {
            continue;
        };

        if socket.send_to(outcome.bytes, source).await.is_err() {
            continue;
        }

        // Gated on the allocation itself, not a "5-tuple ever forwarded"
        // set — a torn-down allocation reallocated on the same 5-tuple
        // needs its own forward task spawned again.
        if let Some(allocation) = service.allocations.get(&id) {
            if allocation.start_forwarding() {
                forward::spawn(allocation, Sink::Udp(socket.clone(), source));
            }
        }
    }

    info!("turn udp stopped listening: addr={listen}");
}
