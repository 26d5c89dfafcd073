use std::{net::SocketAddr, sync::Arc};

use bytes::BytesMut;
use codec::Decoder;
use log::{error, info};
use service::{Service, router::Router, session::Identifier};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

use super::{forward, sink::Sink};

/// Runs the STUN/TURN wire protocol on one TCP listener. Each connection
/// gets its own `Router` (so its decode buffer isn't shared with anyone
/// else) and its own length-framed read loop, since TCP gives no message
/// boundaries on its own.
pub async fn run(listen: SocketAddr, service: Service, shutdown: CancellationToken) {
    let listener = match TcpListener::bind(listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("tcp bind failed: addr={listen}, err={e}");
            return;
        }
    };

    info!("turn tcp listening: addr={listen}");

    let interface = listener.local_addr().unwrap_or(listen);

    loop {
        let (socket, addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(_) => break,
            },
            _ = shutdown.cancelled() => break,
        };

        if let Err(e) = socket.set_nodelay(true) {
            error!("tcp set_nodelay failed: addr={addr}, err={e}");
        }

        let service = service.clone();
        tokio::spawn(async move {
            handle_connection(socket, addr, interface, service).await;
        });
    }

    info!("turn tcp stopped listening: addr={listen}");
}

async fn handle_connection(
    socket: tokio::net::TcpStream,
    addr: SocketAddr,
    interface: SocketAddr,
    service: Service,
) {
    let id = Identifier { source: addr, interface };
    let (mut reader, writer) = socket.into_split();
    let writer = Arc::new(Mutex::new(writer));
    let sink = Sink::Tcp(writer.clone());

    let mut router = Router::new(service.clone(), interface);
    let mut buf = BytesMut::new();
    let mut relayed = false;

    loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        loop {
            if buf.len() < 4 {
                break;
            }

            let frame_size = match Decoder::message_size(&buf, true) {
                Ok(size) if size > buf.len() => break,
                Ok(size) => size,
                Err(_) => {
                    buf.clear();
                    break;
                }
            };

            let chunk = buf.split_to(frame_size);

            if let Some(outcome) = router.route(&chunk, addr).await {
                if writer.lock().await.write_all(outcome.bytes).await.is_err() {
                    return;
                }
            }

            if !relayed {
                if let Some(allocation) = service.allocations.get(&id) {
                    forward::spawn(allocation, sink.clone());
                    relayed = true;
                }
            }
        }
    }

    service.allocations.teardown(&id);
    info!("tcp connection closed: addr={addr}");
}
