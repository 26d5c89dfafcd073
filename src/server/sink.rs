//! Where a relayed peer→client datagram goes once it's been framed: the
//! shared UDP socket for UDP-relayed allocations, or the owning TCP
//! connection's write half for TCP-relayed ones.

use std::{io, net::SocketAddr, sync::Arc};

use tokio::{
    io::AsyncWriteExt,
    net::{UdpSocket, tcp::OwnedWriteHalf},
    sync::Mutex,
};

#[derive(Clone)]
pub enum Sink {
    Udp(Arc<UdpSocket>, SocketAddr),
    Tcp(Arc<Mutex<OwnedWriteHalf>>),
}

impl Sink {
    pub async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Self::Udp(socket, addr) => {
                socket.send_to(bytes, *addr).await?;
                Ok(())
            }
            Self::Tcp(writer) => writer.lock().await.write_all(bytes).await,
        }
    }
}
