//! UDP and TCP transport loops for the STUN/TURN wire protocol.

mod forward;
pub mod sink;
mod tcp;
mod udp;

use service::Service;
use tokio_util::sync::CancellationToken;

use crate::config::Turn;

/// Spawns the UDP and TCP listeners configured for the TURN wire protocol.
/// Both bind the same address; either can be disabled by configuring an
/// unreachable listen address if only one transport is needed. Cancelling
/// `shutdown` stops both loops from accepting further packets/connections.
pub fn run(config: &Turn, service: Service, shutdown: CancellationToken) {
    tokio::spawn(udp::run(config.listen, service.clone(), shutdown.clone()));
    tokio::spawn(tcp::run(config.listen, service, shutdown));
}
