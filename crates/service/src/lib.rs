pub mod allocation;
pub mod auth;
pub mod error;
pub mod relay;
pub mod router;
pub mod session;

pub use error::Error;

use std::{net::IpAddr, sync::Arc};

use crate::{
    allocation::{AllocationManager, AllocationManagerOptions, LifetimeBounds},
    session::ports::PortRange,
};

/// Process-wide TURN configuration and the allocation state shared by every
/// listening interface. One `Service` is built at startup; a
/// [`router::Router`] wraps it per UDP/TCP listener.
#[derive(Clone)]
pub struct Service {
    pub allocations: Arc<AllocationManager>,
    pub software: String,
    pub realm: String,
    pub turn_secret: String,
    pub external_ip: IpAddr,
}

pub struct ServiceOptions {
    pub port_range: PortRange,
    pub relay_bind_ip: IpAddr,
    pub external_ip: IpAddr,
    pub software: String,
    pub realm: String,
    pub turn_secret: String,
    pub lifetime_bounds: LifetimeBounds,
}

impl Service {
    pub fn new(options: ServiceOptions) -> Self {
        Self {
            allocations: AllocationManager::new(AllocationManagerOptions {
                port_range: options.port_range,
                relay_bind_ip: options.relay_bind_ip,
                lifetime_bounds: options.lifetime_bounds,
            }),
            software: options.software,
            realm: options.realm,
            turn_secret: options.turn_secret,
            external_ip: options.external_ip,
        }
    }
}
