pub mod api;
pub mod config;
pub mod registry;
pub mod server;
pub mod tunnel;

use std::sync::Arc;

use config::Config;
use registry::Registry;
use service::{Service, ServiceOptions, allocation::LifetimeBounds};
use tokio_util::sync::CancellationToken;
use tunnel::Tunnel;

/// Builds the `Service` described by `config.turn` and starts its UDP/TCP
/// listeners, then runs the signaling/tunnel HTTP+WS surface until a
/// shutdown signal arrives. Kept separate from `main` so integration tests
/// can start the whole server in-process the same way the binary does.
pub async fn server_main(config: Arc<Config>) -> anyhow::Result<()> {
    let service = Service::new(ServiceOptions {
        port_range: (config.turn.relay_port_min..config.turn.relay_port_max).into(),
        relay_bind_ip: config.turn.external_ip.into(),
        external_ip: config.turn.external_ip.into(),
        software: config.turn.software.clone(),
        realm: config.turn.realm.clone(),
        turn_secret: config.turn.secret.clone(),
        lifetime_bounds: LifetimeBounds {
            min: std::time::Duration::from_secs(config.turn.min_lifetime as u64),
            default: std::time::Duration::from_secs(config.turn.default_lifetime as u64),
            max: std::time::Duration::from_secs(config.turn.max_lifetime as u64),
        },
    });

    let transport_shutdown = CancellationToken::new();
    server::run(&config.turn, service.clone(), transport_shutdown.clone());

    let tunnel = Arc::new(Tunnel::new());
    let registry = Registry::new(tunnel.clone());

    api::run(config, registry, tunnel, service, transport_shutdown).await;

    Ok(())
}
