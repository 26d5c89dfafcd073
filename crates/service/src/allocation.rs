use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use ahash::HashMap;
use codec::crypto::Password;
use log::info;
use parking_lot::{Mutex, RwLock};
use tokio::{net::UdpSocket, sync::Notify, time::Instant};

use crate::{
    Error,
    session::{Identifier, Table, ports::{PortAllocator, PortRange}},
};

/// How long an installed permission is honored without a refresh
/// (CreatePermission or a ChannelBind naming the same peer).
pub const PERMISSION_TTL: Duration = Duration::from_secs(300);
/// How long a channel binding survives without a ChannelBind refresh.
pub const CHANNEL_TTL: Duration = Duration::from_secs(600);

/// The `[min, default, max]` LIFETIME range an Allocate/Refresh is clamped
/// to, configurable since deployments vary in how long they want an idle
/// relay port held.
#[derive(Debug, Clone, Copy)]
pub struct LifetimeBounds {
    pub min: Duration,
    pub default: Duration,
    pub max: Duration,
}

impl Default for LifetimeBounds {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(30),
            default: Duration::from_secs(600),
            max: Duration::from_secs(3600),
        }
    }
}

impl LifetimeBounds {
    /// Clamps an Allocate request's LIFETIME to `[min, max]`, defaulting to
    /// `default` when the client didn't send one.
    pub fn clamp(&self, requested: Option<u32>) -> Duration {
        match requested {
            None => self.default,
            Some(secs) => Duration::from_secs(secs as u64).clamp(self.min, self.max),
        }
    }

    /// Clamps a Refresh request's LIFETIME the same way, except LIFETIME=0
    /// is preserved verbatim — it tears the allocation down rather than
    /// being floored to `min`.
    pub fn clamp_refresh(&self, requested: Option<u32>) -> Duration {
        match requested {
            Some(0) => Duration::ZERO,
            other => self.clamp(other),
        }
    }
}

struct ChannelBinding {
    peer: SocketAddr,
    expires_at: Instant,
}

/// A single TURN allocation: one relay UDP socket, owned exclusively by the
/// 5-tuple that requested it.
///
/// No two allocations ever share a socket, so permissions and channel
/// bindings live on the allocation itself instead of a server-wide relay
/// table — there's nothing to disambiguate.
pub struct Allocation {
    pub id: Identifier,
    pub username: String,
    pub password: Password,
    pub relay_socket: Arc<UdpSocket>,
    pub relay_port: u16,
    expires_at: Mutex<Instant>,
    permissions: Mutex<HashMap<IpAddr, Instant>>,
    channels: Mutex<HashMap<u16, ChannelBinding>>,
    channels_by_peer: Mutex<HashMap<SocketAddr, u16>>,
    forwarding_started: AtomicBool,
}

impl Allocation {
    pub(crate) fn new(
        id: Identifier,
        username: String,
        password: Password,
        relay_socket: Arc<UdpSocket>,
        relay_port: u16,
        expires_at: Instant,
    ) -> Self {
        Self {
            id,
            username,
            password,
            relay_socket,
            relay_port,
            expires_at: Mutex::new(expires_at),
            permissions: Mutex::new(HashMap::default()),
            channels: Mutex::new(HashMap::default()),
            channels_by_peer: Mutex::new(HashMap::default()),
            forwarding_started: AtomicBool::new(false),
        }
    }

    /// `true` the first time this is called for this allocation, `false`
    /// every time after. Gates spawning the peer→client forward task to
    /// once per allocation instance, rather than once per 5-tuple ever
    /// seen — a 5-tuple can be reallocated after its earlier allocation
    /// was torn down, and the new allocation needs its own forward task.
    pub fn start_forwarding(&self) -> bool {
        self.forwarding_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn expires_at(&self) -> Instant {
        *self.expires_at.lock()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }

    fn set_expires_at(&self, at: Instant) {
        *self.expires_at.lock() = at;
    }

    pub fn has_permission(&self, ip: IpAddr) -> bool {
        self.permissions
            .lock()
            .get(&ip)
            .is_some_and(|expires_at| Instant::now() < *expires_at)
    }

    pub fn install_permission(&self, ip: IpAddr) {
        self.permissions
            .lock()
            .insert(ip, Instant::now() + PERMISSION_TTL);
    }

    /// Installs or refreshes a channel binding. Rejects a channel number
    /// already bound to a different peer, or a peer already bound to a
    /// different channel number.
    pub fn bind_channel(&self, channel: u16, peer: SocketAddr) -> Result<(), ()> {
        let mut channels = self.channels.lock();
        let mut by_peer = self.channels_by_peer.lock();

        if let Some(existing) = channels.get(&channel) {
            if existing.peer != peer {
                return Err(());
            }
        }

        if let Some(existing_channel) = by_peer.get(&peer) {
            if *existing_channel != channel {
                return Err(());
            }
        }

        let expires_at = Instant::now() + CHANNEL_TTL;
        channels.insert(channel, ChannelBinding { peer, expires_at });
        by_peer.insert(peer, channel);
        drop(channels);
        drop(by_peer);

        self.install_permission(peer.ip());
        Ok(())
    }

    pub fn peer_for_channel(&self, channel: u16) -> Option<SocketAddr> {
        let channels = self.channels.lock();
        let binding = channels.get(&channel)?;
        (Instant::now() < binding.expires_at).then_some(binding.peer)
    }

    pub fn channel_for_peer(&self, peer: SocketAddr) -> Option<u16> {
        let channel = *self.channels_by_peer.lock().get(&peer)?;
        self.peer_for_channel(channel).map(|_| channel)
    }
}

pub struct AllocationManagerOptions {
    pub port_range: PortRange,
    pub relay_bind_ip: IpAddr,
    pub lifetime_bounds: LifetimeBounds,
}

/// Owns every live allocation and the free list of relay ports.
///
/// Expiry is driven by a single heap-ordered queue rather than one timer
/// (or one scan pass) per allocation: a background task sleeps until the
/// earliest deadline in the heap, not until the next fixed tick.
pub struct AllocationManager {
    allocations: RwLock<Table<Identifier, Arc<Allocation>>>,
    port_allocator: Mutex<PortAllocator>,
    relay_bind_ip: IpAddr,
    expiry: Mutex<BinaryHeap<Reverse<(Instant, Identifier)>>>,
    notify: Notify,
    pub lifetime_bounds: LifetimeBounds,
}

impl AllocationManager {
    pub fn new(options: AllocationManagerOptions) -> Arc<Self> {
        let this = Arc::new(Self {
            allocations: RwLock::new(Table::default()),
            port_allocator: Mutex::new(PortAllocator::new(options.port_range)),
            relay_bind_ip: options.relay_bind_ip,
            expiry: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            lifetime_bounds: options.lifetime_bounds,
        });

        tokio::spawn(reap(Arc::downgrade(&this)));
        this
    }

    pub fn get(&self, id: &Identifier) -> Option<Arc<Allocation>> {
        self.allocations.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.allocations.read().len()
    }

    /// Installs a new allocation for `id`. Fails with `AllocationMismatch`
    /// if a non-expired one already exists, or `PortsExhausted`/`Bind` if a
    /// relay socket can't be set up.
    pub async fn allocate(
        &self,
        id: Identifier,
        username: String,
        password: Password,
        lifetime: Duration,
    ) -> Result<Arc<Allocation>, Error> {
        if self.allocations.read().contains_key(&id) {
            return Err(Error::AllocationMismatch);
        }

        let port = self
            .port_allocator
            .lock()
            .alloc(None)
            .ok_or(Error::PortsExhausted)?;

        let socket = match UdpSocket::bind((self.relay_bind_ip, port)).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                self.port_allocator.lock().restore(port);
                return Err(Error::from(e));
            }
        };

        let expires_at = Instant::now() + lifetime;
        let allocation = Arc::new(Allocation::new(
            id,
            username,
            password,
            socket,
            port,
            expires_at,
        ));

        self.allocations.write().insert(id, allocation.clone());
        self.push_expiry(id, expires_at);

        info!(
            "allocation created for {} on relay port {}",
            id.source, port
        );

        Ok(allocation)
    }

    /// Refreshes `id`'s lifetime, or tears it down if `lifetime` is zero.
    /// Returns the lifetime actually applied, or `None` if no allocation
    /// exists for `id`.
    pub fn refresh(&self, id: &Identifier, lifetime: Duration) -> Option<Duration> {
        let allocation = self.get(id)?;

        if lifetime.is_zero() {
            self.teardown(id);
            return Some(Duration::ZERO);
        }

        let expires_at = Instant::now() + lifetime;
        allocation.set_expires_at(expires_at);
        self.push_expiry(*id, expires_at);
        Some(lifetime)
    }

    pub fn teardown(&self, id: &Identifier) {
        if let Some(allocation) = self.allocations.write().remove(id) {
            self.port_allocator.lock().restore(allocation.relay_port);
            info!(
                "allocation for {} torn down, relay port {} released",
                id.source, allocation.relay_port
            );
        }
    }

    /// Tears down every live allocation, closing their relay sockets. Used
    /// on process shutdown so nothing is left holding a relay port open.
    pub fn teardown_all(&self) {
        let ids: Vec<Identifier> = self.allocations.read().keys().copied().collect();
        for id in ids {
            self.teardown(&id);
        }
    }

    fn push_expiry(&self, id: Identifier, at: Instant) {
        self.expiry.lock().push(Reverse((at, id)));
        self.notify.notify_one();
    }
}

/// Background reaper: pops the heap's earliest deadline, sleeps until it's
/// due (or a fresher deadline is pushed in the meantime), and tears down
/// the allocation if it's still expired when its turn comes.
///
/// A refreshed allocation leaves a stale entry in the heap; when that entry
/// comes due this finds the allocation isn't actually expired yet (its
/// fresher entry is still queued) and just discards the stale one.
async fn reap(manager: Weak<AllocationManager>) {
    loop {
        let Some(manager) = manager.upgrade() else {
            return;
        };

        let next = manager.expiry.lock().peek().map(|Reverse((at, _))| *at);

        match next {
            Some(at) if at <= Instant::now() => {
                let due = manager.expiry.lock().pop().map(|Reverse((_, id))| id);
                if let Some(id) = due {
                    if let Some(allocation) = manager.get(&id) {
                        if allocation.is_expired(Instant::now()) {
                            manager.teardown(&id);
                        }
                    }
                }
            }
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {}
                    _ = manager.notify.notified() => {}
                }
            }
            None => {
                manager.notify.notified().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn id(port: u16) -> Identifier {
        Identifier {
            source: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            interface: SocketAddr::from((Ipv4Addr::LOCALHOST, 3478)),
        }
    }

    fn password() -> Password {
        codec::crypto::generate_password("a", "x", "r", codec::crypto::PasswordAlgorithm::Md5)
    }

    fn lifetime() -> Duration {
        LifetimeBounds::default().default
    }

    #[tokio::test]
    async fn allocate_reserves_a_distinct_relay_port_per_five_tuple() {
        let manager = AllocationManager::new(AllocationManagerOptions {
            port_range: (49200..49210).into(),
            relay_bind_ip: Ipv4Addr::LOCALHOST.into(),
            lifetime_bounds: LifetimeBounds::default(),
        });

        let a = manager
            .allocate(id(1), "a".into(), password(), lifetime())
            .await
            .unwrap();
        let b = manager
            .allocate(id(2), "b".into(), password(), lifetime())
            .await
            .unwrap();

        assert_ne!(a.relay_port, b.relay_port);
    }

    #[tokio::test]
    async fn allocate_rejects_a_duplicate_five_tuple() {
        let manager = AllocationManager::new(AllocationManagerOptions {
            port_range: (49220..49230).into(),
            relay_bind_ip: Ipv4Addr::LOCALHOST.into(),
            lifetime_bounds: LifetimeBounds::default(),
        });

        manager
            .allocate(id(1), "a".into(), password(), lifetime())
            .await
            .unwrap();

        let err = manager
            .allocate(id(1), "a".into(), password(), lifetime())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AllocationMismatch));
    }

    #[tokio::test]
    async fn refresh_zero_tears_down_and_frees_the_port() {
        let manager = AllocationManager::new(AllocationManagerOptions {
            port_range: (49300..49310).into(),
            relay_bind_ip: Ipv4Addr::LOCALHOST.into(),
            lifetime_bounds: LifetimeBounds::default(),
        });

        let allocation = manager
            .allocate(id(1), "a".into(), password(), lifetime())
            .await
            .unwrap();
        let port = allocation.relay_port;
        drop(allocation);

        assert_eq!(manager.refresh(&id(1), Duration::ZERO), Some(Duration::ZERO));
        assert!(manager.get(&id(1)).is_none());

        let reallocated = manager
            .allocate(id(2), "a".into(), password(), lifetime())
            .await
            .unwrap();
        assert_eq!(reallocated.relay_port, port);
    }

    #[tokio::test]
    async fn channel_binding_rejects_conflicts_then_installs_permission() {
        let socket = Arc::new(UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap());
        let allocation = Allocation::new(
            id(1),
            "a".into(),
            password(),
            socket,
            0,
            Instant::now() + lifetime(),
        );

        let peer: SocketAddr = "198.51.100.4:9".parse().unwrap();
        let other: SocketAddr = "198.51.100.5:9".parse().unwrap();

        assert!(allocation.bind_channel(0x4001, peer).is_ok());
        assert!(allocation.bind_channel(0x4001, peer).is_ok());
        assert!(allocation.bind_channel(0x4002, peer).is_err());
        assert!(allocation.bind_channel(0x4001, other).is_err());
        assert!(allocation.has_permission(peer.ip()));
        assert_eq!(allocation.channel_for_peer(peer), Some(0x4001));
    }
}
