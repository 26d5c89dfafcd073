pub mod ports;

use std::{
    hash::Hash,
    net::SocketAddr,
    ops::{Deref, DerefMut},
};

use ahash::{HashMap, HashMapExt};

use self::ports::PortRange;

/// Identifies a TURN 5-tuple: the client's observed source address plus the
/// local interface the datagram or connection arrived on.
///
/// Ordered so it doubles as the sort key in the allocation manager's expiry
/// heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    pub source: SocketAddr,
    pub interface: SocketAddr,
}

/// The default HashMap is created without allocating capacity. To improve
/// performance, the turn server needs to pre-allocate the available
/// capacity.
///
/// So here the HashMap is rewrapped to allocate a large capacity (number of
/// ports that can be allocated) at the default creation time as well.
pub struct Table<K, V>(HashMap<K, V>);

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self(HashMap::with_capacity(PortRange::default().size()))
    }
}

impl<K, V> Deref for Table<K, V> {
    type Target = HashMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<K, V> DerefMut for Table<K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
