use std::net::SocketAddr;

use parking_lot::Mutex;
use serde::Deserialize;

use super::ChannelHandle;

/// How a registered client is currently reaching its paired WAF, as last
/// reported over its control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Relay,
    P2p,
    Turn,
}

/// A browser client's control-channel registration: its last-known reflexive
/// address and connection mode, plus the WAF it's paired with, if any.
pub struct Client {
    pub id: String,
    reflexive: Mutex<Option<SocketAddr>>,
    connection_type: Mutex<Option<ConnectionType>>,
    pub(super) waf: Mutex<Option<String>>,
    pub(super) channel: Mutex<Option<ChannelHandle>>,
}

impl Client {
    pub fn new(id: String, channel: ChannelHandle) -> Self {
        Self {
            id,
            reflexive: Mutex::new(None),
            connection_type: Mutex::new(None),
            waf: Mutex::new(None),
            channel: Mutex::new(Some(channel)),
        }
    }

    pub fn reflexive_address(&self) -> Option<SocketAddr> {
        *self.reflexive.lock()
    }

    pub fn set_reflexive_address(&self, address: SocketAddr) {
        *self.reflexive.lock() = Some(address);
    }

    pub fn connection_type(&self) -> Option<ConnectionType> {
        *self.connection_type.lock()
    }

    pub fn set_connection_type(&self, kind: ConnectionType) {
        *self.connection_type.lock() = Some(kind);
    }

    pub fn paired_waf(&self) -> Option<String> {
        self.waf.lock().clone()
    }

    pub fn is_online(&self) -> bool {
        self.channel.lock().is_some()
    }
}
