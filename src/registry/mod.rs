//! Process-wide WAF/client membership: who's registered, who's paired with
//! whom, and how to reach a registrant's control channel.

pub mod client;
pub mod waf;

use std::{net::SocketAddr, sync::Arc};

use ahash::HashMap;
use log::info;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use client::{Client, ConnectionType};
pub use waf::{Waf, WafSummary};

use crate::tunnel::{HttpResponseFrame, Tunnel};

/// A message pushed to a control-channel task from elsewhere in the process:
/// either a JSON frame to write, or a request to close the socket with a
/// WebSocket close code and reason.
pub enum ControlSignal {
    Frame(String),
    Close { code: u16, reason: String },
}

pub type ChannelHandle = mpsc::UnboundedSender<ControlSignal>;

/// WebSocket normal-closure code (RFC 6455 §7.4.1).
const NORMAL_CLOSURE: u16 = 1000;

fn send_close(channel: &Option<ChannelHandle>, reason: &str) {
    if let Some(channel) = channel {
        let _ = channel.send(ControlSignal::Close {
            code: NORMAL_CLOSURE,
            reason: reason.to_string(),
        });
    }
}

/// `GET /health` and `GET /api/admin/stats` snapshot.
#[derive(Serialize)]
pub struct Stats {
    pub wafs: usize,
    pub clients: usize,
    #[serde(rename = "onlineWafs")]
    pub online_wafs: usize,
}

#[derive(Serialize)]
pub struct WafDetail {
    pub id: String,
    pub addresses: Vec<String>,
    pub online: bool,
    #[serde(rename = "clientCount")]
    pub client_count: usize,
}

#[derive(Serialize)]
pub struct ClientDetail {
    pub id: String,
    pub reflexive: Option<SocketAddr>,
    #[serde(rename = "pairedWaf")]
    pub paired_waf: Option<String>,
    pub online: bool,
}

#[derive(Serialize)]
pub struct AdminSnapshot {
    pub wafs: Vec<WafDetail>,
    pub clients: Vec<ClientDetail>,
}

/// Three indexes over the same entities: WAFs by id, clients by id, and
/// (implicitly) control-channel identity — since each registered channel
/// handle is only ever compared by [`mpsc::UnboundedSender::same_channel`],
/// a reconnect under the same id can never let a stale connection clobber
/// the fresh one's registration.
pub struct Registry {
    wafs: RwLock<HashMap<String, Arc<Waf>>>,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    tunnel: Arc<Tunnel>,
}

impl Registry {
    pub fn new(tunnel: Arc<Tunnel>) -> Arc<Self> {
        Arc::new(Self {
            wafs: RwLock::new(HashMap::default()),
            clients: RwLock::new(HashMap::default()),
            tunnel,
        })
    }

    /// Sends an `http_request` frame to `waf_id`'s control channel and, if
    /// it was accepted, remembers that this WAF owes a response for `id`.
    pub fn send_http_request(&self, waf_id: &str, id: Uuid, frame: String) -> bool {
        let Some(waf) = self.waf(waf_id) else {
            return false;
        };
        let sent = waf.send(frame);
        if sent {
            waf.track(id);
        }
        sent
    }

    /// Resolves a correlation id from the WAF that owed it, untracking it
    /// from that WAF's outstanding set regardless of whether it was still
    /// pending in the tunnel table.
    pub fn resolve_http_response(&self, waf_id: &str, id: Uuid, response: HttpResponseFrame) -> bool {
        if let Some(waf) = self.waf(waf_id) {
            waf.untrack(id);
        }
        self.tunnel.resolve(id, response)
    }

    /// Registers (or re-registers) a WAF. A prior registration under the
    /// same id has its channel closed; its pairings are dropped with it.
    pub fn register_waf(
        &self,
        id: String,
        addresses: Vec<String>,
        metadata: Value,
        channel: ChannelHandle,
    ) -> Arc<Waf> {
        let waf = Arc::new(Waf::new(id.clone(), addresses, metadata, channel));

        if let Some(previous) = self.wafs.write().insert(id.clone(), waf.clone()) {
            send_close(&previous.channel.lock(), "replaced by a new registration");
        }

        info!("waf registered: id={id}");
        waf
    }

    pub fn register_client(&self, id: String, channel: ChannelHandle) -> Arc<Client> {
        let client = Arc::new(Client::new(id.clone(), channel));

        if let Some(previous) = self.clients.write().insert(id.clone(), client.clone()) {
            send_close(&previous.channel.lock(), "replaced by a new registration");
            if let Some(waf_id) = previous.paired_waf() {
                self.unpair(&waf_id, &id);
            }
        }

        info!("client registered: id={id}");
        client
    }

    pub fn waf(&self, id: &str) -> Option<Arc<Waf>> {
        self.wafs.read().get(id).cloned()
    }

    pub fn client(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.read().get(id).cloned()
    }

    pub fn update_reflexive(&self, id: &str, address: SocketAddr) {
        if let Some(client) = self.client(id) {
            client.set_reflexive_address(address);
        }
    }

    pub fn update_connection(&self, id: &str, kind: ConnectionType) {
        if let Some(client) = self.client(id) {
            client.set_connection_type(kind);
        }
    }

    /// Associates `client_id` with `waf_id` for least-loaded accounting.
    /// Called when the tunnel sticks a client to a WAF via the `waf_relay`
    /// cookie, which the client's own control-channel upgrade also carries.
    pub fn pair(&self, waf_id: &str, client_id: &str) {
        let Some(waf) = self.waf(waf_id) else { return };
        let Some(client) = self.client(client_id) else { return };

        if let Some(previous) = client.paired_waf() {
            if previous != waf_id {
                self.unpair(&previous, client_id);
            }
        }

        waf.pair(client_id);
        *client.waf.lock() = Some(waf_id.to_string());
    }

    fn unpair(&self, waf_id: &str, client_id: &str) {
        if let Some(waf) = self.waf(waf_id) {
            waf.unpair(client_id);
        }
    }

    /// Least-loaded WAF selection (§4.7): the sticky cookie's WAF if it's
    /// registered and online, else the registered online WAF with the
    /// fewest paired clients. Tie-breaks are arbitrary (iteration order).
    pub fn select_waf(&self, sticky: Option<&str>) -> Option<Arc<Waf>> {
        if let Some(id) = sticky {
            if let Some(waf) = self.waf(id) {
                if waf.is_online() {
                    return Some(waf);
                }
            }
        }

        self.wafs
            .read()
            .values()
            .filter(|waf| waf.is_online())
            .min_by_key(|waf| waf.client_count())
            .cloned()
    }

    /// Closes a client's control channel without deleting its entry; the
    /// close itself drives deregistration once the socket task observes it.
    pub fn force_disconnect_client(&self, id: &str) -> bool {
        let Some(client) = self.client(id) else {
            return false;
        };
        send_close(&client.channel.lock(), "disconnected by admin");
        true
    }

    /// Drains every pairing from a WAF without deleting its registration;
    /// the channel close (if the caller also disconnects it) is what
    /// ultimately removes the entry.
    pub fn drain_waf(&self, id: &str) -> bool {
        let Some(waf) = self.waf(id) else {
            return false;
        };
        for client_id in waf.drain_pairings() {
            if let Some(client) = self.client(&client_id) {
                *client.waf.lock() = None;
            }
        }
        send_close(&waf.channel.lock(), "drained by admin");
        true
    }

    /// Closes every registered WAF and client control channel with a normal
    /// closure code. Used on process shutdown (§5) — entries themselves are
    /// left in place, since the process is exiting anyway.
    pub fn shutdown(&self) {
        for waf in self.wafs.read().values() {
            send_close(&waf.channel.lock(), "server shutting down");
        }
        for client in self.clients.read().values() {
            send_close(&client.channel.lock(), "server shutting down");
        }
    }

    /// Removes a WAF/client entry, but only if `channel` is still the one
    /// on file — guards against a disconnecting old connection clobbering a
    /// fresher registration made under the same id in the meantime.
    pub fn deregister_waf(&self, id: &str, channel: &ChannelHandle) {
        let mut wafs = self.wafs.write();
        if wafs
            .get(id)
            .is_some_and(|waf| waf.channel.lock().as_ref().is_some_and(|c| c.same_channel(channel)))
        {
            if let Some(waf) = wafs.remove(id) {
                for client_id in waf.drain_pairings() {
                    if let Some(client) = self.client(&client_id) {
                        *client.waf.lock() = None;
                    }
                }
                for request_id in waf.drain_outstanding() {
                    self.tunnel.cancel(&request_id);
                }
            }
            info!("waf deregistered: id={id}");
        }
    }

    pub fn deregister_client(&self, id: &str, channel: &ChannelHandle) {
        let mut clients = self.clients.write();
        if clients
            .get(id)
            .is_some_and(|client| client.channel.lock().as_ref().is_some_and(|c| c.same_channel(channel)))
        {
            if let Some(client) = clients.remove(id) {
                if let Some(waf_id) = client.paired_waf() {
                    drop(clients);
                    self.unpair(&waf_id, id);
                }
            }
            info!("client deregistered: id={id}");
        }
    }

    pub fn stats(&self) -> Stats {
        let wafs = self.wafs.read();
        let online_wafs = wafs.values().filter(|waf| waf.is_online()).count();
        Stats {
            wafs: wafs.len(),
            clients: self.clients.read().len(),
            online_wafs,
        }
    }

    pub fn wafs_portal(&self) -> Vec<WafSummary> {
        self.wafs.read().values().map(|waf| WafSummary::from(waf.as_ref())).collect()
    }

    pub fn admin_snapshot(&self) -> AdminSnapshot {
        let wafs = self
            .wafs
            .read()
            .values()
            .map(|waf| WafDetail {
                id: waf.id.clone(),
                addresses: waf.addresses.clone(),
                online: waf.is_online(),
                client_count: waf.client_count(),
            })
            .collect();

        let clients = self
            .clients
            .read()
            .values()
            .map(|client| ClientDetail {
                id: client.id.clone(),
                reflexive: client.reflexive_address(),
                paired_waf: client.paired_waf(),
                online: client.is_online(),
            })
            .collect();

        AdminSnapshot { wafs, clients }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel() -> (ChannelHandle, mpsc::UnboundedReceiver<ControlSignal>) {
        mpsc::unbounded_channel()
    }

    fn registry() -> Arc<Registry> {
        Registry::new(Arc::new(Tunnel::new()))
    }

    #[test]
    fn least_loaded_selection_prefers_the_waf_with_fewer_paired_clients() {
        let registry = registry();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();
        registry.register_waf("a".into(), vec![], json!({}), tx_a);
        registry.register_waf("b".into(), vec![], json!({}), tx_b);

        let (tx_c1, _rx_c1) = channel();
        let (tx_c2, _rx_c2) = channel();
        registry.register_client("c1".into(), tx_c1);
        registry.register_client("c2".into(), tx_c2);
        registry.pair("a", "c1");
        registry.pair("a", "c2");

        let chosen = registry.select_waf(None).expect("a waf should be selected");
        assert_eq!(chosen.id, "b");
    }

    #[test]
    fn sticky_selection_wins_over_load_when_the_sticky_waf_is_online() {
        let registry = registry();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();
        registry.register_waf("a".into(), vec![], json!({}), tx_a);
        registry.register_waf("b".into(), vec![], json!({}), tx_b);

        let chosen = registry.select_waf(Some("a")).expect("sticky waf should be selected");
        assert_eq!(chosen.id, "a");
    }

    #[test]
    fn re_registering_a_waf_under_the_same_id_closes_the_prior_channel() {
        let registry = registry();
        let (tx_old, mut rx_old) = channel();
        registry.register_waf("a".into(), vec![], json!({}), tx_old);

        let (tx_new, _rx_new) = channel();
        registry.register_waf("a".into(), vec![], json!({}), tx_new);

        assert!(matches!(rx_old.try_recv(), Ok(ControlSignal::Close { .. })));
    }

    #[test]
    fn deregister_ignores_a_stale_channel_from_a_superseded_registration() {
        let registry = registry();
        let (tx_old, _rx_old) = channel();
        registry.register_waf("a".into(), vec![], json!({}), tx_old.clone());

        let (tx_new, _rx_new) = channel();
        registry.register_waf("a".into(), vec![], json!({}), tx_new);

        // The old connection's disconnect handler fires after the reconnect
        // already replaced it; its stale channel handle must not evict the
        // fresher registration.
        registry.deregister_waf("a", &tx_old);
        assert!(registry.waf("a").is_some());
    }

    #[test]
    fn deregister_with_the_current_channel_removes_the_entry_and_its_pairings() {
        let registry = registry();
        let (tx_waf, _rx_waf) = channel();
        registry.register_waf("a".into(), vec![], json!({}), tx_waf.clone());

        let (tx_client, _rx_client) = channel();
        let client = registry.register_client("c".into(), tx_client);
        registry.pair("a", "c");
        assert_eq!(client.paired_waf().as_deref(), Some("a"));

        registry.deregister_waf("a", &tx_waf);

        assert!(registry.waf("a").is_none());
        assert_eq!(client.paired_waf(), None);
    }

    #[test]
    fn deregistering_a_waf_cancels_its_outstanding_tunnel_requests() {
        let tunnel = Arc::new(Tunnel::new());
        let registry = Registry::new(tunnel.clone());
        let (tx_waf, _rx_waf) = channel();
        registry.register_waf("a".into(), vec![], json!({}), tx_waf.clone());

        let id = Uuid::new_v4();
        let (_guard, rx) = tunnel.insert(id);
        assert!(registry.send_http_request("a", id, "{}".into()));

        registry.deregister_waf("a", &tx_waf);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn drain_waf_clears_pairings_but_keeps_the_registration() {
        let registry = registry();
        let (tx_waf, _rx_waf) = channel();
        registry.register_waf("a".into(), vec![], json!({}), tx_waf);

        let (tx_client, _rx_client) = channel();
        let client = registry.register_client("c".into(), tx_client);
        registry.pair("a", "c");

        assert!(registry.drain_waf("a"));

        let waf = registry.waf("a").expect("drain should not delete the entry");
        assert_eq!(waf.client_count(), 0);
        assert_eq!(client.paired_waf(), None);
    }

    #[test]
    fn force_disconnect_client_sends_a_close_signal() {
        let registry = registry();
        let (tx_client, mut rx_client) = channel();
        registry.register_client("c".into(), tx_client);

        assert!(registry.force_disconnect_client("c"));
        assert!(matches!(rx_client.try_recv(), Ok(ControlSignal::Close { .. })));
    }

    #[test]
    fn force_disconnect_of_an_unknown_client_reports_failure() {
        let registry = registry();
        assert!(!registry.force_disconnect_client("missing"));
    }
}
