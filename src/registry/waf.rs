use ahash::HashSet;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::{ChannelHandle, ControlSignal};

/// A privately-hosted WAF instance's control-channel registration.
///
/// `paired_clients` drives least-loaded selection (§4.7) and is exactly the
/// registry's view of which browser clients currently favor this WAF; it is
/// not the same thing as "online" (a drained WAF keeps its entry but sheds
/// every pairing).
pub struct Waf {
    pub id: String,
    pub addresses: Vec<String>,
    pub metadata: Value,
    paired_clients: Mutex<HashSet<String>>,
    /// Tunnel correlation ids this WAF has an `http_response` owed for.
    /// Drained and cancelled when the control channel is lost, so the
    /// blocked HTTP handler fails fast instead of riding out the deadline.
    outstanding: Mutex<HashSet<Uuid>>,
    pub(super) channel: Mutex<Option<ChannelHandle>>,
}

impl Waf {
    pub fn new(id: String, addresses: Vec<String>, metadata: Value, channel: ChannelHandle) -> Self {
        Self {
            id,
            addresses,
            metadata,
            paired_clients: Mutex::new(HashSet::default()),
            outstanding: Mutex::new(HashSet::default()),
            channel: Mutex::new(Some(channel)),
        }
    }

    pub fn is_online(&self) -> bool {
        self.channel.lock().is_some()
    }

    pub fn client_count(&self) -> usize {
        self.paired_clients.lock().len()
    }

    pub(super) fn pair(&self, client_id: &str) {
        self.paired_clients.lock().insert(client_id.to_string());
    }

    pub(super) fn unpair(&self, client_id: &str) {
        self.paired_clients.lock().remove(client_id);
    }

    pub(super) fn drain_pairings(&self) -> Vec<String> {
        self.paired_clients.lock().drain().collect()
    }

    /// Sends an already-serialized control frame. Returns `false` if the
    /// channel isn't open.
    pub(super) fn send(&self, frame: String) -> bool {
        self.channel
            .lock()
            .as_ref()
            .is_some_and(|channel| channel.send(ControlSignal::Frame(frame)).is_ok())
    }

    pub(super) fn track(&self, id: Uuid) {
        self.outstanding.lock().insert(id);
    }

    pub(super) fn untrack(&self, id: Uuid) {
        self.outstanding.lock().remove(&id);
    }

    pub(super) fn drain_outstanding(&self) -> Vec<Uuid> {
        self.outstanding.lock().drain().collect()
    }
}

/// `GET /api/wafs` portal listing entry.
#[derive(Serialize)]
pub struct WafSummary {
    pub id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub description: String,
    pub backends: Vec<String>,
    #[serde(rename = "clientCount")]
    pub client_count: usize,
    pub online: bool,
}

impl From<&Waf> for WafSummary {
    fn from(waf: &Waf) -> Self {
        let display_name = waf
            .metadata
            .get("displayName")
            .and_then(Value::as_str)
            .unwrap_or(&waf.id)
            .to_string();

        let description = waf
            .metadata
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Self {
            id: waf.id.clone(),
            display_name,
            description,
            backends: waf.addresses.clone(),
            client_count: waf.client_count(),
            online: waf.is_online(),
        }
    }
}
