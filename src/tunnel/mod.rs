//! Turns an unmatched HTTP request into a framed message on a WAF's control
//! channel and reassembles the response (§4.8).

pub mod pending;

use std::sync::Arc;
use std::time::Duration;

use ahash::HashMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

pub use pending::HttpResponseFrame;
use pending::PendingRequest;

/// Correlation ids are unguessable (a v4 UUID's 122 random bits) so a
/// WAF-adjacent attacker can't forge a response for a request it didn't see.
pub const RESPONSE_DEADLINE: Duration = Duration::from_secs(30);

/// The `http_request` control frame sent to the WAF.
#[derive(Serialize)]
pub struct HttpRequestFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: Uuid,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpRequestFrame {
    pub fn new(id: Uuid, method: String, url: String, headers: Vec<(String, String)>, body: &[u8]) -> Self {
        Self {
            kind: "http_request",
            id,
            method,
            url,
            headers,
            body: BASE64.encode(body),
        }
    }
}

/// The process-wide pending-request table, keyed by correlation id.
pub struct Tunnel {
    pending: Mutex<HashMap<Uuid, PendingRequest>>,
}

impl Tunnel {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::default()),
        }
    }

    /// Registers a new correlation id and returns a guard alongside the
    /// receiver half the dispatcher awaits (with its own 30s deadline — this
    /// table never times anything out on its own). The guard's `Drop` cancels
    /// the entry unless [`PendingGuard::disarm`] was called first, so a
    /// request dropped mid-await (client disconnect) still removes its
    /// pending entry instead of leaking until the deadline.
    pub fn insert(self: &Arc<Self>, id: Uuid) -> (PendingGuard, tokio::sync::oneshot::Receiver<HttpResponseFrame>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.pending.lock().insert(id, PendingRequest { resolve: tx });
        (PendingGuard { tunnel: self.clone(), id, armed: true }, rx)
    }

    /// Resolves a pending request from an `http_response` frame. Returns
    /// `false` if `id` is unknown (already resolved, cancelled, or never
    /// inserted) — the WAF's response is simply discarded.
    pub fn resolve(&self, id: Uuid, frame: HttpResponseFrame) -> bool {
        let Some(entry) = self.pending.lock().remove(&id) else {
            return false;
        };
        entry.resolve.send(frame).is_ok()
    }

    /// Removes a pending entry without resolving it — used on deadline
    /// expiry and on client disconnect, so a late WAF response has nothing
    /// left to match.
    pub fn cancel(&self, id: &Uuid) {
        self.pending.lock().remove(id);
    }
}

impl Default for Tunnel {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a pending entry's correlation id live; cancels it on drop unless
/// [`disarm`](Self::disarm) was called, so the entry is removed whether the
/// awaiting future runs to completion or is dropped early.
pub struct PendingGuard {
    tunnel: Arc<Tunnel>,
    id: Uuid,
    armed: bool,
}

impl PendingGuard {
    /// Marks the entry as already resolved, so `Drop` doesn't re-cancel it.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.tunnel.cancel(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> HttpResponseFrame {
        HttpResponseFrame {
            status_code: 200,
            headers: vec![("content-type".into(), "text/plain".into())],
            body: BASE64.encode(b"ok"),
        }
    }

    #[tokio::test]
    async fn resolve_delivers_the_frame_to_the_waiting_receiver() {
        let tunnel = Arc::new(Tunnel::new());
        let id = Uuid::new_v4();
        let (mut guard, rx) = tunnel.insert(id);

        assert!(tunnel.resolve(id, response()));
        guard.disarm();

        let frame = rx.await.expect("receiver should resolve");
        assert_eq!(frame.status_code, 200);
    }

    #[tokio::test]
    async fn resolve_on_an_unknown_id_is_a_noop() {
        let tunnel = Arc::new(Tunnel::new());
        assert!(!tunnel.resolve(Uuid::new_v4(), response()));
    }

    #[tokio::test]
    async fn cancel_drops_the_sender_so_the_waiter_fails_fast() {
        let tunnel = Arc::new(Tunnel::new());
        let id = Uuid::new_v4();
        let (mut guard, rx) = tunnel.insert(id);

        tunnel.cancel(&id);
        guard.disarm();

        assert!(rx.await.is_err());
        // A late response after cancellation has nothing left to resolve.
        assert!(!tunnel.resolve(id, response()));
    }

    #[tokio::test]
    async fn dropping_the_guard_without_disarming_cancels_the_entry() {
        let tunnel = Arc::new(Tunnel::new());
        let id = Uuid::new_v4();
        let (guard, rx) = tunnel.insert(id);

        drop(guard);

        assert!(rx.await.is_err());
        assert!(!tunnel.resolve(id, response()));
    }

    #[test]
    fn http_request_frame_base64_encodes_the_body() {
        let frame = HttpRequestFrame::new(Uuid::new_v4(), "GET".into(), "/x".into(), vec![], b"hello");
        assert_eq!(frame.body, BASE64.encode(b"hello"));
        assert_eq!(frame.kind, "http_request");
    }
}
