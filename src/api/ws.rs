//! The WebSocket control channel: JSON frames from a WAF or a browser
//! client, decoded into a closed sum type per the "strong typing over
//! dynamic JSON" design note rather than matched on a loose `Value`.

use std::net::SocketAddr;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::AppState;
use crate::registry::{ChannelHandle, ConnectionType, ControlSignal};
use crate::tunnel::pending::HttpResponseFrame;

#[derive(Deserialize)]
#[serde(tag = "type")]
enum InboundFrame {
    #[serde(rename = "register_waf")]
    RegisterWaf {
        id: String,
        #[serde(default)]
        addresses: Vec<String>,
        #[serde(default)]
        metadata: Value,
    },
    #[serde(rename = "register_client")]
    RegisterClient { id: String },
    #[serde(rename = "update_reflexive")]
    UpdateReflexive { id: String, address: SocketAddr },
    #[serde(rename = "update_connection")]
    UpdateConnection {
        id: String,
        #[serde(rename = "connectionType")]
        connection_type: ConnectionType,
    },
    #[serde(rename = "http_response")]
    HttpResponse {
        id: Uuid,
        #[serde(rename = "statusCode")]
        status_code: u16,
        #[serde(default)]
        headers: Vec<(String, String)>,
        #[serde(default)]
        body: String,
    },
}

/// Who this socket turned out to be, once a register frame arrives. Kept
/// locally in the connection task rather than in a shared reverse-index
/// table — on disconnect the task already knows what it is and what
/// channel handle it registered, which is all deregistration needs.
enum Identity {
    Unregistered,
    Waf(String),
    Client(String),
}

pub async fn upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let sticky = super::cookie(&headers, "waf_relay");
    ws.on_upgrade(move |socket| handle(socket, addr, state, sticky))
}

async fn handle(socket: WebSocket, addr: SocketAddr, state: AppState, sticky: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ControlSignal>();
    let mut identity = Identity::Unregistered;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(ControlSignal::Frame(text)) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(ControlSignal::Close { code, reason }) => {
                        let _ = sink.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
                        break;
                    }
                    None => break,
                }
            }
            inbound = stream.next() => {
                let Some(Ok(message)) = inbound else { break };
                match message {
                    Message::Text(text) => {
                        handle_frame(&state, &tx, &mut identity, &sticky, &text).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    let _ = sink.close().await;
    deregister(&state, identity, &tx);
    debug!("control channel closed: addr={addr}");
}

async fn handle_frame(
    state: &AppState,
    tx: &ChannelHandle,
    identity: &mut Identity,
    sticky: &Option<String>,
    text: &str,
) {
    let frame = match serde_json::from_str::<InboundFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("dropping unrecognized control frame: err={e}");
            return;
        }
    };

    match frame {
        InboundFrame::RegisterWaf { id, addresses, metadata } => {
            state.registry.register_waf(id.clone(), addresses, metadata, tx.clone());
            info!("waf online: id={id}");
            *identity = Identity::Waf(id);
        }
        InboundFrame::RegisterClient { id } => {
            state.registry.register_client(id.clone(), tx.clone());
            if let Some(waf_id) = sticky {
                state.registry.pair(waf_id, &id);
            }
            *identity = Identity::Client(id);
        }
        InboundFrame::UpdateReflexive { id, address } => {
            state.registry.update_reflexive(&id, address);
        }
        InboundFrame::UpdateConnection { id, connection_type } => {
            state.registry.update_connection(&id, connection_type);
        }
        InboundFrame::HttpResponse { id, status_code, headers, body } => {
            if let Identity::Waf(waf_id) = identity {
                let response = HttpResponseFrame { status_code, headers, body };
                state.registry.resolve_http_response(waf_id, id, response);
            }
        }
    }
}

fn deregister(state: &AppState, identity: Identity, tx: &ChannelHandle) {
    match identity {
        Identity::Waf(id) => state.registry.deregister_waf(&id, tx),
        Identity::Client(id) => state.registry.deregister_client(&id, tx),
        Identity::Unregistered => {}
    }
}
