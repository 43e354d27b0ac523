// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! WebSocket bridge -- translates browser connections to [`HubCommand`] /
//! [`HubEvent`] traffic on the [`Hub`].
//!
//! Wire format is JSON text frames: `{"cmd": ..., ...}` in, `{"type": ...,
//! ...}` out. An `agents` snapshot is sent immediately on connect.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::protocol::{HubCommand, HubEvent};
use crate::registry::Hub;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(hub): State<Hub>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub, peer))
}

async fn handle_socket(mut socket: WebSocket, hub: Hub, peer: SocketAddr) {
    info!(%peer, "websocket client connected");
    let mut events = hub.subscribe();

    let snapshot = hub.agents_snapshot().await;
    send_event(&mut socket, &snapshot).await;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<HubCommand>(&text) {
                            Ok(cmd) => {
                                if let Some(reply) = hub.dispatch(cmd).await {
                                    send_event(&mut socket, &reply).await;
                                }
                            }
                            Err(e) => {
                                warn!(%peer, "invalid command JSON: {e}");
                                send_event(&mut socket, &HubEvent::error(format!("invalid command: {e}"))).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%peer, "websocket recv error: {e}");
                        break;
                    }
                }
            }
            result = events.recv() => {
                match result {
                    Ok(ev) => send_event(&mut socket, &ev).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%peer, "client lagged by {n} broadcast events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!(%peer, "websocket client disconnected");
}

async fn send_event(socket: &mut WebSocket, ev: &HubEvent) {
    let Ok(text) = serde_json::to_string(ev) else {
        return;
    };
    // Best-effort: a failing send here just drops this client on its next recv.
    let _ = socket.send(Message::Text(text)).await;
}
