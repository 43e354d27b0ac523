// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP entry point -- serves the control UI's static assets and the `/ws`
//! websocket endpoint. The noVNC/VNC bridge itself runs inside each agent's
//! container (see `deskfleet-sandbox`); the browser talks to it directly on
//! `localhost:<novnc_port>`, not through this server.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::info;

use crate::registry::Hub;
use crate::ws::ws_handler;

/// Build the router: `GET /ws` plus static assets from `static_dir` (if it
/// exists) served at `/`.
pub fn router(hub: Hub, static_dir: Option<PathBuf>) -> Router {
    let mut app = Router::new().route("/ws", get(ws_handler));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.with_state(hub)
}

/// Bind and serve until the process is signaled to stop. Blocks.
pub async fn serve(bind: &str, hub: Hub, static_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let app = router(hub, static_dir).into_make_service_with_connect_info::<SocketAddr>();
    let listener = TcpListener::bind(bind).await?;
    info!(%bind, "hub listening");
    axum::serve(listener, app).await?;
    Ok(())
}
