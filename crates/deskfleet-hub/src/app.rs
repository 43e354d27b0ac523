// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Startup -- assembles the [`HubService`] and the HTTP/websocket server,
//! then blocks serving until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use deskfleet_config::Config;
use tracing::info;

use crate::http;
use crate::registry::HubService;

/// Assemble and run the Hub. Blocks until the HTTP server stops.
pub async fn run(config: Config, static_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let data_root = config.data_root.expanded();
    std::fs::create_dir_all(&data_root)?;

    let model: Arc<dyn deskfleet_model::ModelProvider> = Arc::from(deskfleet_model::from_config(&config.model));

    let (hub, service) = HubService::new(data_root.clone(), config.context.clone(), model);
    tokio::spawn(service.run());

    info!(data_root = %data_root.display(), bind = %config.http.bind, "deskfleet hub starting");
    http::serve(&config.http.bind, hub, static_dir).await
}
