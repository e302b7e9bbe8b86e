//! HTTP server command: `mission-board serve`.

use anyhow::Result;

use mission_board::board::server::{ServerConfig, start_server};
use mission_board::config::BoardConfig;

pub async fn cmd_serve(
    config: &BoardConfig,
    port: Option<u16>,
    host: Option<String>,
    open: bool,
    dev: bool,
) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let mut server = ServerConfig::from_config(config);
    if let Some(port) = port {
        server.port = port;
    }
    if let Some(host) = host {
        server.host = host;
    }
    server.dev_mode |= dev;
    // No browser inside containers.
    server.open_browser = open && !server.dev_mode;

    start_server(server).await
}
