//! Web studio server command: `veo-studio serve`.

use anyhow::Result;

use veo_studio::config::StudioConfig;
use veo_studio::studio::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    mut studio: StudioConfig,
    port: Option<u16>,
    host: Option<String>,
    dev: bool,
    open: bool,
) -> Result<()> {
    if let Some(port) = port {
        studio.server.port = port;
    }
    if dev {
        studio.server.dev_mode = true;
        if host.is_none() {
            studio.server.host = "0.0.0.0".to_string();
        }
    }
    if let Some(host) = host {
        studio.server.host = host;
    }

    // No browser in dev mode (typically a container).
    let open_browser = open && !studio.server.dev_mode;

    start_server(ServerConfig {
        studio,
        open_browser,
    })
    .await
}
