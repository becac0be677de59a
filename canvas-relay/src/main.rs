use canvas_collab::server::{RelayServer, ServerConfig};
use log::info;

/// Bind address: first argument, else `CANVAS_RELAY_ADDR`, else the default.
fn bind_addr() -> String {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CANVAS_RELAY_ADDR").ok())
        .unwrap_or_else(|| ServerConfig::default().bind_addr)
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = ServerConfig {
        bind_addr: bind_addr(),
        ..ServerConfig::default()
    };
    info!("Starting canvas relay on {}...", config.bind_addr);

    let server = RelayServer::new(config);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                log::error!("Relay server stopped: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
}
