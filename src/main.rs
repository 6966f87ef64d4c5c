//! mcast-relay - serve UDP multicast groups over HTTP.
//!
//! Usage: mcast-relay [CONFIG.json]
//! The config path may also come from RELAY_CONFIG; environment variables
//! override file values (see `RelayConfig::apply_env`).

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};

use mcast_relay::config::CONFIG_PATH_ENV;
use mcast_relay::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

    let config = match RelayConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    let server = Arc::new(RelayServer::new(&config));

    let shutdown = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.stop();
        }
    });

    if let Err(e) = server.run().await {
        error!("server failed: {}", e);
        std::process::exit(1);
    }
}
