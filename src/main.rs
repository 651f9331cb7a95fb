//! Standalone server binary.
//!
//! Usage: `netcode-server [config.toml]`
//!
//! Without a path, configuration comes from the defaults. `NETCODE_SERVER_*`
//! environment variables are applied on top in both cases.

use netcode_server::config::NetworkConfig;
use netcode_server::service::event_loop;
use netcode_server::utils::logging::init_logging;
use netcode_server::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let mut config = NetworkConfig::from_file(path)?;
            config.apply_env_overrides()?;
            config
        }
        None => NetworkConfig::from_env()?,
    };

    init_logging(&config.logging)?;

    for issue in config.validate() {
        tracing::warn!(%issue, "Configuration issue");
    }

    event_loop::run(config).await
}
