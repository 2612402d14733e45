use tracing_subscriber::{fmt, EnvFilter};

use relay_bridge::{build_relay, start_server, BridgeConfig, BridgeState, FeedAdapter};

/// Usage: `relay-server [port] [log-level]`
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let port = args.next();
    let level = args.next().unwrap_or_else(|| "info".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    fmt().compact().with_env_filter(filter).init();

    let mut config = BridgeConfig::load();
    if let Some(port) = port {
        config.addr.set_port(port.parse()?);
    }

    let relay = build_relay(&config)?;
    let feeds = FeedAdapter::new(relay.clone(), config.feed.clone()).spawn();
    tracing::info!(url = %config.server_url, feeds = feeds.len(), "Starting relay");

    let state = BridgeState::new(relay, config.tts_key.clone());
    let result = start_server(config.addr, state, Some(config.static_dir.as_path()), async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
    })
    .await;

    for feed in feeds {
        feed.abort();
    }
    result.map_err(|e| e.into())
}
