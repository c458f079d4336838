use anyhow::Result;
use prism_live::{load_config, ConnectionManager, LiveConfig};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prism_live=info".into()),
        )
        .init();

    info!("prism-live starting...");

    // Config path from the first argument, then PRISM_LIVE_CONFIG
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PRISM_LIVE_CONFIG").ok());

    let config = match config_path {
        Some(path) => {
            info!(path = %path, "Loading configuration");
            load_config(&path)?
        }
        None => LiveConfig::default(),
    };

    info!(
        url = %config.connection.url,
        topics = ?config.watch.topics,
        retry = config.retry.enabled,
        "Configuration loaded"
    );

    let manager = ConnectionManager::from_config(&config);

    manager.on_connected(|| info!("Connected"));
    manager.on_error(|e| error!(error = %e, "Connection error"));
    manager.on_disconnected(|| info!("Disconnected"));

    // Handles stay alive until shutdown
    let mut handles = Vec::with_capacity(config.watch.topics.len());
    for topic in &config.watch.topics {
        let name = topic.clone();
        let handle = manager.subscribe(topic.as_str(), move |payload| {
            info!(topic = %name, payload = %payload, "Message");
        })?;
        handles.push(handle);
    }

    manager.connect();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if handles.iter().any(|h| !h.is_active()) {
        warn!("Some subscriptions were invalidated by a connection failure");
    }

    manager.disconnect();
    tokio::time::timeout(
        config.connection.disconnect_timeout() * 2,
        manager.wait_for_state(prism_live::ConnectionState::Idle),
    )
    .await
    .ok();

    Ok(())
}
