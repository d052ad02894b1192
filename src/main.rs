use axum::Router;
use tokio::net::TcpListener;

use anyhow::anyhow;

use parla::{ServerConfig, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parla=info,tower_http=info".into()),
        )
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Load configuration
    let config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    let address = config.address();

    // Create application state and start the idle sweep
    let app_state = AppState::new(config);
    app_state.registry.spawn_sweeper();

    // Combine all routes: health + websocket
    let app = Router::new()
        .merge(routes::api::create_api_router())
        .merge(routes::ws::create_ws_router())
        .with_state(app_state);

    let listener = TcpListener::bind(&address).await?;
    tracing::info!("Server listening on {address}");

    axum::serve(listener, app).await?;

    Ok(())
}
