use std::net::SocketAddr;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use subcal::config::ServerConfig;
use subcal::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("subcal=info")),
        )
        .init();

    let config = ServerConfig::from_env();
    let addr = SocketAddr::new(config.bind_addr, config.port);
    let state = AppState::new(config)?;

    let app = subcal::app(state);

    info!("subcal listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
