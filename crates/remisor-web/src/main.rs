mod api;
mod config;
mod state;

use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remisor_web=debug,remisor_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    config.pipeline.ensure_dirs()?;
    tracing::info!(
        database = %config.pipeline.database_path.display(),
        mode = %config.pipeline.load_mode,
        "store configured"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = api::app(AppState::new(config));

    tracing::info!("Starting remisor on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
