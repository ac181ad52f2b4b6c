use tower_http::cors::CorsLayer;

use timerush::backend::{BackendState, router};
use timerush::config::{self, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    config::init()?;
    let server = ServerConfig::from_env()?;

    let app = router(BackendState::new()).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server.port)).await?;

    tracing::info!(port = server.port, base_url = %server.base_url, "timerush backend running");

    axum::serve(listener, app).await?;
    Ok(())
}
