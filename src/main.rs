use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use careflow::config::{self, Config};
use careflow::oracle::gemini::GeminiClient;
use careflow::transport::sender::GraphApiClient;
use careflow::transport::webhook::{self, AppState};
use careflow::ConversationPipeline;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        version = config::APP_VERSION,
        oracle = config.oracle_configured(),
        media = config.media_enabled,
        "{} starting",
        config::APP_NAME
    );
    if !config.oracle_configured() {
        tracing::warn!("No oracle API key set; running on deterministic fallbacks only");
    }

    let oracle = Arc::new(GeminiClient::from_config(&config));
    let graph = Arc::new(GraphApiClient::from_config(&config));
    let state = Arc::new(AppState {
        pipeline: Arc::new(ConversationPipeline::new(oracle)),
        sender: graph.clone(),
        media: graph,
        verify_token: config.verify_token.clone(),
        media_enabled: config.media_enabled,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Webhook server listening");
    axum::serve(listener, webhook::router(state)).await?;
    Ok(())
}
