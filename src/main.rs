use std::sync::Arc;

use nexus_webhook_notifier::{
    http_server, AppState, DeliveryEngine, RateLimiter, ServiceConfig, WebhookStore,
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nexus_webhook_notifier=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("webhook notifier stopped: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::from_env()?;
    if config.accounts.is_empty() {
        tracing::warn!("NOTIFIER_ACCOUNTS is empty, every request will be rejected");
    }

    let store = Arc::new(WebhookStore::new(&config.data_file));
    let engine = DeliveryEngine::new(store.clone(), config.delivery.clone())?;
    let limiter = RateLimiter::new(config.rate_limit.clone());
    let state = Arc::new(AppState::new(
        store,
        engine,
        limiter,
        Arc::new(config.accounts.clone()),
    ));

    let listener = TcpListener::bind(config.bind_addr).await?;
    http_server::serve(listener, state).await?;
    Ok(())
}
