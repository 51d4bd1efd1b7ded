//! OpenSASE Checkout - storefront cart and checkout daemon

use std::sync::Arc;

use anyhow::{Context, Result};
use opensase_checkout::api::{HttpStorefrontApi, HttpTokenRefresher, StaticToken, StorefrontApi, TokenRefresher};
use opensase_checkout::config::CheckoutConfig;
use opensase_checkout::notify::{NatsNotifier, NotificationSink, TracingNotifier};
use opensase_checkout::payment::{bridge, BridgeLauncher, NativeBridge};
use opensase_checkout::routes::{self, AppState};
use opensase_checkout::services::{CartStore, CheckoutPipeline};
use opensase_checkout::storage::FileStore;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = CheckoutConfig::load().context("invalid configuration")?;
    init_tracing(&config);
    tracing::info!(api = %config.api_base_url, storage = %config.storage_dir.display(), "configuration loaded");

    let client = reqwest::Client::builder().timeout(config.request_timeout()).build()?;
    let refresher: Arc<dyn TokenRefresher> = match &config.refresh_token {
        Some(token) => Arc::new(HttpTokenRefresher::new(client.clone(), &config.api_base_url, token.clone())),
        None => Arc::new(StaticToken),
    };
    let http = HttpStorefrontApi::with_client(client, config.api_base_url.clone(), refresher);
    if let Some(token) = &config.access_token {
        http.set_token(token.clone());
    }
    let api: Arc<dyn StorefrontApi> = Arc::new(http);

    let store = FileStore::open(&config.storage_dir)?;
    let cart = Arc::new(Mutex::new(CartStore::open(store)?));

    let notifier: Arc<dyn NotificationSink> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsNotifier::new(client)),
            Err(e) => {
                tracing::warn!(%url, error = %e, "nats unavailable, logging events only");
                Arc::new(TracingNotifier)
            }
        },
        None => Arc::new(TracingNotifier),
    };

    let (bridge_tx, listener) = NativeBridge::channel();
    let launcher = Arc::new(BridgeLauncher::new());
    let pipeline = Arc::new(
        CheckoutPipeline::new(api.clone(), cart, launcher.clone(), notifier)
            .with_max_retries(config.max_submission_retries)
            .with_gateway_key(config.gateway_key_id.clone()),
    );

    let bridge_pipeline = pipeline.clone();
    tokio::spawn(async move { bridge_pipeline.run_bridge(listener).await });

    let app = routes::router(AppState { pipeline, api })
        .merge(bridge::routes(bridge_tx, launcher.subscribe()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("OpenSASE Checkout listening on {}", config.bind_addr);
    axum::serve(tokio::net::TcpListener::bind(&config.bind_addr).await?, app).await?;
    Ok(())
}

fn init_tracing(config: &CheckoutConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
