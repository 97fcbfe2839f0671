//! Vault Keeper
//!
//! HTTP front end for the vault orchestrator. Exposes deposits, withdrawals,
//! rebalances and reads of the cached vault record, and optionally rebalances
//! on a fixed interval.

mod error;
mod routes;
mod services;
#[cfg(test)]
mod testing;
mod types;

use anyhow::Context;
use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    Router,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tower_http::{
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vault_orchestrator::{DeploymentConfig, Ledger, OrchestratorConfig, RpcLedger, VaultOrchestrator};

use routes::{health_router, vault_router, SharedOrchestrator};
use services::spawn_rebalance_loop;
use types::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vault_keeper=info,vault_orchestrator=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());
    let orchestrator_config =
        OrchestratorConfig::from_env().context("loading orchestrator configuration")?;
    let deployment = DeploymentConfig::load(&orchestrator_config.venues_config)
        .context("loading venue deployment file")?;

    info!(port = config.port, vault = %orchestrator_config.vault, "Starting vault keeper");
    info!(
        cors_origins = ?config.cors_origins,
        api_keys_configured = !config.api_keys.is_empty(),
        rebalance_interval_secs = config.rebalance_interval_secs,
        rpc_url = %orchestrator_config.rpc_url,
        "Configuration loaded"
    );

    let ledger = RpcLedger::from_config(&orchestrator_config).context("opening ledger")?;
    let orchestrator = VaultOrchestrator::from_config(ledger, &orchestrator_config, &deployment)
        .await
        .context("loading vault")?;
    let orchestrator = Arc::new(Mutex::new(orchestrator));

    if config.rebalance_interval_secs > 0 {
        spawn_rebalance_loop(
            orchestrator.clone(),
            Duration::from_secs(config.rebalance_interval_secs),
        );
    }

    let app = build_app(config.clone(), orchestrator);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(address = %addr, "Server listening");

    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}

/// Header carrying the API key on vault routes
const API_KEY_HEADER: &str = "x-api-key";

/// Vault routes require an API key when any is configured; `/health` stays open
fn build_app<L: Ledger + 'static>(
    config: Arc<Config>,
    orchestrator: SharedOrchestrator<L>,
) -> Router {
    let vault = vault_router(orchestrator.clone()).route_layer(middleware::from_fn_with_state(
        config.clone(),
        require_api_key,
    ));

    Router::new()
        .merge(health_router(orchestrator))
        .merge(vault)
        .layer(cors_layer(&config.cors_origins))
        .layer(RequestBodyLimitLayer::new(16 * 1024))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(API_KEY_HEADER)])
}

async fn require_api_key(
    State(config): State<Arc<Config>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    if !config.admits(key) {
        warn!(
            path = %request.uri().path(),
            key_present = key.is_some(),
            "Rejected request without a valid API key"
        );
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
