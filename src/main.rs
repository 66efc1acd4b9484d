// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use signature_router::{
    api::router,
    config::{AppConfig, LogFormat, DEFAULT_LOG_FILTER},
    metrics::Metrics,
    outbox::OutboxCircuitBreakerListener,
    providers::{HttpChannelProvider, ProviderDispatcher},
    resilience::{
        CircuitBreakerRegistry, DegradedModeManager, DegradedModeRecoveryService,
        ProviderHealthTracker,
    },
    routing::{RoutingEngine, RoutingPolicy},
    scheduler::{ExpirySweeper, RecoveryPoller},
    signature::SignatureService,
    state::AppState,
    storage::{SignatureDatabase, DATABASE_FILE},
};

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(config.log_format);

    if let Err(e) = run(config).await {
        error!(error = %e, "Signature router failed");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.with_target(false).init(),
    }
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.data_dir)?;
    let db = Arc::new(SignatureDatabase::open(&config.data_dir.join(DATABASE_FILE))?);
    info!(path = %config.data_dir.display(), "Signature database opened");

    let metrics = Metrics::shared()?;
    let tracker = Arc::new(ProviderHealthTracker::new(config.health_window));
    let breakers = Arc::new(CircuitBreakerRegistry::new(
        config.circuit_breaker.clone(),
        tracker,
        metrics.clone(),
    ));
    breakers.add_listener(Arc::new(OutboxCircuitBreakerListener::new(
        db.clone(),
        metrics.clone(),
    )));
    let modes = Arc::new(DegradedModeManager::new(
        config.degraded.clone(),
        breakers.clone(),
        metrics.clone(),
    ));

    let mut dispatcher =
        ProviderDispatcher::new(config.dispatcher.clone(), breakers.clone(), metrics.clone());
    for (provider, url) in &config.provider_urls {
        let gateway = HttpChannelProvider::new(*provider, url.clone(), config.dispatcher.call_timeout)?;
        info!(provider = %provider, url = %url, "Provider gateway configured");
        dispatcher = dispatcher.with_provider(Arc::new(gateway));
    }
    if config.provider_urls.is_empty() {
        warn!("No provider gateways configured; every request will abort");
    }
    let dispatcher = Arc::new(dispatcher);

    let routing = Arc::new(RoutingEngine::new(
        RoutingPolicy::new(config.default_channel, config.enabled_channels()),
        modes.clone(),
        breakers.clone(),
    ));
    let ttl = chrono::Duration::from_std(config.signature_ttl)?;
    let signatures = Arc::new(SignatureService::new(
        db.clone(),
        routing,
        dispatcher.clone(),
        metrics.clone(),
        ttl,
    ));
    let recovery = Arc::new(DegradedModeRecoveryService::new(
        db.clone(),
        signatures.clone(),
        modes.clone(),
        config.recovery_batch_size,
    ));

    let shutdown = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(modes.clone().run(shutdown.clone()));
    tasks.spawn(ExpirySweeper::new(signatures.clone(), config.expiry_sweep_interval).run(shutdown.clone()));
    tasks.spawn(
        RecoveryPoller::new(recovery.clone(), modes.clone(), config.recovery_interval)
            .run(shutdown.clone()),
    );

    let state = AppState {
        signatures,
        modes,
        breakers,
        dispatcher,
        recovery,
        metrics,
    };
    let app = router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Signature router listening (docs at /docs)");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    while tasks.join_next().await.is_some() {}
    info!("Background tasks stopped");
    Ok(())
}
