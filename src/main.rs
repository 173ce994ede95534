use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use grimbots_backend::api::{self, AppState};
use grimbots_backend::bots::{BotServices, BotSupervisor, SupervisorConfig};
use grimbots_backend::cache::CacheService;
use grimbots_backend::config::AppConfig;
use grimbots_backend::database::{
    self, BotRepository, GatewayRepository, PaymentRepository, PoolRepository,
};
use grimbots_backend::gateways::GatewayFactory;
use grimbots_backend::health::HealthChecker;
use grimbots_backend::jobs::{JobQueue, JobRuntime, JobRuntimeConfig};
use grimbots_backend::logging::init_tracing;
use grimbots_backend::services::{
    CredentialCipher, DeliveryService, MetaDispatcher, PaymentOrchestrator, PlatformJobHandler,
};
use grimbots_backend::tracking::TrackingStore;
use grimbots_backend::workers::{Reconciler, ReconcilerConfig};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "🚀 Starting GrimBots backend"
    );

    info!("📊 Initializing database connection pool...");
    let db_pool = database::init_pool(&config.database).await?;
    info!(
        max_connections = config.database.max_connections,
        "✅ Database connection pool initialized"
    );

    info!("🔌 Connecting to Redis...");
    let cache = CacheService::connect(&config.cache.redis_url).await?;
    info!("✅ Redis connection established");

    let payments = PaymentRepository::new(db_pool.clone());
    let bots = BotRepository::new(db_pool.clone());
    let gateways = GatewayRepository::new(db_pool.clone());
    let pools = PoolRepository::new(db_pool.clone());

    let cipher = CredentialCipher::new(&config.credentials_key);
    let factory = GatewayFactory::new(config.splits.clone());
    let tracking = TrackingStore::new(cache.clone());
    let queue = JobQueue::new(cache.clone());

    let orchestrator = PaymentOrchestrator::new(
        payments.clone(),
        bots.clone(),
        gateways.clone(),
        tracking.clone(),
        factory.clone(),
        cipher.clone(),
        queue.clone(),
        cache.clone(),
        config.webhook.clone(),
    );

    let meta = MetaDispatcher::new(
        payments.clone(),
        bots.clone(),
        pools.clone(),
        cipher.clone(),
    )?;
    let delivery = DeliveryService::new(payments.clone(), bots.clone());

    // Shutdown fan-out shared by every background task.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = Arc::new(Reconciler::new(
        payments.clone(),
        orchestrator.clone(),
        queue.clone(),
        ReconcilerConfig::from_env(),
    ));
    let reconciler_handle = Arc::clone(&reconciler).spawn(shutdown_rx.clone());

    let handler = Arc::new(PlatformJobHandler::new(
        meta.clone(),
        delivery.clone(),
        Arc::clone(&reconciler),
    ));
    let runtime = JobRuntime::new(queue.clone(), handler, JobRuntimeConfig::from_env());
    let mut worker_handles = runtime.spawn(shutdown_rx.clone());
    worker_handles.push(reconciler_handle);

    info!("🤖 Starting bot fleet...");
    let supervisor = BotSupervisor::new(
        bots.clone(),
        Arc::new(BotServices {
            orchestrator: orchestrator.clone(),
            bots: bots.clone(),
            pools: pools.clone(),
            tracking: tracking.clone(),
            meta: meta.clone(),
        }),
        SupervisorConfig::default(),
    );
    let bot_statuses = supervisor.statuses();
    let bot_handles = supervisor.spawn_all(shutdown_rx.clone()).await?;
    worker_handles.extend(bot_handles);

    let health = HealthChecker::new(db_pool.clone(), cache.clone(), bot_statuses);

    let state = Arc::new(AppState {
        orchestrator,
        factory,
        payments,
        pools,
        gateways,
        cipher,
        health,
    });
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx.clone()))
        .await?;

    // Serve returned; make sure every worker saw the signal before draining.
    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        if tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            warn!("Timed out waiting for a background task to stop");
        }
    }

    info!("👋 Server shutdown complete");
    Ok(())
}
