//! API server entry point.

use std::sync::Arc;

use api::{AppState, Backends, Config, LogFormat, PostgresBackends};
use coordination::{PostgresRowLockBackend, RedisLockBackend};
use domain::PostgresCouponRepository;
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{KafkaBroker, PostgresDeadLetterRepository};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn postgres_state(config: &Config, database_url: &str) -> Arc<AppState<PostgresBackends>> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
        .expect("failed to connect to PostgreSQL");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    // Row-lock waiters park a connection each; keep them off the repository pool.
    let lock_pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
        .expect("failed to connect lock pool");

    let remote = RedisLockBackend::new(
        &config.redis_url,
        config.coordination.remote_acquire_timeout,
        config.coordination.remote_command_timeout,
    )
    .expect("invalid REDIS_URL");
    let fallback = PostgresRowLockBackend::new(lock_pool, config.coordination.fallback_lock_timeout);

    let broker = KafkaBroker::new(&config.kafka_brokers, config.kafka_send_timeout)
        .expect("invalid KAFKA_BROKERS");

    let state = Arc::new(AppState::new(
        PostgresCouponRepository::new(pool.clone()),
        remote,
        fallback,
        PostgresDeadLetterRepository::new(pool),
        broker,
        config,
    ));

    state
        .dead_letters
        .sync_pending_gauges()
        .await
        .expect("failed to load dead letter counts");

    state
}

async fn serve<B: Backends>(state: Arc<AppState<B>>, metrics_handle: PrometheusHandle, addr: String) {
    let publisher = state.publisher.clone();
    let app = api::create_app(state, metrics_handle);

    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Deliver whatever was committed before the listener closed.
    publisher.flush().await;
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Wire backends and serve
    match config.database_url.clone() {
        Some(database_url) => {
            let state = postgres_state(&config, &database_url).await;
            serve(state, metrics_handle, config.addr()).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running with in-memory stores");
            let state = api::create_in_memory_state(&config);
            serve(state, metrics_handle, config.addr()).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
