use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use webhook_worker::{run, WorkerConfig, WorkerMetrics, WorkerRepositories};

#[tokio::main]
async fn main() {
    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(e.exit_code());
        }
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.http_pool_size as u32)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to database");
            std::process::exit(webhook_worker::WorkerError::StorageUnavailable(e.to_string()).exit_code());
        }
    };

    let store = Arc::new(webhook_storage::PostgresStore::new(pool));
    let repos = WorkerRepositories {
        delivery_queue: store.clone(),
        delivery_attempt_log: store,
    };

    let metrics = match WorkerMetrics::new() {
        Ok(metrics) => metrics,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize metrics registry");
            std::process::exit(1);
        }
    };

    let metrics_app = metrics_router(metrics.clone());
    let metrics_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(metrics_addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, metrics_app).await {
                    tracing::error!(error = %e, "metrics server failed");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to bind metrics listener"),
        }
    });

    if let Err(e) = run(config, repos, metrics, shutdown_signal()).await {
        tracing::error!(error = %e, "worker exited with error");
        std::process::exit(e.exit_code());
    }
}

fn metrics_router(metrics: Arc<WorkerMetrics>) -> axum::Router {
    axum::Router::new()
        .route("/metrics", axum::routing::get(serve_metrics))
        .with_state(metrics)
}

async fn serve_metrics(
    axum::extract::State(metrics): axum::extract::State<Arc<WorkerMetrics>>,
) -> Result<String, axum::http::StatusCode> {
    metrics.encode().map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
