//! Recommendation graph REST server.

use reco_api::config::{Config, GraphBackend};
use reco_api::server::{self, AppState};
use reco_bus::EventChannel;
use reco_engine::{GraphMirror, RecommendationService};
use reco_graph::InMemoryGraphStore;
use reco_types::{GraphStore, Recommender};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(backend = ?config.graph_backend, "starting recommendation graph");

    match config.graph_backend {
        GraphBackend::Memory => run(Arc::new(InMemoryGraphStore::new()), &config).await,
        #[cfg(feature = "sqlite")]
        GraphBackend::Sqlite => {
            let graph = reco_graph::SqliteGraphStore::new(&config.sqlite_path)?;
            tracing::info!(path = %config.sqlite_path, "sqlite graph store opened");
            run(Arc::new(graph), &config).await
        }
        #[cfg(not(feature = "sqlite"))]
        GraphBackend::Sqlite => {
            Err("RECO_GRAPH_BACKEND=sqlite requires the `sqlite` feature".into())
        }
    }
}

async fn run<G: GraphStore + 'static>(
    graph: Arc<G>,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let bus = Arc::new(EventChannel::new());
    let mirror = Arc::new(GraphMirror::new(Arc::clone(&graph)).with_retry(config.mirror_retry()));
    mirror.register(&bus).await?;

    let recommender: Arc<dyn Recommender> = Arc::new(
        RecommendationService::new(graph).with_limit(config.recommendation_limit),
    );
    let state = Arc::new(AppState {
        recommender,
        bus: Arc::clone(&bus),
        interaction_timeout: config.interaction_timeout(),
    });

    let app = server::router(state);
    let addr: SocketAddr = config.listen.parse()?;
    tracing::info!("recommendation API listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    bus.shutdown().await;
    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received terminate signal, shutting down"),
    }
}
