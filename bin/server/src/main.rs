mod config;
mod db;
mod routes;
mod runners;

use crate::config::ServerConfig;
use crate::db::{PgExecutionStore, PgWorkflowSource, WorkflowRepository};
use crate::routes::AppState;
use crate::runners::{HttpAgentInvoker, HttpToolInvoker};
use amber_loom_workflow::ExecutionEngine;
use amber_loom_workflow::nats::NatsProgressPublisher;
use amber_loom_workflow::publisher::{NullPublisher, ProgressPublisher};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    // There are no editing endpoints, so definitions arrive via seed file
    if let Some(path) = config.seed_workflows_path.as_deref() {
        let inserted = WorkflowRepository::new(db_pool.clone())
            .seed_from_file(path)
            .await
            .expect("failed to seed workflows");
        tracing::info!(inserted, path, "Seeded workflow definitions");
    }

    // Progress updates go to JetStream when configured, otherwise nowhere
    let publisher: Arc<dyn ProgressPublisher> = match config.nats.clone() {
        Some(nats) => {
            tracing::info!(url = %nats.url, "Connecting to NATS...");
            Arc::new(
                NatsProgressPublisher::connect(nats)
                    .await
                    .expect("failed to connect to NATS"),
            )
        }
        None => {
            tracing::info!("No NATS configured, progress events are not published");
            Arc::new(NullPublisher)
        }
    };

    let agents =
        HttpAgentInvoker::new(&config.agents).expect("failed to build agent runner client");
    let tools = HttpToolInvoker::new(&config.tools).expect("failed to build tool runner client");

    let engine = ExecutionEngine::new(
        Arc::new(PgWorkflowSource::new(db_pool.clone())),
        Arc::new(PgExecutionStore::new(db_pool)),
        Arc::new(agents),
        Arc::new(tools),
        publisher,
    )
    .with_config(config.engine);

    let app = routes::router(AppState { engine });

    let listener = tokio::net::TcpListener::bind(&config.http.bind_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.http.bind_addr);

    axum::serve(listener, app).await.expect("server error");
}
