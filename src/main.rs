use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leadgen_pipeline::config::Config;
use leadgen_pipeline::db::Database;
use leadgen_pipeline::db_storage::{LeadStore, PgDocumentStore};
use leadgen_pipeline::detection::Detector;
use leadgen_pipeline::enrichment::Enricher;
use leadgen_pipeline::handlers::{self, AppState};
use leadgen_pipeline::jobs::{JobQueue, PipelineRunner};
use leadgen_pipeline::qualification::QualificationPipeline;
use leadgen_pipeline::services::Capabilities;

/// Queued generation jobs before `generate` calls start waiting.
const JOB_QUEUE_CAPACITY: usize = 64;

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection and schema.
/// - Oracle, search, crawl and embedding capabilities.
/// - The background pipeline worker.
/// - HTTP routes and middleware (CORS, Rate Limiting).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadgen_pipeline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection pool
    let db = Database::new(config.require_database_url()?).await?;
    db.migrate().await?;
    tracing::info!("Database connection pool established");

    let store = LeadStore::new(Arc::new(PgDocumentStore::new(db.pool.clone())));

    // External capabilities, constructed once and shared by every stage
    let capabilities = Capabilities::from_config(&config)?;
    let workers = config.pipeline.worker_concurrency;

    let qualifier = Arc::new(QualificationPipeline::new(
        capabilities.oracle.clone(),
        capabilities.embedder.clone(),
        workers,
    ));
    let detector = Detector::from_capabilities(&capabilities, &config.pipeline);
    let enricher = Enricher::new(
        capabilities.crawler.clone(),
        capabilities.search.clone(),
        store.clone(),
        workers,
    );

    // Background worker draining the job queue
    let (queue, receiver) = JobQueue::new(JOB_QUEUE_CAPACITY);
    let runner = Arc::new(PipelineRunner::new(
        detector,
        enricher,
        qualifier.clone(),
        store.clone(),
    ));
    runner.spawn_worker(receiver);

    if config.api_key.is_none() {
        tracing::warn!("API_KEY not set; mutating endpoints are unauthenticated");
    }

    // Build application state
    let app_state = Arc::new(AppState {
        store,
        queue,
        qualifier,
        api_key: config.api_key.clone(),
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        .route("/api/v1/services", post(handlers::create_service))
        .route("/api/v1/services/:id", get(handlers::get_service))
        .route("/api/v1/services/:id/icp", put(handlers::replace_icp))
        .route("/api/v1/services/:id/generate", post(handlers::generate))
        .route("/api/v1/leads", get(handlers::list_leads))
        .route("/api/v1/qualify", post(handlers::qualify))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
