//! DraftFlow HTTP Gateway
//!
//! The single entry point for all inbound traffic.
//! Handles:
//! - Slack interactivity and events ingress (signature-verified)
//! - Scheduler job triggers (token-guarded)
//! - Observability (logging, tracing)

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, Level};

use draftflow_clients::{
    OpenAiGenerator, PubMedClient, SheetsClient, SlackClient, WordPressClient,
};
use draftflow_common::{config::AppConfig, MemoryStore};
use draftflow_engine::{EngineSettings, WorkflowEngine};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: WorkflowEngine,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting DraftFlow Gateway v{}", draftflow_common::VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;
    let config = Arc::new(config);

    // Wire capability clients into the engine
    let store = Arc::new(MemoryStore::new());
    let generator = Arc::new(OpenAiGenerator::new(config.openai.clone())?);
    let search = Arc::new(PubMedClient::new(config.pubmed.clone())?);
    let publisher = Arc::new(WordPressClient::new(config.wordpress.clone())?);
    let planning = Arc::new(SheetsClient::new(config.sheets.clone())?);
    let chat = Arc::new(SlackClient::new(&config.slack)?);

    let engine = WorkflowEngine::new(
        EngineSettings {
            workflow: config.workflow.clone(),
            notify_channel: config.slack.channel_id.clone(),
        },
        store,
        generator,
        search,
        publisher,
        planning,
        chat,
    );

    // Create app state
    let state = AppState {
        config: config.clone(),
        engine,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoint (no auth)
        .route("/health", get(handlers::health::health))
        // Slack ingress (signature-verified)
        .route("/slack/actions", post(handlers::slack::actions))
        .route("/slack/events", post(handlers::slack::events))
        // Scheduler job triggers (token-guarded)
        .route(
            "/jobs/notify-planned",
            post(handlers::jobs::notify_planned),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
