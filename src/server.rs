use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{
    acknowledge_anomaly, claim_link, create_link, get_history, get_link_status, health_check,
    list_anomalies, record_deposit, recover_deposit, AppState,
};

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Link lifecycle
                .route("/links", post(create_link))
                .route("/links/:id", get(get_link_status))
                .route("/links/:id/deposit", post(record_deposit))
                .route("/links/:id/recover", post(recover_deposit))
                .route("/links/:id/claim", post(claim_link))
                // History
                .route("/history/:address", get(get_history))
                // Operator endpoints
                .route("/admin/anomalies", get(list_anomalies))
                .route("/admin/anomalies/:id/acknowledge", post(acknowledge_anomaly)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}
