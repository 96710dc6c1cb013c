use std::sync::Arc;

use dotenvy::dotenv;
use engagement_server::config::Config;
use engagement_server::db::{get_db_backend, seed_default_achievements};
use engagement_server::logging::init_tracing;
use engagement_server::service::EngagementService;
use tracing::info;

#[tokio::main]
async fn main() {
    dotenv().ok();
    let config = Config::from_env().expect("invalid configuration");
    let _log_guard = init_tracing(&config.log_level);

    let db = get_db_backend(&config.backend).expect("failed to open store");
    db.init().expect("failed to initialize schema");
    seed_default_achievements(db.as_ref()).expect("failed to seed achievements");

    let service = EngagementService::new(db, config.engine.clone(), config.retry)
        .expect("invalid engine configuration");
    let service = Arc::new(service);
    let app = engagement_server::build_app(service, &config.allowed_origin);

    let allowed_origin = if config.allowed_origin.is_empty() {
        "any".to_string()
    } else {
        config.allowed_origin.join(",")
    };
    info!(
        addr = %config.bind_addr,
        backend = config.backend.name(),
        %allowed_origin,
        "engagement server listening"
    );
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
