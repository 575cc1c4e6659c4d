use std::net::SocketAddr;
use std::sync::Arc;

use safar_api::{app, state::AppState};
use safar_store::{DbClient, PgActivityLogger, PgStore};
use safar_ticketing::TicketService;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safar_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = safar_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Safar API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let store = Arc::new(PgStore::new(db.pool.clone()));
    let logger = Arc::new(PgActivityLogger::new(db.pool.clone()));
    let service = TicketService::new(store, logger)
        .with_ticket_prefix(config.business.ticket_prefix.clone());

    let app_state = AppState {
        service: Arc::new(service),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
