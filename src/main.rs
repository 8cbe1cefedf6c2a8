//! Grocery Bot - chat ordering front end for a Strapi catalog
//!
//! Each inbound chat event advances a per-session state machine that browses
//! the catalog, edits the user's cart and captures a checkout email.

mod api;
mod backend;
mod cart;
mod checkout;
mod config;
mod db;
mod locks;
mod render;
mod runtime;
mod state_machine;
mod transport;

use api::{create_router, AppState};
use backend::{LoggingBackend, StrapiClient};
use config::BotConfig;
use db::Database;
use runtime::{ConversationRuntime, DatabaseStorage, ProductionRuntime};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use transport::TelegramTransport;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grocery_bot=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false),
        )
        .init();

    let config = BotConfig::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening session database");
    let db = Database::open(&config.db_path)?;
    tracing::info!(sessions = db.session_count()?, "Session database ready");

    tracing::info!(
        api_url = %config.strapi.api_url,
        media_url = %config.strapi.media_url,
        quantities = ?config.quantities.as_slice(),
        "Connecting to catalog backend"
    );
    let backend = Arc::new(LoggingBackend::new(StrapiClient::new(config.strapi.clone())?));
    let transport = TelegramTransport::new(config.telegram.clone())?;

    let runtime: ProductionRuntime = ConversationRuntime::new(
        DatabaseStorage::new(db),
        backend,
        transport,
        config.quantities.clone(),
    );
    let state = AppState::new(Arc::new(runtime));

    let app = create_router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Grocery bot listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
