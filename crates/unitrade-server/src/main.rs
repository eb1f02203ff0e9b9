mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use unitrade_api::storage::ImageStorage;
use unitrade_api::{AppStateInner, router};
use unitrade_gateway::{Dispatcher, EphemeralRooms, GatewayContext, PersistedChats, handle_connection};

use crate::config::Config;

#[derive(Clone)]
struct GatewayState {
    ctx: GatewayContext,
    shutdown: CancellationToken,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unitrade=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(unitrade_db::Database::open(&config.db_path)?);
    let storage = ImageStorage::new(config.storage_dir.clone(), &config.public_url).await?;
    info!("Listing images stored in {}", config.storage_dir.display());

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state = Arc::new(AppStateInner::new(
        db.clone(),
        config.jwt_secret.clone(),
        config.admin_emails.clone(),
        storage,
        dispatcher.clone(),
    ));

    let shutdown = CancellationToken::new();
    let gateway_state = GatewayState {
        ctx: GatewayContext {
            dispatcher: dispatcher.clone(),
            rooms: EphemeralRooms::new(dispatcher.clone()),
            chats: PersistedChats::new(db, dispatcher),
            jwt_secret: Arc::from(config.jwt_secret.as_str()),
        },
        shutdown: shutdown.clone(),
    };

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway_state);

    let app = Router::new()
        .merge(router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("UniTrade server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.ctx, state.shutdown))
}

/// Resolves on Ctrl-C and cancels every open gateway connection.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
    shutdown.cancel();
}
