use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use courier_api::auth::{self, AppState, AppStateInner};
use courier_api::conversations;
use courier_api::middleware::require_auth;
use courier_gateway::connection;
use courier_gateway::delivery::DeliveryEngine;
use courier_gateway::presence::PresenceRegistry;

#[derive(Clone)]
struct ServerState {
    engine: DeliveryEngine,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("COURIER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("COURIER_DB_PATH").unwrap_or_else(|_| "courier.db".into());
    let host = std::env::var("COURIER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("COURIER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(courier_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state: one presence registry, one delivery engine
    let engine = DeliveryEngine::new(db.clone(), PresenceRegistry::new());
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        engine: engine.clone(),
        jwt_secret: jwt_secret.clone(),
    });

    let state = ServerState { engine, jwt_secret };

    // Routes
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::get_messages),
        )
        .route(
            "/conversations/{conversation_id}/read",
            post(conversations::mark_read),
        )
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new().route("/gateway", get(ws_upgrade)).with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Courier relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.engine, state.jwt_secret)
    })
}
