use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::HeaderMap,
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use cove_api::middleware::require_auth;
use cove_api::{AppState, AppStateInner, auth, contacts, groups, messages, users};
use cove_gateway::{GatewayState, admission, connection};
use cove_store::Store;

/// Hourly sweep of keys whose TTL elapsed without being read.
const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
struct ServerState {
    gateway: GatewayState,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cove=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("COVE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let store_path = std::env::var("COVE_DB_PATH").unwrap_or_else(|_| "cove.db".into());
    let host = std::env::var("COVE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("COVE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let geo_strict = matches!(
        std::env::var("COVE_GEO_STRICT").as_deref(),
        Ok("1") | Ok("true")
    );

    // Init store
    let store = Arc::new(Store::open(&PathBuf::from(&store_path))?);

    // Shared state
    let gateway = GatewayState::new(store.clone(), jwt_secret.clone(), geo_strict);
    let app_state: AppState = Arc::new(AppStateInner {
        store: store.clone(),
        jwt_secret,
        router: gateway.router.clone(),
        geo_strict,
    });
    let state = ServerState {
        gateway: gateway.clone(),
    };

    // Periodic expiry sweep
    let purge_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match purge_store.purge_expired() {
                Ok(0) => {}
                Ok(n) => info!("purged {} expired keys", n),
                Err(err) => warn!("expiry sweep failed: {err}"),
            }
        }
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/users/me", get(users::me))
        .route("/users/me", patch(users::update_me))
        .route("/users/search", get(users::search))
        .route("/contacts", get(contacts::list_contacts))
        .route("/contacts/requests", post(contacts::send_request))
        .route("/contacts/requests", get(contacts::list_requests))
        .route(
            "/contacts/requests/{request_id}/respond",
            post(contacts::respond),
        )
        .route("/groups", post(groups::create))
        .route("/groups", get(groups::list_mine))
        .route("/groups/{group_id}", get(groups::get))
        .route("/groups/{group_id}", patch(groups::rename))
        .route("/groups/{group_id}/members", post(groups::add_members))
        .route(
            "/groups/{group_id}/members/{user_id}",
            delete(groups::remove_member),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::history),
        )
        .route("/messages", post(messages::send))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Cove server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let country = admission::country_from_headers(&headers);
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state.gateway, country))
}
