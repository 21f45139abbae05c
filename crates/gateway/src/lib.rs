//! HTTP API gateway for Blocks.
//!
//! Exposes the chat stream, conversation CRUD, the tool list and a live
//! domain-event log under `/api`. Everything except `/api/health` sits
//! behind bearer-token authentication.
//!
//! Built on Axum.

pub mod chat;
pub mod conversations;
pub mod error;
pub mod observe;

use axum::extract::DefaultBodyLimit;
use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderValue, Method, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use blocks_agent::ChatOrchestrator;
use blocks_config::{AppConfig, LOCAL_USER};
use blocks_core::event::EventBus;
use blocks_core::store::ChatStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

pub use error::ApiError;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: ChatOrchestrator,
    pub store: Arc<dyn ChatStore>,
    pub events: Arc<EventBus>,
    /// Bearer token -> user id. Empty means every caller is the local user.
    pub api_tokens: HashMap<String, String>,
    pub cors_origin: Option<String>,
}

pub type SharedState = Arc<GatewayState>;

/// The caller, as resolved by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let api = Router::new()
        .route(
            "/conversations",
            get(conversations::list_handler).post(conversations::create_handler),
        )
        .route(
            "/conversations/{id}",
            get(conversations::get_handler)
                .patch(conversations::rename_handler)
                .delete(conversations::delete_handler),
        )
        .route("/chat/{conversation_id}", post(chat::chat_handler))
        .route("/tools", get(observe::list_tools_handler))
        .route("/events", get(observe::events_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .route("/health", get(health_handler));

    let mut router = Router::new()
        .nest("/api", api)
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(1024 * 1024));

    if let Some(cors) = state.cors_origin.as_deref().and_then(cors_layer) {
        router = router.layer(cors);
    }

    router.layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origin: &str) -> Option<CorsLayer> {
    let origin = match HeaderValue::from_str(origin) {
        Ok(origin) => origin,
        Err(e) => {
            warn!(origin, error = %e, "Ignoring invalid CORS origin");
            return None;
        }
    };
    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600)),
    )
}

/// Start the gateway HTTP server.
///
/// Builds the provider, store, tools and orchestrator once and shares them
/// through the router state.
pub async fn start(config: AppConfig) -> blocks_core::Result<()> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider: Arc<dyn blocks_core::provider::Provider> =
        Arc::new(blocks_providers::OpenAiCompatProvider::from_config(&config)?);
    let store: Arc<dyn ChatStore> = Arc::new(blocks_store::SqliteStore::new(&config.store.path).await?);
    let registry = Arc::new(blocks_tools::default_registry(
        provider.clone(),
        store.clone(),
        &config.model,
        config.max_tokens,
    ));
    let events = Arc::new(EventBus::default());
    let orchestrator =
        ChatOrchestrator::from_config(provider, registry, &config).with_events(events.clone());

    let state = Arc::new(GatewayState {
        orchestrator,
        store,
        events,
        api_tokens: config.gateway.api_tokens.clone(),
        cors_origin: Some(config.gateway.cors_origin.clone()),
    });

    if state.api_tokens.is_empty() {
        warn!("No API tokens configured; every request acts as the local user");
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, model = %config.model, store = %config.store.path, "Gateway listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// Resolve the caller from `Authorization: Bearer <token>`.
///
/// With no tokens configured every request runs as the local user.
async fn auth_middleware(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = if state.api_tokens.is_empty() {
        LOCAL_USER.to_string()
    } else {
        let token = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match token.and_then(|t| state.api_tokens.get(t)) {
            Some(user) => user.clone(),
            None => {
                warn!(path = %req.uri().path(), "Rejected request with missing or unknown bearer token");
                return Err(ApiError::Unauthorized);
            }
        }
    };

    req.extensions_mut().insert(AuthUser(user));
    Ok(next.run(req).await)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
