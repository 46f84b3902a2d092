mod auth;
mod calls;
mod config;
mod error;
mod metrics;
mod registry;
mod relay;
mod rooms;
mod store;
mod ws;

use anyhow::Context;
use axum::{
    body::Body,
    http::{header::HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::TokenVerifier;
use crate::config::GatewayConfig;
use crate::registry::SessionRegistry;
use crate::rooms::RoomRegistry;
use crate::store::pool::{check_pool_health, create_pg_pool, PoolConfig};
use crate::store::{ConversationStore, UserDirectory};
use crate::ws::GatewayState;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if config.is_dev_jwt_secret() {
        warn!("running with the development JWT secret; set LAGOON_GATEWAY_JWT_SECRET");
    }

    let verifier =
        Arc::new(TokenVerifier::new(&config.jwt_secret).context("invalid gateway JWT secret")?);

    let database_url = config
        .database_url
        .clone()
        .context("LAGOON_GATEWAY_DATABASE_URL must be set")?;
    let pool = create_pg_pool(&database_url, PoolConfig::from_env())
        .await
        .context("failed to initialize gateway PostgreSQL pool")?;
    check_pool_health(&pool).await.context("gateway PostgreSQL health check failed")?;

    let state = GatewayState {
        registry: SessionRegistry::default(),
        rooms: RoomRegistry::default(),
        users: UserDirectory::Postgres(pool.clone()),
        conversations: ConversationStore::Postgres(pool),
        verifier,
    };
    let app = build_router(state);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind gateway listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting gateway server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited unexpectedly")
}

fn build_router(state: GatewayState) -> Router {
    apply_middleware(Router::new().route("/healthz", get(healthz)).merge(ws::router(state)))
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = next.run(request).await;

    if let Ok(request_id_header) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, request_id_header);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
