//! The query api: read-only routes under `/api` over the stored records.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::Request,
    http::{header, Method},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};

use crate::store::RecordStore;

pub mod error;
pub mod handlers;
pub mod params;

#[derive(Clone)]
/// Shared state of the api handlers.
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    /// Configured broker host, reported by the health route.
    pub mqtt_broker: String,
    /// Configured database name, reported by the health route.
    pub database: String,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, mqtt_broker: String, database: String) -> Self {
        Self {
            store,
            mqtt_broker,
            database,
        }
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    log::info!(target: "roomsafed::api", "{} {} {} {:?}", method, path, response.status().as_u16(), started.elapsed());
    response
}

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/sensors", get(handlers::list_sensors))
        .route("/sensors/latest", get(handlers::latest_sensor))
        .route("/alerts", get(handlers::list_alerts))
        .route("/status", get(handlers::latest_status))
        .route("/stats", get(handlers::stats));

    Router::new()
        .nest("/api", api_routes)
        .layer(cors_layer())
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Serves the api on `0.0.0.0:port` until `shutdown` is notified.
pub async fn serve(state: AppState, port: u16, shutdown: Arc<Notify>) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    log::info!(target: "roomsafed::api", "Starting on http://{}", addr);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await
}
