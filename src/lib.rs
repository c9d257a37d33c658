use std::sync::Arc;

use axum::{
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

pub mod admin;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod params;
pub mod pipeline;
pub mod pool;
pub mod precache;
pub mod resolver;
pub mod singleflight;
pub mod transform;

use crate::cache::CacheStore;
use crate::config::ServerConfig;
use crate::pool::WorkerPool;
use crate::resolver::Resolver;
use crate::singleflight::SingleFlight;

/// Shared application state, threaded through every handler via axum's
/// `State` extractor. Each field owns its own interior concurrency (the
/// resolver memo, the cache's source index, and the single-flight map are
/// all `DashMap`-backed), so `AppState` itself needs no lock.
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub resolver: Resolver,
    pub cache: Arc<CacheStore>,
    pub single_flight: SingleFlight,
    pub pool: WorkerPool,
}

impl AppState {
    pub fn new(config: ServerConfig, pool: WorkerPool) -> Self {
        let system_default = config.images_dir.join("system-default.webp");
        let resolver = Resolver::new(config.images_dir.clone(), system_default);
        let cache = Arc::new(CacheStore::new(config.cache_dir.clone()));
        Self {
            config: Arc::new(config),
            resolver,
            cache,
            single_flight: SingleFlight::new(),
            pool,
        }
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "imgserve",
    }))
}

async fn ready_handler(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Json<serde_json::Value> {
    let images_dir_ok = state.config.images_dir.is_dir();
    Json(json!({ "ready": images_dir_ok }))
}

/// Build the full router: image-serving and admin routes under request-id
/// propagation, tracing, a per-request timeout, and a rate limiter;
/// health/ready/metrics are left unthrottled so orchestrators can poll them
/// freely (spec §6).
pub fn router(state: Arc<AppState>) -> Router {
    let request_timeout = state.config.request_timeout;

    let governor_conf = Box::leak(Box::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(40)
            .finish()
            .expect("static governor config is always valid"),
    ));

    let image_routes = Router::new()
        .route("/img/*path", get(pipeline::serve_image))
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/cmd/clear", axum::routing::post(admin::clear))
        .route("/cmd/gitupdate", axum::routing::post(admin::gitupdate))
        .route("/cmd/*name", axum::routing::post(admin::unknown_command))
        .with_state(state.clone());

    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state);

    Router::new()
        .merge(image_routes)
        .merge(admin_routes)
        .merge(observability_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}
