//! HTTP API for the frontend: the food log, recipe ideas and captures

mod error;
mod handlers;

pub use error::ApiError;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info_span;

use crate::ai::{LlmClient, RecipeSuggestor};
use crate::config::ServerConfig;
use crate::pipeline::CaptureHandle;
use crate::storage::FoodLog;

/// Shared by every handler
pub struct AppState<C> {
    pub log: Arc<FoodLog>,
    /// Missing when no model API key is configured
    pub recipes: Option<Arc<RecipeSuggestor<C>>>,
    /// Missing when the API runs without a capture pipeline
    pub capture: Option<CaptureHandle>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
            recipes: self.recipes.clone(),
            capture: self.capture.clone(),
        }
    }
}

fn cors(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    if allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid allowed origin {:?}", origin);
                None
            }
        })
        .collect::<Vec<_>>();
    tracing::debug!("Allowed origins: {:?}", origins);
    layer.allow_origin(AllowOrigin::list(origins))
}

/// All routes, with photos served from `images_dir`
pub fn router<C: LlmClient>(
    state: AppState<C>,
    server: &ServerConfig,
    images_dir: impl Into<PathBuf>,
) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::extract::Request| {
            let uri = request.uri().to_string();
            info_span!("http_request", method = ?request.method(), uri)
        });

    let mut router = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/log", get(handlers::list_log::<C>))
        .route("/api/item-log", get(handlers::list_log::<C>))
        .route(
            "/api/log/{id}",
            get(handlers::get_entry::<C>).delete(handlers::delete_entry::<C>),
        )
        .route("/api/recipes", get(handlers::recipes::<C>))
        .route("/api/dishes", get(handlers::dishes::<C>))
        .route("/api/recipes/full", post(handlers::full_recipe::<C>))
        .route("/api/capture", post(handlers::trigger_capture::<C>))
        .route("/api/capture/status", get(handlers::capture_status::<C>))
        .route("/api/capture-status", get(handlers::capture_status::<C>))
        .nest_service("/api/images", ServeDir::new(images_dir.into()))
        .with_state(state);

    if let Some(static_dir) = &server.static_dir {
        let index = static_dir.join("index.html");
        router = router.fallback_service(ServeDir::new(static_dir).fallback(ServeFile::new(index)));
    }

    router.layer(cors(&server.allowed_origins)).layer(trace_layer)
}
