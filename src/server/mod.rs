mod api;
mod error;
mod state;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;

pub use self::state::*;

/// 构建 API 服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/similar/{id}", get(api::similar_handler))
        .route("/search", post(api::search_handler))
        .route("/status", get(api::status_handler))
        .route("/rebuild", post(api::rebuild_handler))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：10M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
        .with_state(state)
}
