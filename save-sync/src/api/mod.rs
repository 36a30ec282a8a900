//! HTTP API for the reference document store
//!
//! Exposes a persistence backend over HTTP with the same conditional-write
//! contract the save engine relies on; `HttpBackend` is its client.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

pub mod documents;

use crate::backend::PersistenceBackend;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn PersistenceBackend>,
}

impl ApiState {
    pub fn new(store: Arc<dyn PersistenceBackend>) -> Self {
        Self { store }
    }
}

/// Configure all API routes
pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/documents", post(documents::create_document))
        .route(
            "/documents/{id}",
            get(documents::get_document).put(documents::save_document),
        )
}

/// Health check endpoint
pub async fn health_check(State(_state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "docstore",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}
