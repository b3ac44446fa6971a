//! # HTTP Endpoints
//!
//! The authority's public HTTP surface: CRL download, revocation and a health
//! probe. Routing follows `axum` conventions with shared state in [`AppState`].

pub mod crl;
pub mod error;
pub mod revoke;
pub mod server;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::authority::Authority;

pub use error::ApiError;
pub use server::{shutdown_signal, start_api_server, TlsConnectInfo};

#[derive(Debug, Clone)]
pub struct AppState {
    pub authority: Arc<Authority>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/crl", get(crl::get_crl))
        .route("/revoke", post(revoke::revoke))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": crate::VERSION }))
}
