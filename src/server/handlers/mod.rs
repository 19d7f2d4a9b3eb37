use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::server::AppState;

pub(crate) mod chat;
pub(crate) mod health;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/healthz", get(health::healthz))
        .route("/upstream-health", get(health::upstream_health))
}
