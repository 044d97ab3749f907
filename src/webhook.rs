//! Webhook receiver for Telegram updates.
//!
//! `POST /webhook/telegram` checks the `X-Telegram-Bot-Api-Secret-Token`
//! header, decodes the update and hands channel posts to the processor on a
//! detached task. `GET /health` is a liveness probe.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use teloxide::types::{Update, UpdateKind};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::processor::PostProcessor;
use crate::telegram::inbound_from_message;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct WebhookState {
    processor: Arc<PostProcessor>,
    secret: Option<String>,
}

impl WebhookState {
    pub fn new(processor: Arc<PostProcessor>, secret: Option<String>) -> Self {
        Self {
            processor,
            secret: secret.filter(|s| !s.is_empty()),
        }
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook/telegram", post(telegram_webhook))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until ctrl-c, then finish the posts already accepted
pub async fn serve(addr: SocketAddr, state: WebhookState) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Webhook server listening on {}", addr);

    serve_until(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down webhook server");
    })
    .await
}

pub async fn serve_until<F>(
    listener: TcpListener,
    state: WebhookState,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let processor = Arc::clone(&state.processor);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    let finished = processor.drain().await;
    if finished > 0 {
        info!("Finished {} in-flight posts", finished);
    }
    Ok(())
}

/// Compare without short-circuiting on the first differing byte
fn secrets_match(provided: &str, expected: &str) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .bytes()
        .zip(expected.bytes())
        .fold(0, |acc, (a, b)| acc | (a ^ b))
        == 0
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn telegram_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if let Some(expected) = &state.secret {
        let provided = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if !provided.is_some_and(|p| secrets_match(p, expected)) {
            warn!("Rejected webhook call with invalid secret");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "detail": "Invalid webhook secret" })),
            );
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!("Failed to decode webhook update: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": "Invalid update payload" })),
            );
        }
    };

    match &update.kind {
        UpdateKind::ChannelPost(msg) => {
            // detached so the edit and its log entry survive a dropped request
            state.processor.spawn(inbound_from_message(msg));
        }
        _ => debug!("Ignoring update {:?}", update.id),
    }

    (StatusCode::OK, Json(json!({ "ok": true })))
}
