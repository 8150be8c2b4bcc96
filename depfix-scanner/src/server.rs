use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::json;
use tracing::{Instrument, error, info, info_span, instrument, warn};

use depfix::config::AuditConfig;
use depfix::context::Services;
use depfix::status::Status;
use depfix::triggers::webhook::{Delivery, SIGNATURE_HEADER, accept_webhook, on_publish};

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub config: Arc<AuditConfig>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/npm", post(npm_webhook))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Verifies and parses the delivery inline; the publish fan-out runs in the
/// background and the sender gets 202 right away.
#[instrument(skip_all, fields(bytes = body.len()))]
async fn npm_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let delivery = match accept_webhook(&state.config, signature, &body) {
        Ok(delivery) => delivery,
        Err(e) => {
            warn!(error = %e, "webhook rejected");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": format!("{e:#}") }))).into_response();
        }
    };

    match delivery {
        Delivery::Rejected(status) => {
            warn!("webhook signature mismatch");
            (StatusCode::UNAUTHORIZED, Json(json!({ "error": status.message }))).into_response()
        }
        Delivery::Ignored(status) => (StatusCode::OK, Json(status)).into_response(),
        Delivery::Publish { package, version } => {
            let accepted = Status::success(format!("Accepted publish of `{package}@{version}`"));
            let span = info_span!("publish", package = %package, version = %version);
            tokio::spawn(
                async move {
                    match on_publish(state.services, state.config, &package, &version).await {
                        Ok(status) => info!(%status, "publish handled"),
                        Err(e) => error!(error = %e, "publish fan-out failed"),
                    }
                }
                .instrument(span),
            );
            (StatusCode::ACCEPTED, Json(accepted)).into_response()
        }
    }
}
