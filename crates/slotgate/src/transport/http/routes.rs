//! Read-only status routes.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::throttle::{Throttle, ThrottleStatus};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: ThrottleStatus,
    /// The next request would be refused.
    pub saturated: bool,
}

impl From<ThrottleStatus> for StatusResponse {
    fn from(status: ThrottleStatus) -> Self {
        Self {
            saturated: status.is_saturated(),
            status,
        }
    }
}

async fn throttle_status(State(throttle): State<Arc<Throttle>>) -> Json<StatusResponse> {
    Json(throttle.status().into())
}

/// `GET /throttle/status`. Merge after [`throttled`](super::throttled) so it is never gated.
pub fn status_routes(throttle: Arc<Throttle>) -> Router {
    Router::new()
        .route("/throttle/status", get(throttle_status))
        .with_state(throttle)
}
