//! Per-request admission for axum routers.
//!
//! Each request is one unit of work named `"{METHOD} {path}"`. The slot is held until the
//! inner service produces its response; streaming bodies are not covered.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
};

use crate::rejection::Rejection;
use crate::throttle::Throttle;
use crate::token::WorkDescriptor;

/// Header carried into [`WorkDescriptor::request_id`]. Metadata only, never correlation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Gate every route currently in `router` behind `throttle`.
///
/// Routes merged afterwards (e.g. [`status_routes`](super::status_routes)) stay unthrottled.
pub fn throttled(router: Router, throttle: Arc<Throttle>) -> Router {
    router.layer(middleware::from_fn_with_state(throttle, throttle_middleware))
}

pub async fn throttle_middleware(
    State(throttle): State<Arc<Throttle>>,
    request: Request,
    next: Next,
) -> Response {
    let acquire = match throttle.acquire(describe(&request)) {
        Ok(acquire) => acquire,
        Err(rejection) => return rejection_response(&rejection),
    };

    // If the client disconnects axum drops this future: a waiting request is withdrawn,
    // a running one completes when its guard drops.
    let guard = match acquire.await {
        Ok(guard) => guard,
        Err(e) => {
            tracing::error!(error = %e, "Queued request lost its place");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "error": e.to_string(),
                    "status": "failed"
                })),
            )
                .into_response();
        }
    };

    let response = next.run(request).await;
    drop(guard);
    response
}

fn describe(request: &Request) -> WorkDescriptor {
    let work = WorkDescriptor::new(format!("{} {}", request.method(), request.uri().path()));
    match request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(id) => work.with_request_id(id),
        None => work,
    }
}

fn rejection_response(rejection: &Rejection) -> Response {
    let status =
        StatusCode::from_u16(rejection.status()).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    (
        status,
        Json(serde_json::json!({
            "error": rejection.message(),
            "status": "throttled"
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use http_body_util::BodyExt;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    use crate::config::ThrottleConfig;
    use crate::observer::{ThrottleEvent, ThrottleEventKind};

    async fn response_json(response: Response) -> serde_json::Value {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// `/work` blocks until `release` is notified; `/fast` returns immediately.
    fn app(throttle: Arc<Throttle>, release: Arc<Notify>) -> Router {
        let router = Router::new()
            .route(
                "/work",
                get(move || {
                    let release = Arc::clone(&release);
                    async move {
                        release.notified().await;
                        "done"
                    }
                }),
            )
            .route("/fast", get(|| async { "fast" }));
        throttled(router, throttle)
    }

    async fn wait_for_running(throttle: &Throttle, running: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while throttle.status().running != running {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("throttle never reached expected running count");
    }

    #[tokio::test]
    async fn passes_through_when_capacity_is_free() {
        let throttle = Arc::new(Throttle::new(1, 0).unwrap());
        let app = app(Arc::clone(&throttle), Arc::new(Notify::new()));

        let response = app
            .oneshot(Request::get("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(throttle.status().running, 0);
    }

    #[tokio::test]
    async fn saturated_throttle_returns_503() {
        let throttle = Arc::new(Throttle::new(1, 0).unwrap());
        let release = Arc::new(Notify::new());
        let app = app(Arc::clone(&throttle), Arc::clone(&release));

        let busy = tokio::spawn(
            app.clone()
                .oneshot(Request::get("/work").body(Body::empty()).unwrap()),
        );
        wait_for_running(&throttle, 1).await;

        let response = app
            .clone()
            .oneshot(Request::get("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = response_json(response).await;
        assert_eq!(json["status"], "throttled");
        assert_eq!(json["error"], "request throttled");

        release.notify_one();
        let response = busy.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(throttle.status().running, 0);
    }

    #[tokio::test]
    async fn queued_request_runs_after_slot_frees() {
        let throttle = Arc::new(Throttle::new(1, 1).unwrap());
        let release = Arc::new(Notify::new());
        let app = app(Arc::clone(&throttle), Arc::clone(&release));

        let busy = tokio::spawn(
            app.clone()
                .oneshot(Request::get("/work").body(Body::empty()).unwrap()),
        );
        wait_for_running(&throttle, 1).await;

        let queued = tokio::spawn(
            app.clone()
                .oneshot(Request::get("/fast").body(Body::empty()).unwrap()),
        );
        tokio::time::timeout(Duration::from_secs(1), async {
            while throttle.status().waiting != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("second request never queued");

        release.notify_one();
        assert_eq!(busy.await.unwrap().unwrap().status(), StatusCode::OK);
        assert_eq!(queued.await.unwrap().unwrap().status(), StatusCode::OK);
        assert_eq!(throttle.status().running, 0);
        assert_eq!(throttle.status().waiting, 0);
    }

    #[tokio::test]
    async fn custom_rejection_status_is_used() {
        let throttle = Arc::new(
            Throttle::builder(ThrottleConfig::new(1, 0))
                .rejection(|_, _| Rejection::new("slow down").with_status(429))
                .build()
                .unwrap(),
        );
        let release = Arc::new(Notify::new());
        let app = app(Arc::clone(&throttle), Arc::clone(&release));

        let busy = tokio::spawn(
            app.clone()
                .oneshot(Request::get("/work").body(Body::empty()).unwrap()),
        );
        wait_for_running(&throttle, 1).await;

        let response = app
            .oneshot(Request::get("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response_json(response).await["error"], "slow down");

        release.notify_one();
        busy.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn request_id_reaches_observer() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let throttle = Arc::new(
            Throttle::builder(ThrottleConfig::new(1, 0))
                .observer(move |event: &ThrottleEvent<'_>| {
                    if event.kind == ThrottleEventKind::RequestHandled {
                        sink.lock().unwrap().push(event.work.clone());
                    }
                })
                .build()
                .unwrap(),
        );
        let app = app(Arc::clone(&throttle), Arc::new(Notify::new()));

        app.oneshot(
            Request::get("/fast")
                .header(REQUEST_ID_HEADER, "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].name, "GET /fast");
        assert_eq!(seen[0].request_id.as_deref(), Some("req-42"));
    }
}
