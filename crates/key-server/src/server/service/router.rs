use crate::server::service::handler::{self, AppState};
use axum::Router;
use axum::http::StatusCode;
use axum::middleware::map_response_with_state;
use axum::routing::get;
use core::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Builds the route table for one application instance.
///
/// Only `GET` is served. Other methods on a known path hit
/// [`handler::method_not_allowed`], unknown paths hit [`handler::not_found`].
/// Handler time is bounded by `write_timeout`.
pub fn router(state: AppState, write_timeout: Duration) -> Router {
    with_layers(routes(), state, write_timeout)
}

/// The key server's routes, before state and middleware are attached.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/health",
            get(handler::health).fallback(handler::method_not_allowed),
        )
        .route(
            "/ready",
            get(handler::ready).fallback(handler::method_not_allowed),
        )
        .route(
            "/key",
            get(handler::generate_key_missing_length).fallback(handler::method_not_allowed),
        )
        .route(
            "/key/",
            get(handler::generate_key_missing_length).fallback(handler::method_not_allowed),
        )
        .route(
            "/key/{length}",
            get(handler::generate_key).fallback(handler::method_not_allowed),
        )
        .route(
            "/metrics",
            get(handler::metrics).fallback(handler::method_not_allowed),
        )
}

/// Attaches the 404 fallback, state and the middleware stack to `routes`.
///
/// A handler that outlives `write_timeout` is answered with
/// `408 Request Timeout`, which is counted like any other status.
pub fn with_layers(routes: Router<AppState>, state: AppState, write_timeout: Duration) -> Router {
    routes
        .fallback(handler::not_found)
        .with_state(state.clone())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            write_timeout,
        ))
        .layer(map_response_with_state(state, handler::count_timeouts))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use key_server_core::{KeyService, Keys, OsRandom, PrometheusMetrics};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state(metrics: &Arc<PrometheusMetrics>) -> AppState {
        let keys: Arc<dyn Keys> = Arc::new(KeyService::new(OsRandom, Arc::clone(metrics), 1024));
        AppState::new(keys, Arc::clone(metrics))
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handlers_are_answered_and_counted_as_408() {
        let metrics = Arc::new(PrometheusMetrics::new(1024).unwrap());
        let slow = routes().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        );
        let router = with_layers(slow, state(&metrics), Duration::from_secs(5));

        let request = Request::get("/slow").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(metrics.http_requests(408), 1);
        assert!(
            metrics
                .encode()
                .unwrap()
                .contains("http_requests_total{code=\"408\"} 1")
        );
    }

    #[tokio::test]
    async fn fast_handlers_are_not_counted_twice() {
        let metrics = Arc::new(PrometheusMetrics::new(1024).unwrap());
        let router = router(state(&metrics), Duration::from_secs(5));

        let request = Request::get("/health").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(metrics.http_requests(200), 1);
        assert_eq!(metrics.http_requests(408), 0);
    }
}
