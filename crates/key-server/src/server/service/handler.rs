//! HTTP handlers for the key server.
//!
//! Each handler owns the terminal state of its request: it chooses the
//! status code and body and records the matching metrics exactly once.
//! `KeyError::respond` is the only place where a failed key request is
//! translated into an HTTP status; the core error never reaches the client.

use axum::body::Body;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use key_server_core::{Error, Keys, Metrics, PrometheusMetrics};
use serde::Serialize;
use std::sync::Arc;

pub const HEALTHY_BODY: &str = "Healthy";
pub const READY_BODY: &str = "Ready to serve traffic!";
pub const INVALID_LENGTH_MESSAGE: &str = "Invalid key length. Must be a positive integer.";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error: Failed to generate key.";
pub const NOT_FOUND_MESSAGE: &str = "404 page not found";
pub const METHOD_NOT_ALLOWED_MESSAGE: &str = "Method Not Allowed";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Shared state handed to every handler.
///
/// Holds the key service behind its capability trait and this application's
/// own collectors; nothing here is mutated after construction.
#[derive(Clone)]
pub struct AppState {
    keys: Arc<dyn Keys>,
    metrics: Arc<PrometheusMetrics>,
}

impl AppState {
    pub fn new(keys: Arc<dyn Keys>, metrics: Arc<PrometheusMetrics>) -> Self {
        Self { keys, metrics }
    }
}

/// JSON envelope of a generated key.
#[derive(Debug, Serialize)]
pub struct KeyResponse<'a> {
    pub key: &'a str,
}

/// Why a `/key/{length}` request did not produce a key.
#[derive(Debug)]
pub enum KeyError {
    /// The path segment was missing or not a decimal integer.
    InvalidInput,
    /// The length parsed but is outside `1..=max_size`.
    OutOfRange { length: i64, message: String },
    /// The random source failed; the cause is only logged.
    Internal { length: i64, cause: Error },
}

impl KeyError {
    fn from_core(length: i64, err: Error) -> Self {
        if err.is_out_of_range() {
            Self::OutOfRange {
                length,
                message: err.to_string(),
            }
        } else {
            Self::Internal { length, cause: err }
        }
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput | Self::OutOfRange { .. } => StatusCode::BAD_REQUEST,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Records the failure and renders the client-facing response.
    fn respond(self, metrics: &dyn Metrics) -> Response {
        let status = self.status();
        metrics.inc_http_status(status.as_u16());

        let message = match self {
            Self::InvalidInput => INVALID_LENGTH_MESSAGE.to_string(),
            Self::OutOfRange { length, message } => {
                metrics.record_key_generation(length, false);
                message
            }
            Self::Internal { length, cause } => {
                metrics.record_key_generation(length, false);
                tracing::error!(length, error = %cause, "key generation failed");
                INTERNAL_ERROR_MESSAGE.to_string()
            }
        };
        error_response(status, &message)
    }
}

/// Plain-text error body terminated by a single newline.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let mut response = (status, format!("{message}\n")).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

fn text_response(body: &'static str) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, TEXT_PLAIN)],
        body,
    )
        .into_response()
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    state.metrics.inc_http_status(StatusCode::OK.as_u16());
    text_response(HEALTHY_BODY)
}

/// `GET /ready`
pub async fn ready(State(state): State<AppState>) -> Response {
    state.metrics.inc_http_status(StatusCode::OK.as_u16());
    text_response(READY_BODY)
}

/// `GET /key/{length}`
///
/// Percent-decoding failures are treated like any other unparsable segment.
pub async fn generate_key(
    State(state): State<AppState>,
    segment: Result<Path<String>, PathRejection>,
) -> Response {
    let segment = segment.ok().map(|Path(segment)| segment);
    respond_with_key(&state, segment.as_deref())
}

/// `GET /key` and `GET /key/`, where no length segment is present.
pub async fn generate_key_missing_length(State(state): State<AppState>) -> Response {
    respond_with_key(&state, None)
}

fn respond_with_key(state: &AppState, segment: Option<&str>) -> Response {
    let metrics: &dyn Metrics = state.metrics.as_ref();

    let length = match parse_length(segment) {
        Some(length) => length,
        None => return KeyError::InvalidInput.respond(metrics),
    };

    match state.keys.generate(length) {
        Ok(key) => match key_response(&key) {
            Ok(response) => {
                metrics.inc_http_status(StatusCode::OK.as_u16());
                metrics.record_key_generation(length, true);
                response
            }
            Err(cause) => {
                tracing::error!(error = %cause, "failed to serialize key response");
                KeyError::Internal {
                    length,
                    cause: Error::internal(Error::Exposition {
                        reason: cause.to_string(),
                    }),
                }
                .respond(metrics)
            }
        },
        Err(err) => KeyError::from_core(length, err).respond(metrics),
    }
}

/// Parses the raw segment as a signed decimal integer.
///
/// Leading `+` is accepted, whitespace is not.
pub fn parse_length(segment: Option<&str>) -> Option<i64> {
    segment
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<i64>().ok())
}

fn key_response(key: &str) -> Result<Response, serde_json::Error> {
    let mut body = serde_json::to_vec(&KeyResponse { key })?;
    body.push(b'\n');
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from(body),
    )
        .into_response())
}

/// `GET /metrics`
///
/// Scrapes are not counted in `http_requests_total`.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PrometheusMetrics::CONTENT_TYPE)],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode metrics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// Counts the `408` produced by the request timeout layer, which answers in
/// place of the handler that would otherwise have recorded the status.
pub async fn count_timeouts<B>(
    State(state): State<AppState>,
    response: Response<B>,
) -> Response<B> {
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        state
            .metrics
            .inc_http_status(StatusCode::REQUEST_TIMEOUT.as_u16());
    }
    response
}

/// Fallback for unknown paths.
pub async fn not_found(State(state): State<AppState>) -> Response {
    state.metrics.inc_http_status(StatusCode::NOT_FOUND.as_u16());
    error_response(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE)
}

/// Fallback for known paths hit with a method other than `GET`.
pub async fn method_not_allowed(State(state): State<AppState>) -> Response {
    state
        .metrics
        .inc_http_status(StatusCode::METHOD_NOT_ALLOWED.as_u16());
    error_response(StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED_MESSAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signed_integers() {
        assert_eq!(parse_length(Some("32")), Some(32));
        assert_eq!(parse_length(Some("-10")), Some(-10));
        assert_eq!(parse_length(Some("+7")), Some(7));
        assert_eq!(parse_length(Some("0")), Some(0));
    }

    #[test]
    fn rejects_non_integers() {
        for segment in ["", "abc", "1.5", " 1", "1 ", "0x10", "99999999999999999999"] {
            assert_eq!(parse_length(Some(segment)), None, "{segment:?}");
        }
        assert_eq!(parse_length(None), None);
    }

    #[test]
    fn key_body_is_single_line_json() {
        let response = key_response("abc-_=").unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
    }

    #[test]
    fn error_response_appends_newline() {
        let response = error_response(StatusCode::BAD_REQUEST, INVALID_LENGTH_MESSAGE);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CONTENT_TYPE], TEXT_PLAIN);
        assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    }

    #[test]
    fn out_of_range_maps_to_bad_request() {
        let err = KeyError::from_core(0, Error::OutOfRange { length: 0, max: 1024 });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(matches!(
            err,
            KeyError::OutOfRange { ref message, .. }
                if message == "key length 0 is out of allowed range (1-1024)"
        ));
    }

    #[test]
    fn random_failure_maps_to_internal_error() {
        let err = KeyError::from_core(
            8,
            Error::internal(Error::RandomFailure {
                reason: "boom".into(),
            }),
        );
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
