use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, ORIGIN};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use stackintel_mcp_runtime::{GatewayConfig, discovery_payload, handle_http_jsonrpc};

/// Well-formed bearer credentials are 10-256 characters after the scheme
/// prefix; anything else is treated as absent rather than rejected.
const BEARER_MIN_LEN: usize = 10;
const BEARER_MAX_LEN: usize = 256;

#[derive(Clone)]
struct AppState {
    config: GatewayConfig,
    allowed_origins: Arc<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("http server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Split a comma-separated allowlist into trimmed, non-empty origins.
pub fn parse_origin_allowlist(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .filter_map(|origin| {
            let trimmed = origin.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect()
}

pub async fn serve(
    addr: SocketAddr,
    config: GatewayConfig,
    allowed_origins: Vec<String>,
) -> Result<(), TransportError> {
    let state = AppState {
        config,
        allowed_origins: Arc::new(allowed_origins),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind { addr, source })?;
    tracing::info!("MCP HTTP transport listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.allowed_origins);
    Router::new()
        .route("/mcp", post(mcp_post).get(mcp_discovery))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn mcp_discovery() -> Json<Value> {
    Json(discovery_payload())
}

async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = format!("mcp-{}", Uuid::now_v7());

    // Origin gate runs before any parsing or dispatch.
    let origin = headers.get(ORIGIN).and_then(|value| value.to_str().ok());
    if !origin_admitted(&state.allowed_origins, origin) {
        tracing::warn!(
            request_id = %request_id,
            origin = ?origin,
            "rejected request from origin outside the allowlist"
        );
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "forbidden_origin",
                "message": "Origin is not in the allowlist"
            })),
        )
            .into_response();
    }

    let token = extract_bearer_token(&headers);

    let incoming: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => {
            return (
                StatusCode::OK,
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": "Parse error" }
                })),
            )
                .into_response();
        }
    };

    // A panic inside dispatch must become a 500 on this request, never take
    // the process (and every sibling session) down with it.
    let config = state.config.clone();
    let handled = tokio::spawn(async move { handle_http_jsonrpc(config, token, incoming).await });

    let responses = match handled.await {
        Ok(responses) => responses,
        Err(err) => {
            tracing::error!(request_id = %request_id, "MCP request handling panicked: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "internal_error",
                    "message": "Request handling failed"
                })),
            )
                .into_response();
        }
    };

    if responses.is_empty() {
        // Notification-only payload: nothing due back.
        return StatusCode::ACCEPTED.into_response();
    }
    if responses.len() == 1 {
        return (
            StatusCode::OK,
            Json(responses.into_iter().next().unwrap_or(Value::Null)),
        )
            .into_response();
    }
    (StatusCode::OK, Json(Value::Array(responses))).into_response()
}

/// Admission rule for the origin allowlist: an empty allowlist admits
/// everything, and a request without an origin header is always admitted.
fn origin_admitted(allowlist: &[String], origin: Option<&str>) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    match origin {
        None => true,
        Some(origin) => allowlist
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(origin)),
    }
}

/// Extract the request's bearer credential. Malformed or out-of-range
/// values resolve to `None`; the call proceeds and fails later at
/// credential resolution if no fallback is configured.
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, value) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let value = value.trim();
    if value.len() < BEARER_MIN_LEN || value.len() > BEARER_MAX_LEN {
        return None;
    }
    Some(value.to_string())
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
        ])
        .max_age(std::time::Duration::from_secs(3600));

    if allowed_origins.is_empty() {
        return layer.allow_origin(tower_http::cors::Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    layer.allow_origin(origins)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_authorization(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_tokens_inside_the_length_window_are_extracted() {
        let token = "0123456789"; // exactly the minimum
        let headers = headers_with_authorization(&format!("Bearer {token}"));
        assert_eq!(extract_bearer_token(&headers), Some(token.to_string()));

        let token = "k".repeat(BEARER_MAX_LEN);
        let headers = headers_with_authorization(&format!("Bearer {token}"));
        assert_eq!(extract_bearer_token(&headers), Some(token));

        // Scheme comparison is case-insensitive.
        let headers = headers_with_authorization("bearer 0123456789");
        assert_eq!(
            extract_bearer_token(&headers),
            Some("0123456789".to_string())
        );
    }

    #[test]
    fn malformed_or_out_of_range_bearer_values_resolve_to_absent() {
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);

        let too_short = headers_with_authorization("Bearer 012345678");
        assert_eq!(extract_bearer_token(&too_short), None);

        let too_long = headers_with_authorization(&format!("Bearer {}", "k".repeat(257)));
        assert_eq!(extract_bearer_token(&too_long), None);

        let wrong_scheme = headers_with_authorization("Basic 0123456789");
        assert_eq!(extract_bearer_token(&wrong_scheme), None);

        let no_space = headers_with_authorization("Bearer0123456789");
        assert_eq!(extract_bearer_token(&no_space), None);
    }

    #[test]
    fn origin_admission_follows_the_allowlist_rules() {
        let allowlist = vec!["https://claude.ai".to_string()];

        // Empty allowlist admits everything.
        assert!(origin_admitted(&[], Some("https://evil.example")));
        assert!(origin_admitted(&[], None));

        // Absent origin is always admitted, even with an allowlist.
        assert!(origin_admitted(&allowlist, None));

        // Present origins must match, case-insensitively.
        assert!(origin_admitted(&allowlist, Some("https://claude.ai")));
        assert!(origin_admitted(&allowlist, Some("HTTPS://CLAUDE.AI")));
        assert!(!origin_admitted(&allowlist, Some("https://evil.example")));
    }

    #[test]
    fn allowlist_parsing_trims_and_drops_empty_entries() {
        assert!(parse_origin_allowlist(None).is_empty());
        assert!(parse_origin_allowlist(Some("")).is_empty());
        assert!(parse_origin_allowlist(Some(" , ,")).is_empty());
        assert_eq!(
            parse_origin_allowlist(Some(" https://claude.ai, https://chatgpt.com ,")),
            vec![
                "https://claude.ai".to_string(),
                "https://chatgpt.com".to_string()
            ]
        );
    }
}
