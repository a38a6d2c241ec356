//! auth: optional bearer-token gate on the public request endpoint.
//!
//! Grounded on `sideseat-sideseat/server/src/api/auth/middleware.rs`'s
//! "auth disabled → pass through" shape, trimmed to the single scheme the
//! gateway actually needs.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Clone)]
pub struct AuthState {
    pub token: Option<String>,
}

pub struct AuthError;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized", "message": "missing or invalid bearer token" })),
        )
            .into_response()
    }
}

pub async fn require_bearer(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(expected) = &state.token else {
        return Ok(next.run(request).await);
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => Ok(next.run(request).await),
        _ => Err(AuthError),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn router(state: AuthState) -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer))
            .with_state(state)
    }

    #[tokio::test]
    async fn disabled_auth_passes_every_request() {
        let app = router(AuthState { token: None });
        let resp = app
            .oneshot(HttpRequest::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn enabled_auth_rejects_missing_token() {
        let app = router(AuthState { token: Some("secret".to_owned()) });
        let resp = app
            .oneshot(HttpRequest::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn enabled_auth_accepts_matching_bearer_token() {
        let app = router(AuthState { token: Some("secret".to_owned()) });
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/ping")
                    .header(header::AUTHORIZATION, "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
