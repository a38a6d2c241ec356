//! http: the gateway's public `POST /request` endpoint.
//!
//! Grounded on `client-http-proxy/api/request.go`'s `SendRequest` /
//! `PrepareUnPackedResponse` pair: issue a synchronous bus request, inflate
//! the packed reply if needed, and hand the original status code straight
//! back to the caller.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bus_core::{BusError, BusHelper};
use metrics_core::MetricsRegistry;
use proxy_wire::{decode, encode, node_request_subject, unpack, PackedResponse, Request};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::config::GatewayConfig;

pub struct GatewayState {
    pub cfg: GatewayConfig,
    pub bus: BusHelper,
    pub metrics: Arc<MetricsRegistry>,
}

#[derive(Debug, Deserialize)]
pub struct GatewayRequest {
    pub node: String,
    #[serde(default)]
    pub timeout_s: u64,
    pub payload: Request,
}

pub async fn handle_request(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<GatewayRequest>,
) -> Response {
    let timeout_s = if body.timeout_s == 0 {
        state.cfg.default_timeout_s
    } else {
        body.timeout_s
    };

    let bytes = match encode(&body.payload) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "failed to encode outbound request envelope");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode request");
        }
    };

    let subject = node_request_subject(&state.cfg.service, &body.node);
    let outcome = state.bus.request(subject, bytes, Duration::from_secs(timeout_s)).await;

    let reply = match outcome {
        Ok(reply) => reply,
        Err(BusError::Timeout) => {
            state
                .metrics
                .proxy_requests_total
                .with_label_values(&[&body.node, "timeout"])
                .inc();
            return error_response(StatusCode::GATEWAY_TIMEOUT, "upstream node did not reply in time");
        }
        Err(e) => {
            warn!(error = %e, node = %body.node, "bus request failed");
            state
                .metrics
                .proxy_requests_total
                .with_label_values(&[&body.node, "error"])
                .inc();
            return error_response(StatusCode::BAD_GATEWAY, "bus request failed");
        }
    };

    let packed: PackedResponse = match decode(&reply) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "failed to decode packed response");
            return error_response(StatusCode::BAD_GATEWAY, "malformed response from node");
        }
    };

    let proxy_resp = match unpack(&packed) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "failed to unpack proxy response");
            return error_response(StatusCode::BAD_GATEWAY, "malformed response payload");
        }
    };

    state
        .metrics
        .proxy_requests_total
        .with_label_values(&[&body.node, if packed.ok { "ok" } else { "error" }])
        .inc();

    let status = StatusCode::from_u16(proxy_resp.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::builder().status(status);
    if let Some(headers) = &proxy_resp.headers {
        for (name, values) in headers {
            if let Ok(header_name) = HeaderName::try_from(name.as_str()) {
                for value in values {
                    if let Ok(header_value) = HeaderValue::from_str(value) {
                        response = response.header(header_name.clone(), header_value);
                    }
                }
            }
        }
    }
    response
        .body(axum::body::Body::from(proxy_resp.data))
        .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to build response"))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
