//! handler: executes a proxy_wire::Request over HTTP and packs the reply.
//!
//! Grounded on `client-http-proxy/client.go`'s `doRequest`/`PackResponse`
//! pair — build the outbound call from the envelope, perform it, then
//! marshal + optionally gzip the result into a `PackedResponse`.

use std::collections::HashMap;
use std::time::Instant;

use proxy_wire::{pack, PackError, PackedResponse, ProxyResponse, Request, RequestBody};
use reqwest::Client;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("upstream call failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("packing response failed: {0}")]
    Pack(#[from] PackError),
}

/// Perform the upstream HTTP call described by `request` and pack its
/// response. Any upstream failure (connect, DNS, timeout, non-UTF8 body
/// read) surfaces as [`HandlerError::Upstream`] so the caller can nak the
/// originating bus message for redelivery, per the request pipeline's
/// retriable-failure contract.
pub async fn execute(
    client: &Client,
    request: &Request,
    gzip_min_length: usize,
) -> Result<PackedResponse, HandlerError> {
    let method: reqwest::Method = request.method.parse().unwrap_or(reqwest::Method::GET);
    let mut builder = client.request(method, request.url());

    if !request.params.is_empty() {
        builder = builder.query(&request.params);
    }
    match &request.body {
        RequestBody::None => {}
        RequestBody::Form(data) => builder = builder.form(data),
        RequestBody::Json(json) => {
            builder = builder.header("content-type", "application/json").body(json.clone());
        }
    }
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if !request.cookies.is_empty() {
        builder = builder.header("cookie", request.cookies.join("; "));
    }
    if let Some(ua) = &request.user_agent {
        builder = builder.header("user-agent", ua);
    }

    let started = Instant::now();
    let resp = builder.send().await?;
    let status_code = resp.status().as_u16();
    let headers = request.response_headers.then(|| collect_headers(resp.headers()));
    let data = resp.bytes().await?.to_vec();

    info!(
        method = %request.method,
        url = %request.url(),
        status = status_code,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "upstream call finished"
    );

    let proxy_resp = ProxyResponse { status_code, data, headers };
    Ok(pack(&proxy_resp, true, gzip_min_length)?)
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            out.entry(name.to_string()).or_default().push(v.to_owned());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_wire::unpack;

    #[tokio::test]
    async fn execute_packs_a_successful_response() {
        let mut server = mockito_server().await;
        let _m = server
            .mock("GET", "/hello")
            .with_status(200)
            .with_body("world")
            .create_async()
            .await;

        let request = Request::builder(&server.host_with_port(), "/hello").http().build();
        let client = Client::new();
        let packed = execute(&client, &request, 1024).await.unwrap();
        assert!(packed.ok);
        let unpacked = unpack(&packed).unwrap();
        assert_eq!(unpacked.status_code, 200);
        assert_eq!(unpacked.data, b"world");
    }

    async fn mockito_server() -> mockito::ServerGuard {
        mockito::Server::new_async().await
    }
}
