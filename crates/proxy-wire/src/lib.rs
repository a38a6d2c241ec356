//! proxy-wire: wire types for the distributed HTTP proxy fabric.
//!
//! `Request` is immutable after dispatch — build one with [`RequestBuilder`]
//! rather than mutating fields in place, which is also how this crate
//! replaces the original source's `With...(opts ...RequestOption)` pattern
//! (see spec §9's "dynamic variadic options" redesign note).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Https
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestBody {
    None,
    Form(HashMap<String, String>),
    Json(String),
}

impl Default for RequestBody {
    fn default() -> Self {
        RequestBody::None
    }
}

/// A fully-formed outbound HTTP call, dispatched by value and never mutated
/// after it is handed to the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: u64,
    pub method: String,
    pub protocol: Protocol,
    pub host: String,
    pub path: String,
    pub params: HashMap<String, String>,
    pub body: RequestBody,
    pub headers: HashMap<String, String>,
    pub cookies: Vec<String>,
    pub user_agent: Option<String>,
    pub response_headers: bool,
    /// Step -> elapsed microseconds, carried end to end the same way
    /// `BasicMsgMeta::trace` is on the ingestion plane.
    pub trace: Vec<(String, i64)>,
}

impl Request {
    pub fn builder(host: impl Into<String>, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(host, path)
    }

    pub fn url(&self) -> String {
        let scheme = match self.protocol {
            Protocol::Http => "http",
            Protocol::Https => "https",
        };
        format!("{scheme}://{}{}", self.host, self.path)
    }
}

/// Builds a [`Request`], applying defaults (`GET`, `https`, a freshly
/// generated `request_id`) the way `NewRequest()` did in the source system.
pub struct RequestBuilder {
    request_id: u64,
    method: String,
    protocol: Protocol,
    host: String,
    path: String,
    params: HashMap<String, String>,
    body: RequestBody,
    headers: HashMap<String, String>,
    cookies: Vec<String>,
    user_agent: Option<String>,
    response_headers: bool,
}

impl RequestBuilder {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            request_id: next_request_id(),
            method: "GET".to_owned(),
            protocol: Protocol::Https,
            host: host.into(),
            path: path.into(),
            params: HashMap::new(),
            body: RequestBody::None,
            headers: HashMap::new(),
            cookies: Vec::new(),
            user_agent: None,
            response_headers: false,
        }
    }

    pub fn http(mut self) -> Self {
        self.protocol = Protocol::Http;
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn get_params(mut self, params: HashMap<String, String>) -> Self {
        self.method = "GET".to_owned();
        self.params = params;
        self
    }

    pub fn post_form(mut self, data: HashMap<String, String>) -> Self {
        self.method = "POST".to_owned();
        self.body = RequestBody::Form(data);
        self
    }

    pub fn post_json(mut self, json: impl Into<String>) -> Self {
        self.method = "POST".to_owned();
        self.body = RequestBody::Json(json.into());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn cookies(mut self, cookies: Vec<String>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn echo_headers(mut self) -> Self {
        self.response_headers = true;
        self
    }

    pub fn build(self) -> Request {
        Request {
            request_id: self.request_id,
            method: self.method,
            protocol: self.protocol,
            host: self.host,
            path: self.path,
            params: self.params,
            body: self.body,
            headers: self.headers,
            cookies: self.cookies,
            user_agent: self.user_agent,
            response_headers: self.response_headers,
            trace: Vec::new(),
        }
    }
}

static REQUEST_ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// Monotonic, distributed-safe-enough request id: millisecond timestamp in
/// the high bits, a per-process counter in the low 16 bits (good enough to
/// avoid collisions within one worker without requiring a coordinated
/// sequence service).
pub fn next_request_id() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let seq = REQUEST_ID_SEQ.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    (millis << 16) | seq
}

// ---------------------------------------------------------------------------
// Response envelope + pack/unpack
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub status_code: u16,
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedResponse {
    pub ok: bool,
    pub payload: Vec<u8>,
    pub gzip: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("failed to serialize inner response: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("gzip compression failed: {0}")]
    Gzip(std::io::Error),
}

/// Marshal a `ProxyResponse`, gzip it when the JSON payload is at or above
/// `gzip_min_length`, and wrap the result in a `PackedResponse`.
pub fn pack(resp: &ProxyResponse, ok: bool, gzip_min_length: usize) -> Result<PackedResponse, PackError> {
    let json = serde_json::to_vec(resp)?;
    if json.len() >= gzip_min_length {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&json).map_err(PackError::Gzip)?;
        let payload = encoder.finish().map_err(PackError::Gzip)?;
        Ok(PackedResponse { ok, payload, gzip: true })
    } else {
        Ok(PackedResponse { ok, payload: json, gzip: false })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UnpackError {
    #[error("gzip decompression failed: {0}")]
    Gzip(std::io::Error),
    #[error("failed to deserialize inner response: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// Inverse of [`pack`]. `Pack(Unpack(x)) == x` for any well-formed packet.
pub fn unpack(packed: &PackedResponse) -> Result<ProxyResponse, UnpackError> {
    let json = if packed.gzip {
        let mut decoder = flate2::read::GzDecoder::new(&packed.payload[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(UnpackError::Gzip)?;
        out
    } else {
        packed.payload.clone()
    };
    Ok(serde_json::from_slice(&json)?)
}

// ---------------------------------------------------------------------------
// Node meta
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub node_id: String,
    pub groups: Vec<String>,
    pub rate_limit_ms: Option<u64>,
    pub gzip_min_length: usize,
    pub uptime_s: u64,
    pub heartbeat_interval_s: u64,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    OnProcess,
    Scheduled,
    Finished,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusMsg {
    pub state: TaskState,
    pub request_id: u64,
    pub trace_id: String,
}

// ---------------------------------------------------------------------------
// Subject helpers
// ---------------------------------------------------------------------------

pub fn node_request_subject(service: &str, node_id: &str) -> String {
    format!("{service}.{node_id}.request")
}

pub fn group_request_subject(service: &str, group: &str) -> String {
    format!("{service}.groups.{group}.request")
}

pub fn node_meta_subject(service: &str, node_id: &str) -> String {
    format!("{service}.{node_id}.meta")
}

pub fn event_subject(service: &str, kind: &str) -> String {
    format!("{service}.event.{kind}")
}

pub fn task_subject(service: &str, request_id: u64) -> String {
    format!("{service}.task.{request_id}")
}

// ---------------------------------------------------------------------------
// Wire (de)serialization — binary, length-delimited via bincode (spec §6).
// ---------------------------------------------------------------------------

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(value)
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_then_unpack_roundtrips() {
        let resp = ProxyResponse {
            status_code: 200,
            data: b"hello world".to_vec(),
            headers: None,
        };
        for gzip_min in [1usize, 4096] {
            let packed = pack(&resp, true, gzip_min).unwrap();
            let unpacked = unpack(&packed).unwrap();
            assert_eq!(unpacked, resp);
        }
    }

    #[test]
    fn pack_enables_gzip_only_above_threshold() {
        let small = ProxyResponse { status_code: 200, data: vec![0u8; 10], headers: None };
        let large = ProxyResponse { status_code: 200, data: vec![0u8; 4096], headers: None };

        let packed_small = pack(&small, true, 1024).unwrap();
        assert!(!packed_small.gzip);

        let packed_large = pack(&large, true, 1024).unwrap();
        assert!(packed_large.gzip);
    }

    #[test]
    fn request_builder_applies_defaults() {
        let req = Request::builder("example.com", "/api").build();
        assert_eq!(req.method, "GET");
        assert_eq!(req.protocol, Protocol::Https);
        assert_eq!(req.url(), "https://example.com/api");
    }

    #[test]
    fn request_ids_are_monotonic_enough_to_stay_unique() {
        let a = next_request_id();
        let b = next_request_id();
        assert_ne!(a, b);
    }
}
