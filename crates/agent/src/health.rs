//! `GET /health` — liveness report for the supervising process.

use std::collections::BTreeMap;

use bytes::Bytes;
use http_body_util::Full;
use https_dispatcher::{empty_response, Handler, HandlerError, Request, Response, RouteTable};
use hyper::header::{ALLOW, CONTENT_TYPE};
use hyper::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the listener is answering.
    pub status: String,
    /// Name of the active platform.
    pub platform: String,
    /// Active device path resolution strategy.
    pub device_path_resolution: String,
    /// Timeout of each resolver in that strategy, in milliseconds.
    pub resolver_timeouts_ms: BTreeMap<String, u64>,
    /// Number of routes currently registered.
    pub routes: usize,
}

/// Build the health handler for `platform`, reporting on `routes`.
pub fn handler(platform: Platform, routes: RouteTable) -> impl Handler {
    move |req: Request| {
        let report = HealthResponse {
            status: "ok".into(),
            platform: platform.name().into(),
            device_path_resolution: platform.device_path_resolution().name().into(),
            resolver_timeouts_ms: platform
                .device_path_resolution()
                .timeouts()
                .into_iter()
                .map(|(resolver, timeout)| (resolver.to_owned(), timeout.as_millis() as u64))
                .collect(),
            routes: routes.len(),
        };
        async move { respond(req.method(), &report) }
    }
}

fn respond(method: &Method, report: &HealthResponse) -> Result<Response, HandlerError> {
    if *method != Method::GET {
        let mut resp = empty_response(StatusCode::METHOD_NOT_ALLOWED);
        resp.headers_mut()
            .insert(ALLOW, hyper::header::HeaderValue::from_static("GET"));
        return Ok(resp);
    }

    let body = serde_json::to_vec(report)?;
    let resp = hyper::Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))?;
    Ok(resp)
}
