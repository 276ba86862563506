//! The request/response capability registered on routes.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http_body_util::Full;
use hyper::StatusCode;

/// Response body type produced by handlers.
pub type Body = Full<Bytes>;

/// A request as seen by a handler: method, URI, headers, and the fully
/// collected body.
pub type Request = hyper::Request<Bytes>;

/// A response produced by a handler. Sent to the client unmodified.
pub type Response = hyper::Response<Body>;

/// Failure signalled by a handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by [`Handler::handle`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, HandlerError>> + Send>>;

/// Turns a request into a response.
///
/// The dispatcher owns nothing about a handler beyond calling it: status,
/// headers, and body are entirely the handler's choice. Any async closure
/// `Fn(Request) -> impl Future<Output = Result<Response, HandlerError>>`
/// is a handler.
pub trait Handler: Send + Sync + 'static {
    /// Process one request.
    fn handle(&self, request: Request) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    fn handle(&self, request: Request) -> HandlerFuture {
        Box::pin(self(request))
    }
}

/// Build a response with `status` and an empty body.
pub fn empty_response(status: StatusCode) -> Response {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
