//! TLS-terminating HTTPS listener for the agent's control plane.
//!
//! # Responsibilities
//! - Enforce a fixed TLS policy ([`TlsPolicy`]) on every connection.
//! - Own the listener lifecycle: [`HttpsDispatcher::start`] serves until
//!   [`HttpsDispatcher::stop`].
//! - Route each request by exact path through a [`RouteTable`] that accepts
//!   registrations while traffic is flowing.

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod routes;
pub mod tls;

pub use dispatcher::{
    BoundAddress, HttpsDispatcher, Lifecycle, HANDSHAKE_TIMEOUT, MAX_REQUEST_BODY_BYTES,
};
pub use error::DispatchError;
pub use handler::{empty_response, Body, Handler, HandlerError, HandlerFuture, Request, Response};
pub use routes::RouteTable;
pub use tls::{
    ProtocolVersion, TlsIdentity, TlsPolicy, APPROVED_CIPHER_SUITES, APPROVED_TLS13_CIPHER_SUITES,
};
