//! Error taxonomy for the dispatcher.
//!
//! Only configuration and listener failures ever leave the dispatcher.
//! Handshake rejections, handler failures, and unknown paths are handled per
//! connection and never surface here.

use std::io;

use thiserror::Error;

/// Errors returned from dispatcher construction, registration, and `start`.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The target URL could not be parsed or names no host.
    #[error("invalid target url {url:?}: {reason}")]
    InvalidUrl {
        /// The URL as supplied by the caller.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Certificate chain or private key material is missing or unreadable.
    #[error("invalid tls material: {0}")]
    TlsMaterial(String),

    /// The TLS policy could not be turned into a server configuration.
    #[error("invalid tls policy: {0}")]
    TlsPolicy(String),

    /// The listener socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// `host:port` the dispatcher tried to bind.
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The accept loop hit an error that is not specific to one connection.
    #[error("listener failed: {0}")]
    Listener(#[source] io::Error),

    /// A route path that can never match a request path.
    #[error("route path must begin with '/': {0:?}")]
    InvalidRoute(String),

    /// `start` was called on a dispatcher that is already running.
    #[error("dispatcher is already running")]
    AlreadyRunning,

    /// `start` was called on a dispatcher that has been stopped.
    #[error("dispatcher has been stopped and cannot be restarted")]
    Stopped,
}

impl DispatchError {
    /// Returns `true` for errors caused by the dispatcher's inputs (URL, TLS
    /// material, policy, route path) rather than by the environment.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DispatchError::InvalidUrl { .. }
                | DispatchError::TlsMaterial(_)
                | DispatchError::TlsPolicy(_)
                | DispatchError::InvalidRoute(_)
        )
    }
}
