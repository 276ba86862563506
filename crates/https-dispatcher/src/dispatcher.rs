//! The HTTPS dispatcher: TLS listener lifecycle and path-based dispatch.
//!
//! # Lifecycle
//!
//! `Created → Running → Stopped`. A stopped dispatcher is never restarted;
//! construct a new one instead.
//!
//! [`HttpsDispatcher::start`] only returns once the listener is gone, so a
//! caller that needs to know whether startup succeeded runs it on its own task
//! and races the join handle against a short wait:
//!
//! ```no_run
//! # async fn run(dispatcher: https_dispatcher::HttpsDispatcher) -> Result<(), https_dispatcher::DispatchError> {
//! use std::time::Duration;
//!
//! let server = tokio::spawn({
//!     let dispatcher = dispatcher.clone();
//!     async move { dispatcher.start().await }
//! });
//! tokio::select! {
//!     joined = server => return joined.expect("start task panicked"),
//!     _ = tokio::time::sleep(Duration::from_secs(1)) => {} // still running: started
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Dispatch
//!
//! Each decrypted request is routed by exact path. An unknown path gets `404`
//! with an empty body and no handler runs. A matched handler's response is
//! sent as-is; a handler error becomes an empty `500`. Request bodies larger
//! than [`MAX_REQUEST_BODY_BYTES`] are answered with an empty `413` and never
//! reach the handler.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use openssl::ssl::{Ssl, SslAcceptor};
use tokio::sync::watch;
use tokio_openssl::SslStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use url::Url;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::handler::{empty_response, Handler, HandlerError, Request, Response};
use crate::routes::RouteTable;
use crate::tls::{TlsIdentity, TlsPolicy};

/// Upper bound on how long a client may take to complete the TLS handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest request body collected for a handler.
pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Lifecycle state of an [`HttpsDispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed; no socket has been opened.
    Created,
    /// `start` has been called and the listener is (or is about to be) serving.
    Running,
    /// `stop` was called or the listener failed. Terminal.
    Stopped,
}

/// State of the listening socket, published to waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerState {
    Unbound,
    Bound(SocketAddr),
    Closed,
}

/// Host and port the dispatcher binds, taken from the target URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundAddress {
    host: String,
    port: u16,
}

impl BoundAddress {
    /// Extract host and port from `target`. The scheme is informational; a
    /// missing port falls back to the scheme's well-known port.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidUrl`] if `target` is unparsable, has no
    /// host, or has no port and an unknown scheme.
    pub fn parse(target: &str) -> Result<Self, DispatchError> {
        let invalid = |reason: &str| DispatchError::InvalidUrl {
            url: target.to_owned(),
            reason: reason.to_owned(),
        };

        let url = Url::parse(target).map_err(|e| invalid(&e.to_string()))?;
        let host = match url.host() {
            Some(url::Host::Ipv6(ip)) => ip.to_string(),
            Some(host) => host.to_string(),
            None => return Err(invalid("missing host")),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;

        Ok(Self { host, port })
    }

    /// Host name or IP literal (IPv6 without brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for BoundAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

struct Inner {
    address: BoundAddress,
    acceptor: SslAcceptor,
    routes: RouteTable,
    lifecycle: Mutex<Lifecycle>,
    listener: watch::Sender<ListenerState>,
    shutdown: CancellationToken,
    span: Span,
}

/// TLS-terminating HTTP/1.1 server with an exact-path route table.
///
/// Cheap to clone; all clones drive the same listener and route table.
#[derive(Clone)]
pub struct HttpsDispatcher {
    inner: Arc<Inner>,
}

impl HttpsDispatcher {
    /// Create a dispatcher for `target_url` using [`TlsPolicy::strict`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URL is unparsable or the TLS
    /// material is rejected. No socket is opened.
    pub fn new(target_url: &str, identity: TlsIdentity) -> Result<Self, DispatchError> {
        Self::with_policy(target_url, identity, TlsPolicy::strict())
    }

    /// Create a dispatcher for `target_url` enforcing `policy`.
    ///
    /// # Errors
    ///
    /// See [`HttpsDispatcher::new`].
    pub fn with_policy(
        target_url: &str,
        identity: TlsIdentity,
        policy: TlsPolicy,
    ) -> Result<Self, DispatchError> {
        let address = BoundAddress::parse(target_url)?;
        let acceptor = policy.acceptor(&identity)?;
        let span = info_span!("https_dispatcher", addr = %address);
        let (listener, _) = watch::channel(ListenerState::Unbound);

        Ok(Self {
            inner: Arc::new(Inner {
                address,
                acceptor,
                routes: RouteTable::new(),
                lifecycle: Mutex::new(Lifecycle::Created),
                listener,
                shutdown: CancellationToken::new(),
                span,
            }),
        })
    }

    /// The configured host and port.
    pub fn bound_address(&self) -> &BoundAddress {
        &self.inner.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Lifecycle {
        *self.lock_lifecycle()
    }

    /// The route table served by this dispatcher.
    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    /// Bind `path` to `handler`. Valid in any state and visible to every
    /// request dispatched after this returns. Re-registering a path replaces
    /// the previous handler.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRoute`] if `path` does not begin with
    /// `/`.
    pub fn add_route(
        &self,
        path: impl Into<String>,
        handler: impl Handler,
    ) -> Result<(), DispatchError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(DispatchError::InvalidRoute(path));
        }
        let replaced = self.inner.routes.insert(path.clone(), Arc::new(handler));
        let _enter = self.inner.span.enter();
        debug!(path, replaced, "route registered");
        Ok(())
    }

    /// The socket address actually bound, once the listener is up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *self.inner.listener.borrow() {
            ListenerState::Bound(addr) => Some(addr),
            ListenerState::Unbound | ListenerState::Closed => None,
        }
    }

    /// Wait until the listener is bound, returning its address, or `None` if
    /// the listener closed without ever binding (bind failure or `stop`).
    pub async fn wait_bound(&self) -> Option<SocketAddr> {
        let mut rx = self.inner.listener.subscribe();
        let state = rx
            .wait_for(|s| !matches!(s, ListenerState::Unbound))
            .await
            .ok()
            .map(|s| *s)?;
        match state {
            ListenerState::Bound(addr) => Some(addr),
            ListenerState::Unbound | ListenerState::Closed => None,
        }
    }

    /// Bind the listener and serve until [`stop`](Self::stop) is called.
    ///
    /// Returns `Ok(())` after a requested shutdown and an error if the
    /// socket cannot be bound or the accept loop fails. Handshake failures
    /// and handler errors are confined to their connection and never
    /// returned here.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Bind`], [`DispatchError::Listener`], or a lifecycle
    /// error if the dispatcher is not in the `Created` state.
    pub async fn start(&self) -> Result<(), DispatchError> {
        {
            let mut lifecycle = self.lock_lifecycle();
            match *lifecycle {
                Lifecycle::Created => *lifecycle = Lifecycle::Running,
                Lifecycle::Running => return Err(DispatchError::AlreadyRunning),
                Lifecycle::Stopped => return Err(DispatchError::Stopped),
            }
        }

        let span = self.inner.span.clone();
        self.serve().instrument(span).await
    }

    /// Stop accepting connections and close the listener.
    ///
    /// Returns once the listening socket is closed. Requests whose handlers
    /// are already running are allowed to finish; their connections close
    /// afterwards. Calling this before `start`, or more than once, does
    /// nothing.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.lock_lifecycle();
            match *lifecycle {
                Lifecycle::Created => return,
                Lifecycle::Running => *lifecycle = Lifecycle::Stopped,
                Lifecycle::Stopped => {}
            }
        }

        self.inner.shutdown.cancel();
        let mut rx = self.inner.listener.subscribe();
        let _ = rx.wait_for(|s| *s == ListenerState::Closed).await;
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        lock(&self.inner.lifecycle)
    }

    async fn serve(&self) -> Result<(), DispatchError> {
        let inner = &self.inner;
        // Declared before the listener so it drops after it: waiters see
        // `Closed` only once the socket is gone.
        let _closed = ClosedOnDrop(inner);

        let listener = TcpListener::bind((inner.address.host(), inner.address.port()))
            .await
            .map_err(|source| {
                error!(error = %source, "failed to bind listener");
                DispatchError::Bind {
                    addr: inner.address.to_string(),
                    source,
                }
            })?;
        let local_addr = listener.local_addr().map_err(DispatchError::Listener)?;
        inner.listener.send_replace(ListenerState::Bound(local_addr));
        info!(%local_addr, routes = inner.routes.len(), "https dispatcher listening");

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                () = inner.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) if is_connection_error(&e) => {
                        debug!(error = %e, "accept failed for a single connection");
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "accept loop failed");
                        return Err(DispatchError::Listener(e));
                    }
                },
            };

            let conn_span = info_span!("connection", id = %Uuid::new_v4(), %peer);
            tokio::spawn(
                serve_connection(
                    inner.acceptor.clone(),
                    stream,
                    inner.routes.clone(),
                    inner.shutdown.clone(),
                )
                .instrument(conn_span),
            );
        }

        drop(listener);
        info!("https dispatcher stopped");
        Ok(())
    }
}

impl fmt::Debug for HttpsDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpsDispatcher")
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .field("routes", &self.inner.routes)
            .finish()
    }
}

fn lock(lifecycle: &Mutex<Lifecycle>) -> MutexGuard<'_, Lifecycle> {
    lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks the dispatcher stopped and publishes [`ListenerState::Closed`] when
/// dropped, whether `serve` returned or its future was dropped.
struct ClosedOnDrop<'a>(&'a Inner);

impl Drop for ClosedOnDrop<'_> {
    fn drop(&mut self) {
        *lock(&self.0.lifecycle) = Lifecycle::Stopped;
        self.0.listener.send_replace(ListenerState::Closed);
    }
}

/// Errors from `accept` that concern only the connection being accepted.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Handshake, then serve HTTP/1.1 requests on one connection until the client
/// closes it or shutdown drains it.
async fn serve_connection(
    acceptor: SslAcceptor,
    stream: TcpStream,
    routes: RouteTable,
    shutdown: CancellationToken,
) {
    let tls = match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&acceptor, stream)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            debug!(error = %e, "tls handshake rejected");
            return;
        }
        Err(_) => {
            debug!("tls handshake timed out");
            return;
        }
    };

    debug!(
        version = tls.ssl().version_str(),
        cipher_suite = tls.ssl().current_cipher().map(|c| c.name()),
        "tls handshake complete"
    );

    let service = service_fn(move |req| dispatch(routes.clone(), req));
    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .serve_connection(TokioIo::new(tls), service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(error = %e, "connection closed with error");
                }
                break;
            }
            () = shutdown.cancelled(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// Server side of the TLS handshake under the acceptor's policy.
async fn handshake(
    acceptor: &SslAcceptor,
    stream: TcpStream,
) -> Result<SslStream<TcpStream>, openssl::ssl::Error> {
    let ssl = Ssl::new(acceptor.context())?;
    let mut tls = SslStream::new(ssl, stream)?;
    Pin::new(&mut tls).accept().await?;
    Ok(tls)
}

/// Route one request by exact path. An `Err` tears the connection down.
async fn dispatch<B>(routes: RouteTable, req: hyper::Request<B>) -> Result<Response, HandlerError>
where
    B: hyper::body::Body<Data = Bytes>,
    B::Error: Into<HandlerError>,
{
    let Some(handler) = routes.get(req.uri().path()) else {
        debug!(method = %req.method(), path = req.uri().path(), "no route");
        return Ok(empty_response(StatusCode::NOT_FOUND));
    };

    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, MAX_REQUEST_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            debug!(method = %parts.method, path = parts.uri.path(), "request body too large");
            return Ok(empty_response(StatusCode::PAYLOAD_TOO_LARGE));
        }
        Err(e) => return Err(e),
    };
    let request = Request::from_parts(parts, body);
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    match handler.handle(request).await {
        Ok(response) => {
            debug!(%method, path, status = response.status().as_u16(), "request handled");
            Ok(response)
        }
        Err(e) => {
            warn!(%method, path, error = %e, "handler failed");
            Ok(empty_response(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}
