//! Shared utilities for dispatcher integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use https_dispatcher::{DispatchError, HttpsDispatcher, TlsIdentity};
use hyper::{Method, StatusCode};
use hyper_util::rt::TokioIo;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode, SslVersion};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_openssl::SslStream;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How long a freshly spawned `start` gets to fail before it counts as started.
pub const STARTUP_WINDOW: Duration = Duration::from_secs(1);

/// A fresh self-signed ECDSA identity for `localhost` / `127.0.0.1`.
pub fn identity() -> TlsIdentity {
    let certified =
        rcgen::generate_simple_self_signed(vec!["localhost".into(), "127.0.0.1".into()]).unwrap();
    TlsIdentity::from_pem(
        certified.cert.pem().as_bytes(),
        certified.key_pair.serialize_pem().as_bytes(),
    )
    .unwrap()
}

/// A dispatcher whose `start` is running on its own task.
pub struct TestServer {
    pub dispatcher: HttpsDispatcher,
    pub addr: SocketAddr,
    task: JoinHandle<Result<(), DispatchError>>,
}

impl TestServer {
    /// Stop the dispatcher and return what `start` returned.
    pub async fn stop(self) -> Result<(), DispatchError> {
        self.dispatcher.stop().await;
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("start returned after stop")
            .expect("start task panicked")
    }
}

/// Spawn `start` and race it against the startup window: an early result is
/// a startup failure, silence means the listener is up.
pub async fn spawn_start(dispatcher: &HttpsDispatcher) -> Result<JoinHandle<Result<(), DispatchError>>, DispatchError> {
    let mut task = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.start().await }
    });
    tokio::select! {
        joined = &mut task => match joined.expect("start task panicked") {
            Ok(()) => panic!("start returned Ok without stop"),
            Err(e) => Err(e),
        },
        _ = tokio::time::sleep(STARTUP_WINDOW) => Ok(task),
    }
}

/// Construct and start a dispatcher on `url`.
pub async fn start(url: &str) -> TestServer {
    let dispatcher = HttpsDispatcher::new(url, identity()).unwrap();
    let task = spawn_start(&dispatcher).await.expect("dispatcher started");
    let addr = dispatcher.wait_bound().await.expect("listener bound");
    TestServer {
        dispatcher,
        addr,
        task,
    }
}

/// Start a dispatcher on an ephemeral loopback port.
pub async fn start_ephemeral() -> TestServer {
    start("https://127.0.0.1:0").await
}

// ---------------------------------------------------------------------------
// OpenSSL client
// ---------------------------------------------------------------------------

/// A client pinned to `min..=max` offering only `ciphers` (an OpenSSL
/// cipher string) below TLS 1.3. Server certificates are not verified.
pub fn client(min: SslVersion, max: SslVersion, ciphers: &str) -> SslConnector {
    let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    builder.set_min_proto_version(Some(min)).unwrap();
    builder.set_max_proto_version(Some(max)).unwrap();
    builder
        .set_cipher_list(&format!("{ciphers}:@SECLEVEL=0"))
        .unwrap();
    builder.build()
}

/// TLS 1.2 with ECDHE AES-128-GCM only.
pub fn default_client() -> SslConnector {
    client(
        SslVersion::TLS1_2,
        SslVersion::TLS1_2,
        "ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256",
    )
}

/// Complete a TLS handshake with the listener at `addr`.
pub async fn connect(
    connector: &SslConnector,
    addr: SocketAddr,
) -> Result<SslStream<TcpStream>, BoxError> {
    let tcp = TcpStream::connect(addr).await?;
    let ssl = connector.configure()?.into_ssl("localhost")?;
    let mut tls = SslStream::new(ssl, tcp)?;
    Pin::new(&mut tls).connect().await?;
    Ok(tls)
}

/// A completed HTTP exchange.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: hyper::HeaderMap,
    pub body: Bytes,
    /// Negotiated protocol, e.g. `TLSv1.2`.
    pub tls_version: &'static str,
    /// Negotiated cipher suite, by OpenSSL name.
    pub cipher: String,
}

/// Send one request over a new TLS connection.
pub async fn request(
    connector: &SslConnector,
    addr: SocketAddr,
    method: Method,
    path: &str,
    body: Bytes,
) -> Result<Reply, BoxError> {
    let tls = connect(connector, addr).await?;
    let tls_version = tls.ssl().version_str();
    let cipher = tls
        .ssl()
        .current_cipher()
        .map(|c| c.name().to_owned())
        .unwrap_or_default();

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tls)).await?;
    tokio::spawn(conn);

    let req = hyper::Request::builder()
        .method(method)
        .uri(path)
        .header(hyper::header::HOST, "localhost")
        .body(Full::new(body))?;
    let resp = sender.send_request(req).await?;

    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.into_body().collect().await?.to_bytes();
    Ok(Reply {
        status,
        headers,
        body,
        tls_version,
        cipher,
    })
}

/// `GET path` with [`default_client`].
pub async fn get(addr: SocketAddr, path: &str) -> Result<Reply, BoxError> {
    request(&default_client(), addr, Method::GET, path, Bytes::new()).await
}

// ---------------------------------------------------------------------------
// Raw handshake probes
// ---------------------------------------------------------------------------

pub const SSL_3_0: u16 = 0x0300;
pub const TLS_1_0: u16 = 0x0301;
pub const TLS_1_1: u16 = 0x0302;
pub const TLS_1_2: u16 = 0x0303;

pub const RC4_SUITES: &[u16] = &[
    0x0005, // TLS_RSA_WITH_RC4_128_SHA
    0xc007, // TLS_ECDHE_ECDSA_WITH_RC4_128_SHA
    0xc011, // TLS_ECDHE_RSA_WITH_RC4_128_SHA
];

pub const TRIPLE_DES_SUITES: &[u16] = &[
    0x000a, // TLS_RSA_WITH_3DES_EDE_CBC_SHA
    0xc012, // TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA
];

pub const ECDHE_AES_CBC_SUITES: &[u16] = &[
    0xc009, // TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA
    0xc00a, // TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA
    0xc013, // TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA
    0xc014, // TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA
];

pub const AES_SUITES: &[u16] = &[
    0x002f, // TLS_RSA_WITH_AES_128_CBC_SHA
    0x0035, // TLS_RSA_WITH_AES_256_CBC_SHA
    0xc009, // TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA
    0xc00a, // TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA
    0xc013, // TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA
    0xc014, // TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA
    0xc02f, // TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
    0xc02b, // TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
];

fn extension(kind: u16, data: &[u8]) -> Vec<u8> {
    let mut out = kind.to_be_bytes().to_vec();
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
    out
}

/// A ClientHello offering `suites` at `client_version`, carrying the
/// extensions an ECDHE handshake needs.
pub fn client_hello(client_version: u16, suites: &[u16]) -> Vec<u8> {
    let mut extensions = Vec::new();
    // supported_groups: x25519, secp256r1
    extensions.extend(extension(0x000a, &[0x00, 0x04, 0x00, 0x1d, 0x00, 0x17]));
    // ec_point_formats: uncompressed
    extensions.extend(extension(0x000b, &[0x01, 0x00]));
    // signature_algorithms: ecdsa_secp256r1_sha256, rsa_pss_rsae_sha256, rsa_pkcs1_sha256
    extensions.extend(extension(
        0x000d,
        &[0x00, 0x06, 0x04, 0x03, 0x08, 0x04, 0x04, 0x01],
    ));

    let mut body = client_version.to_be_bytes().to_vec();
    body.extend_from_slice(&[0x42; 32]);
    body.push(0);
    body.extend_from_slice(&((suites.len() * 2) as u16).to_be_bytes());
    for suite in suites {
        body.extend_from_slice(&suite.to_be_bytes());
    }
    body.extend_from_slice(&[0x01, 0x00]);
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut handshake = vec![0x01];
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);

    let mut record = vec![0x16];
    record.extend_from_slice(&client_version.min(TLS_1_0).to_be_bytes());
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}

/// Write `bytes` to the listener and return the first flight it answers
/// with (empty if it just closed the connection).
pub async fn probe(addr: SocketAddr, bytes: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();

    let mut buf = vec![0u8; 4096];
    match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
        Ok(Ok(n)) => {
            buf.truncate(n);
            buf
        }
        Ok(Err(_)) => Vec::new(),
        Err(_) => panic!("listener neither answered nor closed the probe"),
    }
}

/// The response starts with a handshake record carrying a ServerHello.
pub fn is_server_hello(response: &[u8]) -> bool {
    response.len() > 5 && response[0] == 0x16 && response[5] == 0x02
}

/// The response is a TLS alert record.
pub fn is_alert(response: &[u8]) -> bool {
    response.first() == Some(&0x15)
}

/// The handshake was refused: an alert or a bare close, never a ServerHello.
pub fn is_refused(response: &[u8]) -> bool {
    !is_server_hello(response) && (response.is_empty() || is_alert(response))
}
