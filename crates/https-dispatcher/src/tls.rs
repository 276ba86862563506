//! TLS security policy and certificate material.
//!
//! [`TlsPolicy`] is the single place that decides which protocol versions and
//! cipher suites the listener will negotiate. The dispatcher never consults
//! versions or suites anywhere else.
//!
//! The strict policy accepts TLS 1.0 and every later version, with ECDHE
//! suites using AES in GCM or CBC mode. SSL 3.0 and the RC4 and 3DES suites
//! are refused during the handshake, whatever the client insists on.

use std::fmt;
use std::path::Path;

use openssl::error::ErrorStack;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{select_next_proto, AlpnError, SslAcceptor, SslMethod, SslOptions, SslVersion};
use openssl::x509::X509;

use crate::error::DispatchError;

/// ALPN protocol list in wire format. HTTP/2 is not served.
const ALPN_HTTP_1_1: &[u8] = b"\x08http/1.1";

/// TLS 1.0 to 1.2 cipher suites the strict policy accepts, by OpenSSL name,
/// in server preference order.
pub const APPROVED_CIPHER_SUITES: &[&str] = &[
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES256-SHA",
    "ECDHE-RSA-AES256-SHA",
    "ECDHE-ECDSA-AES128-SHA",
    "ECDHE-RSA-AES128-SHA",
];

/// TLS 1.3 cipher suites the strict policy accepts.
pub const APPROVED_TLS13_CIPHER_SUITES: &[&str] = &["TLS_AES_256_GCM_SHA384", "TLS_AES_128_GCM_SHA256"];

/// A TLS protocol version a policy can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    Tls1_0,
    Tls1_1,
    Tls1_2,
    Tls1_3,
}

impl ProtocolVersion {
    fn ssl_version(self) -> SslVersion {
        match self {
            ProtocolVersion::Tls1_0 => SslVersion::TLS1,
            ProtocolVersion::Tls1_1 => SslVersion::TLS1_1,
            ProtocolVersion::Tls1_2 => SslVersion::TLS1_2,
            ProtocolVersion::Tls1_3 => SslVersion::TLS1_3,
        }
    }
}

/// Protocol versions and cipher suites a listener will negotiate.
///
/// Fixed per dispatcher instance; there is no per-route or per-peer override.
#[derive(Debug, Clone)]
pub struct TlsPolicy {
    min_version: ProtocolVersion,
    max_version: Option<ProtocolVersion>,
    cipher_suites: Vec<String>,
    tls13_cipher_suites: Vec<String>,
}

impl TlsPolicy {
    /// The default policy: TLS 1.0 and above, no upper bound, with
    /// [`APPROVED_CIPHER_SUITES`] and [`APPROVED_TLS13_CIPHER_SUITES`].
    pub fn strict() -> Self {
        Self::new(
            ProtocolVersion::Tls1_0,
            None,
            APPROVED_CIPHER_SUITES.iter().map(|s| s.to_string()).collect(),
            APPROVED_TLS13_CIPHER_SUITES.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// A policy with an explicit version range and suite allow-lists. Suites
    /// are OpenSSL names; `max_version` of `None` leaves the range open.
    pub fn new(
        min_version: ProtocolVersion,
        max_version: Option<ProtocolVersion>,
        cipher_suites: Vec<String>,
        tls13_cipher_suites: Vec<String>,
    ) -> Self {
        Self {
            min_version,
            max_version,
            cipher_suites,
            tls13_cipher_suites,
        }
    }

    /// Lowest protocol version accepted.
    pub fn min_version(&self) -> ProtocolVersion {
        self.min_version
    }

    /// Highest protocol version accepted, if capped.
    pub fn max_version(&self) -> Option<ProtocolVersion> {
        self.max_version
    }

    /// Returns `true` if `version` falls inside the policy's range.
    pub fn permits(&self, version: ProtocolVersion) -> bool {
        version >= self.min_version && self.max_version.map_or(true, |max| version <= max)
    }

    /// The TLS 1.0 to 1.2 allow-list, in preference order.
    pub fn cipher_suites(&self) -> &[String] {
        &self.cipher_suites
    }

    /// The TLS 1.3 allow-list, in preference order.
    pub fn tls13_cipher_suites(&self) -> &[String] {
        &self.tls13_cipher_suites
    }

    /// Returns `true` if `suite` is on either allow-list.
    pub fn allows(&self, suite: &str) -> bool {
        self.cipher_suites
            .iter()
            .chain(&self.tls13_cipher_suites)
            .any(|s| s == suite)
    }

    /// The OpenSSL cipher string for TLS 1.0 to 1.2.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::TlsPolicy`] if the allow-list is empty or an
    /// entry is not a single suite name.
    pub fn cipher_list(&self) -> Result<String, DispatchError> {
        if self.cipher_suites.is_empty() {
            return Err(DispatchError::TlsPolicy("cipher suite allow-list is empty".into()));
        }
        if let Some(bad) = self
            .cipher_suites
            .iter()
            .chain(&self.tls13_cipher_suites)
            .find(|s| !is_suite_name(s))
        {
            return Err(DispatchError::TlsPolicy(format!(
                "{bad:?} is not a cipher suite name"
            )));
        }

        let mut list = self.cipher_suites.join(":");
        // OpenSSL 3 disables TLS 1.0 and 1.1 above security level 0.
        if self.min_version < ProtocolVersion::Tls1_2 {
            list.push_str(":@SECLEVEL=0");
        }
        Ok(list)
    }

    /// Build the OpenSSL acceptor enforcing this policy with `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::TlsPolicy`] if the version range or suites
    /// are unusable, or [`DispatchError::TlsMaterial`] if the certificate
    /// and key are rejected or do not match.
    pub fn acceptor(&self, identity: &TlsIdentity) -> Result<SslAcceptor, DispatchError> {
        if let Some(max) = self.max_version {
            if max < self.min_version {
                return Err(DispatchError::TlsPolicy(format!(
                    "maximum version {max:?} is below minimum {:?}",
                    self.min_version
                )));
            }
        }
        let cipher_list = self.cipher_list()?;

        let policy_err = |e: ErrorStack| DispatchError::TlsPolicy(e.to_string());
        let material_err = |e: ErrorStack| DispatchError::TlsMaterial(format!("certificate rejected: {e}"));

        let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls()).map_err(policy_err)?;
        builder.clear_options(SslOptions::NO_TLSV1 | SslOptions::NO_TLSV1_1);
        builder.set_options(SslOptions::NO_SSLV3 | SslOptions::CIPHER_SERVER_PREFERENCE);
        builder
            .set_min_proto_version(Some(self.min_version.ssl_version()))
            .map_err(policy_err)?;
        builder
            .set_max_proto_version(self.max_version.map(ProtocolVersion::ssl_version))
            .map_err(policy_err)?;
        builder.set_cipher_list(&cipher_list).map_err(policy_err)?;
        builder
            .set_ciphersuites(&self.tls13_cipher_suites.join(":"))
            .map_err(policy_err)?;
        builder.set_alpn_select_callback(|_, client| {
            select_next_proto(ALPN_HTTP_1_1, client).ok_or(AlpnError::NOACK)
        });

        let (leaf, chain) = identity
            .cert_chain
            .split_first()
            .ok_or_else(|| DispatchError::TlsMaterial("empty certificate chain".into()))?;
        builder.set_certificate(leaf).map_err(material_err)?;
        for cert in chain {
            builder.add_extra_chain_cert(cert.clone()).map_err(material_err)?;
        }
        builder.set_private_key(&identity.key).map_err(material_err)?;
        builder.check_private_key().map_err(|e| {
            DispatchError::TlsMaterial(format!("private key does not match certificate: {e}"))
        })?;

        Ok(builder.build())
    }
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

fn is_suite_name(name: &str) -> bool {
    name.contains(['-', '_'])
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Certificate chain and private key presented by the listener.
#[derive(Clone)]
pub struct TlsIdentity {
    cert_chain: Vec<X509>,
    key: PKey<Private>,
}

impl TlsIdentity {
    /// Parse PEM-encoded certificate chain and private key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::TlsMaterial`] if either input is unparsable
    /// or contains no certificate / key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, DispatchError> {
        let cert_chain = X509::stack_from_pem(cert_pem).map_err(|e| {
            DispatchError::TlsMaterial(format!("failed to parse certificate chain: {e}"))
        })?;
        if cert_chain.is_empty() {
            return Err(DispatchError::TlsMaterial(
                "no certificate found in PEM data".into(),
            ));
        }

        let key = PKey::private_key_from_pem(key_pem).map_err(|e| {
            DispatchError::TlsMaterial(format!("no private key found in PEM data: {e}"))
        })?;

        Ok(Self { cert_chain, key })
    }

    /// Read and parse PEM files from disk.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::TlsMaterial`] if a file cannot be read or
    /// its contents cannot be parsed.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, DispatchError> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|e| {
                DispatchError::TlsMaterial(format!("failed to read {}: {e}", path.display()))
            })
        };
        Self::from_pem(&read(cert_path)?, &read(key_path)?)
    }

    /// Number of certificates in the chain.
    pub fn chain_len(&self) -> usize {
        self.cert_chain.len()
    }
}

impl fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("chain_len", &self.cert_chain.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}
