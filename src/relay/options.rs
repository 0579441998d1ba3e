use std::borrow::Cow;
use std::time::Duration;

use native_tls::TlsConnector;

use crate::auth::Authenticator;

/// Everything the session needs to reach and talk to the upstream server.
/// Built once per relay attempt and never mutated by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    pub host: String,
    pub port: u16,
    /// Connect in plain text and upgrade; `false` means implicit TLS.
    pub starttls: bool,
    pub login_auth: bool,
    pub username: String,
    pub password: String,
    pub helo: Option<String>,
    pub skip_cert_verify: bool,
    pub timeout: Option<Duration>,
}

impl RelayOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            starttls: false,
            login_auth: false,
            username: String::new(),
            password: String::new(),
            helo: None,
            skip_cert_verify: false,
            timeout: Some(Duration::from_secs(300)),
        }
    }

    /// Name announced in EHLO/HELO. Falls back to `localhost` like most
    /// client libraries do when no identity is configured.
    pub fn helo_name(&self) -> Cow<'_, str> {
        self.helo
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .map(Cow::Borrowed)
            .unwrap_or(Cow::Borrowed("localhost"))
    }

    pub fn authenticator(&self) -> Option<Authenticator> {
        Authenticator::select(self.login_auth, &self.username, &self.password)
    }

    /// Same verification policy for implicit TLS and STARTTLS: the server
    /// name is the configured host, chain checks can be switched off for
    /// legacy upstreams with self-signed certificates.
    pub fn tls_connector(&self) -> Result<TlsConnector, native_tls::Error> {
        TlsConnector::builder()
            .danger_accept_invalid_certs(self.skip_cert_verify)
            .danger_accept_invalid_hostnames(self.skip_cert_verify)
            .build()
    }
}
