use super::{AuthError, ServerInfo};

/// PLAIN: credentials sent in a single initial response,
/// `authzid NUL authcid NUL passwd` with an empty authorization identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainAuth {
    username: String,
    password: String,
}

impl PlainAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Refuses to expose the password on a clear-text link unless the peer is
    /// the local host.
    pub fn initial_response(&self, server: &ServerInfo<'_>) -> Result<Vec<u8>, AuthError> {
        if !server.tls && !is_localhost(server.name) {
            return Err(AuthError::InsecureConnection);
        }
        let mut resp = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        resp.push(0);
        resp.extend_from_slice(self.username.as_bytes());
        resp.push(0);
        resp.extend_from_slice(self.password.as_bytes());
        Ok(resp)
    }
}

fn is_localhost(name: &str) -> bool {
    matches!(name, "localhost" | "127.0.0.1" | "::1")
}
