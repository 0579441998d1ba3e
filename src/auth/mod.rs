//! SASL mechanisms offered by the relay client.
//!
//! PLAIN and LOGIN are two variants of the same capability: given a server
//! challenge and a "more data expected" flag, produce the next response. The
//! variant is picked once per session by [`Authenticator::select`].

mod error;
mod login;
mod plain;

pub use error::AuthError;
pub use login::LoginAuth;
pub use plain::PlainAuth;

/// What the client knows about the upstream when authentication starts.
#[derive(Debug, Clone, Copy)]
pub struct ServerInfo<'a> {
    pub name: &'a str,
    pub tls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authenticator {
    Plain(PlainAuth),
    Login(LoginAuth),
}

impl Authenticator {
    /// No username means no authentication at all.
    pub fn select(use_login: bool, username: &str, password: &str) -> Option<Self> {
        if username.is_empty() {
            return None;
        }
        Some(if use_login {
            Self::Login(LoginAuth::new(username, password))
        } else {
            Self::Plain(PlainAuth::new(username, password))
        })
    }

    pub fn mechanism(&self) -> &'static str {
        match self {
            Self::Plain(_) => "PLAIN",
            Self::Login(_) => "LOGIN",
        }
    }

    /// Initial response sent inline with the `AUTH` command, if any.
    pub fn start(&self, server: &ServerInfo<'_>) -> Result<Option<Vec<u8>>, AuthError> {
        match self {
            Self::Plain(plain) => plain.initial_response(server).map(Some),
            Self::Login(_) => Ok(None),
        }
    }

    pub fn next(&self, challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>, AuthError> {
        match self {
            // PLAIN has nothing left to say after the initial response
            Self::Plain(_) if more => Err(AuthError::UnexpectedChallenge),
            Self::Plain(_) => Ok(None),
            Self::Login(login) => login.next(challenge, more),
        }
    }
}
