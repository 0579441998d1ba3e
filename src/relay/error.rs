use std::io;

use thiserror::Error;

use crate::auth::AuthError;

use super::types::Stage;

/// Failure of a single command/reply exchange with the upstream server.
#[derive(Debug, Error)]
pub enum SmtpError {
    #[error("connection to {host} failed: {source}")]
    Connect {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {source}")]
    Io {
        #[source]
        source: io::Error,
    },
    #[error("TLS handshake failed: {source}")]
    Tls {
        #[source]
        source: native_tls::Error,
    },
    /// The server answered with a status code the exchange did not expect.
    #[error("{code} {message}")]
    Reply { code: u16, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl SmtpError {
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            Self::Reply { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<io::Error> for SmtpError {
    fn from(source: io::Error) -> Self {
        Self::Io { source }
    }
}

/// Outcome of a failed relay attempt, tagged with where it went wrong.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The originating address is not in the allowed sender set. Raised
    /// before any socket is opened.
    #[error("Remote IP of {address} not allowed to send email.")]
    AdmissionDenied { address: String },
    #[error("connection failed: {source}")]
    ConnectionFailed {
        #[source]
        source: SmtpError,
    },
    #[error("{stage} error: {source}")]
    ProtocolFailed {
        stage: Stage,
        #[source]
        source: SmtpError,
    },
}

impl RelayError {
    pub(crate) fn connection(source: SmtpError) -> Self {
        Self::ConnectionFailed { source }
    }

    pub(crate) fn at(stage: Stage) -> impl FnOnce(SmtpError) -> Self {
        move |source| Self::ProtocolFailed { stage, source }
    }

    /// Stage the attempt stopped at; `None` when the network was never touched.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::AdmissionDenied { .. } => None,
            Self::ConnectionFailed { .. } => Some(Stage::Dial),
            Self::ProtocolFailed { stage, .. } => Some(*stage),
        }
    }

    pub fn is_unknown_auth_prompt(&self) -> bool {
        matches!(
            self,
            Self::ProtocolFailed {
                source: SmtpError::Auth(AuthError::UnknownPrompt { .. }),
                ..
            }
        )
    }
}
