use std::fmt;

use super::error::RelayError;

/// Steps of the outbound session, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Dial,
    Upgrade,
    Handshake,
    Auth,
    Mail,
    Rcpt,
    Data,
    Quit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dial => "dial",
            Self::Upgrade => "upgrade",
            Self::Handshake => "handshake",
            Self::Auth => "auth",
            Self::Mail => "mail",
            Self::Rcpt => "rcpt",
            Self::Data => "data",
            Self::Quit => "quit",
        })
    }
}

/// A raw SMTP reply, preserving the numeric status code and every text line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpReply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl SmtpReply {
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }
}

/// Reply handed back to the intake side for one accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

/// Summary of one relay attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Sent,
    Rejected(String),
    ConnectionFailed(String),
    ProtocolFailed(Stage, String),
}

impl RelayOutcome {
    /// Reply code and text for the intake side: 250 on success, a permanent
    /// failure carrying the error text otherwise.
    pub fn reply(&self) -> Reply {
        match self {
            Self::Sent => Reply::new(250, "OK: queued"),
            Self::Rejected(reason)
            | Self::ConnectionFailed(reason)
            | Self::ProtocolFailed(_, reason) => Reply::new(554, format!("Error: {reason}")),
        }
    }
}

impl From<&Result<(), RelayError>> for RelayOutcome {
    fn from(result: &Result<(), RelayError>) -> Self {
        match result {
            Ok(()) => Self::Sent,
            Err(err @ RelayError::AdmissionDenied { .. }) => Self::Rejected(err.to_string()),
            Err(err @ RelayError::ConnectionFailed { .. }) => {
                Self::ConnectionFailed(err.to_string())
            }
            Err(err @ RelayError::ProtocolFailed { stage, .. }) => {
                Self::ProtocolFailed(*stage, err.to_string())
            }
        }
    }
}
