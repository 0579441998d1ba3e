use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A mailbox as carried in the SMTP envelope, rendered as `user@host`.
/// Both parts empty is the null reverse-path (`<>`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MailAddress {
    pub user: String,
    pub host: String,
}

impl MailAddress {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }

    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.user.is_empty() && self.host.is_empty()
    }
}

impl fmt::Display for MailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            Ok(())
        } else if self.host.is_empty() {
            f.write_str(&self.user)
        } else {
            write!(f, "{}@{}", self.user, self.host)
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid mailbox {0:?}")]
pub struct AddressError(pub String);

impl FromStr for MailAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('<').trim_end_matches('>');
        if trimmed.is_empty() {
            return Ok(Self::null());
        }
        match trimmed.rsplit_once('@') {
            Some((user, host)) if !user.is_empty() && !host.is_empty() => {
                Ok(Self::new(user, host))
            }
            _ => Err(AddressError(s.to_string())),
        }
    }
}

/// One message handed over by the intake side. Read-only for the whole
/// relay attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub sender: MailAddress,
    pub recipients: Vec<MailAddress>,
    /// Raw message, CRLF delimited.
    pub body: Vec<u8>,
    /// Originating network address as reported by the intake side.
    pub remote_ip: String,
}

impl Envelope {
    pub fn new(sender: MailAddress, remote_ip: impl Into<String>) -> Self {
        Self {
            sender,
            remote_ip: remote_ip.into(),
            ..Self::default()
        }
    }

    pub fn with_recipient(mut self, recipient: MailAddress) -> Self {
        self.recipients.push(recipient);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Recipients rendered as `user@host`, in envelope order.
    pub fn recipient_addresses(&self) -> Vec<String> {
        self.recipients.iter().map(ToString::to_string).collect()
    }
}
