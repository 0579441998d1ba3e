#![forbid(unsafe_code)]
//! mailrelay: forwards mail received on a local listener to one upstream
//! SMTP server over implicit TLS or STARTTLS, with optional PLAIN or LOGIN
//! authentication and an IP-based sender gate.

pub mod admission;
pub mod auth;
mod command;
pub mod config;
pub mod envelope;
pub mod intake;
pub mod reference;
pub mod relay;
mod transport;

pub use admission::{AdmissionError, SenderGate, SenderRules};
pub use auth::{AuthError, Authenticator, LoginAuth, PlainAuth};
pub use config::{Config, ConfigError};
pub use envelope::{Envelope, MailAddress};
pub use intake::{IntakeError, IntakeOptions, IntakeServer, MessageHandler};
pub use reference::{ReferenceServer, ServerError, ServerOptions, Transcript};
pub use relay::{Relay, RelayError, RelayOptions, RelayOutcome, Reply, SmtpError, Stage};
