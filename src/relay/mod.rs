//! Outbound relay session.
//!
//! [`Relay::send`] runs one strictly sequential SMTP session per envelope:
//! dial (implicit TLS or plain), greeting, optional STARTTLS, optional
//! authentication, `MAIL`, one `RCPT` per recipient, `DATA`, `QUIT`. The
//! first failing step ends the attempt and is reported with its [`Stage`].

mod error;
mod options;
mod session;
mod types;

pub use error::{RelayError, SmtpError};
pub use options::RelayOptions;
pub use types::{RelayOutcome, Reply, SmtpReply, Stage};

use std::sync::Arc;
use std::time::Duration;

use native_tls::TlsConnector;
use tracing::{debug, info, warn};

use crate::admission::SenderGate;
use crate::envelope::Envelope;
use crate::intake::MessageHandler;

use session::SmtpSession;

/// Relays envelopes to the configured upstream server.
#[derive(Debug, Clone)]
pub struct Relay {
    options: RelayOptions,
    gate: Arc<SenderGate>,
}

impl Relay {
    pub fn new(options: RelayOptions, gate: Arc<SenderGate>) -> Self {
        Self { options, gate }
    }

    /// Relay one envelope. Blocked senders fail before any network activity;
    /// nothing is retried here.
    pub fn send(&self, envelope: &Envelope) -> Result<(), RelayError> {
        info!(
            from = %envelope.sender,
            starttls = self.options.starttls,
            remote_ip = %envelope.remote_ip,
            "starting email send"
        );

        if self.gate.is_blocked(&envelope.remote_ip) {
            info!(remote_ip = %envelope.remote_ip, "remote IP not allowed to send email");
            return Err(RelayError::AdmissionDenied {
                address: envelope.remote_ip.clone(),
            });
        }

        let connector = self
            .options
            .tls_connector()
            .map_err(|source| RelayError::connection(SmtpError::Tls { source }))?;

        let mut session =
            SmtpSession::connect(&self.options, &connector).map_err(RelayError::connection)?;
        debug!(stage = %Stage::Dial, tls = session.is_tls(), "connected");

        self.handshake(&mut session, &connector)?;
        self.transfer(&mut session, envelope)?;

        match session.quit() {
            Err(err) if is_quit_error(&err) => {
                return Err(RelayError::at(Stage::Quit)(err));
            }
            Err(err) => debug!(stage = %Stage::Quit, "closing reply accepted: {err}"),
            Ok(()) => {}
        }

        info!(recipients = envelope.recipients.len(), "email sent with no errors");
        Ok(())
    }

    /// Relay and summarize, for callers that only need the outcome.
    pub fn relay(&self, envelope: &Envelope) -> RelayOutcome {
        let result = self.send(envelope);
        if let Err(err) = &result {
            warn!(stage = ?err.stage(), "relay failed: {err}");
        }
        RelayOutcome::from(&result)
    }

    fn handshake(
        &self,
        session: &mut SmtpSession,
        connector: &TlsConnector,
    ) -> Result<(), RelayError> {
        let helo = self.options.helo_name();
        session
            .read_greeting()
            .and_then(|_| session.hello(&helo))
            .map_err(RelayError::at(Stage::Handshake))?;

        if self.options.starttls {
            session
                .starttls(connector, &helo)
                .map_err(RelayError::at(Stage::Upgrade))?;
            debug!(stage = %Stage::Upgrade, "TLS upgrade complete");
        }

        if let Some(auth) = self.options.authenticator() {
            session.auth(&auth).map_err(RelayError::at(Stage::Auth))?;
            debug!(stage = %Stage::Auth, mechanism = auth.mechanism(), "authenticated");
        }
        Ok(())
    }

    fn transfer(&self, session: &mut SmtpSession, envelope: &Envelope) -> Result<(), RelayError> {
        session
            .mail(&envelope.sender.to_string())
            .map_err(RelayError::at(Stage::Mail))?;

        for rcpt in envelope.recipient_addresses() {
            session.rcpt(&rcpt).map_err(RelayError::at(Stage::Rcpt))?;
        }

        let mut writer = session.data().map_err(RelayError::at(Stage::Data))?;
        let written = writer
            .write_all(&envelope.body)
            .and_then(|()| writer.write_all(b"\r\n"));
        // the sink is closed even after a failed write
        let closed = writer.close();
        finish_data(written, closed).map_err(RelayError::at(Stage::Data))
    }
}

impl MessageHandler for Relay {
    fn handle(&self, envelope: &Envelope) -> Reply {
        self.relay(envelope).reply()
    }
}

/// Hand an envelope to a plain-text SMTP listener the way a local mail
/// client would: no TLS, no authentication.
pub fn submit(
    host: &str,
    port: u16,
    envelope: &Envelope,
    timeout: Option<Duration>,
) -> Result<(), SmtpError> {
    let mut session = SmtpSession::connect_plain(host, port, timeout)?;
    session.read_greeting()?;
    session.hello("localhost")?;
    session.mail(&envelope.sender.to_string())?;
    for rcpt in envelope.recipient_addresses() {
        session.rcpt(&rcpt)?;
    }
    let mut writer = session.data()?;
    writer.write_all(&envelope.body)?;
    writer.close()?;
    session.quit()
}

/// A failed body write outranks whatever closing the data sink reported.
fn finish_data(
    written: Result<(), SmtpError>,
    closed: Result<SmtpReply, SmtpError>,
) -> Result<(), SmtpError> {
    written?;
    closed.map(|_| ())
}

/// Whether the reply to `QUIT` means the delivery failed. 221 and 250 both
/// count as success: some servers answer the final command with a plain OK
/// or close before the acknowledgment arrives.
pub fn is_quit_error(err: &SmtpError) -> bool {
    !matches!(err.reply_code(), Some(221 | 250))
}
