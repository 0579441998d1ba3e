//! Plain-text SMTP listener feeding the relay.
//!
//! The listener only collects envelopes: every completed `DATA` section is
//! handed to a [`MessageHandler`] and its [`Reply`] is written back to the
//! client verbatim. It applies no acceptance policy of its own beyond
//! command sequencing and the message size limit.

mod error;
mod session;

pub use error::IntakeError;

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::envelope::Envelope;
use crate::relay::Reply;

/// Hook invoked once per received message.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, envelope: &Envelope) -> Reply;
}

impl<F> MessageHandler for F
where
    F: Fn(&Envelope) -> Reply + Send + Sync,
{
    fn handle(&self, envelope: &Envelope) -> Reply {
        self(envelope)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeOptions {
    /// Name used in the greeting and the HELO/EHLO reply.
    pub hostname: String,
    /// Largest accepted message, in bytes after dot-unstuffing.
    pub max_message_size: usize,
    pub timeout: Option<Duration>,
}

impl Default for IntakeOptions {
    fn default() -> Self {
        Self {
            hostname: "mailrelay".to_string(),
            max_message_size: 83_886_080,
            timeout: Some(Duration::from_secs(300)),
        }
    }
}

pub struct IntakeServer {
    listener: TcpListener,
    options: Arc<IntakeOptions>,
    handler: Arc<dyn MessageHandler>,
}

impl IntakeServer {
    pub fn bind(
        addr: SocketAddr,
        options: IntakeOptions,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, IntakeError> {
        let listener = TcpListener::bind(addr).map_err(|source| IntakeError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            options: Arc::new(options),
            handler,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, IntakeError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one thread each.
    pub fn serve(self) -> Result<(), IntakeError> {
        info!(addr = %self.local_addr()?, "listening for mail");
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    warn!("accept failed: {err}");
                    continue;
                }
            };
            let options = Arc::clone(&self.options);
            let handler = Arc::clone(&self.handler);
            let spawned = thread::Builder::new()
                .name("intake-conn".to_string())
                .spawn(move || {
                    let peer = stream.peer_addr().ok();
                    debug!(peer = ?peer, "intake connection");
                    if let Err(err) = session::serve(stream, &options, handler.as_ref()) {
                        debug!(peer = ?peer, "intake connection ended: {err}");
                    }
                });
            if let Err(err) = spawned {
                warn!("could not spawn intake thread: {err}");
            }
        }
        Ok(())
    }
}
